//! Live S3 integration tests.
//!
//! Require a reachable bucket configured through `CLOUD_STORAGE_*` variables.
//! Run with: `cargo test -p abcache-storage --test s3_integration -- --ignored`

use std::time::Duration;

use abcache_storage::{CachePayload, CloudCache, CloudStorageConfig, ConnectionState};

async fn live_cache() -> CloudCache {
    dotenvy::dotenv().ok();

    let config = CloudStorageConfig::from_env();
    assert!(config.enabled, "CLOUD_STORAGE_ENABLED must be set for live tests");

    let cache = CloudCache::s3();
    let state = cache
        .initialize(&config)
        .await
        .expect("Failed to initialize cloud storage");
    assert_eq!(state, ConnectionState::Ready);
    cache
}

/// Test bucket probe and idempotent initialization.
#[tokio::test]
#[ignore = "requires S3 credentials"]
async fn test_s3_initialize() {
    let cache = live_cache().await;
    let again = cache
        .initialize(&CloudStorageConfig::from_env())
        .await
        .expect("Second initialize should be a no-op");
    assert_eq!(again, ConnectionState::Ready);
}

/// Test buffer upload, existence and signed URL.
#[tokio::test]
#[ignore = "requires S3 credentials"]
async fn test_s3_store_and_sign() {
    let cache = live_cache().await;
    let item_id = "integration_test_buffer";

    let key = cache
        .store(item_id, CachePayload::Buffer(b"integration test archive".to_vec()))
        .await
        .expect("Failed to store archive");
    assert_eq!(key, "archives/integration_test_buffer.zip");

    assert!(cache.exists(item_id).await.unwrap());

    let signed = cache
        .signed_url(item_id, Some(Duration::from_secs(300)))
        .await
        .expect("Failed to sign URL")
        .expect("Object should be present");
    println!("Signed URL: {}", signed.url);
    assert!(signed.url.contains("X-Amz-Signature"));
    assert!(signed.url.contains("X-Amz-Expires=300"));

    cache.remove(item_id, None).await.expect("Failed to remove");
    assert!(!cache.exists(item_id).await.unwrap());
}

/// Test multipart upload of a payload spanning several parts.
#[tokio::test]
#[ignore = "requires S3 credentials"]
async fn test_s3_multipart_upload() {
    let cache = live_cache().await;
    let item_id = "integration_test_stream";
    let data: Vec<u8> = (0..=255u8)
        .cycle()
        .take(abcache_storage::MULTIPART_PART_SIZE * 2 + 1024)
        .collect();

    let key = cache
        .store(item_id, CachePayload::stream(std::io::Cursor::new(data)))
        .await
        .expect("Failed to stream archive");

    assert!(cache.exists(item_id).await.unwrap());
    println!("Uploaded multipart object: {}", key);

    cache.remove(item_id, None).await.expect("Failed to remove");
}

/// Test signed URL for an uncached item.
#[tokio::test]
#[ignore = "requires S3 credentials"]
async fn test_s3_signed_url_absent() {
    let cache = live_cache().await;
    let signed = cache
        .signed_url("integration_test_never_written", None)
        .await
        .expect("Absent object is not an error");
    assert!(signed.is_none());
}
