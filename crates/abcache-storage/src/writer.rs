//! Cache write path.

use std::path::Path;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::backend::{StreamSource, MULTIPART_PART_SIZE};
use crate::error::{StorageError, StorageResult};
use crate::key::{content_type_for, derive_key};
use crate::lifecycle::{CloudCache, ReadyHandle};

/// Files at or below this size are read into memory and sent in one put.
pub const STREAM_THRESHOLD_BYTES: u64 = MULTIPART_PART_SIZE as u64;

/// Data to be cached.
pub enum CachePayload {
    /// Whole object in memory; sent with a single put.
    Buffer(Vec<u8>),
    /// Streamed in parts; memory use is bounded by the part size.
    Stream(StreamSource),
}

impl CachePayload {
    pub fn stream(source: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Stream(Box::new(source))
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Stream(_) => "stream",
        }
    }
}

impl From<Vec<u8>> for CachePayload {
    fn from(data: Vec<u8>) -> Self {
        Self::Buffer(data)
    }
}

impl std::fmt::Debug for CachePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffer(data) => f.debug_tuple("Buffer").field(&data.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl CloudCache {
    /// Cache an item's archive at `archives/{item_id}.zip`. Returns the key.
    ///
    /// The object is fully committed when this returns `Ok`. Concurrent
    /// stores for the same item race at the store; the last one wins.
    pub async fn store(&self, item_id: &str, payload: CachePayload) -> StorageResult<String> {
        self.store_at(item_id, None, payload).await
    }

    /// Cache a named file belonging to an item at
    /// `items/{item_id}/{sanitized filename}`. Returns the key.
    pub async fn store_named(
        &self,
        item_id: &str,
        filename: &str,
        payload: CachePayload,
    ) -> StorageResult<String> {
        self.store_at(item_id, Some(filename), payload).await
    }

    /// Cache a local file, streaming it when it is larger than
    /// [`STREAM_THRESHOLD_BYTES`]. Without a filename the file is stored as
    /// the item's archive.
    pub async fn store_file(
        &self,
        item_id: &str,
        filename: Option<&str>,
        path: impl AsRef<Path>,
    ) -> StorageResult<String> {
        let path = path.as_ref();
        self.ready()?;
        derive_key(item_id, filename)?;

        let mut file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        debug!(path = %path.display(), bytes = size, "Caching local file");

        let payload = if size <= STREAM_THRESHOLD_BYTES {
            let mut data = Vec::with_capacity(size as usize);
            file.read_to_end(&mut data).await?;
            CachePayload::Buffer(data)
        } else {
            CachePayload::stream(file)
        };

        self.store_at(item_id, filename, payload).await
    }

    async fn store_at(
        &self,
        item_id: &str,
        filename: Option<&str>,
        payload: CachePayload,
    ) -> StorageResult<String> {
        let handle = self.ready()?;
        let key = derive_key(item_id, filename)?;
        let content_type = content_type_for(&key);
        let shape = payload.shape();
        let started = Instant::now();

        let bytes = upload(&handle, &key, payload, content_type)
            .await
            .map_err(into_upload_error)?;

        info!(
            key = %key,
            bytes = bytes,
            shape = shape,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cached object"
        );
        Ok(key)
    }
}

async fn upload(
    handle: &ReadyHandle,
    key: &str,
    payload: CachePayload,
    content_type: &str,
) -> StorageResult<u64> {
    match payload {
        CachePayload::Buffer(data) => {
            let len = data.len() as u64;
            handle
                .backend
                .put_object(&handle.bucket, key, data, content_type)
                .await?;
            Ok(len)
        }
        CachePayload::Stream(source) => {
            handle
                .backend
                .multipart_upload(&handle.bucket, key, source, content_type)
                .await
        }
    }
}

fn into_upload_error(e: StorageError) -> StorageError {
    match e {
        StorageError::UploadFailed(_) => e,
        other => StorageError::upload_failed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::CloudStorageConfig;
    use crate::lifecycle::ConnectionState;
    use crate::memory::{MemoryBackend, MemoryConnector};

    const BUCKET: &str = "audiobooks";

    async fn ready_cache(backend: MemoryBackend) -> (CloudCache, Arc<MemoryBackend>) {
        let backend = Arc::new(backend);
        let cache = CloudCache::new(Arc::new(MemoryConnector::new(Arc::clone(&backend))));
        let config = CloudStorageConfig {
            enabled: true,
            region: Some("us-east-1".to_string()),
            bucket: Some(BUCKET.to_string()),
            access_key: Some("ak".to_string()),
            secret_key: Some("sk".to_string()),
            endpoint_url: None,
        };
        cache.initialize(&config).await.expect("memory init succeeds");
        (cache, backend)
    }

    #[tokio::test]
    async fn test_store_requires_ready() {
        let backend = Arc::new(MemoryBackend::with_bucket(BUCKET));
        let cache = CloudCache::new(Arc::new(MemoryConnector::new(Arc::clone(&backend))));

        let err = cache.store("li_1", b"zip".to_vec().into()).await.unwrap_err();

        assert!(err.is_not_initialized());
        assert_eq!(backend.calls.put_object.load(Ordering::SeqCst), 0);
        assert_eq!(backend.calls.multipart_upload.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_buffer_puts_archive() {
        let (cache, backend) = ready_cache(MemoryBackend::with_bucket(BUCKET)).await;

        let key = cache
            .store("li_1", CachePayload::Buffer(b"PK\x03\x04".to_vec()))
            .await
            .unwrap();

        assert_eq!(key, "archives/li_1.zip");
        assert_eq!(backend.object(BUCKET, &key).unwrap(), b"PK\x03\x04");
        assert_eq!(backend.content_type(BUCKET, &key).as_deref(), Some("application/zip"));
        assert_eq!(backend.calls.put_object.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls.multipart_upload.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_stream_uses_multipart() {
        let (cache, backend) =
            ready_cache(MemoryBackend::with_bucket(BUCKET).with_part_size(3)).await;
        let data = b"abcdefghij".to_vec();

        let key = cache
            .store("li_2", CachePayload::stream(std::io::Cursor::new(data.clone())))
            .await
            .unwrap();

        assert_eq!(backend.object(BUCKET, &key).unwrap(), data);
        assert_eq!(backend.calls.multipart_upload.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls.parts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_store_named_sanitizes_filename() {
        let (cache, backend) = ready_cache(MemoryBackend::with_bucket(BUCKET)).await;

        let key = cache
            .store_named("li_3", "My Book (Part 1)/Chapter.MP3", b"id3".to_vec().into())
            .await
            .unwrap();

        assert_eq!(key, "items/li_3/my-book-part-1/chapter.mp3");
        assert_eq!(backend.content_type(BUCKET, &key).as_deref(), Some("audio/mpeg"));
    }

    #[tokio::test]
    async fn test_store_rejects_empty_key_body() {
        let (cache, backend) = ready_cache(MemoryBackend::with_bucket(BUCKET)).await;

        let err = cache
            .store_named("li_3", "===.WAV", b"riff".to_vec().into())
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::InvalidKey(_)));
        assert_eq!(backend.object_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_is_upload_error() {
        let (cache, backend) =
            ready_cache(MemoryBackend::with_bucket(BUCKET).with_part_size(2)).await;
        backend.fail_uploads(true);

        let err = cache
            .store("li_4", CachePayload::stream(&b"abcdef"[..]))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::UploadFailed(_)));
        assert_eq!(backend.object_count(), 0);
        assert_eq!(cache.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_read_error_is_upload_error() {
        let (cache, backend) = ready_cache(MemoryBackend::with_bucket(BUCKET)).await;
        let source = tokio_test::io::Builder::new()
            .read(b"partial")
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "disk gone"))
            .build();

        let err = cache
            .store("li_5", CachePayload::stream(source))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::UploadFailed(_)));
        assert_eq!(backend.object_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_upload_leaves_nothing() {
        let (cache, backend) =
            ready_cache(MemoryBackend::with_bucket(BUCKET).with_part_size(4)).await;
        let (mut writer, reader) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut writer, b"abcdefgh")
            .await
            .unwrap();

        // Writer stays open, so the upload waits for more data until cancelled.
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            cache.store("li_6", CachePayload::stream(reader)),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(backend.object_count(), 0);
        assert_eq!(cache.state(), ConnectionState::Ready);
        drop(writer);
    }

    #[tokio::test]
    async fn test_store_file_small_is_buffered() {
        let (cache, backend) = ready_cache(MemoryBackend::with_bucket(BUCKET)).await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"archive bytes").unwrap();

        let key = cache.store_file("li_7", None, file.path()).await.unwrap();

        assert_eq!(key, "archives/li_7.zip");
        assert_eq!(backend.object(BUCKET, &key).unwrap(), b"archive bytes");
        assert_eq!(backend.calls.put_object.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_file_empty_is_single_put() {
        let (cache, backend) = ready_cache(MemoryBackend::with_bucket(BUCKET)).await;
        let file = tempfile::NamedTempFile::new().unwrap();

        let key = cache
            .store_file("li_7", Some("notes.json"), file.path())
            .await
            .unwrap();

        assert_eq!(key, "items/li_7/notes.json");
        assert!(backend.object(BUCKET, &key).unwrap().is_empty());
        assert_eq!(backend.content_type(BUCKET, &key).as_deref(), Some("application/json"));
        assert_eq!(backend.calls.put_object.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls.multipart_upload.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_file_missing_is_io_error() {
        let (cache, _) = ready_cache(MemoryBackend::with_bucket(BUCKET)).await;

        let err = cache
            .store_file("li_8", None, "/definitely/not/here.zip")
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Io(_)));
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let (cache, backend) = ready_cache(MemoryBackend::with_bucket(BUCKET)).await;

        cache.store("li_9", b"first".to_vec().into()).await.unwrap();
        cache.store("li_9", b"second".to_vec().into()).await.unwrap();

        assert_eq!(backend.object(BUCKET, "archives/li_9.zip").unwrap(), b"second");
    }
}
