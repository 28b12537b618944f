//! Object-store capability boundary.
//!
//! The cache layer never talks to a network client directly; it goes through
//! [`ObjectStoreBackend`], obtained from a [`Connector`] during initialization.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::S3Settings;
use crate::error::StorageResult;

/// A streamable upload source.
pub type StreamSource = Box<dyn AsyncRead + Send + Unpin>;

/// Part size for multipart uploads (8 MiB, above the S3 5 MiB minimum).
pub const MULTIPART_PART_SIZE: usize = 8 * 1024 * 1024;

/// Metadata returned by a successful existence probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Size in bytes
    pub size: u64,
    /// Content type recorded at upload, if any
    pub content_type: Option<String>,
}

/// Operations the cache layer needs from an S3-style object store.
///
/// Error contract:
/// - `head_object` fails with `StorageError::NotFound` for a missing key and
///   `StorageError::Backend` for anything else.
/// - `put_object` / `multipart_upload` fail with `StorageError::UploadFailed`.
///   A failed or dropped multipart upload must not leave a retrievable object.
/// - `head_bucket` fails with `StorageError::Connectivity`.
/// - `presign_get` fails with `StorageError::SignFailed`.
#[async_trait]
pub trait ObjectStoreBackend: Send + Sync {
    /// Store `body` at `key` in a single request.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()>;

    /// Stream `source` to `key` in parts. Returns the number of bytes uploaded.
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        source: StreamSource,
        content_type: &str,
    ) -> StorageResult<u64>;

    /// Metadata-only existence probe.
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta>;

    /// Bucket reachability probe.
    async fn head_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Time-limited GET URL for a single object.
    async fn presign_get(&self, bucket: &str, key: &str, expires_in: Duration)
        -> StorageResult<String>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;
}

/// Builds a backend handle from validated settings.
///
/// Construction must not perform network I/O; reachability is probed
/// separately with [`ObjectStoreBackend::head_bucket`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, settings: &S3Settings) -> StorageResult<Arc<dyn ObjectStoreBackend>>;
}

/// Read up to `limit` bytes from `source`. A short result means end of stream.
pub(crate) async fn read_part(source: &mut StreamSource, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit.min(MULTIPART_PART_SIZE));
    (&mut *source).take(limit as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_part_splits_stream() {
        let mut source: StreamSource = Box::new(tokio_test::io::Builder::new()
            .read(b"abcd")
            .read(b"efg")
            .build());

        let first = read_part(&mut source, 5).await.unwrap();
        assert_eq!(first, b"abcde");

        let second = read_part(&mut source, 5).await.unwrap();
        assert_eq!(second, b"fg");

        let third = read_part(&mut source, 5).await.unwrap();
        assert!(third.is_empty());
    }
}
