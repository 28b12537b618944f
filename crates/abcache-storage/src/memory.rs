//! In-process object store.
//!
//! Used by tests and by local development (`CLOUD_STORAGE_BACKEND=memory`).
//! Behaves like the S3 backend at the trait boundary, including multipart
//! semantics: parts are staged privately and only become visible on
//! completion, so a failed or dropped upload leaves nothing behind.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{
    read_part, Connector, ObjectMeta, ObjectStoreBackend, StreamSource, MULTIPART_PART_SIZE,
};
use crate::config::S3Settings;
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
}

/// Call counters, for asserting which network operations were issued.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub head_bucket: AtomicUsize,
    pub head_object: AtomicUsize,
    pub put_object: AtomicUsize,
    pub multipart_upload: AtomicUsize,
    pub parts: AtomicUsize,
    pub presign: AtomicUsize,
    pub delete: AtomicUsize,
}

/// In-memory object store.
pub struct MemoryBackend {
    buckets: Mutex<HashSet<String>>,
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    part_size: usize,
    fail_uploads: AtomicBool,
    fail_probes: AtomicBool,
    fail_presign: AtomicBool,
    pub calls: CallCounts,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            buckets: Mutex::new(HashSet::new()),
            objects: Mutex::new(HashMap::new()),
            part_size: MULTIPART_PART_SIZE,
            fail_uploads: AtomicBool::new(false),
            fail_probes: AtomicBool::new(false),
            fail_presign: AtomicBool::new(false),
            calls: CallCounts::default(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already contains `bucket`.
    pub fn with_bucket(bucket: &str) -> Self {
        let backend = Self::default();
        backend.create_bucket(bucket);
        backend
    }

    /// Override the multipart part size (lets tests exercise several parts).
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    pub fn create_bucket(&self, bucket: &str) {
        lock(&self.buckets).insert(bucket.to_string());
    }

    /// Make every subsequent upload fail.
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Make `head_object` fail with a non-"not found" error.
    pub fn fail_probes(&self, fail: bool) {
        self.fail_probes.store(fail, Ordering::SeqCst);
    }

    /// Make `presign_get` fail.
    pub fn fail_presign(&self, fail: bool) {
        self.fail_presign.store(fail, Ordering::SeqCst);
    }

    /// Raw object content, bypassing the cache layer.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    /// Content type recorded for an object.
    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        lock(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.content_type.clone())
    }

    pub fn object_count(&self) -> usize {
        lock(&self.objects).len()
    }

    fn require_bucket(&self, bucket: &str) -> Result<(), String> {
        if lock(&self.buckets).contains(bucket) {
            Ok(())
        } else {
            Err(format!("NoSuchBucket: {}", bucket))
        }
    }

    fn insert(&self, bucket: &str, key: &str, data: Vec<u8>, content_type: &str) {
        lock(&self.objects).insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
    }
}

#[async_trait]
impl ObjectStoreBackend for MemoryBackend {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()> {
        self.calls.put_object.fetch_add(1, Ordering::SeqCst);
        self.require_bucket(bucket).map_err(StorageError::upload_failed)?;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::upload_failed("injected upload failure"));
        }

        debug!(key = %key, bytes = body.len(), "memory put");
        self.insert(bucket, key, body, content_type);
        Ok(())
    }

    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        mut source: StreamSource,
        content_type: &str,
    ) -> StorageResult<u64> {
        self.calls.multipart_upload.fetch_add(1, Ordering::SeqCst);
        self.require_bucket(bucket).map_err(StorageError::upload_failed)?;

        // Staged parts live only in this future; dropping it discards them.
        let mut staged: Vec<Vec<u8>> = Vec::new();
        loop {
            let part = read_part(&mut source, self.part_size)
                .await
                .map_err(|e| StorageError::upload_failed(format!("reading source: {}", e)))?;
            let done = part.len() < self.part_size;
            if !part.is_empty() {
                if self.fail_uploads.load(Ordering::SeqCst) {
                    return Err(StorageError::upload_failed(format!(
                        "injected failure on part {}",
                        staged.len() + 1
                    )));
                }
                self.calls.parts.fetch_add(1, Ordering::SeqCst);
                staged.push(part);
            }
            if done {
                break;
            }
        }

        let data = staged.concat();
        let total = data.len() as u64;
        self.insert(bucket, key, data, content_type);
        Ok(total)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        self.calls.head_object.fetch_add(1, Ordering::SeqCst);
        if self.fail_probes.load(Ordering::SeqCst) {
            return Err(StorageError::backend("injected probe failure"));
        }
        self.require_bucket(bucket).map_err(StorageError::backend)?;

        lock(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| ObjectMeta {
                size: o.data.len() as u64,
                content_type: Some(o.content_type.clone()),
            })
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn head_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.calls.head_bucket.fetch_add(1, Ordering::SeqCst);
        self.require_bucket(bucket).map_err(StorageError::connectivity)
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.calls.presign.fetch_add(1, Ordering::SeqCst);
        if self.fail_presign.load(Ordering::SeqCst) {
            return Err(StorageError::sign_failed("injected presign failure"));
        }

        Ok(format!(
            "memory://{}/{}?X-Amz-Expires={}",
            bucket,
            key,
            expires_in.as_secs()
        ))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        self.require_bucket(bucket).map_err(StorageError::backend)?;
        lock(&self.objects).remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

/// Connector handing out a shared [`MemoryBackend`].
#[derive(Clone)]
pub struct MemoryConnector {
    backend: Arc<MemoryBackend>,
    connects: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn backend(&self) -> Arc<MemoryBackend> {
        Arc::clone(&self.backend)
    }

    /// Number of client handles constructed so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, settings: &S3Settings) -> StorageResult<Arc<dyn ObjectStoreBackend>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        debug!(bucket = %settings.bucket, "memory connect");
        Ok(self.backend.clone())
    }
}
