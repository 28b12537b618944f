//! Connection lifecycle.
//!
//! [`CloudCache`] owns the connection state and the backend handle. Cache
//! operations (see `writer` and `retrieval`) only read the state to gate
//! themselves; [`CloudCache::initialize`] is the sole writer.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{Connector, ObjectStoreBackend};
use crate::config::CloudStorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::s3::S3Connector;

/// Connection state of the cache layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Process started, `initialize` not yet completed.
    Uninitialized,
    /// Cloud storage is turned off in configuration.
    Disabled,
    /// Bucket probe succeeded; cache operations may proceed.
    Ready,
    /// Configuration was invalid or the bucket probe failed.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Disabled => "disabled",
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the lifecycle, for status and readiness reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Backend handle available once the connection is `Ready`.
pub(crate) struct ReadyHandle {
    pub(crate) backend: Arc<dyn ObjectStoreBackend>,
    pub(crate) bucket: String,
}

impl fmt::Debug for ReadyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyHandle")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

struct Slot {
    state: ConnectionState,
    handle: Option<Arc<ReadyHandle>>,
    region: Option<String>,
    last_error: Option<String>,
}

/// Cloud object cache: lifecycle controller plus the cache operations.
///
/// Cheap to share behind an `Arc`. Concurrent cache operations need no
/// coordination; writes to the same key race at the store and the last
/// writer wins.
pub struct CloudCache {
    connector: Arc<dyn Connector>,
    slot: RwLock<Slot>,
    initializing: AtomicBool,
}

impl CloudCache {
    /// Create an uninitialized cache that will connect through `connector`.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            slot: RwLock::new(Slot {
                state: ConnectionState::Uninitialized,
                handle: None,
                region: None,
                last_error: None,
            }),
            initializing: AtomicBool::new(false),
        }
    }

    /// Create an uninitialized cache backed by S3.
    pub fn s3() -> Self {
        Self::new(Arc::new(S3Connector))
    }

    pub fn state(&self) -> ConnectionState {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).state
    }

    pub fn status(&self) -> StatusSnapshot {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        StatusSnapshot {
            state: slot.state,
            bucket: slot.handle.as_ref().map(|h| h.bucket.clone()),
            region: slot.region.clone(),
            last_error: slot.last_error.clone(),
        }
    }

    /// Bring the connection up from `config`.
    ///
    /// - Already `Ready`: no-op, no probe.
    /// - Disabled in config: `Disabled`, no client is built.
    /// - Missing settings: `Failed` with [`StorageError::Configuration`].
    /// - Probe failure: `Failed` with [`StorageError::Connectivity`].
    ///
    /// Only one initialization runs at a time; a concurrent call gets
    /// [`StorageError::NotInitialized`] and leaves the state untouched.
    pub async fn initialize(&self, config: &CloudStorageConfig) -> StorageResult<ConnectionState> {
        if self.state() == ConnectionState::Ready {
            debug!("Cloud storage already initialized");
            return Ok(ConnectionState::Ready);
        }

        if self
            .initializing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StorageError::not_initialized("initialization already in progress"));
        }
        let _claim = scopeguard::guard(&self.initializing, |flag| {
            flag.store(false, Ordering::Release);
        });

        // Another caller may have finished between the check and the claim.
        if self.state() == ConnectionState::Ready {
            return Ok(ConnectionState::Ready);
        }

        if !config.enabled {
            self.set(ConnectionState::Disabled, None, None, None);
            info!("Cloud storage disabled");
            return Ok(ConnectionState::Disabled);
        }

        let settings = match config.validate() {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Cloud storage configuration rejected");
                self.set(ConnectionState::Failed, None, None, Some(e.to_string()));
                return Err(e);
            }
        };

        let backend = match self.connector.connect(&settings).await {
            Ok(backend) => backend,
            Err(e) => {
                let e = into_connectivity(e);
                warn!(error = %e, "Failed to build object store client");
                self.set(
                    ConnectionState::Failed,
                    None,
                    Some(settings.region.clone()),
                    Some(e.to_string()),
                );
                return Err(e);
            }
        };

        if let Err(e) = backend.head_bucket(&settings.bucket).await {
            let e = into_connectivity(e);
            warn!(bucket = %settings.bucket, error = %e, "Cloud storage bucket probe failed");
            self.set(
                ConnectionState::Failed,
                None,
                Some(settings.region.clone()),
                Some(e.to_string()),
            );
            return Err(e);
        }

        info!(bucket = %settings.bucket, region = %settings.region, "Cloud storage ready");
        let handle = ReadyHandle {
            backend,
            bucket: settings.bucket,
        };
        self.set(
            ConnectionState::Ready,
            Some(Arc::new(handle)),
            Some(settings.region),
            None,
        );
        Ok(ConnectionState::Ready)
    }

    /// Backend handle, or `NotInitialized` without touching the network.
    pub(crate) fn ready(&self) -> StorageResult<Arc<ReadyHandle>> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        match (slot.state, &slot.handle) {
            (ConnectionState::Ready, Some(handle)) => Ok(Arc::clone(handle)),
            (state, _) => Err(StorageError::not_initialized(format!("cloud storage is {}", state))),
        }
    }

    fn set(
        &self,
        state: ConnectionState,
        handle: Option<Arc<ReadyHandle>>,
        region: Option<String>,
        last_error: Option<String>,
    ) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.state = state;
        slot.handle = handle;
        slot.region = region;
        slot.last_error = last_error;
    }
}

fn into_connectivity(e: StorageError) -> StorageError {
    match e {
        StorageError::Connectivity(_) => e,
        other => StorageError::connectivity(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::S3Settings;
    use crate::memory::{MemoryBackend, MemoryConnector};

    fn enabled_config(bucket: &str) -> CloudStorageConfig {
        CloudStorageConfig {
            enabled: true,
            region: Some("us-east-1".to_string()),
            bucket: Some(bucket.to_string()),
            access_key: Some("ak".to_string()),
            secret_key: Some("sk".to_string()),
            endpoint_url: None,
        }
    }

    fn memory_cache(bucket: &str) -> (CloudCache, MemoryConnector) {
        let connector = MemoryConnector::new(Arc::new(MemoryBackend::with_bucket(bucket)));
        (CloudCache::new(Arc::new(connector.clone())), connector)
    }

    #[test]
    fn test_starts_uninitialized() {
        let (cache, _) = memory_cache("b");
        assert_eq!(cache.state(), ConnectionState::Uninitialized);
        assert!(cache.ready().unwrap_err().is_not_initialized());
    }

    #[tokio::test]
    async fn test_ready_handle_debug_shows_bucket_only() {
        let (cache, _) = memory_cache("audiobooks");
        cache.initialize(&enabled_config("audiobooks")).await.unwrap();

        let handle = cache.ready().unwrap();
        assert_eq!(format!("{:?}", handle), "ReadyHandle { bucket: \"audiobooks\", .. }");
    }

    #[tokio::test]
    async fn test_disabled_never_connects() {
        let (cache, connector) = memory_cache("b");

        let state = cache.initialize(&CloudStorageConfig::default()).await.unwrap();

        assert_eq!(state, ConnectionState::Disabled);
        assert_eq!(cache.state(), ConnectionState::Disabled);
        assert_eq!(connector.connects(), 0);
        assert!(cache.ready().unwrap_err().is_not_initialized());
    }

    #[tokio::test]
    async fn test_missing_fields_fail_without_network() {
        let (cache, connector) = memory_cache("b");
        let mut config = enabled_config("b");
        config.access_key = None;

        let err = cache.initialize(&config).await.unwrap_err();

        match err {
            StorageError::Configuration { missing } => {
                assert_eq!(missing, vec!["cloudStorageS3AccessKey"]);
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
        assert_eq!(cache.state(), ConnectionState::Failed);
        assert_eq!(connector.connects(), 0);
        assert_eq!(connector.backend().calls.head_bucket.load(Ordering::SeqCst), 0);
        assert!(cache.status().last_error.is_some());
    }

    #[tokio::test]
    async fn test_probe_failure_is_connectivity_error() {
        let (cache, _) = memory_cache("other-bucket");

        let err = cache.initialize(&enabled_config("missing")).await.unwrap_err();

        assert!(matches!(err, StorageError::Connectivity(_)));
        assert_eq!(cache.state(), ConnectionState::Failed);
        assert!(cache.ready().unwrap_err().is_not_initialized());
    }

    #[tokio::test]
    async fn test_ready_after_probe() {
        let (cache, connector) = memory_cache("audiobooks");

        let state = cache.initialize(&enabled_config("audiobooks")).await.unwrap();

        assert_eq!(state, ConnectionState::Ready);
        assert_eq!(connector.backend().calls.head_bucket.load(Ordering::SeqCst), 1);
        let status = cache.status();
        assert_eq!(status.bucket.as_deref(), Some("audiobooks"));
        assert_eq!(status.region.as_deref(), Some("us-east-1"));
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_initialize_twice_probes_once() {
        let (cache, connector) = memory_cache("audiobooks");
        let config = enabled_config("audiobooks");

        assert_eq!(cache.initialize(&config).await.unwrap(), ConnectionState::Ready);
        assert_eq!(cache.initialize(&config).await.unwrap(), ConnectionState::Ready);

        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.backend().calls.head_bucket.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_after_failure() {
        let (cache, connector) = memory_cache("other-bucket");

        assert!(cache.initialize(&enabled_config("audiobooks")).await.is_err());
        assert_eq!(cache.state(), ConnectionState::Failed);

        connector.backend().create_bucket("audiobooks");
        assert_eq!(
            cache.initialize(&enabled_config("audiobooks")).await.unwrap(),
            ConnectionState::Ready
        );
        assert!(cache.status().last_error.is_none());
    }

    /// Connector whose probe blocks until released, to observe in-flight state.
    struct GatedConnector {
        backend: Arc<MemoryBackend>,
        gate: Arc<tokio::sync::Notify>,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl Connector for GatedConnector {
        async fn connect(
            &self,
            _settings: &S3Settings,
        ) -> StorageResult<Arc<dyn ObjectStoreBackend>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(self.backend.clone())
        }
    }

    #[tokio::test]
    async fn test_operations_during_initialize_see_not_initialized() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let connector = Arc::new(GatedConnector {
            backend: Arc::new(MemoryBackend::with_bucket("audiobooks")),
            gate: Arc::clone(&gate),
            connects: AtomicUsize::new(0),
        });
        let cache = Arc::new(CloudCache::new(connector.clone()));

        let init = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.initialize(&enabled_config("audiobooks")).await })
        };

        // Wait until the first initialize holds the claim.
        while connector.connects.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(cache.ready().unwrap_err().is_not_initialized());
        let concurrent = cache.initialize(&enabled_config("audiobooks")).await;
        assert!(concurrent.unwrap_err().is_not_initialized());

        gate.notify_one();
        assert_eq!(init.await.unwrap().unwrap(), ConnectionState::Ready);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert!(cache.ready().is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_initialize_releases_claim() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let connector = Arc::new(GatedConnector {
            backend: Arc::new(MemoryBackend::with_bucket("audiobooks")),
            gate: Arc::clone(&gate),
            connects: AtomicUsize::new(0),
        });
        let cache = CloudCache::new(connector.clone());
        let config = enabled_config("audiobooks");

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), cache.initialize(&config)).await;
        assert!(timed_out.is_err());
        assert_eq!(cache.state(), ConnectionState::Uninitialized);

        // The claim was released on drop, so a new attempt can proceed.
        gate.notify_one();
        assert_eq!(cache.initialize(&config).await.unwrap(), ConnectionState::Ready);
    }
}
