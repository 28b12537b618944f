//! Application state.

use std::sync::Arc;

use tracing::{info, warn};

use abcache_storage::{
    CloudCache, CloudStorageConfig, Connector, MemoryBackend, MemoryConnector, S3Connector,
};

use crate::config::ApiConfig;

/// Bucket used by the in-memory backend when none is configured.
const DEFAULT_MEMORY_BUCKET: &str = "abcache";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub cache: Arc<CloudCache>,
}

impl AppState {
    /// Create application state and bring up cloud storage from the environment.
    ///
    /// A storage failure is logged, not fatal: the server still starts and
    /// cache endpoints report `not_initialized` until re-initialized.
    pub async fn new(config: ApiConfig) -> Self {
        let storage_config = CloudStorageConfig::from_env();
        let cache = Arc::new(CloudCache::new(connector_from_env(&storage_config)));

        match cache.initialize(&storage_config).await {
            Ok(state) => info!(state = %state, "Cloud storage initialized"),
            Err(e) => warn!(error = %e, "Cloud storage unavailable"),
        }

        Self::with_cache(config, cache)
    }

    /// Create application state around an existing cache.
    pub fn with_cache(config: ApiConfig, cache: Arc<CloudCache>) -> Self {
        Self { config, cache }
    }
}

/// Pick the object-store connector: S3 by default, in-memory when
/// `CLOUD_STORAGE_BACKEND=memory` (local development).
fn connector_from_env(storage_config: &CloudStorageConfig) -> Arc<dyn Connector> {
    let backend = std::env::var("CLOUD_STORAGE_BACKEND").unwrap_or_default();
    if backend.eq_ignore_ascii_case("memory") {
        let bucket = storage_config
            .bucket
            .as_deref()
            .unwrap_or(DEFAULT_MEMORY_BUCKET);
        warn!(bucket = %bucket, "Using in-memory object store; cached data is not durable");
        Arc::new(MemoryConnector::new(Arc::new(MemoryBackend::with_bucket(bucket))))
    } else {
        Arc::new(S3Connector)
    }
}
