//! Archive cache handlers.
//!
//! Thin HTTP surface over [`CloudCache`](abcache_storage::CloudCache): store a
//! generated archive (or a named file) from the archive directory, probe for
//! it, hand out signed URLs, and manage the cloud storage connection.

use std::path::{Component, Path as FsPath};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use abcache_storage::{derive_key, CloudStorageConfig, SignedUrl, StatusSnapshot, StorageError};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

/// Extractors whose rejections render as `{detail, code}` like every other error.
type ItemPath = WithRejection<Path<String>, ApiError>;
type ApiQuery<T> = WithRejection<Query<T>, ApiError>;

/// Body of a store request. An empty body caches the item's archive.
#[derive(Debug, Default, Deserialize)]
pub struct StoreRequest {
    /// File under the archive directory to cache instead of `<item_id>.zip`.
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StoreResponse {
    pub success: bool,
    pub key: String,
    pub filename: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileQuery {
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignedUrlQuery {
    #[serde(default)]
    pub filename: Option<String>,
    /// Requested lifetime in seconds.
    #[serde(default)]
    pub expiry: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub exists: bool,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub success: bool,
    pub key: String,
}

// ============================================================================
// Cache Handlers
// ============================================================================

/// Upload a local archive (or named file) to the cloud cache.
///
/// POST /api/items/{item_id}/cache
///
/// Body (optional): `{ "filename": "cover.jpg" }`
pub async fn store_item(
    State(state): State<AppState>,
    WithRejection(Path(item_id), _): ItemPath,
    body: Bytes,
) -> ApiResult<Json<StoreResponse>> {
    let request: StoreRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StoreRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))?
    };
    let filename = request.filename.as_deref();
    if let Some(name) = filename {
        ensure_relative(name)?;
    }

    // Reject bad ids before touching the filesystem.
    derive_key(&item_id, filename)?;

    let local_name = match filename {
        Some(name) => name.to_string(),
        None => format!("{item_id}.zip"),
    };
    let source = state.config.archive_dir.join(&local_name);

    let started = Instant::now();
    let result = state.cache.store_file(&item_id, filename, &source).await;
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(key) => {
            metrics::record_cache_store("ok", elapsed);
            info!(item_id = %item_id, key = %key, "Cached item");
            Ok(Json(StoreResponse {
                success: true,
                key,
                filename: local_name,
            }))
        }
        Err(e) => {
            metrics::record_cache_store(e.code(), elapsed);
            Err(map_store_error(e, &source))
        }
    }
}

/// Check whether an item's archive (or a named file) is cached.
///
/// GET /api/items/{item_id}/cache?filename=
pub async fn cache_exists(
    State(state): State<AppState>,
    WithRejection(Path(item_id), _): ItemPath,
    WithRejection(Query(query), _): ApiQuery<FileQuery>,
) -> ApiResult<Json<ExistsResponse>> {
    let filename = query.filename.as_deref();

    let exists = state
        .cache
        .exists_named(&item_id, filename)
        .await
        .inspect_err(|e| metrics::record_cache_probe(e.code()))?;
    metrics::record_cache_probe(if exists { "hit" } else { "miss" });

    Ok(Json(ExistsResponse {
        exists,
        key: derive_key(&item_id, filename)?,
    }))
}

/// Issue a signed download URL for a cached object.
///
/// GET /api/items/{item_id}/cache/url?filename=&expiry=
///
/// Returns 404 when the object is not cached.
pub async fn signed_url(
    State(state): State<AppState>,
    WithRejection(Path(item_id), _): ItemPath,
    WithRejection(Query(query), _): ApiQuery<SignedUrlQuery>,
) -> ApiResult<Json<SignedUrl>> {
    let expiry = query.expiry.map(Duration::from_secs);

    let signed = state
        .cache
        .signed_url_named(&item_id, query.filename.as_deref(), expiry)
        .await
        .inspect_err(|e| metrics::record_signed_url(e.code()))?;

    match signed {
        Some(signed) => {
            metrics::record_signed_url("ok");
            Ok(Json(signed))
        }
        None => {
            metrics::record_signed_url("absent");
            Err(ApiError::not_found(format!("{item_id} is not cached")))
        }
    }
}

/// Remove a cached object.
///
/// DELETE /api/items/{item_id}/cache?filename=
pub async fn remove_item(
    State(state): State<AppState>,
    WithRejection(Path(item_id), _): ItemPath,
    WithRejection(Query(query), _): ApiQuery<FileQuery>,
) -> ApiResult<Json<RemoveResponse>> {
    let key = state
        .cache
        .remove(&item_id, query.filename.as_deref())
        .await?;

    Ok(Json(RemoveResponse { success: true, key }))
}

// ============================================================================
// Connection Handlers
// ============================================================================

/// GET /api/cloud-storage/status
pub async fn cloud_storage_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.cache.status())
}

/// Re-run initialization from the current environment.
///
/// POST /api/cloud-storage/initialize
///
/// A `Ready` connection is left alone. `Disabled` and `Failed` are retried.
pub async fn initialize_cloud_storage(
    State(state): State<AppState>,
) -> ApiResult<Json<StatusSnapshot>> {
    let config = CloudStorageConfig::from_env();

    match state.cache.initialize(&config).await {
        Ok(new_state) => {
            info!(state = %new_state, "Cloud storage re-initialized");
            Ok(Json(state.cache.status()))
        }
        Err(e) => {
            warn!(error = %e, "Cloud storage re-initialization failed");
            Err(e.into())
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Only plain relative paths may name a file under the archive directory.
fn ensure_relative(name: &str) -> ApiResult<()> {
    let path = FsPath::new(name);
    let plain = !name.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

    if plain {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "Filename must be a relative path inside the archive directory: {name}"
        )))
    }
}

fn map_store_error(e: StorageError, source: &FsPath) -> ApiError {
    match e {
        StorageError::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
            ApiError::not_found(format!("Archive not found: {}", source.display()))
        }
        other => other.into(),
    }
}
