//! Existence checks and signed retrieval.
//!
//! `exists` favors availability: an ambiguous probe failure is logged and
//! reported as "not cached". `signed_url` favors correctness: only a genuine
//! "not found" maps to `None`, every other failure is returned.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::ObjectMeta;
use crate::error::{StorageError, StorageResult};
use crate::key::derive_key;
use crate::lifecycle::{CloudCache, ReadyHandle};

/// Default lifetime of a signed URL (1 hour).
pub const DEFAULT_SIGNED_URL_EXPIRY_SECS: u64 = 3600;

/// Maximum lifetime of a signed URL (7 days, the S3 presign ceiling).
pub const MAX_SIGNED_URL_EXPIRY_SECS: u64 = 604_800;

/// Result of an existence probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Present(ObjectMeta),
    Absent,
}

/// A time-limited URL granting direct read access to one cached object.
#[derive(Debug, Clone, Serialize)]
pub struct SignedUrl {
    pub key: String,
    pub url: String,
    /// Lifetime in seconds, after clamping.
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

/// Clamp a requested lifetime to `[1 s, MAX_SIGNED_URL_EXPIRY_SECS]`.
pub fn clamp_expiry(expiry: Option<Duration>) -> Duration {
    let secs = expiry
        .map(|d| d.as_secs())
        .unwrap_or(DEFAULT_SIGNED_URL_EXPIRY_SECS)
        .clamp(1, MAX_SIGNED_URL_EXPIRY_SECS);
    Duration::from_secs(secs)
}

impl CloudCache {
    /// Whether the item's archive is cached.
    ///
    /// Errors only for `NotInitialized` or an invalid item id; probe failures
    /// other than "not found" are logged and reported as `false`.
    pub async fn exists(&self, item_id: &str) -> StorageResult<bool> {
        self.exists_named(item_id, None).await
    }

    /// Whether a named file (or, without a filename, the archive) is cached.
    pub async fn exists_named(&self, item_id: &str, filename: Option<&str>) -> StorageResult<bool> {
        let handle = self.ready()?;
        let key = derive_key(item_id, filename)?;

        match probe(&handle, &key).await {
            Ok(Presence::Present(_)) => Ok(true),
            Ok(Presence::Absent) => Ok(false),
            Err(e) => {
                warn!(key = %key, error = %e, "Existence probe failed, reporting not cached");
                Ok(false)
            }
        }
    }

    /// Signed GET URL for the item's archive, or `None` if it is not cached.
    ///
    /// `expiry` defaults to one hour.
    pub async fn signed_url(
        &self,
        item_id: &str,
        expiry: Option<Duration>,
    ) -> StorageResult<Option<SignedUrl>> {
        self.signed_url_named(item_id, None, expiry).await
    }

    /// Signed GET URL for a named file (or the archive), or `None` if absent.
    pub async fn signed_url_named(
        &self,
        item_id: &str,
        filename: Option<&str>,
        expiry: Option<Duration>,
    ) -> StorageResult<Option<SignedUrl>> {
        let handle = self.ready()?;
        let key = derive_key(item_id, filename)?;

        match probe(&handle, &key).await.map_err(into_sign_error)? {
            Presence::Absent => {
                debug!(key = %key, "Signed URL requested for uncached object");
                return Ok(None);
            }
            Presence::Present(meta) => {
                debug!(key = %key, bytes = meta.size, "Signing cached object");
            }
        }

        let expires_in = clamp_expiry(expiry);
        let url = handle
            .backend
            .presign_get(&handle.bucket, &key, expires_in)
            .await
            .map_err(into_sign_error)?;

        let expires_at = Utc::now()
            + chrono::Duration::from_std(expires_in).unwrap_or_else(|_| chrono::Duration::zero());

        info!(key = %key, expires_in = expires_in.as_secs(), "Issued signed URL");
        Ok(Some(SignedUrl {
            key,
            url,
            expires_in: expires_in.as_secs(),
            expires_at,
        }))
    }

    /// Remove a cached object. Removing an uncached object succeeds.
    /// Returns the key.
    pub async fn remove(&self, item_id: &str, filename: Option<&str>) -> StorageResult<String> {
        let handle = self.ready()?;
        let key = derive_key(item_id, filename)?;

        handle.backend.delete_object(&handle.bucket, &key).await?;
        info!(key = %key, "Removed cached object");
        Ok(key)
    }
}

async fn probe(handle: &ReadyHandle, key: &str) -> StorageResult<Presence> {
    match handle.backend.head_object(&handle.bucket, key).await {
        Ok(meta) => Ok(Presence::Present(meta)),
        Err(e) if e.is_not_found() => Ok(Presence::Absent),
        Err(e) => Err(e),
    }
}

fn into_sign_error(e: StorageError) -> StorageError {
    match e {
        StorageError::SignFailed(_) => e,
        other => StorageError::sign_failed(other.to_string()),
    }
}
