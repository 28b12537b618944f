//! Cloud storage configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Cloud storage settings as supplied by the server's settings store.
///
/// Field names on the wire match the settings keys (`cloudStorageEnabled`, ...).
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudStorageConfig {
    #[serde(rename = "cloudStorageEnabled", default)]
    pub enabled: bool,
    #[serde(rename = "cloudStorageS3Region", default)]
    pub region: Option<String>,
    #[serde(rename = "cloudStorageS3Bucket", default)]
    pub bucket: Option<String>,
    #[serde(rename = "cloudStorageS3AccessKey", default)]
    pub access_key: Option<String>,
    #[serde(rename = "cloudStorageS3SecretKey", default)]
    pub secret_key: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...).
    #[serde(rename = "cloudStorageS3Endpoint", default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

/// Validated connection settings. Only produced by [`CloudStorageConfig::validate`].
#[derive(Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint_url: Option<String>,
}

impl CloudStorageConfig {
    /// Create config from environment variables.
    ///
    /// Unset variables are left empty; validation happens in [`Self::validate`].
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("CLOUD_STORAGE_ENABLED")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            region: std::env::var("CLOUD_STORAGE_S3_REGION").ok(),
            bucket: std::env::var("CLOUD_STORAGE_S3_BUCKET").ok(),
            access_key: std::env::var("CLOUD_STORAGE_S3_ACCESS_KEY").ok(),
            secret_key: std::env::var("CLOUD_STORAGE_S3_SECRET_KEY").ok(),
            endpoint_url: std::env::var("CLOUD_STORAGE_S3_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }

    /// Check that every field required by an enabled store is present.
    ///
    /// Blank (whitespace-only) values count as missing. All missing fields are
    /// reported at once, in declaration order.
    pub fn validate(&self) -> StorageResult<S3Settings> {
        let fields = [
            ("cloudStorageS3Region", &self.region),
            ("cloudStorageS3Bucket", &self.bucket),
            ("cloudStorageS3AccessKey", &self.access_key),
            ("cloudStorageS3SecretKey", &self.secret_key),
        ];

        let missing: Vec<&'static str> = fields
            .iter()
            .filter(|(_, value)| non_blank(value).is_none())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(StorageError::Configuration { missing });
        }

        // Every field is present at this point.
        let get = |value: &Option<String>| non_blank(value).unwrap_or_default().to_string();

        Ok(S3Settings {
            region: get(&self.region),
            bucket: get(&self.bucket),
            access_key: get(&self.access_key),
            secret_key: get(&self.secret_key),
            endpoint_url: self
                .endpoint_url
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn redact(value: &Option<String>) -> &'static str {
    match value {
        Some(v) if !v.is_empty() => "<redacted>",
        _ => "<unset>",
    }
}

impl fmt::Debug for CloudStorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudStorageConfig")
            .field("enabled", &self.enabled)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &redact(&self.secret_key))
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}
