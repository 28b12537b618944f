//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the cloud cache layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Storage is enabled but required settings are missing or blank.
    #[error("Cloud storage is misconfigured, missing: {}", .missing.join(", "))]
    Configuration { missing: Vec<&'static str> },

    /// The bucket probe or client construction failed during initialization.
    #[error("Cloud storage is unreachable: {0}")]
    Connectivity(String),

    /// An operation was attempted while the connection is not `Ready`.
    #[error("Cloud storage is not initialized: {0}")]
    NotInitialized(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Signing failed: {0}")]
    SignFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Any other object-store failure (head/delete).
    #[error("Object store error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }

    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn sign_failed(msg: impl Into<String>) -> Self {
        Self::SignFailed(msg.into())
    }

    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_not_initialized(&self) -> bool {
        matches!(self, Self::NotInitialized(_))
    }

    /// Short machine-readable code, used in API error bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Connectivity(_) => "connectivity_error",
            Self::NotInitialized(_) => "not_initialized",
            Self::NotFound(_) => "not_found",
            Self::UploadFailed(_) => "upload_failed",
            Self::SignFailed(_) => "sign_failed",
            Self::InvalidKey(_) => "invalid_key",
            Self::Backend(_) => "backend_error",
            Self::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_names_fields() {
        let err = StorageError::Configuration {
            missing: vec!["cloudStorageS3Bucket", "cloudStorageS3SecretKey"],
        };
        assert_eq!(
            err.to_string(),
            "Cloud storage is misconfigured, missing: cloudStorageS3Bucket, cloudStorageS3SecretKey"
        );
        assert_eq!(err.code(), "configuration_error");
    }

    #[test]
    fn test_predicates() {
        assert!(StorageError::not_found("archives/a.zip").is_not_found());
        assert!(!StorageError::backend("boom").is_not_found());
        assert!(StorageError::not_initialized("disabled").is_not_initialized());
    }
}
