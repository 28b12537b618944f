//! API error types.

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use abcache_storage::StorageError;

use crate::config::is_production;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(e) => match e {
                StorageError::InvalidKey(_) => StatusCode::BAD_REQUEST,
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::NotInitialized(_) => StatusCode::SERVICE_UNAVAILABLE,
                StorageError::Connectivity(_)
                | StorageError::UploadFailed(_)
                | StorageError::SignFailed(_)
                | StorageError::Backend(_) => StatusCode::BAD_GATEWAY,
                StorageError::Configuration { .. } | StorageError::Io(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Storage(e) => e.code(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR
            && is_production(&std::env::var("ENVIRONMENT").unwrap_or_default())
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            detail,
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_status_mapping() {
        let cases = [
            (StorageError::invalid_key("x"), StatusCode::BAD_REQUEST),
            (StorageError::not_found("k"), StatusCode::NOT_FOUND),
            (StorageError::not_initialized("disabled"), StatusCode::SERVICE_UNAVAILABLE),
            (StorageError::upload_failed("reset"), StatusCode::BAD_GATEWAY),
            (StorageError::sign_failed("clock"), StatusCode::BAD_GATEWAY),
            (
                StorageError::Configuration { missing: vec!["cloudStorageS3Bucket"] },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn test_codes() {
        assert_eq!(ApiError::bad_request("x").code(), "bad_request");
        assert_eq!(
            ApiError::from(StorageError::not_initialized("x")).code(),
            "not_initialized"
        );
    }
}
