//! Axum HTTP API for the archive cache.
//!
//! This crate provides:
//! - Cache endpoints for storing, probing, and signing item archives
//! - Cloud storage status and re-initialization endpoints
//! - Health/readiness probes and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
