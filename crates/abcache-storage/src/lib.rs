//! S3-compatible object cache for generated item archives.
//!
//! This crate provides:
//! - Connection lifecycle with a one-time bucket reachability probe
//! - Deterministic, object-store-safe key derivation
//! - Archive upload (single put for buffers, multipart for streams)
//! - Existence checks and time-limited signed URLs
//! - An in-memory backend for tests and local development

pub mod backend;
pub mod config;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod memory;
pub mod retrieval;
pub mod s3;
pub mod writer;

pub use backend::{Connector, ObjectMeta, ObjectStoreBackend, StreamSource, MULTIPART_PART_SIZE};
pub use config::{CloudStorageConfig, S3Settings};
pub use error::{StorageError, StorageResult};
pub use key::{archive_key, content_type_for, derive_key, sanitize_filename};
pub use lifecycle::{CloudCache, ConnectionState, StatusSnapshot};
pub use memory::{MemoryBackend, MemoryConnector};
pub use retrieval::{
    Presence, SignedUrl, DEFAULT_SIGNED_URL_EXPIRY_SECS, MAX_SIGNED_URL_EXPIRY_SECS,
};
pub use s3::{S3Backend, S3Connector};
pub use writer::{CachePayload, STREAM_THRESHOLD_BYTES};
