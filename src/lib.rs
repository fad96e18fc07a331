//! # uristore - URI-addressed storage
//!
//! One key/value contract, many backends. Resources are addressed as
//! `scheme://namespace/seg/seg...` and the scheme picks the backend.
//!
//! uristore provides:
//! - `ResourceUri` parsing and canonical formatting
//! - A named codec registry with per-type, fallback-ordered codec chains
//! - In-memory, filesystem and SQLite providers behind one `Provider` trait
//! - Change notification (`sync`) with replay-on-subscribe
//! - Batch operations with per-item results
//! - `CREATE TABLE` generation from declarative type metadata

pub mod uri;
pub mod codec;
pub mod metadata;
pub mod watch;
pub mod provider;
pub mod storage;
pub mod query;
pub mod registry;
pub mod service;
pub mod config;

// Re-exports for convenient access
pub use uri::ResourceUri;
pub use codec::{Codec, CodecRegistry};
pub use metadata::{FieldKind, FieldMetadata, TypeMetadata};
pub use watch::{WatchCallback, WatchHandle};
pub use provider::{BatchResult, Provider};
pub use storage::{FileProvider, MemoryProvider, SqlConfig, SqliteProvider};
pub use registry::ProviderRegistry;
pub use service::Service;

/// Result type alias for uristore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for uristore operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Provider not found for scheme: {0:?}")]
    ProviderNotFound(String),

    #[error("Batch size mismatch: {expected} keys, {actual} values")]
    BatchSizeMismatch { expected: usize, actual: usize },

    #[error("Query already registered: {0}")]
    QueryAlreadyRegistered(String),

    #[error("Query not registered: {0}")]
    QueryNotRegistered(String),

    #[error("No codecs configured for {0}")]
    NoCodecs(String),

    #[error("All codecs failed: {0}")]
    AllCodecsFailed(#[source] Box<Error>),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Missing query parameter: {0}")]
    MissingParameter(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("No Tokio runtime to deliver watch callbacks: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

impl Error {
    /// True for the not-found class of errors
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
