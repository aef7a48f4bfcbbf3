//! Error types shared across the engine.
//!
//! The variants follow the failure classes the engine distinguishes:
//! configuration problems fail the operation that detected them, capability
//! failures are retryable, and a corrupt index must be rebuilt.
use std::time::Duration;

use thiserror::Error;

/// Invalid or inconsistent configuration. Fatal to the operation, never to the process.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid chunking: overlap ({overlap}) must be smaller than max_size ({max_size})")]
    InvalidChunking { max_size: usize, overlap: usize },

    #[error("embedding dimensionality mismatch: index has {expected}, embedder produces {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("repository {repository_id} produced no units to index")]
    EmptyRepository { repository_id: String },

    #[error("duplicate unit {path}@{start_offset} in repository {repository_id}")]
    DuplicateUnit {
        repository_id: String,
        path: String,
        start_offset: usize,
    },

    #[error("token budget {budget} is below the fixed prompt overhead of {minimum} tokens")]
    TokenBudgetTooSmall { budget: usize, minimum: usize },

    #[error("{field} must be positive")]
    NotPositive { field: &'static str },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by an embedding capability.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Errors raised by an answer-generation capability.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("missing API key: environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("{0}")]
    Other(String),
}

/// A failed call to an external capability. Always retryable.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("{capability} timed out after {after:?}")]
    Timeout {
        capability: &'static str,
        after: Duration,
    },
}

impl CapabilityError {
    /// Whether the caller may retry the same request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// Errors raised while building, persisting, loading or searching an index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("index corrupted: {0}")]
    Corruption(String),

    #[error("no index found for repository {0}")]
    NotFound(String),

    #[error("index file {path} belongs to repository {stored}, not {requested}")]
    RepositoryMismatch {
        path: String,
        requested: String,
        stored: String,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EmbedderError> for IndexError {
    fn from(e: EmbedderError) -> Self {
        Self::Capability(CapabilityError::Embedding(e))
    }
}

/// Errors surfaced by a [`Session`](crate::session::Session).
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a question is already awaiting an answer in this session")]
    Busy,

    #[error("session has ended")]
    Closed,

    #[error("question cancelled")]
    Cancelled,

    #[error("question is empty")]
    EmptyQuestion,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Index(IndexError),
}

impl From<IndexError> for SessionError {
    /// Capability and configuration failures keep their own class so callers
    /// can tell a retryable embedding timeout from a broken index.
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::Capability(e) => Self::Capability(e),
            IndexError::Config(e) => Self::Config(e),
            other => Self::Index(other),
        }
    }
}

impl SessionError {
    /// Whether asking the same question again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Capability(e) => e.is_retryable(),
            Self::Busy | Self::Cancelled => true,
            Self::Closed | Self::EmptyQuestion | Self::Config(_) | Self::Index(_) => false,
        }
    }
}
