//! Error taxonomy for every stage of the pipeline.
//!
//! Decode and auth failures surface synchronously to the sender; store and
//! embedding failures in the async phase are recovered by the worker pool;
//! search failures surface to the operator.

use thiserror::Error;

/// Structural decoding failures for an inbound OTLP payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The body is not a well-formed OTLP JSON tree, or a required field is missing.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The telemetry kind is not one of traces, logs, metrics.
    #[error("unsupported telemetry kind: {0}")]
    UnsupportedKind(String),

    /// The tenant (cluster) identifier was missing or blank.
    #[error("cluster id must not be empty")]
    MissingCluster,
}

/// Mapping failures. Soft: the caller treats them as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("envelope contains no records")]
    EmptyEnvelope,
}

/// Vector store failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// A document's embedding length differs from the collection's dimensionality.
    #[error("dimension mismatch in '{collection}': expected {expected}, got {actual} (document {id})")]
    DimensionMismatch {
        collection: String,
        id: String,
        expected: usize,
        actual: usize,
    },

    /// The backend could not be reached or failed mid-operation.
    #[error("vector store unavailable: {0}")]
    Unavailable(String),

    /// Nothing was ever written to this collection.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// A concurrent create won the race; callers re-read and reuse it.
    #[error("collection already exists: {0}")]
    AlreadyExists(String),

    /// The collection name cannot be used by this backend.
    #[error("invalid collection name: {0}")]
    InvalidCollection(String),
}

impl StoreError {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Synchronous rejections returned to the telemetry sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] DecodeError),

    /// The async work queue is full; the sender should retry later.
    #[error("ingestion queue is full")]
    Overloaded,

    /// The worker pool is draining and no longer accepts work.
    #[error("ingestion pipeline is shutting down")]
    ShuttingDown,
}

/// Failures surfaced to an operator waiting on a search.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
    /// The embedding provider errored or did not answer within the timeout.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("query text must not be empty")]
    EmptyQuery,

    #[error(transparent)]
    Store(#[from] StoreError),
}
