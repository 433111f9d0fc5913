//! Vector storage.
//!
//! [`VectorStoreGateway`] is the only component that talks to a storage
//! backend. Backends implement [`VectorBackend`]: [`memory::MemoryBackend`]
//! keeps everything in process, [`sqlite::SqliteBackend`] persists to a
//! sqlite-vec database file.

pub mod distance;
pub mod gateway;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::document::{Document, Filter};
use crate::error::StoreError;

pub use gateway::VectorStoreGateway;

/// Distance metric of a collection. Lower is more similar under both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cosine similarity`, in `[0, 2]`.
    #[default]
    Cosine,
    /// Euclidean distance.
    L2,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Self::Cosine),
            "l2" => Ok(Self::L2),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

/// Fixed properties of a collection, established on first write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dimensions: usize,
    pub metric: DistanceMetric,
}

/// A collection with its current document count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    #[serde(flatten)]
    pub info: CollectionInfo,
    pub documents: usize,
}

/// One nearest-neighbor hit. The document carries no embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub document: Document,
    pub distance: f64,
    pub cluster_id: String,
}

/// Storage backend behind the gateway.
///
/// Backends do not check dimensionality or order results; the gateway does.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Create a collection. Fails with [`StoreError::AlreadyExists`] if the
    /// name is taken.
    async fn create_collection(&self, info: &CollectionInfo) -> Result<(), StoreError>;

    async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError>;

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError>;

    /// Insert or overwrite documents by id.
    async fn upsert(&self, collection: &str, docs: &[Document]) -> Result<(), StoreError>;

    /// Up to `k` nearest documents with their distances, in any order.
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<(Document, f64)>, StoreError>;

    async fn count(&self, collection: &str) -> Result<usize, StoreError>;
}

/// Create the configured backend.
pub fn create_backend(config: &StorageConfig) -> anyhow::Result<Arc<dyn VectorBackend>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(memory::MemoryBackend::new())),
        "sqlite" => {
            let path = crate::config::expand_tilde(&config.db_path);
            let conn = crate::db::open_database(&path)?;
            Ok(Arc::new(sqlite::SqliteBackend::new(conn)))
        }
        other => anyhow::bail!("unknown storage backend: {other}. Supported: sqlite, memory"),
    }
}
