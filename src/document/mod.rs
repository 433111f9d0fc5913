//! Retrievable documents derived from telemetry.
//!
//! A [`Document`] is the unit the vector store persists: a stable id, the
//! text that gets embedded, filterable metadata and (once the worker pool has
//! run the embedding provider) the vector itself.

pub mod mapper;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::telemetry::Scalar;

pub use mapper::map;

/// Metadata key holding the tenant (cluster) id of every document.
pub const CLUSTER_ID_KEY: &str = "cluster_id";
/// Metadata key holding the telemetry kind (`trace`, `log`, `metric`).
pub const KIND_KEY: &str = "kind";

pub type Metadata = BTreeMap<String, Scalar>;

/// Equality filter over metadata. Every entry must match.
pub type Filter = BTreeMap<String, Scalar>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Empty until embedded, and stripped again from search results.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata,
            embedding: Vec::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn cluster_id(&self) -> &str {
        self.metadata
            .get(CLUSTER_ID_KEY)
            .and_then(Scalar::as_str)
            .unwrap_or_default()
    }

    /// Whether every filter entry equals the corresponding metadata value.
    pub fn matches(&self, filter: &Filter) -> bool {
        filter
            .iter()
            .all(|(key, want)| self.metadata.get(key) == Some(want))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_requires_every_entry() {
        let mut metadata = Metadata::new();
        metadata.insert(CLUSTER_ID_KEY.into(), "prod".into());
        metadata.insert(KIND_KEY.into(), "trace".into());
        let doc = Document::new("d1", "text", metadata);

        assert_eq!(doc.cluster_id(), "prod");
        assert!(doc.matches(&Filter::new()));
        assert!(doc.matches(&Filter::from([(CLUSTER_ID_KEY.to_string(), "prod".into())])));
        assert!(!doc.matches(&Filter::from([
            (CLUSTER_ID_KEY.to_string(), "prod".into()),
            (KIND_KEY.to_string(), "log".into()),
        ])));
        assert!(!doc.matches(&Filter::from([("service".to_string(), "api".into())])));
    }

    #[test]
    fn empty_embedding_is_not_serialized() {
        let doc = Document::new("d1", "text", Metadata::new());
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("embedding").is_none());
    }
}
