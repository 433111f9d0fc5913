//! Incident search: free text in, nearest stored telemetry out.
//!
//! Embeds the query (bounded by a timeout), asks the gateway for the nearest
//! documents and returns them in the gateway's order. A kind that has never
//! received telemetry yields zero results; an unreachable embedding provider
//! or store is an error, never an empty list.

use std::sync::Arc;
use std::time::Duration;

use crate::config::SearchConfig;
use crate::document::{Filter, CLUSTER_ID_KEY};
use crate::embedding::EmbeddingProvider;
use crate::error::{SearchError, StoreError};
use crate::store::{SearchResult, VectorStoreGateway};
use crate::telemetry::Kind;

pub struct SearchService {
    embedder: Arc<dyn EmbeddingProvider>,
    gateway: Arc<VectorStoreGateway>,
    timeout: Duration,
    default_limit: usize,
    max_limit: usize,
}

impl SearchService {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        gateway: Arc<VectorStoreGateway>,
        timeout: Duration,
        config: &SearchConfig,
    ) -> Self {
        Self {
            embedder,
            gateway,
            timeout,
            default_limit: config.default_limit,
            max_limit: config.max_limit.max(1),
        }
    }

    /// Clamp a caller-supplied limit to `1..=max_limit`, defaulting when absent.
    pub fn clamp_limit(&self, limit: Option<usize>) -> usize {
        limit
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }

    pub async fn search(
        &self,
        query: &str,
        kind: Kind,
        limit: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        self.search_filtered(query, kind, limit, None).await
    }

    /// Search restricted to one cluster.
    pub async fn search_cluster(
        &self,
        query: &str,
        kind: Kind,
        limit: usize,
        cluster_id: &str,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let filter = Filter::from([(CLUSTER_ID_KEY.to_string(), cluster_id.into())]);
        self.search_filtered(query, kind, limit, Some(&filter)).await
    }

    pub async fn search_filtered(
        &self,
        query: &str,
        kind: Kind,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let limit = self.clamp_limit(Some(limit));

        let embedding = match tokio::time::timeout(self.timeout, self.embedder.embed(query)).await {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(e)) => return Err(SearchError::EmbeddingUnavailable(e.to_string())),
            Err(_) => {
                return Err(SearchError::EmbeddingUnavailable(format!(
                    "no response within {:?}",
                    self.timeout
                )))
            }
        };

        let collection = kind.collection_name();
        match self.gateway.query(collection, &embedding, limit, filter).await {
            Ok(results) => {
                tracing::debug!(%kind, limit, hits = results.len(), "search finished");
                Ok(results)
            }
            Err(StoreError::CollectionNotFound(_)) => {
                tracing::debug!(collection, "search on empty collection");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}
