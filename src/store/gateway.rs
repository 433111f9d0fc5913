//! The vector store gateway.
//!
//! Owns one collection per telemetry kind on top of a [`VectorBackend`]:
//! creates collections lazily on first upsert (at most one create call per
//! name, even under concurrent first writes), enforces each collection's
//! dimensionality, and orders query results by `(distance, id)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use super::{CollectionInfo, CollectionStats, DistanceMetric, SearchResult, VectorBackend};
use crate::config::CollectionMetrics;
use crate::document::{Document, Filter};
use crate::error::StoreError;
use crate::telemetry::Kind;

/// Placeholder id reported when a query vector has the wrong length.
const QUERY_ID: &str = "<query>";

pub struct VectorStoreGateway {
    backend: Arc<dyn VectorBackend>,
    metrics: HashMap<String, DistanceMetric>,
    collections: Mutex<HashMap<String, Arc<OnceCell<CollectionInfo>>>>,
}

impl VectorStoreGateway {
    /// Gateway creating every collection with the cosine metric.
    pub fn new(backend: Arc<dyn VectorBackend>) -> Self {
        Self {
            backend,
            metrics: HashMap::new(),
            collections: Mutex::new(HashMap::new()),
        }
    }

    /// Use the configured metric for each kind's collection.
    pub fn with_metrics(mut self, metrics: &CollectionMetrics) -> Self {
        for kind in Kind::ALL {
            self.metrics
                .insert(kind.collection_name().to_string(), metrics.for_kind(kind));
        }
        self
    }

    pub fn backend(&self) -> &Arc<dyn VectorBackend> {
        &self.backend
    }

    /// Write or overwrite documents by id, creating the collection on first use.
    ///
    /// All embeddings must match the collection's dimensionality (for a new
    /// collection, the first document's).
    pub async fn upsert(&self, collection: &str, docs: &[Document]) -> Result<(), StoreError> {
        let Some(first) = docs.first() else {
            return Ok(());
        };
        if first.embedding.is_empty() {
            return Err(mismatch(collection, first, 0));
        }

        let info = self.get_or_create(collection, first.embedding.len()).await?;
        if let Some(bad) = docs.iter().find(|d| d.embedding.len() != info.dimensions) {
            return Err(mismatch(collection, bad, info.dimensions));
        }

        self.backend.upsert(collection, docs).await?;
        tracing::debug!(collection, documents = docs.len(), "upserted batch");
        Ok(())
    }

    /// Up to `k` nearest documents, ascending by distance, ties by id.
    ///
    /// Never creates a collection: one that was never written to yields
    /// [`StoreError::CollectionNotFound`].
    pub async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let info = self
            .lookup(collection)
            .await?
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        if embedding.len() != info.dimensions {
            return Err(StoreError::DimensionMismatch {
                collection: collection.to_string(),
                id: QUERY_ID.to_string(),
                expected: info.dimensions,
                actual: embedding.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits = self.backend.query(collection, embedding, k, filter).await?;
        hits.sort_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);

        Ok(hits
            .into_iter()
            .map(|(mut document, distance)| {
                document.embedding = Vec::new();
                let cluster_id = document.cluster_id().to_string();
                SearchResult {
                    document,
                    distance,
                    cluster_id,
                }
            })
            .collect())
    }

    /// Every existing collection with its document count.
    pub async fn stats(&self) -> Result<Vec<CollectionStats>, StoreError> {
        let mut stats = Vec::new();
        for info in self.backend.list_collections().await? {
            let documents = self.backend.count(&info.name).await?;
            stats.push(CollectionStats { info, documents });
        }
        Ok(stats)
    }

    fn cell(&self, name: &str) -> Arc<OnceCell<CollectionInfo>> {
        let mut cells = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(cells.entry(name.to_string()).or_default())
    }

    async fn lookup(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
        if let Some(info) = self.cell(name).get() {
            return Ok(Some(info.clone()));
        }
        self.backend.collection(name).await
    }

    /// Concurrent callers for the same name share one initialization; a
    /// failed initialization leaves the cell empty for the next caller.
    async fn get_or_create(
        &self,
        name: &str,
        dimensions: usize,
    ) -> Result<CollectionInfo, StoreError> {
        let cell = self.cell(name);
        let info = cell
            .get_or_try_init(|| self.create_if_missing(name, dimensions))
            .await?;
        Ok(info.clone())
    }

    async fn create_if_missing(
        &self,
        name: &str,
        dimensions: usize,
    ) -> Result<CollectionInfo, StoreError> {
        if let Some(existing) = self.backend.collection(name).await? {
            return Ok(existing);
        }

        let info = CollectionInfo {
            name: name.to_string(),
            dimensions,
            metric: self.metrics.get(name).copied().unwrap_or_default(),
        };
        match self.backend.create_collection(&info).await {
            Ok(()) => {
                tracing::info!(
                    collection = name,
                    dimensions,
                    metric = %info.metric,
                    "created collection"
                );
                Ok(info)
            }
            // Another process won the race.
            Err(StoreError::AlreadyExists(_)) => self
                .backend
                .collection(name)
                .await?
                .ok_or_else(|| StoreError::CollectionNotFound(name.to_string())),
            Err(e) => Err(e),
        }
    }
}

fn mismatch(collection: &str, doc: &Document, expected: usize) -> StoreError {
    StoreError::DimensionMismatch {
        collection: collection.to_string(),
        id: doc.id.clone(),
        expected,
        actual: doc.embedding.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Metadata, CLUSTER_ID_KEY};
    use crate::store::memory::MemoryBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(id: &str, cluster: &str, embedding: Vec<f32>) -> Document {
        let mut metadata = Metadata::new();
        metadata.insert(CLUSTER_ID_KEY.into(), cluster.into());
        Document::new(id, format!("doc {id}"), metadata).with_embedding(embedding)
    }

    fn gateway() -> VectorStoreGateway {
        VectorStoreGateway::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn query_returns_everything_sorted_with_exact_self_match() {
        let gw = gateway();
        let docs = vec![
            doc("a", "c1", vec![1.0, 0.0, 0.0]),
            doc("b", "c1", vec![0.7, 0.7, 0.0]),
            doc("c", "c2", vec![0.0, 0.0, 1.0]),
        ];
        gw.upsert("traces", &docs).await.unwrap();

        let results = gw.query("traces", &[0.7, 0.7, 0.0], 10, None).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert!(results[0].distance.abs() < 1e-6);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(results.iter().all(|r| r.document.embedding.is_empty()));
        assert_eq!(results[2].cluster_id, "c2");
    }

    #[tokio::test]
    async fn ties_are_broken_by_id() {
        let gw = gateway();
        let docs = vec![
            doc("z", "c", vec![1.0, 0.0]),
            doc("m", "c", vec![1.0, 0.0]),
            doc("a", "c", vec![1.0, 0.0]),
        ];
        gw.upsert("logs", &docs).await.unwrap();
        let results = gw.query("logs", &[1.0, 0.0], 2, None).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "m"]);
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let gw = gateway();
        gw.upsert("traces", &[doc("a", "c", vec![1.0, 0.0])]).await.unwrap();
        gw.upsert("traces", &[doc("a", "c", vec![0.0, 1.0])]).await.unwrap();

        assert_eq!(gw.backend().count("traces").await.unwrap(), 1);
        let results = gw.query("traces", &[0.0, 1.0], 5, None).await.unwrap();
        assert!(results[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn dimension_is_fixed_by_first_write() {
        let gw = gateway();
        gw.upsert("traces", &[doc("a", "c", vec![1.0, 0.0])]).await.unwrap();

        let err = gw
            .upsert("traces", &[doc("b", "c", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::DimensionMismatch {
                collection: "traces".into(),
                id: "b".into(),
                expected: 2,
                actual: 3,
            }
        );
        assert!(matches!(
            gw.query("traces", &[1.0], 1, None).await,
            Err(StoreError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn query_never_creates_collections() {
        let gw = gateway();
        assert_eq!(
            gw.query("metrics", &[1.0], 3, None).await.unwrap_err(),
            StoreError::CollectionNotFound("metrics".into())
        );
        assert!(gw.backend().list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn filter_restricts_results() {
        let gw = gateway();
        gw.upsert(
            "traces",
            &[doc("a", "prod", vec![1.0, 0.0]), doc("b", "staging", vec![1.0, 0.0])],
        )
        .await
        .unwrap();
        let filter = Filter::from([(CLUSTER_ID_KEY.to_string(), "staging".into())]);
        let results = gw.query("traces", &[1.0, 0.0], 5, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].cluster_id, "staging");
    }

    #[tokio::test]
    async fn metric_comes_from_config() {
        let metrics = CollectionMetrics {
            logs: DistanceMetric::L2,
            ..CollectionMetrics::default()
        };
        let gw = gateway().with_metrics(&metrics);
        gw.upsert("logs", &[doc("a", "c", vec![3.0, 4.0])]).await.unwrap();
        let info = gw.backend().collection("logs").await.unwrap().unwrap();
        assert_eq!(info.metric, DistanceMetric::L2);
        let results = gw.query("logs", &[0.0, 0.0], 1, None).await.unwrap();
        assert!((results[0].distance - 5.0).abs() < 1e-9);
    }

    /// Counts create calls and reports every create after the first as a duplicate.
    struct CountingBackend {
        inner: MemoryBackend,
        creates: AtomicUsize,
    }

    #[async_trait]
    impl VectorBackend for CountingBackend {
        async fn create_collection(&self, info: &CollectionInfo) -> Result<(), StoreError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.create_collection(info).await
        }
        async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
            self.inner.collection(name).await
        }
        async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError> {
            self.inner.list_collections().await
        }
        async fn upsert(&self, collection: &str, docs: &[Document]) -> Result<(), StoreError> {
            self.inner.upsert(collection, docs).await
        }
        async fn query(
            &self,
            collection: &str,
            embedding: &[f32],
            k: usize,
            filter: Option<&Filter>,
        ) -> Result<Vec<(Document, f64)>, StoreError> {
            self.inner.query(collection, embedding, k, filter).await
        }
        async fn count(&self, collection: &str) -> Result<usize, StoreError> {
            self.inner.count(collection).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_writes_create_once() {
        let backend = Arc::new(CountingBackend {
            inner: MemoryBackend::new(),
            creates: AtomicUsize::new(0),
        });
        let gw = Arc::new(VectorStoreGateway::new(backend.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let gw = Arc::clone(&gw);
                tokio::spawn(async move {
                    gw.upsert("traces", &[doc(&format!("d{i}"), "c", vec![1.0, i as f32])])
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(backend.creates.load(Ordering::SeqCst), 1);
        assert_eq!(gw.backend().count("traces").await.unwrap(), 16);
    }

    #[tokio::test]
    async fn existing_collection_is_reused_after_restart() {
        let backend: Arc<dyn VectorBackend> = Arc::new(MemoryBackend::new());
        VectorStoreGateway::new(Arc::clone(&backend))
            .upsert("traces", &[doc("a", "c", vec![1.0, 0.0])])
            .await
            .unwrap();

        let fresh = VectorStoreGateway::new(backend);
        fresh
            .upsert("traces", &[doc("b", "c", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(fresh.stats().await.unwrap()[0].documents, 2);
    }
}
