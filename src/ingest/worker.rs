//! The async storage phase: a fixed pool of workers draining the ingest queue.
//!
//! Each envelope is mapped to documents, embedded as one batch and upserted
//! as one batch. Failures are retried with backoff and then dropped and
//! counted; nothing here ever reaches the telemetry sender.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::health::ServiceHealth;
use super::retry::{retry, RetryPolicy};
use super::stats::IngestStats;
use crate::config::MapperConfig;
use crate::document::{self, Document};
use crate::embedding::EmbeddingProvider;
use crate::error::{MapError, StoreError};
use crate::store::VectorStoreGateway;
use crate::telemetry::TelemetryEnvelope;

/// Everything a worker needs to turn an envelope into stored documents.
pub struct Pipeline {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub gateway: Arc<VectorStoreGateway>,
    pub stats: Arc<IngestStats>,
    pub health: Arc<ServiceHealth>,
    pub mapper: MapperConfig,
    pub retry: RetryPolicy,
    pub embed_timeout: Duration,
}

impl Pipeline {
    /// Map, embed and store one envelope. Never fails; losses are counted.
    pub async fn process(&self, envelope: TelemetryEnvelope) {
        let kind = envelope.kind();
        let cluster = envelope.cluster_id.as_str();

        let docs = match document::map(&envelope, &self.mapper) {
            Ok(docs) => docs,
            Err(MapError::EmptyEnvelope) => {
                tracing::debug!(cluster, %kind, "nothing to map");
                return;
            }
        };
        let count = docs.len();
        self.health.observe(cluster, kind, &docs);

        let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
        let embeddings = retry(&self.retry, "embed", |_| true, |_| self.embed(&texts)).await;
        let embeddings = match embeddings {
            Ok(embeddings) => embeddings,
            Err(e) => {
                IngestStats::incr(&self.stats.embedding_failures);
                self.drop_batch(cluster, kind.collection_name(), count, &e.to_string());
                return;
            }
        };

        let docs: Vec<Document> = docs
            .into_iter()
            .zip(embeddings)
            .map(|(doc, embedding)| doc.with_embedding(embedding))
            .collect();

        let collection = kind.collection_name();
        let stored = retry(&self.retry, "upsert", StoreError::is_retryable, |_| {
            self.gateway.upsert(collection, &docs)
        })
        .await;

        match stored {
            Ok(()) => {
                IngestStats::incr(&self.stats.stored_batches);
                IngestStats::add(&self.stats.stored_documents, count);
                tracing::debug!(cluster, collection, documents = count, "stored batch");
            }
            Err(e) => {
                if matches!(e, StoreError::DimensionMismatch { .. }) {
                    IngestStats::incr(&self.stats.dimension_mismatches);
                }
                self.drop_batch(cluster, collection, count, &e.to_string());
            }
        }
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let embeddings = tokio::time::timeout(self.embed_timeout, self.embedder.embed_batch(texts))
            .await
            .map_err(|_| anyhow::anyhow!("embedding timed out after {:?}", self.embed_timeout))??;
        anyhow::ensure!(
            embeddings.len() == texts.len(),
            "embedding provider returned {} vectors for {} texts",
            embeddings.len(),
            texts.len()
        );
        Ok(embeddings)
    }

    fn drop_batch(&self, cluster: &str, collection: &str, documents: usize, error: &str) {
        IngestStats::incr(&self.stats.dropped_batches);
        IngestStats::add(&self.stats.dropped_documents, documents);
        tracing::error!(cluster, collection, documents, error, "dropped batch");
    }
}

/// Fixed set of worker tasks sharing one queue receiver.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        pipeline: Arc<Pipeline>,
        receiver: mpsc::Receiver<TelemetryEnvelope>,
        workers: usize,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let handles = (0..workers.max(1))
            .map(|id| {
                let pipeline = Arc::clone(&pipeline);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(envelope) = next else {
                            break;
                        };
                        pipeline.process(envelope).await;
                    }
                    tracing::debug!(worker = id, "worker stopped");
                })
            })
            .collect();

        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to finish. Workers stop once the queue is closed
    /// and drained.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task failed");
            }
        }
    }
}
