//! Ingestion dispatcher.
//!
//! [`Dispatcher::ingest`] runs on the request task: it authenticates the
//! tenant, decodes the body, counts the records and queues the envelope. The
//! embedding and storage phase runs later on the [`worker::WorkerPool`]; the
//! caller only ever sees an accepted receipt or a synchronous rejection.

pub mod auth;
pub mod health;
pub mod retry;
pub mod stats;
pub mod worker;

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};

use crate::config::{AuthConfig, Config};
use crate::embedding::EmbeddingProvider;
use crate::error::IngestError;
use crate::store::VectorStoreGateway;
use crate::telemetry::{self, Kind, TelemetryEnvelope};

use self::health::ServiceHealth;
use self::retry::RetryPolicy;
use self::stats::IngestStats;
use self::worker::{Pipeline, WorkerPool};

/// What to do when the work queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Reject immediately with [`IngestError::Overloaded`].
    #[default]
    Shed,
    /// Wait up to `ingest.block_timeout_ms` for room, then reject.
    Block,
}

/// Synchronous answer to an accepted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub kind: Kind,
    /// Records counted at decode time.
    pub records: usize,
    /// False for empty envelopes, which are accepted without queueing.
    pub queued: bool,
}

pub struct Dispatcher {
    auth: AuthConfig,
    overflow: OverflowPolicy,
    block_timeout: Duration,
    stats: Arc<IngestStats>,
    health: Arc<ServiceHealth>,
    sender: RwLock<Option<mpsc::Sender<TelemetryEnvelope>>>,
    workers: tokio::sync::Mutex<Option<WorkerPool>>,
}

impl Dispatcher {
    /// Create the queue and spawn the worker pool. Must run inside a Tokio runtime.
    pub fn start(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        gateway: Arc<VectorStoreGateway>,
    ) -> Self {
        let stats = Arc::new(IngestStats::default());
        let health = Arc::new(ServiceHealth::default());
        let pipeline = Arc::new(Pipeline {
            embedder,
            gateway,
            stats: Arc::clone(&stats),
            health: Arc::clone(&health),
            mapper: config.mapper.clone(),
            retry: RetryPolicy::from(&config.ingest.retry),
            embed_timeout: Duration::from_secs(config.embedding.timeout_secs),
        });

        let (sender, receiver) = mpsc::channel(config.ingest.queue_capacity.max(1));
        let workers = WorkerPool::spawn(pipeline, receiver, config.ingest.worker_count());
        tracing::info!(
            workers = workers.size(),
            queue_capacity = config.ingest.queue_capacity,
            overflow = ?config.ingest.overflow,
            "ingest worker pool started"
        );

        Self {
            auth: config.auth.clone(),
            overflow: config.ingest.overflow,
            block_timeout: Duration::from_millis(config.ingest.block_timeout_ms),
            stats,
            health,
            sender: RwLock::new(Some(sender)),
            workers: tokio::sync::Mutex::new(Some(workers)),
        }
    }

    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// Error rate and latency per service, from recently processed batches.
    pub fn health(&self) -> &ServiceHealth {
        &self.health
    }

    /// Envelopes waiting for a worker.
    pub fn queue_depth(&self) -> usize {
        self.current_sender()
            .map(|s| s.max_capacity() - s.capacity())
            .unwrap_or(0)
    }

    /// Authenticate, decode, count and queue one export request.
    ///
    /// The cluster id is trimmed once, so the secret checked is the secret
    /// of the tenant the documents are stored under.
    pub async fn ingest(
        &self,
        cluster_id: &str,
        kind: Kind,
        body: &[u8],
        token: &str,
    ) -> Result<Receipt, IngestError> {
        let cluster_id = cluster_id.trim();
        self.authenticate(cluster_id, token)?;
        self.accept(cluster_id, kind, body).await
    }

    /// Like [`ingest`](Self::ingest) with the kind still in its URL form
    /// (`traces`, `logs`, `metrics`). Authentication comes first.
    pub async fn ingest_signal(
        &self,
        cluster_id: &str,
        signal: &str,
        body: &[u8],
        token: &str,
    ) -> Result<Receipt, IngestError> {
        let cluster_id = cluster_id.trim();
        self.authenticate(cluster_id, token)?;
        let kind = signal.parse::<Kind>().inspect_err(|_| {
            IngestStats::incr(&self.stats.invalid_payloads);
        })?;
        self.accept(cluster_id, kind, body).await
    }

    /// Stop accepting work, let the workers drain the queue, and wait for them.
    pub async fn shutdown(&self) {
        let queued = self.queue_depth();
        let sender = self
            .sender
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(sender);

        if let Some(workers) = self.workers.lock().await.take() {
            tracing::info!(queued, "draining ingest queue");
            workers.join().await;
            tracing::info!("ingest worker pool stopped");
        }
    }

    fn authenticate(&self, cluster_id: &str, token: &str) -> Result<(), IngestError> {
        if auth::authorize(&self.auth, cluster_id, token) {
            return Ok(());
        }
        IngestStats::incr(&self.stats.unauthorized);
        tracing::warn!(cluster = cluster_id, "rejected request with invalid token");
        Err(IngestError::Unauthorized)
    }

    async fn accept(&self, cluster_id: &str, kind: Kind, body: &[u8]) -> Result<Receipt, IngestError> {
        let envelope = telemetry::decode(cluster_id, kind, body).map_err(|e| {
            IngestStats::incr(&self.stats.invalid_payloads);
            tracing::warn!(cluster = cluster_id, %kind, error = %e, "rejected malformed payload");
            e
        })?;

        let records = envelope.record_count();

        if envelope.is_empty() {
            IngestStats::incr(&self.stats.empty_envelopes);
            IngestStats::incr(&self.stats.accepted_requests);
            tracing::info!(cluster = cluster_id, %kind, "accepted empty envelope");
            return Ok(Receipt {
                kind,
                records: 0,
                queued: false,
            });
        }

        self.enqueue(envelope).await?;

        IngestStats::add(self.stats.records(kind), records);
        IngestStats::incr(&self.stats.accepted_requests);
        tracing::info!(cluster = cluster_id, %kind, records, "telemetry accepted");
        Ok(Receipt {
            kind,
            records,
            queued: true,
        })
    }

    async fn enqueue(&self, envelope: TelemetryEnvelope) -> Result<(), IngestError> {
        let sender = self.current_sender().ok_or(IngestError::ShuttingDown)?;

        let result = match self.overflow {
            OverflowPolicy::Shed => sender.try_send(envelope).map_err(|e| match e {
                TrySendError::Full(_) => IngestError::Overloaded,
                TrySendError::Closed(_) => IngestError::ShuttingDown,
            }),
            OverflowPolicy::Block => sender
                .send_timeout(envelope, self.block_timeout)
                .await
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => IngestError::Overloaded,
                    SendTimeoutError::Closed(_) => IngestError::ShuttingDown,
                }),
        };

        if result == Err(IngestError::Overloaded) {
            IngestStats::incr(&self.stats.overloaded);
            match self.overflow {
                OverflowPolicy::Shed => {
                    tracing::warn!("ingest queue full, shedding request");
                }
                OverflowPolicy::Block => {
                    tracing::warn!(
                        waited_ms = self.block_timeout.as_millis() as u64,
                        "ingest queue still full after waiting, rejecting request"
                    );
                }
            }
        }
        result
    }

    fn current_sender(&self) -> Option<mpsc::Sender<TelemetryEnvelope>> {
        self.sender
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
