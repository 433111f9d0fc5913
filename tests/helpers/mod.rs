#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;

use otel_recall::config::{Config, RetryConfig};
use otel_recall::document::{Document, Filter};
use otel_recall::embedding::EmbeddingProvider;
use otel_recall::error::StoreError;
use otel_recall::server::AppState;
use otel_recall::store::memory::MemoryBackend;
use otel_recall::store::{CollectionInfo, VectorBackend};

pub const SECRET: &str = "s3cret";
pub const CLUSTER: &str = "prod-eu";
pub const DIMS: usize = 16;

const START_NANOS: u64 = 1_700_000_000_000_000_000;

// ── Config ──

/// In-memory store, hash embedder, fast retries, one shared secret.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.shared_secret = SECRET.into();
    config.storage.backend = "memory".into();
    config.embedding.provider = "hash".into();
    config.embedding.dimensions = DIMS;
    config.embedding.timeout_secs = 2;
    config.ingest.workers = 4;
    config.ingest.queue_capacity = 256;
    config.ingest.retry = RetryConfig {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
        jitter: false,
    };
    config
}

/// Wire the full pipeline over an in-memory backend.
pub fn app(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Arc<AppState> {
    app_with_backend(config, embedder, Arc::new(MemoryBackend::new()))
}

pub fn app_with_backend(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
    backend: Arc<dyn VectorBackend>,
) -> Arc<AppState> {
    Arc::new(AppState::new(config, embedder, backend))
}

// ── OTLP fixtures ──

/// One OTLP span. `status_code` follows OTLP: 0 unset, 1 ok, 2 error.
pub fn span(trace_id: &str, span_id: &str, name: &str, status_code: i64, duration_ms: u64) -> Value {
    let end = START_NANOS + duration_ms * 1_000_000;
    json!({
        "traceId": trace_id,
        "spanId": span_id,
        "name": name,
        "startTimeUnixNano": START_NANOS.to_string(),
        "endTimeUnixNano": end.to_string(),
        "attributes": [
            {"key": "k8s.namespace.name", "value": {"stringValue": "shop"}}
        ],
        "status": {"code": status_code}
    })
}

pub fn traces_body(spans: Vec<Value>) -> Vec<u8> {
    body(json!({
        "resourceSpans": [{
            "resource": {"attributes": [
                {"key": "service.name", "value": {"stringValue": "checkout"}}
            ]},
            "scopeSpans": [{"spans": spans}]
        }]
    }))
}

pub fn logs_body(records: &[(&str, &str)]) -> Vec<u8> {
    let records: Vec<Value> = records
        .iter()
        .enumerate()
        .map(|(i, (severity, text))| {
            json!({
                "timeUnixNano": (START_NANOS + i as u64).to_string(),
                "severityText": severity,
                "body": {"stringValue": text}
            })
        })
        .collect();
    body(json!({
        "resourceLogs": [{
            "resource": {"attributes": [
                {"key": "service.name", "value": {"stringValue": "payments"}}
            ]},
            "scopeLogs": [{"logRecords": records}]
        }]
    }))
}

pub fn metrics_body(name: &str, values: &[f64]) -> Vec<u8> {
    let points: Vec<Value> = values
        .iter()
        .enumerate()
        .map(|(i, v)| json!({"timeUnixNano": (START_NANOS + i as u64).to_string(), "asDouble": v}))
        .collect();
    body(json!({
        "resourceMetrics": [{"scopeMetrics": [{"metrics": [
            {"name": name, "unit": "1", "gauge": {"dataPoints": points}}
        ]}]}]
    }))
}

fn body(value: Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

// ── Embedders ──

/// Bag-of-words embedder where related words share a dimension: database
/// words land on 0, failure words on 1, everything else spreads over the rest.
pub struct KeywordEmbedder;

impl KeywordEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let slot = match word.as_str() {
                "database" | "db" | "sql" | "postgres" | "postgresql" => 0,
                "error" | "errors" | "exception" | "failed" | "failure" => 1,
                other => 2 + other.bytes().map(usize::from).sum::<usize>() % (DIMS - 2),
            };
            v[slot] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(Self::vector(text))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_id(&self) -> &str {
        "keyword-test"
    }
}

/// Always errors.
pub struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("connection refused")
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_id(&self) -> &str {
        "down"
    }
}

/// Blocks every embed call until the gate hands out a permit.
pub struct GatedEmbedder {
    pub gate: Arc<Semaphore>,
}

impl GatedEmbedder {
    pub fn closed() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                gate: Arc::clone(&gate),
            },
            gate,
        )
    }
}

#[async_trait]
impl EmbeddingProvider for GatedEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let _permit = self.gate.acquire().await?;
        Ok(KeywordEmbedder::vector(text))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_id(&self) -> &str {
        "gated"
    }
}

// ── Backends ──

/// A store that is never reachable.
pub struct FailingBackend;

fn unavailable<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("connection reset by peer".into()))
}

#[async_trait]
impl VectorBackend for FailingBackend {
    async fn create_collection(&self, _info: &CollectionInfo) -> Result<(), StoreError> {
        unavailable()
    }

    async fn collection(&self, _name: &str) -> Result<Option<CollectionInfo>, StoreError> {
        unavailable()
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError> {
        unavailable()
    }

    async fn upsert(&self, _collection: &str, _docs: &[Document]) -> Result<(), StoreError> {
        unavailable()
    }

    async fn query(
        &self,
        _collection: &str,
        _embedding: &[f32],
        _k: usize,
        _filter: Option<&Filter>,
    ) -> Result<Vec<(Document, f64)>, StoreError> {
        unavailable()
    }

    async fn count(&self, _collection: &str) -> Result<usize, StoreError> {
        unavailable()
    }
}
