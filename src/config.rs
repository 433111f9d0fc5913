use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::ingest::OverflowPolicy;
use crate::store::DistanceMetric;
use crate::telemetry::Kind;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub ingest: IngestConfig,
    pub mapper: MapperConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener for `POST /otlp/v1/{kind}`.
    pub ingest_addr: String,
    /// Listener for the query API.
    pub api_addr: String,
    pub log_level: String,
    pub max_body_bytes: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Token every cluster must present. Empty rejects all requests.
    pub shared_secret: String,
    /// Per-cluster tokens that take precedence over the shared secret.
    pub cluster_secrets: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// `sqlite` or `memory`.
    pub backend: String,
    pub db_path: String,
    pub metrics: CollectionMetrics,
}

/// Distance metric per collection. Fixed once the collection exists.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CollectionMetrics {
    pub traces: DistanceMetric,
    pub logs: DistanceMetric,
    pub metrics: DistanceMetric,
}

impl CollectionMetrics {
    pub fn for_kind(&self, kind: Kind) -> DistanceMetric {
        match kind {
            Kind::Trace => self.traces,
            Kind::Log => self.logs,
            Kind::Metric => self.metrics,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `ollama` or `hash`.
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Worker tasks draining the queue. 0 means twice the CPU count.
    pub workers: usize,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub block_timeout_ms: u64,
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapperConfig {
    pub max_log_chars: usize,
    pub max_span_attributes: usize,
    pub max_attribute_chars: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ingest_addr: "0.0.0.0:8080".into(),
            api_addr: "0.0.0.0:8081".into(),
            log_level: "info".into(),
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_data_dir()
            .join("vectors.db")
            .to_string_lossy()
            .into_owned();
        Self {
            backend: "sqlite".into(),
            db_path,
            metrics: CollectionMetrics::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".into(),
            endpoint: "http://localhost:11434".into(),
            model: "nomic-embed-text".into(),
            dimensions: 768,
            timeout_secs: 5,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 1024,
            overflow: OverflowPolicy::Shed,
            block_timeout_ms: 250,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 5000,
            jitter: true,
        }
    }
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            max_log_chars: 2000,
            max_span_attributes: 16,
            max_attribute_chars: 256,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 100,
        }
    }
}

impl IngestConfig {
    /// Resolved worker count.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get() * 2
        } else {
            self.workers
        }
    }
}

/// Returns `~/.otel-recall/`
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".otel-recall")
}

/// Returns the default config file path: `~/.otel-recall/config.toml`
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

impl Config {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("OTEL_RECALL_INGEST_ADDR") {
            self.server.ingest_addr = val;
        }
        if let Ok(val) = std::env::var("OTEL_RECALL_API_ADDR") {
            self.server.api_addr = val;
        }
        if let Ok(val) = std::env::var("OTEL_RECALL_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("OTLP_AUTH_TOKEN") {
            self.auth.shared_secret = val;
        }
        if let Ok(val) = std::env::var("OTEL_RECALL_BACKEND") {
            self.storage.backend = val;
        }
        if let Ok(val) = std::env::var("OTEL_RECALL_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("OTEL_RECALL_EMBEDDING_PROVIDER") {
            self.embedding.provider = val;
        }
        if let Ok(val) = std::env::var("OLLAMA_HOST") {
            self.embedding.endpoint = val;
        }
        if let Ok(val) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = val;
        }
        if let Ok(val) = std::env::var("OTEL_RECALL_WORKERS") {
            match val.parse() {
                Ok(n) => self.ingest.workers = n,
                Err(_) => tracing::warn!(value = %val, "ignoring invalid OTEL_RECALL_WORKERS"),
            }
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            matches!(self.storage.backend.as_str(), "sqlite" | "memory"),
            "unknown storage backend: {}. Supported: sqlite, memory",
            self.storage.backend
        );
        anyhow::ensure!(
            matches!(self.embedding.provider.as_str(), "ollama" | "hash"),
            "unknown embedding provider: {}. Supported: ollama, hash",
            self.embedding.provider
        );
        anyhow::ensure!(self.embedding.dimensions > 0, "embedding.dimensions must be > 0");
        anyhow::ensure!(self.embedding.timeout_secs > 0, "embedding.timeout_secs must be > 0");
        anyhow::ensure!(self.ingest.queue_capacity > 0, "ingest.queue_capacity must be > 0");
        anyhow::ensure!(
            self.ingest.retry.max_attempts > 0,
            "ingest.retry.max_attempts must be > 0"
        );
        anyhow::ensure!(self.search.max_limit > 0, "search.max_limit must be > 0");
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.ingest_addr, "0.0.0.0:8080");
        assert_eq!(config.server.api_addr, "0.0.0.0:8081");
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.ingest.overflow, OverflowPolicy::Shed);
        assert_eq!(config.storage.metrics.for_kind(Kind::Log), DistanceMetric::Cosine);
        assert!(config.storage.db_path.ends_with("vectors.db"));
        assert!(config.auth.shared_secret.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[auth]
shared_secret = "s3cret"
cluster_secrets = { prod-eu = "eu-token" }

[storage]
backend = "memory"
metrics = { logs = "l2" }

[ingest]
workers = 3
overflow = "block"
retry = { max_attempts = 2 }
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.auth.cluster_secrets["prod-eu"], "eu-token");
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.storage.metrics.logs, DistanceMetric::L2);
        assert_eq!(config.storage.metrics.traces, DistanceMetric::Cosine);
        assert_eq!(config.ingest.worker_count(), 3);
        assert_eq!(config.ingest.overflow, OverflowPolicy::Block);
        assert_eq!(config.ingest.retry.max_attempts, 2);
        // defaults still apply for unset fields
        assert_eq!(config.ingest.retry.base_delay_ms, 200);
        assert_eq!(config.search.max_limit, 100);
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let mut config = Config::default();
        config.storage.backend = "chroma".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.dimensions = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ingest.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_workers_scale_with_cpus() {
        assert!(IngestConfig::default().worker_count() >= 2);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        std::env::set_var("OTEL_RECALL_DB", "/tmp/override.db");
        std::env::set_var("OTLP_AUTH_TOKEN", "from-env");
        std::env::set_var("OLLAMA_HOST", "http://ollama:11434");
        std::env::set_var("OTEL_RECALL_WORKERS", "7");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.auth.shared_secret, "from-env");
        assert_eq!(config.embedding.endpoint, "http://ollama:11434");
        assert_eq!(config.ingest.workers, 7);

        // Clean up
        std::env::remove_var("OTEL_RECALL_DB");
        std::env::remove_var("OTLP_AUTH_TOKEN");
        std::env::remove_var("OLLAMA_HOST");
        std::env::remove_var("OTEL_RECALL_WORKERS");
    }
}
