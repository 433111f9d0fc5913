//! Similar-incident search over Kubernetes telemetry.
//!
//! otel-recall receives OTLP JSON exports (traces, logs and metrics) pushed
//! by agents in one or more clusters, turns each record into a readable
//! document, embeds it and stores it in a vector collection per signal.
//! Operators then ask for "incidents like this one" in free text and get the
//! nearest stored telemetry back.
//!
//! | Signal | Collection | One document per |
//! |--------|------------|------------------|
//! | Traces | `traces` | span |
//! | Logs | `logs` | log record |
//! | Metrics | `metrics` | metric name in an export |
//!
//! # Architecture
//!
//! - **Ingestion**: authenticated per cluster, decoded synchronously, then
//!   embedded and stored by a bounded worker pool off the request path
//! - **Embeddings**: an Ollama-compatible HTTP endpoint, or an offline
//!   feature-hashing provider
//! - **Storage**: [sqlite-vec](https://github.com/asg017/sqlite-vec) on a
//!   local file, or an in-process store
//! - **Transport**: two HTTP listeners, OTLP ingestion and the query API
//!
//! # Modules
//!
//! - [`config`]: configuration from TOML files and environment variables
//! - [`telemetry`]: OTLP JSON decoding into typed envelopes
//! - [`document`]: rendering telemetry records as searchable documents
//! - [`embedding`]: text-to-vector providers
//! - [`store`]: the vector store gateway and its backends
//! - [`db`]: SQLite initialization, schema, migrations and health checks
//! - [`ingest`]: the dispatcher, worker pool, retries and counters
//! - [`search`]: incident search
//! - [`server`]: HTTP routing and process wiring
//! - [`cli`]: operator commands

pub mod cli;
pub mod config;
pub mod db;
pub mod document;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod search;
pub mod server;
pub mod store;
pub mod telemetry;
