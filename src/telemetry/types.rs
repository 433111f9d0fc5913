//! Normalized telemetry records.
//!
//! Defines [`Kind`] (the three OTLP signals), [`TelemetryEnvelope`] with its
//! per-kind [`Payload`], and the records it carries: [`Span`], [`LogRecord`]
//! and [`MetricPoint`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::DecodeError;

/// The three OTLP signal kinds. Each maps to one vector store collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Trace,
    Log,
    Metric,
}

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::Trace, Kind::Log, Kind::Metric];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Log => "log",
            Self::Metric => "metric",
        }
    }

    /// Name of the collection holding documents of this kind.
    pub fn collection_name(&self) -> &'static str {
        match self {
            Self::Trace => "traces",
            Self::Log => "logs",
            Self::Metric => "metrics",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Kind {
    type Err = DecodeError;

    /// Accepts both the singular kind and the plural OTLP path segment.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace" | "traces" => Ok(Self::Trace),
            "log" | "logs" => Ok(Self::Log),
            "metric" | "metrics" => Ok(Self::Metric),
            other => Err(DecodeError::UnsupportedKind(other.to_string())),
        }
    }
}

/// A scalar attribute or metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Attribute maps are ordered so renderings are reproducible.
pub type Attributes = BTreeMap<String, Scalar>;

/// Span completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }

    /// OTLP numeric status code.
    pub fn code(&self) -> i64 {
        match self {
            Self::Unset => 0,
            Self::Ok => 1,
            Self::Error => 2,
        }
    }
}

impl std::fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log severity, collapsed from the 24 OTLP severity numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Unspecified,
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }

    /// Map an OTLP `severityNumber` (1..=24) onto a severity band.
    pub fn from_number(n: i64) -> Self {
        match n {
            1..=4 => Self::Trace,
            5..=8 => Self::Debug,
            9..=12 => Self::Info,
            13..=16 => Self::Warn,
            17..=20 => Self::Error,
            21..=24 => Self::Fatal,
            _ => Self::Unspecified,
        }
    }

    /// The lowest OTLP severity number of this band.
    pub fn number(&self) -> i64 {
        match self {
            Self::Unspecified => 0,
            Self::Trace => 1,
            Self::Debug => 5,
            Self::Info => 9,
            Self::Warn => 13,
            Self::Error => 17,
            Self::Fatal => 21,
        }
    }

    /// Parse a free-form `severityText` such as `"error"` or `"WARNING"`.
    pub fn from_text(text: &str) -> Self {
        match text.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Self::Trace,
            "DEBUG" => Self::Debug,
            "INFO" | "INFORMATION" | "NOTICE" => Self::Info,
            "WARN" | "WARNING" => Self::Warn,
            "ERROR" | "ERR" => Self::Error,
            "FATAL" | "CRITICAL" | "CRIT" | "PANIC" => Self::Fatal,
            _ => Self::Unspecified,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single span of a distributed trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Hex trace id, lower-cased.
    pub trace_id: String,
    /// Hex span id, lower-cased.
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    /// `service.name` of the emitting resource, if it declared one.
    pub service: Option<String>,
    pub start_time: DateTime<Utc>,
    /// Never earlier than `start_time`.
    pub end_time: Option<DateTime<Utc>>,
    pub attributes: Attributes,
    pub status: SpanStatus,
    pub status_message: Option<String>,
}

impl Span {
    /// Span duration in milliseconds, if the span has ended.
    pub fn duration_ms(&self) -> Option<f64> {
        self.end_time.map(|end| {
            (end - self.start_time)
                .num_microseconds()
                .map(|us| us as f64 / 1000.0)
                .unwrap_or(f64::MAX)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub body: String,
    pub service: Option<String>,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
}

/// Kind-specific records carried by an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "records", rename_all = "snake_case")]
pub enum Payload {
    Traces(Vec<Span>),
    Logs(Vec<LogRecord>),
    Metrics(Vec<MetricPoint>),
}

/// One decoded OTLP export request from one cluster. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEnvelope {
    pub cluster_id: String,
    pub received_at: DateTime<Utc>,
    pub payload: Payload,
}

impl TelemetryEnvelope {
    pub fn kind(&self) -> Kind {
        match &self.payload {
            Payload::Traces(_) => Kind::Trace,
            Payload::Logs(_) => Kind::Log,
            Payload::Metrics(_) => Kind::Metric,
        }
    }

    /// Number of spans, log records or metric points in the envelope.
    pub fn record_count(&self) -> usize {
        match &self.payload {
            Payload::Traces(spans) => spans.len(),
            Payload::Logs(logs) => logs.len(),
            Payload::Metrics(points) => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }
}
