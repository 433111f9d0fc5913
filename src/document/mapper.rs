//! Telemetry → document mapping.
//!
//! Spans and log records map one-to-one onto documents; metric points are
//! summarized per metric name. Rendering is deterministic (attribute and
//! label keys are sorted) and document ids derive only from the source
//! records, so re-ingesting the same payload reproduces the same documents.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use super::{Document, Metadata, CLUSTER_ID_KEY, KIND_KEY};
use crate::config::MapperConfig;
use crate::error::MapError;
use crate::telemetry::{
    Kind, LogRecord, MetricPoint, Payload, Scalar, Severity, Span, SpanStatus, TelemetryEnvelope,
};

/// Words in a log body that flag it as describing a failure.
const ERROR_KEYWORDS: [&str; 5] = ["error", "exception", "failed", "timeout", "panic"];

/// Map an envelope to documents without embeddings.
///
/// Returns [`MapError::EmptyEnvelope`] when there is nothing to map.
pub fn map(envelope: &TelemetryEnvelope, config: &MapperConfig) -> Result<Vec<Document>, MapError> {
    if envelope.is_empty() {
        return Err(MapError::EmptyEnvelope);
    }

    let cluster = envelope.cluster_id.as_str();
    let docs = match &envelope.payload {
        Payload::Traces(spans) => spans.iter().map(|s| map_span(cluster, s, config)).collect(),
        Payload::Logs(logs) => logs.iter().map(|l| map_log(cluster, l, config)).collect(),
        Payload::Metrics(points) => map_metrics(cluster, points, config),
    };
    Ok(docs)
}

// ── Spans ─────────────────────────────────────────────────────────────────────

fn map_span(cluster: &str, span: &Span, config: &MapperConfig) -> Document {
    let mut text = format!("Trace {} span {}: {}", span.trace_id, span.span_id, span.name);
    if let Some(service) = &span.service {
        let _ = write!(text, "\nService: {service}");
    }
    let _ = write!(text, "\nStatus: {}", span.status);
    if let Some(message) = &span.status_message {
        let _ = write!(text, " ({})", truncate(message, config.max_attribute_chars));
    }
    match span.duration_ms() {
        Some(ms) => {
            let _ = write!(text, "\nDuration: {ms:.1}ms");
        }
        None => text.push_str("\nDuration: unfinished"),
    }
    if let Some(parent) = &span.parent_span_id {
        let _ = write!(text, "\nParent: {parent}");
    }
    let rendered: Vec<String> = span
        .attributes
        .iter()
        .take(config.max_span_attributes)
        .map(|(k, v)| format!("{k}={}", truncate(&v.to_string(), config.max_attribute_chars)))
        .collect();
    if !rendered.is_empty() {
        let _ = write!(text, "\nAttributes: {}", rendered.join(", "));
    }

    let mut metadata = base_metadata(cluster, Kind::Trace, span.start_time, span.service.as_deref());
    metadata.insert("trace_id".into(), span.trace_id.clone().into());
    metadata.insert("span_id".into(), span.span_id.clone().into());
    if let Some(parent) = &span.parent_span_id {
        metadata.insert("parent_span_id".into(), parent.clone().into());
    }
    metadata.insert("operation".into(), span.name.clone().into());
    metadata.insert("status".into(), span.status.as_str().into());
    if let Some(ms) = span.duration_ms() {
        metadata.insert("duration_ms".into(), ms.into());
    }
    metadata.insert("has_errors".into(), (span.status == SpanStatus::Error).into());

    Document::new(span_document_id(&span.trace_id, &span.span_id), text, metadata)
}

/// Document id of a span: `span_{traceId}_{spanId}`.
pub fn span_document_id(trace_id: &str, span_id: &str) -> String {
    format!(
        "span_{}_{}",
        trace_id.to_ascii_lowercase(),
        span_id.to_ascii_lowercase()
    )
}

// ── Logs ──────────────────────────────────────────────────────────────────────

fn map_log(cluster: &str, log: &LogRecord, config: &MapperConfig) -> Document {
    let text = truncate(&format!("{} {}", log.severity, log.body), config.max_log_chars);

    let body = log.body.to_lowercase();
    let has_errors = log.severity >= Severity::Error
        || ERROR_KEYWORDS.iter().any(|word| body.contains(word));

    let mut metadata = base_metadata(cluster, Kind::Log, log.timestamp, log.service.as_deref());
    metadata.insert("severity".into(), log.severity.as_str().into());
    metadata.insert("has_errors".into(), has_errors.into());

    let timestamp = rfc3339(log.timestamp);
    let fields: [&str; 5] = [
        cluster,
        &timestamp,
        log.severity.as_str(),
        log.service.as_deref().unwrap_or_default(),
        &log.body,
    ];
    let mut hasher = Sha256::new();
    for part in fields {
        hash_field(&mut hasher, part);
    }
    for (key, value) in &log.attributes {
        hash_field(&mut hasher, key);
        hash_field(&mut hasher, &value.to_string());
    }

    Document::new(format!("log_{}", short_digest(hasher)), text, metadata)
}

// ── Metrics ───────────────────────────────────────────────────────────────────

/// One document per metric name, summarizing every point of that name.
fn map_metrics(cluster: &str, points: &[MetricPoint], config: &MapperConfig) -> Vec<Document> {
    let mut by_name: BTreeMap<&str, Vec<&MetricPoint>> = BTreeMap::new();
    for point in points {
        by_name.entry(point.name.as_str()).or_default().push(point);
    }

    by_name
        .into_iter()
        .map(|(name, group)| summarize_metric(cluster, name, &group, config))
        .collect()
}

fn summarize_metric(
    cluster: &str,
    name: &str,
    points: &[&MetricPoint],
    config: &MapperConfig,
) -> Document {
    let count = points.len();
    let min = points.iter().map(|p| p.value).fold(f64::INFINITY, f64::min);
    let max = points.iter().map(|p| p.value).fold(f64::NEG_INFINITY, f64::max);
    let avg = points.iter().map(|p| p.value).sum::<f64>() / count as f64;
    let first = points.iter().map(|p| p.timestamp).min().unwrap_or_default();
    let last = points.iter().map(|p| p.timestamp).max().unwrap_or_default();
    let unit = points.iter().find_map(|p| p.unit.as_deref());

    let labels: BTreeSet<(&str, &str)> = points
        .iter()
        .flat_map(|p| p.labels.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .collect();

    let mut text = format!("Metric {name}");
    if let Some(unit) = unit {
        let _ = write!(text, " ({unit})");
    }
    let _ = write!(
        text,
        ": min={min} max={max} avg={avg:.3} over {count} points from {} to {}",
        rfc3339(first),
        rfc3339(last)
    );
    let rendered: Vec<String> = labels
        .iter()
        .take(config.max_span_attributes)
        .map(|(k, v)| format!("{k}={}", truncate(v, config.max_attribute_chars)))
        .collect();
    if !rendered.is_empty() {
        let _ = write!(text, "\nLabels: {}", rendered.join(", "));
    }

    let service = points
        .iter()
        .find_map(|p| p.labels.get("service.name").map(String::as_str));
    let mut metadata = base_metadata(cluster, Kind::Metric, last, service);
    metadata.insert("metric_name".into(), name.into());
    if let Some(unit) = unit {
        metadata.insert("unit".into(), unit.into());
    }
    metadata.insert("min".into(), min.into());
    metadata.insert("max".into(), max.into());
    metadata.insert("avg".into(), avg.into());
    metadata.insert("count".into(), (count as i64).into());
    metadata.insert("window_start".into(), rfc3339(first).into());

    let mut hasher = Sha256::new();
    hash_field(&mut hasher, cluster);
    hash_field(&mut hasher, name);
    for point in points {
        hash_field(&mut hasher, &rfc3339(point.timestamp));
        hasher.update(point.value.to_bits().to_be_bytes());
        for (key, value) in &point.labels {
            hash_field(&mut hasher, key);
            hash_field(&mut hasher, value);
        }
    }

    Document::new(format!("metric_{}", short_digest(hasher)), text, metadata)
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn base_metadata(
    cluster: &str,
    kind: Kind,
    timestamp: DateTime<Utc>,
    service: Option<&str>,
) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(CLUSTER_ID_KEY.into(), cluster.into());
    metadata.insert(KIND_KEY.into(), kind.as_str().into());
    metadata.insert("timestamp".into(), rfc3339(timestamp).into());
    if let Some(service) = service {
        metadata.insert("service".into(), Scalar::from(service));
    }
    metadata
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Length-prefixed so adjacent fields cannot run into each other.
fn hash_field(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field.as_bytes());
}

fn short_digest(hasher: Sha256) -> String {
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(32);
    digest
}

/// Truncate to at most `max_chars` characters, never splitting a character.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Attributes;

    fn config() -> MapperConfig {
        MapperConfig::default()
    }

    fn ts(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    fn envelope(payload: Payload) -> TelemetryEnvelope {
        TelemetryEnvelope {
            cluster_id: "prod-eu".into(),
            received_at: ts(0),
            payload,
        }
    }

    fn span(name: &str, status: SpanStatus, duration_ms: i64) -> Span {
        let mut attributes = Attributes::new();
        attributes.insert("z.last".into(), Scalar::Int(1));
        attributes.insert("a.first".into(), "x".into());
        Span {
            trace_id: "ABC123".into(),
            span_id: "0F".into(),
            parent_span_id: None,
            name: name.into(),
            service: Some("orders".into()),
            start_time: ts(0),
            end_time: Some(ts(duration_ms)),
            attributes,
            status,
            status_message: None,
        }
    }

    #[test]
    fn span_document_renders_name_status_duration_and_sorted_attributes() {
        let env = envelope(Payload::Traces(vec![span("db-query", SpanStatus::Error, 1200)]));
        let docs = map(&env, &config()).unwrap();
        assert_eq!(docs.len(), 1);

        let doc = &docs[0];
        assert_eq!(doc.id, "span_abc123_0f");
        assert!(doc.text.contains("db-query"));
        assert!(doc.text.contains("Status: error"));
        assert!(doc.text.contains("Duration: 1200.0ms"));
        assert!(doc.text.contains("Attributes: a.first=x, z.last=1"));
        assert_eq!(doc.cluster_id(), "prod-eu");
        assert_eq!(doc.metadata["has_errors"], Scalar::Bool(true));
        assert_eq!(doc.metadata["service"], Scalar::from("orders"));
        assert!(doc.embedding.is_empty());
    }

    #[test]
    fn span_attributes_are_bounded() {
        let mut s = span("op", SpanStatus::Ok, 5);
        for i in 0..40 {
            s.attributes.insert(format!("k{i:02}"), "v".repeat(1000).into());
        }
        let cfg = MapperConfig {
            max_span_attributes: 3,
            max_attribute_chars: 10,
            ..MapperConfig::default()
        };
        let docs = map(&envelope(Payload::Traces(vec![s])), &cfg).unwrap();
        let attrs = docs[0].text.lines().last().unwrap();
        assert_eq!(attrs.matches('=').count(), 3);
        assert!(!attrs.contains(&"v".repeat(11)));
    }

    #[test]
    fn mapping_is_deterministic() {
        let log = LogRecord {
            timestamp: ts(10),
            severity: Severity::Warn,
            body: "retrying connection".into(),
            service: None,
            attributes: Attributes::from([("pod".to_string(), Scalar::from("api-1"))]),
        };
        let env = envelope(Payload::Logs(vec![log.clone()]));
        let first = map(&env, &config()).unwrap();
        let second = map(&env, &config()).unwrap();
        assert_eq!(first, second);
        assert!(first[0].id.starts_with("log_"));
        assert_eq!(first[0].id.len(), "log_".len() + 32);

        let mut other = log;
        other.body.push('!');
        let third = map(&envelope(Payload::Logs(vec![other])), &config()).unwrap();
        assert_ne!(first[0].id, third[0].id);
    }

    #[test]
    fn log_text_truncates_on_character_boundary() {
        let log = LogRecord {
            timestamp: ts(0),
            severity: Severity::Info,
            body: "é".repeat(3000),
            service: None,
            attributes: Attributes::new(),
        };
        let docs = map(&envelope(Payload::Logs(vec![log])), &config()).unwrap();
        assert_eq!(docs[0].text.chars().count(), 2000);
        assert!(docs[0].text.starts_with("INFO é"));
    }

    #[test]
    fn log_error_keywords_set_has_errors() {
        let record = |severity, body: &str| LogRecord {
            timestamp: ts(0),
            severity,
            body: body.into(),
            service: None,
            attributes: Attributes::new(),
        };
        let env = envelope(Payload::Logs(vec![
            record(Severity::Info, "Upstream Timeout after 30s"),
            record(Severity::Fatal, "bye"),
            record(Severity::Info, "all good"),
        ]));
        let flags: Vec<Scalar> = map(&env, &config())
            .unwrap()
            .into_iter()
            .map(|d| d.metadata["has_errors"].clone())
            .collect();
        assert_eq!(flags, vec![true.into(), true.into(), false.into()]);
    }

    #[test]
    fn metrics_are_summarized_per_name() {
        let point = |name: &str, value: f64, ms: i64| MetricPoint {
            name: name.into(),
            unit: Some("ms".into()),
            timestamp: ts(ms),
            value,
            labels: BTreeMap::from([("pod".to_string(), "api-0".to_string())]),
        };
        let env = envelope(Payload::Metrics(vec![
            point("latency", 10.0, 0),
            point("cpu", 0.5, 0),
            point("latency", 30.0, 1000),
            point("latency", 20.0, 2000),
        ]));
        let docs = map(&env, &config()).unwrap();
        assert_eq!(docs.len(), 2);

        let latency = docs
            .iter()
            .find(|d| d.metadata["metric_name"] == Scalar::from("latency"))
            .unwrap();
        assert_eq!(latency.metadata["min"], Scalar::Float(10.0));
        assert_eq!(latency.metadata["max"], Scalar::Float(30.0));
        assert_eq!(latency.metadata["avg"], Scalar::Float(20.0));
        assert_eq!(latency.metadata["count"], Scalar::Int(3));
        assert!(latency.text.contains("over 3 points"));
        assert!(latency.text.contains("Labels: pod=api-0"));
    }

    #[test]
    fn empty_envelope_is_reported() {
        let env = envelope(Payload::Traces(Vec::new()));
        assert_eq!(map(&env, &config()), Err(MapError::EmptyEnvelope));
    }

    #[test]
    fn truncate_respects_multibyte_characters() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("日本語", 0), "");
    }
}
