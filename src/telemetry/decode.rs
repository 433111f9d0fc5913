//! Structural decoding of OTLP/JSON export requests.
//!
//! [`decode`] turns a raw request body into a [`TelemetryEnvelope`]. It checks
//! that the tree is well formed, that required fields are present and that
//! timestamps parse; it does not judge attribute keys or values. Decoding is
//! pure and can run on any number of request tasks at once.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::otlp::{
    AnyValue, ExportLogsRequest, ExportMetricsRequest, ExportTraceRequest, KeyValue, Resource,
    WireInt, WireStatus, WireStatusCode,
};
use super::types::{
    Attributes, Kind, LogRecord, MetricPoint, Payload, Scalar, Severity, Span, SpanStatus,
    TelemetryEnvelope,
};
use crate::error::DecodeError;

/// Resource attribute naming the emitting service.
pub const SERVICE_NAME_KEY: &str = "service.name";

/// Decode a request body received now.
pub fn decode(cluster_id: &str, kind: Kind, body: &[u8]) -> Result<TelemetryEnvelope, DecodeError> {
    decode_at(cluster_id, kind, body, Utc::now())
}

/// Decode a request body with an explicit receive time.
///
/// `received_at` is the fallback timestamp for log records and metric points
/// that carry none.
pub fn decode_at(
    cluster_id: &str,
    kind: Kind,
    body: &[u8],
    received_at: DateTime<Utc>,
) -> Result<TelemetryEnvelope, DecodeError> {
    let cluster_id = cluster_id.trim();
    if cluster_id.is_empty() {
        return Err(DecodeError::MissingCluster);
    }

    let payload = match kind {
        Kind::Trace => Payload::Traces(decode_traces(&parse::<ExportTraceRequest>(body)?)?),
        Kind::Log => Payload::Logs(decode_logs(&parse::<ExportLogsRequest>(body)?, received_at)?),
        Kind::Metric => Payload::Metrics(decode_metrics(
            &parse::<ExportMetricsRequest>(body)?,
            received_at,
        )?),
    };

    Ok(TelemetryEnvelope {
        cluster_id: cluster_id.to_string(),
        received_at,
        payload,
    })
}

fn parse<'a, T: serde::Deserialize<'a>>(body: &'a [u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(body).map_err(|e| DecodeError::Malformed(e.to_string()))
}

// ── Traces ────────────────────────────────────────────────────────────────────

fn decode_traces(request: &ExportTraceRequest) -> Result<Vec<Span>, DecodeError> {
    let mut spans = Vec::new();

    for (ri, resource_spans) in request.resource_spans.iter().enumerate() {
        let service = service_name(resource_spans.resource.as_ref());
        for (si, scope) in resource_spans.scope_spans.iter().enumerate() {
            for (pi, wire) in scope.spans.iter().enumerate() {
                let at = || format!("resourceSpans[{ri}].scopeSpans[{si}].spans[{pi}]");

                let trace_id = required_id(wire.trace_id.as_deref())
                    .ok_or_else(|| malformed(at(), "missing traceId"))?;
                let span_id = required_id(wire.span_id.as_deref())
                    .ok_or_else(|| malformed(at(), "missing spanId"))?;
                let name = wire
                    .name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| malformed(at(), "missing name"))?
                    .to_string();

                let start_time = parse_nanos(wire.start_time_unix_nano.as_ref())
                    .map_err(|e| malformed(at(), &format!("startTimeUnixNano: {e}")))?
                    .ok_or_else(|| malformed(at(), "missing startTimeUnixNano"))?;
                let end_time = parse_nanos(wire.end_time_unix_nano.as_ref())
                    .map_err(|e| malformed(at(), &format!("endTimeUnixNano: {e}")))?;
                if let Some(end) = end_time {
                    if end < start_time {
                        return Err(malformed(at(), "endTimeUnixNano precedes startTimeUnixNano"));
                    }
                }

                let (status, status_message) = span_status(wire.status.as_ref());

                spans.push(Span {
                    trace_id,
                    span_id,
                    parent_span_id: required_id(wire.parent_span_id.as_deref()),
                    name,
                    service: service.clone(),
                    start_time,
                    end_time,
                    attributes: to_attributes(&wire.attributes),
                    status,
                    status_message,
                });
            }
        }
    }

    Ok(spans)
}

fn span_status(status: Option<&WireStatus>) -> (SpanStatus, Option<String>) {
    let Some(status) = status else {
        return (SpanStatus::Unset, None);
    };

    let code = match &status.code {
        Some(WireStatusCode::Number(1)) => SpanStatus::Ok,
        Some(WireStatusCode::Number(2)) => SpanStatus::Error,
        Some(WireStatusCode::Name(name)) => {
            let upper = name.to_ascii_uppercase();
            if upper.ends_with("ERROR") {
                SpanStatus::Error
            } else if upper.ends_with("OK") {
                SpanStatus::Ok
            } else {
                SpanStatus::Unset
            }
        }
        _ => SpanStatus::Unset,
    };

    let message = status
        .message
        .as_deref()
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    (code, message)
}

// ── Logs ──────────────────────────────────────────────────────────────────────

fn decode_logs(
    request: &ExportLogsRequest,
    received_at: DateTime<Utc>,
) -> Result<Vec<LogRecord>, DecodeError> {
    let mut logs = Vec::new();

    for (ri, resource_logs) in request.resource_logs.iter().enumerate() {
        let service = service_name(resource_logs.resource.as_ref());
        for (si, scope) in resource_logs.scope_logs.iter().enumerate() {
            for (li, wire) in scope.log_records.iter().enumerate() {
                let at = || format!("resourceLogs[{ri}].scopeLogs[{si}].logRecords[{li}]");

                let time = parse_nanos(wire.time_unix_nano.as_ref())
                    .map_err(|e| malformed(at(), &format!("timeUnixNano: {e}")))?;
                let observed = parse_nanos(wire.observed_time_unix_nano.as_ref())
                    .map_err(|e| malformed(at(), &format!("observedTimeUnixNano: {e}")))?;

                let severity = match wire.severity_number {
                    Some(n) if n > 0 => Severity::from_number(n),
                    _ => wire
                        .severity_text
                        .as_deref()
                        .map(Severity::from_text)
                        .unwrap_or(Severity::Unspecified),
                };

                logs.push(LogRecord {
                    timestamp: time.or(observed).unwrap_or(received_at),
                    severity,
                    body: wire.body.as_ref().map(any_to_string).unwrap_or_default(),
                    service: service.clone(),
                    attributes: to_attributes(&wire.attributes),
                });
            }
        }
    }

    Ok(logs)
}

// ── Metrics ───────────────────────────────────────────────────────────────────

fn decode_metrics(
    request: &ExportMetricsRequest,
    received_at: DateTime<Utc>,
) -> Result<Vec<MetricPoint>, DecodeError> {
    let mut points = Vec::new();

    for (ri, resource_metrics) in request.resource_metrics.iter().enumerate() {
        for (si, scope) in resource_metrics.scope_metrics.iter().enumerate() {
            for (mi, metric) in scope.metrics.iter().enumerate() {
                let at = |pi: usize| {
                    format!("resourceMetrics[{ri}].scopeMetrics[{si}].metrics[{mi}].dataPoints[{pi}]")
                };

                let name = metric
                    .name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| {
                        malformed(
                            format!("resourceMetrics[{ri}].scopeMetrics[{si}].metrics[{mi}]"),
                            "missing name",
                        )
                    })?;
                let unit = metric.unit.clone().filter(|u| !u.is_empty());

                let numbers = metric
                    .gauge
                    .iter()
                    .chain(metric.sum.iter())
                    .flat_map(|series| series.data_points.iter());
                for (pi, point) in numbers.enumerate() {
                    let value = match (&point.as_double, &point.as_int) {
                        (Some(d), _) => *d,
                        (None, Some(i)) => i
                            .as_i128()
                            .ok_or_else(|| malformed(at(pi), "asInt is not an integer"))?
                            as f64,
                        (None, None) => return Err(malformed(at(pi), "missing asDouble/asInt")),
                    };
                    let timestamp = parse_nanos(point.time_unix_nano.as_ref())
                        .map_err(|e| malformed(at(pi), &format!("timeUnixNano: {e}")))?
                        .unwrap_or(received_at);
                    points.push(MetricPoint {
                        name: name.to_string(),
                        unit: unit.clone(),
                        timestamp,
                        value,
                        labels: to_labels(&point.attributes),
                    });
                }

                if let Some(histogram) = &metric.histogram {
                    for (pi, point) in histogram.data_points.iter().enumerate() {
                        let count = point.count.as_ref().and_then(WireInt::as_i128).unwrap_or(0);
                        // Empty buckets carry no observation worth summarizing.
                        let (Some(sum), true) = (point.sum, count > 0) else {
                            continue;
                        };
                        let timestamp = parse_nanos(point.time_unix_nano.as_ref())
                            .map_err(|e| malformed(at(pi), &format!("timeUnixNano: {e}")))?
                            .unwrap_or(received_at);
                        points.push(MetricPoint {
                            name: name.to_string(),
                            unit: unit.clone(),
                            timestamp,
                            value: sum / count as f64,
                            labels: to_labels(&point.attributes),
                        });
                    }
                }
            }
        }
    }

    Ok(points)
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn malformed(at: String, what: &str) -> DecodeError {
    DecodeError::Malformed(format!("{at}: {what}"))
}

/// Non-empty, lower-cased hex identifier.
fn required_id(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Parse a `*UnixNano` field. Zero and absent both mean "not set".
fn parse_nanos(raw: Option<&WireInt>) -> Result<Option<DateTime<Utc>>, String> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let nanos = raw
        .as_i128()
        .ok_or_else(|| format!("not an integer: {raw:?}"))?;
    if nanos == 0 {
        return Ok(None);
    }
    let nanos = i64::try_from(nanos).map_err(|_| format!("out of range: {nanos}"))?;
    if nanos < 0 {
        return Err(format!("negative timestamp: {nanos}"));
    }
    Ok(Some(DateTime::from_timestamp_nanos(nanos)))
}

fn service_name(resource: Option<&Resource>) -> Option<String> {
    resource?
        .attributes
        .iter()
        .find(|kv| kv.key == SERVICE_NAME_KEY)
        .and_then(|kv| kv.value.as_ref())
        .and_then(|v| v.string_value.clone())
        .filter(|s| !s.is_empty())
}

fn to_attributes(kvs: &[KeyValue]) -> Attributes {
    kvs.iter()
        .filter_map(|kv| {
            let value = any_to_scalar(kv.value.as_ref()?)?;
            Some((kv.key.clone(), value))
        })
        .collect()
}

fn to_labels(kvs: &[KeyValue]) -> BTreeMap<String, String> {
    to_attributes(kvs)
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
}

/// Collapse an OTLP `AnyValue` into a scalar. Arrays and key-value lists are
/// kept as their JSON text.
fn any_to_scalar(value: &AnyValue) -> Option<Scalar> {
    if let Some(s) = &value.string_value {
        return Some(Scalar::Str(s.clone()));
    }
    if let Some(b) = value.bool_value {
        return Some(Scalar::Bool(b));
    }
    if let Some(i) = value.int_value.as_ref().and_then(WireInt::as_i128) {
        return Some(match i64::try_from(i) {
            Ok(i) => Scalar::Int(i),
            Err(_) => Scalar::Str(i.to_string()),
        });
    }
    if let Some(d) = value.double_value {
        return Some(Scalar::Float(d));
    }
    if let Some(v) = value.array_value.as_ref().or(value.kvlist_value.as_ref()) {
        return Some(Scalar::Str(v.to_string()));
    }
    value.bytes_value.clone().map(Scalar::Str)
}

fn any_to_string(value: &AnyValue) -> String {
    any_to_scalar(value).map(|s| s.to_string()).unwrap_or_default()
}
