//! Render a [`TelemetryEnvelope`] back into an OTLP/JSON export request.
//!
//! Each record gets its own resource block so the `service.name` of every
//! record survives. Decoding the output yields the same normalized records.

use chrono::{DateTime, Utc};

use super::decode::SERVICE_NAME_KEY;
use super::otlp::{
    AnyValue, ExportLogsRequest, ExportMetricsRequest, ExportTraceRequest, KeyValue,
    NumberDataPoint, NumberSeries, Resource, ResourceLogs, ResourceMetrics, ResourceSpans,
    ScopeLogs, ScopeMetrics, ScopeSpans, WireInt, WireLogRecord, WireMetric, WireSpan, WireStatus,
    WireStatusCode,
};
use super::types::{Attributes, Payload, Scalar, Severity, TelemetryEnvelope};

/// Serialize the envelope payload as the OTLP/JSON body a collector would send.
pub fn encode(envelope: &TelemetryEnvelope) -> serde_json::Result<Vec<u8>> {
    match &envelope.payload {
        Payload::Traces(spans) => {
            let request = ExportTraceRequest {
                resource_spans: spans
                    .iter()
                    .map(|span| ResourceSpans {
                        resource: resource(span.service.as_deref()),
                        scope_spans: vec![ScopeSpans {
                            spans: vec![WireSpan {
                                trace_id: Some(span.trace_id.clone()),
                                span_id: Some(span.span_id.clone()),
                                parent_span_id: span.parent_span_id.clone(),
                                name: Some(span.name.clone()),
                                start_time_unix_nano: Some(nanos(span.start_time)),
                                end_time_unix_nano: span.end_time.map(nanos),
                                attributes: key_values(&span.attributes),
                                status: Some(WireStatus {
                                    code: Some(WireStatusCode::Number(span.status.code())),
                                    message: span.status_message.clone(),
                                }),
                            }],
                        }],
                    })
                    .collect(),
            };
            serde_json::to_vec(&request)
        }
        Payload::Logs(logs) => {
            let request = ExportLogsRequest {
                resource_logs: logs
                    .iter()
                    .map(|log| {
                        let known = log.severity != Severity::Unspecified;
                        ResourceLogs {
                            resource: resource(log.service.as_deref()),
                            scope_logs: vec![ScopeLogs {
                                log_records: vec![WireLogRecord {
                                    time_unix_nano: Some(nanos(log.timestamp)),
                                    observed_time_unix_nano: None,
                                    severity_number: known.then(|| log.severity.number()),
                                    severity_text: known.then(|| log.severity.as_str().to_string()),
                                    body: Some(string_value(&log.body)),
                                    attributes: key_values(&log.attributes),
                                }],
                            }],
                        }
                    })
                    .collect(),
            };
            serde_json::to_vec(&request)
        }
        Payload::Metrics(points) => {
            let request = ExportMetricsRequest {
                resource_metrics: points
                    .iter()
                    .map(|point| ResourceMetrics {
                        resource: None,
                        scope_metrics: vec![ScopeMetrics {
                            metrics: vec![WireMetric {
                                name: Some(point.name.clone()),
                                unit: point.unit.clone(),
                                gauge: Some(NumberSeries {
                                    data_points: vec![NumberDataPoint {
                                        time_unix_nano: Some(nanos(point.timestamp)),
                                        as_double: Some(point.value),
                                        as_int: None,
                                        attributes: point
                                            .labels
                                            .iter()
                                            .map(|(k, v)| KeyValue {
                                                key: k.clone(),
                                                value: Some(string_value(v)),
                                            })
                                            .collect(),
                                    }],
                                }),
                                sum: None,
                                histogram: None,
                            }],
                        }],
                    })
                    .collect(),
            };
            serde_json::to_vec(&request)
        }
    }
}

fn nanos(ts: DateTime<Utc>) -> WireInt {
    WireInt::Text(ts.timestamp_nanos_opt().unwrap_or_default().to_string())
}

fn resource(service: Option<&str>) -> Option<Resource> {
    service.map(|name| Resource {
        attributes: vec![KeyValue {
            key: SERVICE_NAME_KEY.to_string(),
            value: Some(string_value(name)),
        }],
    })
}

fn string_value(s: &str) -> AnyValue {
    AnyValue {
        string_value: Some(s.to_string()),
        ..AnyValue::default()
    }
}

fn key_values(attributes: &Attributes) -> Vec<KeyValue> {
    attributes
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Scalar::Str(s) => string_value(s),
                Scalar::Bool(b) => AnyValue {
                    bool_value: Some(*b),
                    ..AnyValue::default()
                },
                Scalar::Int(i) => AnyValue {
                    int_value: Some(WireInt::Text(i.to_string())),
                    ..AnyValue::default()
                },
                Scalar::Float(x) => AnyValue {
                    double_value: Some(*x),
                    ..AnyValue::default()
                },
            };
            KeyValue {
                key: key.clone(),
                value: Some(value),
            }
        })
        .collect()
}
