//! Per-service health over recently ingested telemetry.
//!
//! Workers feed every mapped batch through [`ServiceHealth::observe`]. Each
//! (cluster, kind, service) keeps a bounded window of its latest records, and
//! [`ServiceHealth::report`] flags services whose error rate or tail latency
//! crosses a threshold.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::document::Document;
use crate::telemetry::{Kind, Scalar};

/// Records kept per service.
const WINDOW: usize = 1000;
/// Services tracked at once; later arrivals are ignored.
const MAX_SERVICES: usize = 1024;

const LOG_ERROR_RATE: f64 = 0.05;
const LOG_CRITICAL_RATE: f64 = 0.10;
const TRACE_ERROR_RATE: f64 = 0.10;
const TRACE_P95_MS: f64 = 1000.0;

const UNKNOWN_SERVICE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Finding {
    /// Log error rate above 5%.
    LogErrors,
    /// Span error rate above 10%.
    TraceErrors,
    /// Span p95 duration above one second.
    HighLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flag {
    pub finding: Finding,
    pub severity: Severity,
}

/// One service's window, as served by `/api/system/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceReport {
    pub cluster_id: String,
    pub kind: Kind,
    pub service: String,
    pub records: usize,
    pub errors: usize,
    pub error_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95_duration_ms: Option<f64>,
    pub flags: Vec<Flag>,
}

impl ServiceReport {
    pub fn is_degraded(&self) -> bool {
        !self.flags.is_empty()
    }
}

#[derive(Debug, Default)]
struct Window {
    /// `(error, duration_ms)` per record, oldest first.
    records: VecDeque<(bool, Option<f64>)>,
}

impl Window {
    fn push(&mut self, error: bool, duration_ms: Option<f64>) {
        if self.records.len() == WINDOW {
            self.records.pop_front();
        }
        self.records.push_back((error, duration_ms));
    }
}

type Key = (String, Kind, String);

#[derive(Debug, Default)]
pub struct ServiceHealth {
    windows: Mutex<HashMap<Key, Window>>,
}

impl ServiceHealth {
    /// Fold a mapped batch into its services' windows. Metrics are not tracked.
    pub fn observe(&self, cluster: &str, kind: Kind, docs: &[Document]) {
        if kind == Kind::Metric || docs.is_empty() {
            return;
        }
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        for doc in docs {
            let service = doc
                .metadata
                .get("service")
                .and_then(Scalar::as_str)
                .unwrap_or(UNKNOWN_SERVICE);
            let key = (cluster.to_string(), kind, service.to_string());
            if !windows.contains_key(&key) && windows.len() >= MAX_SERVICES {
                tracing::debug!(cluster, service, "service health table full");
                continue;
            }
            let error = doc.metadata.get("has_errors") == Some(&Scalar::Bool(true));
            let duration_ms = doc.metadata.get("duration_ms").and_then(as_f64);
            windows.entry(key).or_default().push(error, duration_ms);
        }
    }

    /// Every tracked service, degraded ones first, then by name.
    pub fn report(&self) -> Vec<ServiceReport> {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let mut reports: Vec<ServiceReport> = windows
            .iter()
            .map(|((cluster, kind, service), window)| summarize(cluster, *kind, service, window))
            .collect();
        drop(windows);
        reports.sort_by(|a, b| {
            b.is_degraded()
                .cmp(&a.is_degraded())
                .then_with(|| a.cluster_id.cmp(&b.cluster_id))
                .then_with(|| a.kind.as_str().cmp(b.kind.as_str()))
                .then_with(|| a.service.cmp(&b.service))
        });
        reports
    }
}

fn as_f64(value: &Scalar) -> Option<f64> {
    match value {
        Scalar::Float(x) => Some(*x),
        Scalar::Int(i) => Some(*i as f64),
        _ => None,
    }
}

fn summarize(cluster: &str, kind: Kind, service: &str, window: &Window) -> ServiceReport {
    let records = window.records.len();
    let errors = window.records.iter().filter(|(error, _)| *error).count();
    let error_rate = if records == 0 {
        0.0
    } else {
        errors as f64 / records as f64
    };
    let mut durations: Vec<f64> = window.records.iter().filter_map(|(_, d)| *d).collect();
    let p95_duration_ms = percentile(&mut durations, 0.95);

    let mut flags = Vec::new();
    match kind {
        Kind::Log => {
            if error_rate > LOG_CRITICAL_RATE {
                flags.push(Flag {
                    finding: Finding::LogErrors,
                    severity: Severity::Critical,
                });
            } else if error_rate > LOG_ERROR_RATE {
                flags.push(Flag {
                    finding: Finding::LogErrors,
                    severity: Severity::High,
                });
            }
        }
        Kind::Trace => {
            if p95_duration_ms.is_some_and(|p95| p95 > TRACE_P95_MS) {
                flags.push(Flag {
                    finding: Finding::HighLatency,
                    severity: Severity::High,
                });
            }
            if error_rate > TRACE_ERROR_RATE {
                flags.push(Flag {
                    finding: Finding::TraceErrors,
                    severity: Severity::Critical,
                });
            }
        }
        Kind::Metric => {}
    }

    ServiceReport {
        cluster_id: cluster.to_string(),
        kind,
        service: service.to_string(),
        records,
        errors,
        error_rate,
        p95_duration_ms,
        flags,
    }
}

/// Linearly interpolated percentile, `q` in `0..=1`.
fn percentile(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let rank = q * (values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    Some(values[lower] + (values[upper] - values[lower]) * weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Metadata;

    fn record(service: &str, error: bool, duration_ms: Option<f64>) -> Document {
        let mut metadata = Metadata::new();
        metadata.insert("service".into(), service.into());
        metadata.insert("has_errors".into(), error.into());
        if let Some(ms) = duration_ms {
            metadata.insert("duration_ms".into(), Scalar::Float(ms));
        }
        Document::new("id", "text", metadata)
    }

    #[test]
    fn percentile_interpolates() {
        let mut values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert!((percentile(&mut values, 0.95).unwrap() - 95.05).abs() < 1e-9);
        assert_eq!(percentile(&mut [7.0], 0.95), Some(7.0));
        assert_eq!(percentile(&mut [], 0.95), None);
    }

    #[test]
    fn log_error_rate_thresholds() {
        let health = ServiceHealth::default();
        let calm: Vec<Document> = (0..100).map(|i| record("calm", i < 5, None)).collect();
        let noisy: Vec<Document> = (0..100).map(|i| record("noisy", i < 8, None)).collect();
        let failing: Vec<Document> = (0..100).map(|i| record("failing", i < 20, None)).collect();
        health.observe("prod", Kind::Log, &calm);
        health.observe("prod", Kind::Log, &noisy);
        health.observe("prod", Kind::Log, &failing);

        let reports = health.report();
        assert_eq!(reports[0].service, "failing");
        assert_eq!(reports[0].flags[0].severity, Severity::Critical);
        assert_eq!(reports[1].service, "noisy");
        assert_eq!(
            reports[1].flags,
            vec![Flag {
                finding: Finding::LogErrors,
                severity: Severity::High
            }]
        );
        assert_eq!(reports[2].service, "calm");
        assert!(!reports[2].is_degraded());
        assert!((reports[2].error_rate - 0.05).abs() < 1e-9);
    }

    #[test]
    fn slow_or_failing_spans_are_flagged() {
        let health = ServiceHealth::default();
        let slow: Vec<Document> = (0..20)
            .map(|i| record("checkout", false, Some(if i < 18 { 50.0 } else { 2500.0 })))
            .collect();
        health.observe("prod", Kind::Trace, &slow);
        let erroring: Vec<Document> = (0..10)
            .map(|i| record("payments", i < 2, Some(20.0)))
            .collect();
        health.observe("prod", Kind::Trace, &erroring);

        let reports = health.report();
        let checkout = reports.iter().find(|r| r.service == "checkout").unwrap();
        assert_eq!(checkout.flags[0].finding, Finding::HighLatency);
        assert!(checkout.p95_duration_ms.unwrap() > TRACE_P95_MS);
        let payments = reports.iter().find(|r| r.service == "payments").unwrap();
        assert_eq!(payments.flags[0].finding, Finding::TraceErrors);
        assert_eq!(payments.errors, 2);
    }

    #[test]
    fn window_keeps_only_recent_records() {
        let health = ServiceHealth::default();
        let old: Vec<Document> = (0..WINDOW).map(|_| record("api", true, None)).collect();
        let fresh: Vec<Document> = (0..WINDOW).map(|_| record("api", false, None)).collect();
        health.observe("prod", Kind::Log, &old);
        health.observe("prod", Kind::Log, &fresh);

        let reports = health.report();
        assert_eq!(reports[0].records, WINDOW);
        assert_eq!(reports[0].errors, 0);
    }

    #[test]
    fn tenants_and_missing_services_are_kept_apart() {
        let health = ServiceHealth::default();
        let mut anonymous = record("x", true, None);
        anonymous.metadata.remove("service");
        health.observe("prod", Kind::Log, &[anonymous]);
        health.observe("staging", Kind::Log, &[record("x", false, None)]);
        health.observe("prod", Kind::Metric, &[record("x", true, None)]);

        let reports = health.report();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].cluster_id, "prod");
        assert_eq!(reports[0].service, UNKNOWN_SERVICE);
        assert_eq!(reports[1].cluster_id, "staging");
    }
}
