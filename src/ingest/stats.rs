//! Ingestion counters, shared between request handlers and workers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::telemetry::Kind;

#[derive(Debug, Default)]
pub struct IngestStats {
    pub accepted_requests: AtomicU64,
    pub unauthorized: AtomicU64,
    pub invalid_payloads: AtomicU64,
    pub overloaded: AtomicU64,
    pub empty_envelopes: AtomicU64,
    /// Records counted at decode time, per kind.
    pub spans: AtomicU64,
    pub log_records: AtomicU64,
    pub metric_points: AtomicU64,
    pub stored_batches: AtomicU64,
    pub stored_documents: AtomicU64,
    /// Batches given up on after retries or a fatal store error.
    pub dropped_batches: AtomicU64,
    pub dropped_documents: AtomicU64,
    pub dimension_mismatches: AtomicU64,
    pub embedding_failures: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub accepted_requests: u64,
    pub unauthorized: u64,
    pub invalid_payloads: u64,
    pub overloaded: u64,
    pub empty_envelopes: u64,
    pub spans: u64,
    pub log_records: u64,
    pub metric_points: u64,
    pub stored_batches: u64,
    pub stored_documents: u64,
    pub dropped_batches: u64,
    pub dropped_documents: u64,
    pub dimension_mismatches: u64,
    pub embedding_failures: u64,
}

impl IngestStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Counter for records of the given kind.
    pub fn records(&self, kind: Kind) -> &AtomicU64 {
        match kind {
            Kind::Trace => &self.spans,
            Kind::Log => &self.log_records,
            Kind::Metric => &self.metric_points,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            accepted_requests: get(&self.accepted_requests),
            unauthorized: get(&self.unauthorized),
            invalid_payloads: get(&self.invalid_payloads),
            overloaded: get(&self.overloaded),
            empty_envelopes: get(&self.empty_envelopes),
            spans: get(&self.spans),
            log_records: get(&self.log_records),
            metric_points: get(&self.metric_points),
            stored_batches: get(&self.stored_batches),
            stored_documents: get(&self.stored_documents),
            dropped_batches: get(&self.dropped_batches),
            dropped_documents: get(&self.dropped_documents),
            dimension_mismatches: get(&self.dimension_mismatches),
            embedding_failures: get(&self.embedding_failures),
        }
    }
}
