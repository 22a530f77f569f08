//! Delivery metrics.
//!
//! Counters only grow, except `active_streams` which mirrors the engine's
//! live count. Per-boundary figures are written once when a boundary
//! finishes (completes or fails).

use crate::boundary::BoundaryMetrics;
use crate::types::{BoundaryId, Priority};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Snapshot returned by `StreamEngine::metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamMetrics {
    pub active_streams: usize,
    pub completed_streams: u64,
    pub failed_streams: u64,
    pub aborted_streams: u64,
    pub total_bytes_transferred: u64,
    pub total_chunks: u64,
    pub backpressure_events: u64,
    pub retry_attempts: u64,
    /// Rolling mean over the most recent latency samples.
    pub average_chunk_latency_ms: f64,
    /// Mean over successfully completed boundaries.
    pub average_time_to_first_chunk_ms: f64,
    pub registered_by_priority: BTreeMap<Priority, u64>,
    pub boundaries: HashMap<BoundaryId, BoundaryMetrics>,
}

#[derive(Debug)]
pub(crate) struct MetricsCollector {
    snapshot: StreamMetrics,
    latency_samples: VecDeque<u64>,
    latency_window: usize,
}

impl MetricsCollector {
    pub fn new(latency_window: usize) -> Self {
        Self {
            snapshot: StreamMetrics::default(),
            latency_samples: VecDeque::with_capacity(latency_window),
            latency_window: latency_window.max(1),
        }
    }

    pub fn record_registered(&mut self, priority: Priority) {
        *self
            .snapshot
            .registered_by_priority
            .entry(priority)
            .or_insert(0) += 1;
    }

    pub fn record_chunk(&mut self, size: usize, latency_ms: u64) {
        self.snapshot.total_bytes_transferred += size as u64;
        self.snapshot.total_chunks += 1;
        if self.latency_samples.len() == self.latency_window {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
        let sum: u64 = self.latency_samples.iter().sum();
        self.snapshot.average_chunk_latency_ms = sum as f64 / self.latency_samples.len() as f64;
    }

    pub fn record_backpressure(&mut self) {
        self.snapshot.backpressure_events += 1;
    }

    pub fn record_retry(&mut self) {
        self.snapshot.retry_attempts += 1;
    }

    pub fn record_completed(&mut self, id: &str, metrics: BoundaryMetrics) {
        self.snapshot.completed_streams += 1;
        self.snapshot.boundaries.insert(id.to_string(), metrics);
        self.recompute_time_to_first_chunk();
    }

    pub fn record_failed(&mut self, id: &str, metrics: BoundaryMetrics) {
        self.snapshot.failed_streams += 1;
        self.snapshot.boundaries.insert(id.to_string(), metrics);
    }

    pub fn record_aborted(&mut self) {
        self.snapshot.aborted_streams += 1;
    }

    pub fn snapshot(&self, active_streams: usize) -> StreamMetrics {
        let mut snapshot = self.snapshot.clone();
        snapshot.active_streams = active_streams;
        snapshot
    }

    fn recompute_time_to_first_chunk(&mut self) {
        let samples: Vec<u64> = self
            .snapshot
            .boundaries
            .values()
            .filter(|m| m.success)
            .filter_map(|m| m.time_to_first_chunk_ms)
            .collect();
        self.snapshot.average_time_to_first_chunk_ms = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<u64>() as f64 / samples.len() as f64
        };
    }
}
