//! Synthetic workloads.
//!
//! Drives a set of boundaries through a [`StreamEngine`] with generated
//! chunks, a concurrent delivery loop standing in for a transport, and
//! optional failure injection. Used by `sluice simulate` and by tests that
//! need realistic traffic.

use crate::boundary::BoundaryConfig;
use crate::chunk::Chunk;
use crate::engine::StreamEngine;
use crate::error::StreamError;
use crate::lifecycle::BoundaryState;
use crate::metrics::StreamMetrics;
use crate::types::{BoundaryId, Priority};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Source of chunks for one boundary.
#[async_trait]
pub trait ChunkProducer: Send {
    /// The next chunk, or `None` once the boundary's content is exhausted.
    async fn next_chunk(&mut self) -> Option<Chunk>;
}

/// Produces `total` fixed-size chunks, the last one marked final.
#[derive(Debug, Clone)]
pub struct SyntheticProducer {
    boundary_id: BoundaryId,
    total: u64,
    chunk_size: usize,
    interval: Duration,
    checksums: bool,
    corrupt: bool,
    next: u64,
}

impl SyntheticProducer {
    pub fn new(boundary_id: impl Into<BoundaryId>, total: u64, chunk_size: usize) -> Self {
        Self {
            boundary_id: boundary_id.into(),
            total,
            chunk_size,
            interval: Duration::ZERO,
            checksums: false,
            corrupt: false,
            next: 0,
        }
    }

    /// Sleep this long before producing each chunk.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_checksums(mut self, checksums: bool) -> Self {
        self.checksums = checksums;
        self
    }

    /// Attach a checksum that does not match the payload.
    pub fn corrupted(mut self) -> Self {
        self.corrupt = true;
        self
    }
}

#[async_trait]
impl ChunkProducer for SyntheticProducer {
    async fn next_chunk(&mut self) -> Option<Chunk> {
        if self.next >= self.total {
            return None;
        }
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        let sequence = self.next;
        self.next += 1;

        let fill = b'a' + (sequence % 26) as u8;
        let mut chunk = Chunk::new(
            self.boundary_id.clone(),
            sequence,
            vec![fill; self.chunk_size],
        )
        .with_final(sequence + 1 == self.total);
        if self.checksums {
            chunk = chunk.with_checksum();
        }
        if self.corrupt {
            chunk.checksum = Some("0".repeat(64));
        }
        Some(chunk)
    }
}

/// Shape of a synthetic workload.
#[derive(Debug, Clone)]
pub struct Workload {
    pub boundaries: usize,
    pub chunks_per_boundary: u64,
    pub chunk_size: usize,
    /// Delay between chunks of one boundary.
    pub chunk_interval: Duration,
    /// How often the delivery loop drains the buffer.
    pub delivery_interval: Duration,
    /// Fail the first attempt of every Nth chunk with a retryable error.
    pub transient_failure_every: Option<u64>,
    /// Number of boundaries whose chunks carry bad checksums.
    pub corrupt_boundaries: usize,
    pub checksums: bool,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            boundaries: 8,
            chunks_per_boundary: 16,
            chunk_size: 1024,
            chunk_interval: Duration::from_millis(2),
            delivery_interval: Duration::from_millis(5),
            transient_failure_every: None,
            corrupt_boundaries: 0,
            checksums: true,
        }
    }
}

/// Outcome of [`run_workload`].
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Wall-clock start, RFC 3339 UTC.
    pub started_at: String,
    pub elapsed_ms: u64,
    pub delivered_chunks: usize,
    pub delivered_bytes: u64,
    pub outcomes: BTreeMap<BoundaryId, BoundaryState>,
    pub metrics: StreamMetrics,
}

/// Register, start and feed every boundary of `workload`, delivering
/// buffered chunks concurrently until all producers are done.
pub async fn run_workload(
    engine: &StreamEngine,
    workload: &Workload,
) -> Result<SimulationReport, StreamError> {
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let started_at = Instant::now();
    let mut lanes = Vec::with_capacity(workload.boundaries);

    for index in 0..workload.boundaries {
        let id = format!("boundary-{:03}", index);
        let priority = Priority::ALL[index % Priority::ALL.len()];
        let admitted = Arc::new(Notify::new());
        let signal = admitted.clone();
        let mut config = BoundaryConfig::new(priority).on_start(move |_| signal.notify_one());
        if let Some(every) = workload.transient_failure_every {
            config = with_transient_failures(config, every);
        }
        engine.register(&id, config)?;

        let mut producer =
            SyntheticProducer::new(id.clone(), workload.chunks_per_boundary, workload.chunk_size)
                .with_interval(workload.chunk_interval)
                .with_checksums(workload.checksums);
        if index < workload.corrupt_boundaries {
            producer = producer.corrupted();
        }
        lanes.push((id, producer, admitted));
    }

    for (id, _, _) in &lanes {
        engine.start(id)?;
    }
    info!(
        boundaries = workload.boundaries,
        chunks_per_boundary = workload.chunks_per_boundary,
        "Simulation started"
    );

    let stop = CancellationToken::new();
    let delivery = deliver_until(engine, &lanes, workload.delivery_interval, stop.clone());
    let producers = join_all(
        lanes
            .iter()
            .map(|(id, producer, admitted)| {
                let mut producer = producer.clone();
                let admitted = admitted.clone();
                async move { drive(engine, id, &mut producer, &admitted).await }
            }),
    );
    let production = async {
        let accepted = producers.await;
        stop.cancel();
        accepted
    };
    let (accepted, (mut chunks, mut bytes)) = tokio::join!(production, delivery);

    for (id, _, _) in &lanes {
        for chunk in engine.deliver_chunks(id) {
            chunks += 1;
            bytes += chunk.size as u64;
        }
    }

    let outcomes = lanes
        .iter()
        .filter_map(|(id, _, _)| engine.state(id).map(|state| (id.clone(), state)))
        .collect();
    let report = SimulationReport {
        started_at: stamp,
        elapsed_ms: started_at.elapsed().as_millis() as u64,
        delivered_chunks: chunks,
        delivered_bytes: bytes,
        outcomes,
        metrics: engine.metrics(),
    };
    info!(
        accepted = accepted.iter().sum::<usize>(),
        delivered = report.delivered_chunks,
        elapsed_ms = report.elapsed_ms,
        "Simulation finished"
    );
    Ok(report)
}

/// Feed one boundary from its producer once the engine admits it. A
/// boundary left active after the producer runs dry (its final chunk was
/// dropped) is aborted so it releases its slot.
pub async fn drive<P>(engine: &StreamEngine, id: &str, producer: &mut P, admitted: &Notify) -> usize
where
    P: ChunkProducer + ?Sized,
{
    let Some(token) = engine.cancellation_token(id) else {
        return 0;
    };
    tokio::select! {
        _ = token.cancelled() => return 0,
        _ = admitted.notified() => {}
    }

    let mut accepted = 0;
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = producer.next_chunk() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        if engine.process_chunk(chunk).await {
            accepted += 1;
        } else if !engine.state(id).is_some_and(BoundaryState::is_active) {
            break;
        }
    }

    if engine.state(id).is_some_and(BoundaryState::is_active) {
        debug!(boundary_id = %id, "Producer exhausted before completion");
        let _ = engine.abort(id, Some("producer exhausted"));
    }
    accepted
}

async fn deliver_until(
    engine: &StreamEngine,
    lanes: &[(BoundaryId, SyntheticProducer, Arc<Notify>)],
    interval: Duration,
    stop: CancellationToken,
) -> (usize, u64) {
    let mut chunks = 0;
    let mut bytes = 0;
    loop {
        for (id, _, _) in lanes {
            for chunk in engine.deliver_chunks(id) {
                chunks += 1;
                bytes += chunk.size as u64;
            }
        }
        tokio::select! {
            _ = stop.cancelled() => return (chunks, bytes),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

fn with_transient_failures(config: BoundaryConfig, every: u64) -> BoundaryConfig {
    let every = every.max(1);
    let failed: Mutex<HashSet<u64>> = Mutex::new(HashSet::new());
    config.with_transformer(move |chunk| {
        if chunk.sequence % every == every - 1 && failed.lock().insert(chunk.sequence) {
            return Err(StreamError::network(format!(
                "injected failure for sequence {}",
                chunk.sequence
            )));
        }
        Ok(chunk)
    })
}
