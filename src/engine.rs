//! Delivery Engine
//!
//! Owns every registered boundary, the pending-work queue and the shared
//! chunk buffer. Boundaries are started into a priority queue, admitted by
//! the scheduler up to `max_concurrent_streams`, fed chunks by external
//! producers, and retired by a final chunk, an error, a timeout or an abort.
//!
//! All mutable state sits behind one mutex that is never held across an
//! `.await` or while user code runs. Events and callbacks produced while the
//! lock is held are dispatched after it is released.

mod effects;
mod ingest;
mod scheduler;

use crate::boundary::{Boundary, BoundaryConfig, BoundarySnapshot};
use crate::buffer::{BufferStats, ChunkBuffer};
use crate::chunk::Chunk;
use crate::config::{validation_failure, EngineConfig};
use crate::error::StreamError;
use crate::events::{EventBus, EventKind, StreamEvent, Subscription};
use crate::lifecycle::BoundaryState;
use crate::metrics::{MetricsCollector, StreamMetrics};
use crate::queue::{PriorityQueue, QueueEntry};
use crate::types::BoundaryId;
use effects::Effects;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Handle to a delivery engine. Cloning is cheap; clones share one engine.
#[derive(Clone)]
pub struct StreamEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    state: Mutex<EngineState>,
    events: EventBus,
    /// Signalled whenever chunks leave the buffer or it grows.
    drained: Notify,
    runtime: Handle,
}

struct EngineState {
    boundaries: HashMap<BoundaryId, Boundary>,
    queue: PriorityQueue<QueueEntry>,
    buffer: ChunkBuffer,
    metrics: MetricsCollector,
    active_streams: usize,
    next_seq: u64,
    wakeup: Option<Wakeup>,
    disposed: bool,
}

/// Timer that re-runs the scheduler when a deferred entry becomes eligible.
struct Wakeup {
    at: Instant,
    task: JoinHandle<()>,
}

impl EngineState {
    fn ensure_live(&self) -> Result<(), StreamError> {
        if self.disposed {
            return Err(StreamError::state("engine has been disposed"));
        }
        Ok(())
    }

    fn boundary_mut(&mut self, id: &str) -> Result<&mut Boundary, StreamError> {
        self.boundaries
            .get_mut(id)
            .ok_or_else(|| not_registered(id))
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Remove a boundary's chunks from the shared buffer.
    fn purge_buffered(&mut self, id: &str) -> usize {
        self.buffer.extract(|chunk| chunk.boundary_id == id).len()
    }
}

fn not_registered(id: &str) -> StreamError {
    StreamError::config(format!("boundary '{}' is not registered", id)).with_boundary(id)
}

fn illegal(id: &str, operation: &str, state: BoundaryState) -> StreamError {
    StreamError::state(format!(
        "cannot {} boundary '{}' in state {}",
        operation, id, state
    ))
    .with_boundary(id)
}

/// Apply a transition and queue its state-change event. Illegal transitions
/// are ignored.
fn transition(boundary: &mut Boundary, next: BoundaryState, effects: &mut Effects) -> bool {
    match boundary.transition(next) {
        Some(from) => {
            debug!(boundary_id = %boundary.id, %from, to = %next, "Boundary state change");
            effects.emit(&boundary.id, EventKind::StateChange { from, to: next });
            true
        }
        None => {
            debug!(
                boundary_id = %boundary.id,
                from = %boundary.state,
                to = %next,
                "Ignoring illegal transition"
            );
            false
        }
    }
}

impl StreamEngine {
    /// Create an engine. Must be called from within a Tokio runtime, which
    /// is used for scheduler and timeout timers.
    pub fn new(config: EngineConfig) -> Result<Self, StreamError> {
        config.validate().map_err(|errors| validation_failure(&errors))?;
        let runtime = Handle::try_current().map_err(|e| {
            StreamError::config(format!("StreamEngine requires a Tokio runtime: {}", e))
        })?;

        let state = EngineState {
            boundaries: HashMap::new(),
            queue: PriorityQueue::new(),
            buffer: ChunkBuffer::new(config.buffer.capacity, config.buffer.high_water_mark),
            metrics: MetricsCollector::new(config.latency_window),
            active_streams: 0,
            next_seq: 0,
            wakeup: None,
            disposed: false,
        };

        info!(
            max_concurrent_streams = config.max_concurrent_streams,
            buffer_capacity = config.buffer.capacity,
            high_water_mark = config.buffer.high_water_mark,
            backpressure = %config.backpressure,
            "Delivery engine created"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                state: Mutex::new(state),
                events: EventBus::new(),
                drained: Notify::new(),
                runtime,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Register a boundary in the Idle state.
    pub fn register(&self, id: &str, config: BoundaryConfig) -> Result<(), StreamError> {
        let mut state = self.inner.state.lock();
        state.ensure_live()?;
        if state.boundaries.contains_key(id) {
            return Err(
                StreamError::config(format!("boundary '{}' is already registered", id))
                    .with_boundary(id),
            );
        }
        state.metrics.record_registered(config.priority);
        debug!(boundary_id = %id, priority = %config.priority, "Registered boundary");
        state
            .boundaries
            .insert(id.to_string(), Boundary::new(id.to_string(), config));
        Ok(())
    }

    /// Remove a boundary entirely, releasing its queue entry, concurrency
    /// slot and buffered chunks. Returns false if it was not registered.
    pub fn unregister(&self, id: &str) -> bool {
        let mut effects = Effects::default();
        let removed = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            match state.boundaries.remove(id) {
                Some(mut boundary) => {
                    boundary.token.cancel();
                    boundary.cancel_timeout();
                    match boundary.state {
                        BoundaryState::Pending => {
                            state.queue.remove(|entry| entry.boundary_id == id);
                        }
                        BoundaryState::Streaming => {
                            state.active_streams = state.active_streams.saturating_sub(1);
                        }
                        _ => {}
                    }
                    if state.purge_buffered(id) > 0 {
                        self.inner.drained.notify_waiters();
                    }
                    debug!(boundary_id = %id, state = %boundary.state, "Unregistered boundary");
                    self.pump_locked(state, &mut effects);
                    true
                }
                None => false,
            }
        };
        effects.dispatch(&self.inner.events);
        removed
    }

    /// Queue an Idle boundary for scheduling after its defer delay.
    pub fn start(&self, id: &str) -> Result<(), StreamError> {
        let mut effects = Effects::default();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.ensure_live()?;
            let seq = state.next_seq();
            let boundary = state.boundary_mut(id)?;
            if boundary.state != BoundaryState::Idle {
                return Err(illegal(id, "start", boundary.state));
            }
            transition(boundary, BoundaryState::Pending, &mut effects);

            let now = Instant::now();
            let entry = QueueEntry {
                boundary_id: id.to_string(),
                priority: boundary.config.priority.value(),
                enqueued_at: now,
                eligible_at: now + boundary.config.defer,
                seq,
            };
            debug!(
                boundary_id = %id,
                priority = entry.priority,
                defer_ms = boundary.config.defer.as_millis() as u64,
                queue_size = state.queue.len() + 1,
                "Enqueued boundary"
            );
            state.queue.enqueue(entry);
            self.pump_locked(state, &mut effects);
        }
        effects.dispatch(&self.inner.events);
        Ok(())
    }

    /// Pause a streaming boundary, releasing its concurrency slot. Buffered
    /// chunks stay in place and further chunks are still accepted.
    pub fn pause(&self, id: &str) -> Result<(), StreamError> {
        let mut effects = Effects::default();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.ensure_live()?;
            let boundary = state.boundary_mut(id)?;
            if boundary.state != BoundaryState::Streaming {
                return Err(illegal(id, "pause", boundary.state));
            }
            transition(boundary, BoundaryState::Paused, &mut effects);
            effects.emit(id, EventKind::Pause);
            state.active_streams = state.active_streams.saturating_sub(1);
            self.pump_locked(state, &mut effects);
        }
        effects.dispatch(&self.inner.events);
        Ok(())
    }

    /// Resume a paused boundary. Takes a concurrency slot back even if the
    /// ceiling has since been reached.
    ///
    /// A final chunk received while paused completes the boundary right
    /// away; otherwise a timeout that elapsed while paused fails it.
    pub fn resume(&self, id: &str) -> Result<(), StreamError> {
        let mut effects = Effects::default();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.ensure_live()?;
            let boundary = state.boundary_mut(id)?;
            if boundary.state != BoundaryState::Paused {
                return Err(illegal(id, "resume", boundary.state));
            }
            transition(boundary, BoundaryState::Streaming, &mut effects);
            effects.emit(id, EventKind::Resume);
            let finished = boundary.final_received;
            let expired = boundary.expired.take();
            state.active_streams += 1;
            if finished {
                self.complete_locked(state, id, &mut effects);
            } else if let Some(err) = expired {
                self.fail_locked(state, id, err, &mut effects);
            }
        }
        effects.dispatch(&self.inner.events);
        Ok(())
    }

    /// Abort a pending, streaming or paused boundary.
    ///
    /// An Idle boundary has nothing to abort and is rejected with a
    /// StateError, as are terminal ones; use [`reset`](Self::reset) to
    /// return any boundary to Idle.
    pub fn abort(&self, id: &str, reason: Option<&str>) -> Result<(), StreamError> {
        let mut effects = Effects::default();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.ensure_live()?;
            let boundary = state.boundary_mut(id)?;
            if !boundary.state.can_transition_to(BoundaryState::Aborted) {
                return Err(illegal(id, "abort", boundary.state));
            }
            self.abort_locked(state, id, reason.map(str::to_string), &mut effects);
        }
        effects.dispatch(&self.inner.events);
        Ok(())
    }

    /// Return a boundary to a fresh Idle record, aborting it first if it is
    /// pending or active. The registration and configuration are kept.
    pub fn reset(&self, id: &str) -> Result<(), StreamError> {
        let mut effects = Effects::default();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.ensure_live()?;
            let current = state.boundary_mut(id)?.state;
            if current.can_transition_to(BoundaryState::Aborted) {
                self.abort_locked(state, id, Some("reset".to_string()), &mut effects);
            }
            if state.purge_buffered(id) > 0 {
                self.inner.drained.notify_waiters();
            }
            if let Some(mut old) = state.boundaries.remove(id) {
                old.cancel_timeout();
                state
                    .boundaries
                    .insert(id.to_string(), Boundary::new(id.to_string(), old.config));
            }
            debug!(boundary_id = %id, previous = %current, "Reset boundary");
        }
        effects.dispatch(&self.inner.events);
        Ok(())
    }

    /// Remove and return this boundary's buffered chunks, oldest first, for
    /// handoff to a transport.
    pub fn deliver_chunks(&self, id: &str) -> Vec<Chunk> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let chunks = state.buffer.extract(|chunk| chunk.boundary_id == id);
        if chunks.is_empty() {
            return chunks;
        }
        let bytes: u64 = chunks.iter().map(|c| c.size as u64).sum();
        if let Some(boundary) = state.boundaries.get_mut(id) {
            boundary.bytes_delivered += bytes;
        }
        self.inner.drained.notify_waiters();
        debug!(boundary_id = %id, chunks = chunks.len(), bytes, "Delivered chunks");
        chunks
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    /// Subscribe with an unbounded channel receiving every event.
    pub fn event_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<StreamEvent>) {
        self.inner.events.channel()
    }

    pub fn metrics(&self) -> StreamMetrics {
        let state = self.inner.state.lock();
        state.metrics.snapshot(state.active_streams)
    }

    /// Abort everything and release internal structures. Returns whatever
    /// was still buffered, oldest first. Later operations fail with a
    /// state error.
    pub fn dispose(&self) -> Vec<Chunk> {
        let mut effects = Effects::default();
        let flushed = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.disposed {
                return Vec::new();
            }
            // Set first so aborts below do not admit queued work.
            state.disposed = true;
            let flushed = state.buffer.drain();

            let mut live: Vec<BoundaryId> = state
                .boundaries
                .values()
                .filter(|b| b.state.can_transition_to(BoundaryState::Aborted))
                .map(|b| b.id.clone())
                .collect();
            live.sort();
            for id in live {
                self.abort_locked(state, &id, Some("disposed".to_string()), &mut effects);
            }

            for boundary in state.boundaries.values_mut() {
                boundary.cancel_timeout();
                boundary.token.cancel();
            }
            state.boundaries.clear();
            state.queue.clear();
            if let Some(wakeup) = state.wakeup.take() {
                wakeup.task.abort();
            }
            state.active_streams = 0;
            info!(flushed_chunks = flushed.len(), "Delivery engine disposed");
            flushed
        };
        self.inner.drained.notify_waiters();
        effects.dispatch(&self.inner.events);
        self.inner.events.clear();
        flushed
    }

    pub fn state(&self, id: &str) -> Option<BoundaryState> {
        self.inner.state.lock().boundaries.get(id).map(|b| b.state)
    }

    pub fn boundary(&self, id: &str) -> Option<BoundarySnapshot> {
        self.inner.state.lock().boundaries.get(id).map(Boundary::snapshot)
    }

    /// Token producers should watch to stop work on an aborted or failed
    /// boundary.
    pub fn cancellation_token(&self, id: &str) -> Option<CancellationToken> {
        self.inner
            .state
            .lock()
            .boundaries
            .get(id)
            .map(|b| b.token.clone())
    }

    /// Chunks accepted for a boundary so far, in arrival order.
    pub fn received_chunks(&self, id: &str) -> Vec<Chunk> {
        self.inner
            .state
            .lock()
            .boundaries
            .get(id)
            .map(|b| b.chunks.clone())
            .unwrap_or_default()
    }

    pub fn boundary_ids(&self) -> Vec<BoundaryId> {
        let mut ids: Vec<_> = self.inner.state.lock().boundaries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn active_streams(&self) -> usize {
        self.inner.state.lock().active_streams
    }

    /// Number of started boundaries waiting for admission.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.inner.state.lock().buffer.stats()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    fn abort_locked(
        &self,
        state: &mut EngineState,
        id: &str,
        reason: Option<String>,
        effects: &mut Effects,
    ) {
        let Some(boundary) = state.boundaries.get_mut(id) else {
            return;
        };
        let previous = boundary.state;
        if !transition(boundary, BoundaryState::Aborted, effects) {
            return;
        }
        boundary.token.cancel();
        boundary.cancel_timeout();
        boundary.ended_at = Some(Instant::now());
        let on_abort = boundary.config.callbacks.on_abort.clone();

        match previous {
            BoundaryState::Pending => {
                state.queue.remove(|entry| entry.boundary_id == id);
            }
            BoundaryState::Streaming => {
                state.active_streams = state.active_streams.saturating_sub(1);
            }
            _ => {}
        }
        if state.purge_buffered(id) > 0 {
            self.inner.drained.notify_waiters();
        }
        state.metrics.record_aborted();

        info!(boundary_id = %id, from = %previous, reason = ?reason, "Boundary aborted");
        effects.emit(
            id,
            EventKind::Abort {
                reason: reason.clone(),
            },
        );
        if let Some(callback) = on_abort {
            let boundary_id = id.to_string();
            effects.invoke("on_abort", id, move || {
                callback(&boundary_id, reason.as_deref())
            });
        }
        self.pump_locked(state, effects);
    }
}

impl fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StreamEngine")
            .field("boundaries", &state.boundaries.len())
            .field("queued", &state.queue.len())
            .field("active_streams", &state.active_streams)
            .field("buffered", &state.buffer.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}
