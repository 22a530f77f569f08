//! Admission and retirement of boundaries.
//!
//! The scheduler drains the priority queue while concurrency slots are free.
//! A queue head that is still deferred stops the pass and arms a wakeup
//! timer for its eligibility time; nothing behind it is considered, even if
//! already eligible.

use super::effects::Effects;
use super::{transition, EngineState, StreamEngine, Wakeup};
use crate::error::StreamError;
use crate::events::EventKind;
use crate::lifecycle::BoundaryState;
use crate::queue::QueueEntry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

impl StreamEngine {
    /// Admit eligible queue entries while slots are free. Runs on every
    /// start, slot release and wakeup.
    pub(super) fn pump_locked(&self, state: &mut EngineState, effects: &mut Effects) {
        let max = self.inner.config.max_concurrent_streams;
        let now = Instant::now();
        loop {
            if state.disposed || state.active_streams >= max {
                return;
            }
            let eligible_at = match state.queue.peek() {
                Some(head) if head.is_eligible(now) => None,
                Some(head) => Some(head.eligible_at),
                None => return,
            };
            if let Some(at) = eligible_at {
                self.arm_wakeup(state, at);
                return;
            }
            let Some(entry) = state.queue.dequeue() else {
                return;
            };
            self.activate(state, entry, now, effects);
        }
    }

    fn activate(
        &self,
        state: &mut EngineState,
        entry: QueueEntry,
        now: Instant,
        effects: &mut Effects,
    ) {
        let id = entry.boundary_id;
        let Some(boundary) = state.boundaries.get_mut(&id) else {
            debug!(boundary_id = %id, "Dropping queue entry for unregistered boundary");
            return;
        };
        if !transition(boundary, BoundaryState::Streaming, effects) {
            return;
        }
        boundary.started_at = Some(now);
        if let Some(timeout) = boundary.config.timeout {
            boundary.timeout_task = Some(self.spawn_timeout(id.clone(), timeout));
        }
        let on_start = boundary.config.callbacks.on_start.clone();
        state.active_streams += 1;

        info!(
            boundary_id = %id,
            priority = entry.priority,
            waited_ms = now.saturating_duration_since(entry.enqueued_at).as_millis() as u64,
            active_streams = state.active_streams,
            "Boundary admitted"
        );
        effects.emit(&id, EventKind::Start);
        if let Some(callback) = on_start {
            let boundary_id = id.clone();
            effects.invoke("on_start", &id, move || callback(&boundary_id));
        }
    }

    /// Keep at most one wakeup pending, for the earliest requested time.
    fn arm_wakeup(&self, state: &mut EngineState, at: Instant) {
        if let Some(existing) = &state.wakeup {
            if existing.at <= at {
                return;
            }
        }
        if let Some(stale) = state.wakeup.take() {
            stale.task.abort();
        }
        let engine = Arc::downgrade(&self.inner);
        let task = self.inner.runtime.spawn(async move {
            tokio::time::sleep_until(at).await;
            if let Some(inner) = engine.upgrade() {
                StreamEngine { inner }.on_wakeup(at);
            }
        });
        debug!(
            in_ms = at.saturating_duration_since(Instant::now()).as_millis() as u64,
            "Armed scheduler wakeup"
        );
        state.wakeup = Some(Wakeup { at, task });
    }

    fn on_wakeup(&self, at: Instant) {
        let mut effects = Effects::default();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.wakeup.as_ref().is_some_and(|w| w.at == at) {
                state.wakeup = None;
            }
            self.pump_locked(state, &mut effects);
        }
        effects.dispatch(&self.inner.events);
    }

    fn spawn_timeout(&self, id: String, timeout: Duration) -> JoinHandle<()> {
        let engine = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = engine.upgrade() {
                StreamEngine { inner }.expire(&id, timeout);
            }
        })
    }

    /// Timeout fired. A streaming boundary fails now, a paused one when it
    /// is resumed. Timeouts are never retried.
    fn expire(&self, id: &str, timeout: Duration) {
        let mut effects = Effects::default();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let Some(boundary) = state.boundaries.get_mut(id) else {
                return;
            };
            // This task is the one running; drop the handle instead of aborting it.
            boundary.timeout_task = None;
            let err = StreamError::timeout(format!(
                "boundary '{}' did not complete within {}ms",
                id,
                timeout.as_millis()
            ))
            .with_boundary(id);
            let current = boundary.state;
            match current {
                BoundaryState::Streaming => self.fail_locked(state, id, err, &mut effects),
                BoundaryState::Paused => {
                    debug!(boundary_id = %id, "Timeout elapsed while paused, failing on resume");
                    boundary.expired = Some(err);
                }
                _ => {}
            }
        }
        effects.dispatch(&self.inner.events);
    }

    /// Streaming -> Completed after the final chunk.
    pub(super) fn complete_locked(
        &self,
        state: &mut EngineState,
        id: &str,
        effects: &mut Effects,
    ) {
        let Some(boundary) = state.boundaries.get_mut(id) else {
            return;
        };
        if !transition(boundary, BoundaryState::Completed, effects) {
            return;
        }
        boundary.ended_at = Some(Instant::now());
        boundary.cancel_timeout();
        let metrics = boundary.metrics(true);
        let on_complete = boundary.config.callbacks.on_complete.clone();
        state.active_streams = state.active_streams.saturating_sub(1);
        state.metrics.record_completed(id, metrics.clone());

        info!(
            boundary_id = %id,
            chunks = metrics.chunk_count,
            bytes = metrics.bytes,
            duration_ms = metrics.total_duration_ms,
            "Boundary completed"
        );
        effects.emit(
            id,
            EventKind::Complete {
                duration_ms: metrics.total_duration_ms,
                chunk_count: metrics.chunk_count,
                bytes: metrics.bytes,
            },
        );
        if let Some(callback) = on_complete {
            let boundary_id = id.to_string();
            effects.invoke("on_complete", id, move || callback(&boundary_id, &metrics));
        }
        self.pump_locked(state, effects);
    }

    /// Move a streaming or paused boundary to Error, record the failure and
    /// release its slot if it held one.
    pub(super) fn fail_locked(
        &self,
        state: &mut EngineState,
        id: &str,
        err: StreamError,
        effects: &mut Effects,
    ) {
        let Some(boundary) = state.boundaries.get_mut(id) else {
            return;
        };
        let previous = boundary.state;
        boundary.last_error = Some(err.clone());
        // Paused has no edge to Error; pass through Streaming without taking a slot.
        if previous == BoundaryState::Paused {
            transition(boundary, BoundaryState::Streaming, effects);
        }
        if !transition(boundary, BoundaryState::Error, effects) {
            return;
        }
        boundary.ended_at = Some(Instant::now());
        boundary.cancel_timeout();
        boundary.token.cancel();
        let retry_count = boundary.retry_count;
        let metrics = boundary.metrics(false);
        let on_error = boundary.config.callbacks.on_error.clone();
        if previous == BoundaryState::Streaming {
            state.active_streams = state.active_streams.saturating_sub(1);
        }
        state.metrics.record_failed(id, metrics);

        error!(
            boundary_id = %id,
            code = %err.code,
            retry_count,
            error = %err.message,
            "Boundary failed"
        );
        effects.emit(id, EventKind::error(&err, retry_count));
        if let Some(callback) = on_error {
            let boundary_id = id.to_string();
            effects.invoke("on_error", id, move || callback(&boundary_id, &err));
        }
        self.pump_locked(state, effects);
    }
}
