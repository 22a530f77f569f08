//! Chunk ingestion: validation, transformation, backpressure and retry.

use super::effects::Effects;
use super::{EngineState, StreamEngine};
use crate::chunk::Chunk;
use crate::config::BackpressureStrategy;
use crate::error::{ErrorCode, StreamError};
use crate::events::EventKind;
use crate::lifecycle::BoundaryState;
use crate::types::now_millis;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Result of one admission attempt under the lock.
enum Admission {
    Done(Result<bool, StreamError>),
    /// Backpressure with nowhere to grow; wait for the buffer to drain.
    Wait,
}

impl StreamEngine {
    /// Accept a chunk from a producer.
    ///
    /// Returns true if the chunk was buffered, false if it was rejected
    /// (boundary not streaming or paused, dropped under backpressure, or the
    /// boundary was cancelled while waiting). Failures are retried with
    /// exponential backoff when retryable; otherwise the boundary moves to
    /// Error and false is returned. Never returns an error to the caller.
    pub async fn process_chunk(&self, chunk: Chunk) -> bool {
        loop {
            let err = match self.ingest(chunk.clone()).await {
                Ok(accepted) => return accepted,
                Err(err) => err.normalize(&chunk.boundary_id, &chunk.id),
            };
            let Some((delay, token)) = self.on_ingest_failure(&chunk.boundary_id, err) else {
                return false;
            };
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(boundary_id = %chunk.boundary_id, chunk_id = %chunk.id, "Retry abandoned after cancellation");
                    return false;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn ingest(&self, chunk: Chunk) -> Result<bool, StreamError> {
        let (transformer, token) = {
            let state = self.inner.state.lock();
            if state.disposed {
                return Ok(false);
            }
            match state.boundaries.get(&chunk.boundary_id) {
                Some(boundary) if boundary.state.is_active() => {
                    (boundary.config.transformer.clone(), boundary.token.clone())
                }
                Some(boundary) => {
                    debug!(
                        boundary_id = %chunk.boundary_id,
                        chunk_id = %chunk.id,
                        state = %boundary.state,
                        "Rejecting chunk for inactive boundary"
                    );
                    return Ok(false);
                }
                None => {
                    debug!(boundary_id = %chunk.boundary_id, chunk_id = %chunk.id, "Rejecting chunk for unknown boundary");
                    return Ok(false);
                }
            }
        };

        chunk.verify()?;
        let chunk = match transformer {
            Some(transform) => {
                let boundary_id = chunk.boundary_id.clone();
                let transformed = catch_unwind(AssertUnwindSafe(|| transform(chunk)))
                    .map_err(|panic| {
                        StreamError::new(
                            ErrorCode::UnknownError,
                            format!("transformer panicked: {}", panic_message(panic.as_ref())),
                        )
                    })??;
                if transformed.boundary_id != boundary_id {
                    return Err(StreamError::new(
                        ErrorCode::InvalidChunk,
                        format!(
                            "transformer moved chunk from boundary '{}' to '{}'",
                            boundary_id, transformed.boundary_id
                        ),
                    ));
                }
                transformed
            }
            None => chunk,
        };

        self.admit(chunk, &token).await
    }

    async fn admit(&self, chunk: Chunk, token: &CancellationToken) -> Result<bool, StreamError> {
        let strategy = self.inner.config.backpressure;
        let mut reported = false;
        loop {
            // Register interest before checking so a drain between the
            // check and the wait is not missed.
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            let mut effects = Effects::default();
            let admission = {
                let mut guard = self.inner.state.lock();
                let state = &mut *guard;
                self.try_admit(state, &chunk, token, strategy, &mut reported, &mut effects)
            };
            effects.dispatch(&self.inner.events);

            match admission {
                Admission::Done(result) => return result,
                Admission::Wait => {
                    trace!(boundary_id = %chunk.boundary_id, chunk_id = %chunk.id, "Waiting for buffer to drain");
                    tokio::select! {
                        _ = token.cancelled() => return Ok(false),
                        _ = &mut drained => {}
                    }
                }
            }
        }
    }

    fn try_admit(
        &self,
        state: &mut EngineState,
        chunk: &Chunk,
        token: &CancellationToken,
        strategy: BackpressureStrategy,
        reported: &mut bool,
        effects: &mut Effects,
    ) -> Admission {
        // The token belongs to the incarnation the chunk was accepted for; a
        // reset and restart in between must not receive it.
        let active = state
            .boundaries
            .get(&chunk.boundary_id)
            .is_some_and(|b| b.state.is_active());
        if state.disposed || !active || token.is_cancelled() {
            return Admission::Done(Ok(false));
        }

        if state.buffer.should_apply_backpressure() {
            if !*reported {
                *reported = true;
                state.metrics.record_backpressure();
                warn!(
                    boundary_id = %chunk.boundary_id,
                    occupied_bytes = state.buffer.occupied_bytes(),
                    high_water_mark = state.buffer.high_water_mark(),
                    strategy = %strategy,
                    "Backpressure applied"
                );
                effects.emit(
                    &chunk.boundary_id,
                    EventKind::Backpressure {
                        occupied_bytes: state.buffer.occupied_bytes(),
                        high_water_mark: state.buffer.high_water_mark(),
                        utilization: state.buffer.utilization(),
                        strategy,
                    },
                );
            }
            match strategy {
                BackpressureStrategy::Drop => {
                    debug!(boundary_id = %chunk.boundary_id, chunk_id = %chunk.id, "Dropped chunk under backpressure");
                    return Admission::Done(Ok(false));
                }
                BackpressureStrategy::Error => {
                    return Admission::Done(Err(StreamError::buffer_overflow(format!(
                        "buffer above high-water mark ({} of {} bytes)",
                        state.buffer.occupied_bytes(),
                        state.buffer.high_water_mark()
                    ))));
                }
                BackpressureStrategy::Expand => {
                    if !self.grow_buffer(state) {
                        debug!(
                            capacity = state.buffer.capacity(),
                            "Buffer at maximum capacity, falling back to pause"
                        );
                        return Admission::Wait;
                    }
                }
                BackpressureStrategy::Pause => return Admission::Wait,
            }
        }

        if !state.buffer.push(chunk.clone()) {
            let grown = strategy == BackpressureStrategy::Expand
                && self.grow_buffer(state)
                && state.buffer.push(chunk.clone());
            if !grown {
                if strategy == BackpressureStrategy::Drop {
                    debug!(boundary_id = %chunk.boundary_id, chunk_id = %chunk.id, "Dropped chunk, buffer full");
                    return Admission::Done(Ok(false));
                }
                return Admission::Done(Err(StreamError::buffer_overflow(format!(
                    "buffer full ({} chunks)",
                    state.buffer.capacity()
                ))));
            }
        }

        self.record_chunk(state, chunk, effects);
        Admission::Done(Ok(true))
    }

    fn grow_buffer(&self, state: &mut EngineState) -> bool {
        let before = state.buffer.capacity();
        if !state
            .buffer
            .expand(self.inner.config.buffer.max_capacity)
        {
            return false;
        }
        info!(
            from = before,
            to = state.buffer.capacity(),
            high_water_mark = state.buffer.high_water_mark(),
            "Expanded chunk buffer"
        );
        self.inner.drained.notify_waiters();
        true
    }

    fn record_chunk(&self, state: &mut EngineState, chunk: &Chunk, effects: &mut Effects) {
        let id = chunk.boundary_id.as_str();
        let Some(boundary) = state.boundaries.get_mut(id) else {
            return;
        };
        boundary.first_chunk_at.get_or_insert_with(Instant::now);
        boundary.bytes_received += chunk.size as u64;
        boundary.chunks.push(chunk.clone());
        let paused = boundary.state == BoundaryState::Paused;
        if chunk.is_final && paused {
            boundary.final_received = true;
        }

        let latency_ms = now_millis().saturating_sub(chunk.timestamp);
        state.metrics.record_chunk(chunk.size, latency_ms);
        trace!(
            boundary_id = %id,
            chunk_id = %chunk.id,
            sequence = chunk.sequence,
            size = chunk.size,
            latency_ms,
            "Buffered chunk"
        );
        effects.emit(
            id,
            EventKind::Chunk {
                chunk_id: chunk.id.clone(),
                sequence: chunk.sequence,
                size: chunk.size,
                is_final: chunk.is_final,
            },
        );

        if chunk.is_final {
            if paused {
                debug!(boundary_id = %id, "Final chunk received while paused, completing on resume");
                return;
            }
            self.complete_locked(state, id, effects);
        }
    }

    /// Decide between another attempt and failing the boundary. Returns the
    /// backoff delay and the token to abandon it on.
    fn on_ingest_failure(
        &self,
        id: &str,
        err: StreamError,
    ) -> Option<(Duration, CancellationToken)> {
        let mut effects = Effects::default();
        let retry = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let max_retries = self.inner.config.retry.max_retries;
            let Some(boundary) = state.boundaries.get_mut(id) else {
                return None;
            };
            if !(err.retryable
                && boundary.state.is_active()
                && boundary.retry_count < max_retries)
            {
                self.fail_locked(state, id, err, &mut effects);
                None
            } else {
                boundary.retry_count += 1;
                let attempt = boundary.retry_count;
                let delay = self.inner.config.retry.delay_for(attempt);
                let token = boundary.token.clone();
                state.metrics.record_retry();
                warn!(
                    boundary_id = %id,
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    code = %err.code,
                    error = %err.message,
                    "Retrying chunk"
                );
                effects.emit(
                    id,
                    EventKind::Retry {
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        code: err.code,
                        message: err.message.clone(),
                    },
                );
                Some((delay, token))
            }
        };
        effects.dispatch(&self.inner.events);
        retry
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
