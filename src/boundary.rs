//! Boundary records
//!
//! A boundary is a named unit of incrementally produced content. The engine
//! owns one [`Boundary`] per registered id; callers configure it with a
//! [`BoundaryConfig`] and observe it through [`BoundarySnapshot`].

use crate::chunk::Chunk;
use crate::error::StreamError;
use crate::lifecycle::BoundaryState;
use crate::types::{BoundaryId, Priority};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Chunk transformer applied before buffering. Must return a new chunk.
pub type Transformer = Arc<dyn Fn(Chunk) -> Result<Chunk, StreamError> + Send + Sync>;

pub type StartCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type CompleteCallback = Arc<dyn Fn(&str, &BoundaryMetrics) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str, &StreamError) + Send + Sync>;
pub type AbortCallback = Arc<dyn Fn(&str, Option<&str>) + Send + Sync>;

/// Lifecycle hooks invoked by the engine outside its internal lock.
#[derive(Clone, Default)]
pub struct BoundaryCallbacks {
    pub on_start: Option<StartCallback>,
    pub on_complete: Option<CompleteCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_abort: Option<AbortCallback>,
}

impl fmt::Debug for BoundaryCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundaryCallbacks")
            .field("on_start", &self.on_start.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_abort", &self.on_abort.is_some())
            .finish()
    }
}

/// Per-boundary configuration supplied at registration.
#[derive(Clone, Default)]
pub struct BoundaryConfig {
    pub priority: Priority,
    /// Minimum wait between `start` and eligibility for scheduling.
    pub defer: Duration,
    /// Fail the boundary if it is still streaming this long after activation.
    pub timeout: Option<Duration>,
    pub transformer: Option<Transformer>,
    /// Rendered server-side; carried for consumers, not interpreted.
    pub ssr: bool,
    pub callbacks: BoundaryCallbacks,
}

impl BoundaryConfig {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    pub fn with_defer(mut self, defer: Duration) -> Self {
        self.defer = defer;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_ssr(mut self, ssr: bool) -> Self {
        self.ssr = ssr;
        self
    }

    pub fn with_transformer<F>(mut self, transformer: F) -> Self
    where
        F: Fn(Chunk) -> Result<Chunk, StreamError> + Send + Sync + 'static,
    {
        self.transformer = Some(Arc::new(transformer));
        self
    }

    pub fn on_start<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_start = Some(Arc::new(callback));
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &BoundaryMetrics) + Send + Sync + 'static,
    {
        self.callbacks.on_complete = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &StreamError) + Send + Sync + 'static,
    {
        self.callbacks.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_abort<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, Option<&str>) + Send + Sync + 'static,
    {
        self.callbacks.on_abort = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for BoundaryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundaryConfig")
            .field("priority", &self.priority)
            .field("defer", &self.defer)
            .field("timeout", &self.timeout)
            .field("transformer", &self.transformer.is_some())
            .field("ssr", &self.ssr)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// Final figures for one boundary, recorded when it completes or fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryMetrics {
    pub priority: Priority,
    /// Activation to first accepted chunk.
    pub time_to_first_chunk_ms: Option<u64>,
    /// Activation to completion or failure.
    pub total_duration_ms: u64,
    pub chunk_count: usize,
    pub bytes: u64,
    pub retry_count: u32,
    pub success: bool,
}

/// Engine-owned state of one boundary.
pub(crate) struct Boundary {
    pub id: BoundaryId,
    pub config: BoundaryConfig,
    pub state: BoundaryState,
    pub chunks: Vec<Chunk>,
    pub bytes_received: u64,
    pub bytes_delivered: u64,
    pub started_at: Option<Instant>,
    pub first_chunk_at: Option<Instant>,
    pub ended_at: Option<Instant>,
    pub last_error: Option<StreamError>,
    pub retry_count: u32,
    pub token: CancellationToken,
    pub timeout_task: Option<JoinHandle<()>>,
    /// Final chunk arrived while paused; completion happens on resume.
    pub final_received: bool,
    /// Timeout that elapsed while paused; applied on resume.
    pub expired: Option<StreamError>,
}

impl Boundary {
    pub fn new(id: BoundaryId, config: BoundaryConfig) -> Self {
        Self {
            id,
            config,
            state: BoundaryState::Idle,
            chunks: Vec::new(),
            bytes_received: 0,
            bytes_delivered: 0,
            started_at: None,
            first_chunk_at: None,
            ended_at: None,
            last_error: None,
            retry_count: 0,
            token: CancellationToken::new(),
            timeout_task: None,
            final_received: false,
            expired: None,
        }
    }

    /// Move to `next` if the transition table allows it.
    pub fn transition(&mut self, next: BoundaryState) -> Option<BoundaryState> {
        if !self.state.can_transition_to(next) {
            return None;
        }
        let previous = self.state;
        self.state = next;
        Some(previous)
    }

    pub fn cancel_timeout(&mut self) {
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
    }

    pub fn metrics(&self, success: bool) -> BoundaryMetrics {
        let started = self.started_at;
        let elapsed_ms = |at: Option<Instant>| -> Option<u64> {
            match (started, at) {
                (Some(start), Some(at)) => {
                    Some(at.saturating_duration_since(start).as_millis() as u64)
                }
                _ => None,
            }
        };
        BoundaryMetrics {
            priority: self.config.priority,
            time_to_first_chunk_ms: elapsed_ms(self.first_chunk_at),
            total_duration_ms: elapsed_ms(self.ended_at).unwrap_or(0),
            chunk_count: self.chunks.len(),
            bytes: self.bytes_received,
            retry_count: self.retry_count,
            success,
        }
    }

    pub fn snapshot(&self) -> BoundarySnapshot {
        BoundarySnapshot {
            id: self.id.clone(),
            state: self.state,
            priority: self.config.priority,
            ssr: self.config.ssr,
            chunk_count: self.chunks.len(),
            bytes_received: self.bytes_received,
            bytes_delivered: self.bytes_delivered,
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
            cancelled: self.token.is_cancelled(),
        }
    }
}

/// Read-only copy of a boundary's state.
#[derive(Debug, Clone)]
pub struct BoundarySnapshot {
    pub id: BoundaryId,
    pub state: BoundaryState,
    pub priority: Priority,
    pub ssr: bool,
    pub chunk_count: usize,
    pub bytes_received: u64,
    pub bytes_delivered: u64,
    pub retry_count: u32,
    pub last_error: Option<StreamError>,
    pub cancelled: bool,
}
