//! Lifecycle events and the in-process event bus.
//!
//! Handlers run synchronously on the thread that emitted the event, in
//! subscription order. A panicking handler is caught and logged; the
//! remaining handlers still receive the event.

use crate::config::BackpressureStrategy;
use crate::error::{ErrorCode, StreamError};
use crate::lifecycle::BoundaryState;
use crate::types::{now_millis, BoundaryId};
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    pub boundary_id: BoundaryId,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub kind: EventKind,
}

impl StreamEvent {
    pub fn new(boundary_id: impl Into<BoundaryId>, kind: EventKind) -> Self {
        Self {
            boundary_id: boundary_id.into(),
            timestamp: now_millis(),
            kind,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Chunk {
        chunk_id: String,
        sequence: u64,
        size: usize,
        is_final: bool,
    },
    Pause,
    Resume,
    Complete {
        duration_ms: u64,
        chunk_count: usize,
        bytes: u64,
    },
    Error {
        code: ErrorCode,
        message: String,
        retry_count: u32,
    },
    Abort {
        reason: Option<String>,
    },
    Backpressure {
        occupied_bytes: usize,
        high_water_mark: usize,
        utilization: f64,
        strategy: BackpressureStrategy,
    },
    Retry {
        attempt: u32,
        delay_ms: u64,
        code: ErrorCode,
        message: String,
    },
    StateChange {
        from: BoundaryState,
        to: BoundaryState,
    },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Chunk { .. } => "chunk",
            EventKind::Pause => "pause",
            EventKind::Resume => "resume",
            EventKind::Complete { .. } => "complete",
            EventKind::Error { .. } => "error",
            EventKind::Abort { .. } => "abort",
            EventKind::Backpressure { .. } => "backpressure",
            EventKind::Retry { .. } => "retry",
            EventKind::StateChange { .. } => "state_change",
        }
    }

    pub(crate) fn error(err: &StreamError, retry_count: u32) -> Self {
        EventKind::Error {
            code: err.code,
            message: err.message.clone(),
            retry_count,
        }
    }
}

type Handler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

/// Fan-out of [`StreamEvent`]s to subscribed handlers.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.write();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.handlers.push((id, Arc::new(handler)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Subscribe a channel; events are cloned into it as they are emitted.
    pub fn channel(&self) -> (Subscription, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    pub fn emit(&self, event: &StreamEvent) {
        // Snapshot so handlers may subscribe/unsubscribe while being called.
        let handlers: Vec<Handler> = self
            .registry
            .read()
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(
                    boundary_id = %event.boundary_id,
                    event_type = event.event_type(),
                    "Event handler panicked"
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.read().handlers.len()
    }

    pub fn clear(&self) {
        self.registry.write().handlers.clear();
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it keeps the
/// handler registered; call [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<RwLock<Registry>>,
}

impl Subscription {
    /// Remove the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.write();
        let before = registry.handlers.len();
        registry.handlers.retain(|(id, _)| *id != self.id);
        registry.handlers.len() != before
    }
}
