//! Shared helpers for engine integration tests.

use parking_lot::Mutex;
use sluice::{Chunk, EngineConfig, StreamEngine, StreamEvent, Subscription};
use std::sync::Arc;

/// Engine with the default config adjusted by `tweak`. Must run inside a
/// Tokio runtime.
pub fn engine_with(tweak: impl FnOnce(&mut EngineConfig)) -> StreamEngine {
    let mut config = EngineConfig::default();
    tweak(&mut config);
    StreamEngine::new(config).unwrap()
}

pub fn chunk(boundary_id: &str, sequence: u64, size: usize) -> Chunk {
    Chunk::new(boundary_id, sequence, vec![b'x'; size])
}

pub fn final_chunk(boundary_id: &str, sequence: u64, size: usize) -> Chunk {
    chunk(boundary_id, sequence, size).final_chunk()
}

/// Records every event emitted by an engine.
pub struct EventLog {
    events: Arc<Mutex<Vec<StreamEvent>>>,
    _subscription: Subscription,
}

impl EventLog {
    pub fn attach(engine: &StreamEngine) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = engine.subscribe(move |event| sink.lock().push(event.clone()));
        Self {
            events,
            _subscription: subscription,
        }
    }

    pub fn all(&self) -> Vec<StreamEvent> {
        self.events.lock().clone()
    }

    /// Event type names for one boundary, in emission order.
    pub fn types_for(&self, boundary_id: &str) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.boundary_id == boundary_id)
            .map(|e| e.event_type())
            .collect()
    }

    /// Boundary ids of Start events, in admission order.
    pub fn admissions(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == "start")
            .map(|e| e.boundary_id.clone())
            .collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}
