//! Deferred side effects.
//!
//! Engine operations mutate state under the lock and queue events and
//! callbacks here; they are dispatched in order once the lock is released,
//! so handlers can call back into the engine.

use crate::events::{EventBus, EventKind, StreamEvent};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

enum Effect {
    Emit(StreamEvent),
    Invoke(&'static str, String, Box<dyn FnOnce() + Send>),
}

#[derive(Default)]
pub(crate) struct Effects {
    queue: Vec<Effect>,
}

impl Effects {
    pub fn emit(&mut self, boundary_id: &str, kind: EventKind) {
        self.queue
            .push(Effect::Emit(StreamEvent::new(boundary_id, kind)));
    }

    /// Queue a lifecycle callback. `hook` names it in logs if it panics.
    pub fn invoke<F>(&mut self, hook: &'static str, boundary_id: &str, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Effect::Invoke(
            hook,
            boundary_id.to_string(),
            Box::new(callback),
        ));
    }

    pub fn dispatch(self, bus: &EventBus) {
        for effect in self.queue {
            match effect {
                Effect::Emit(event) => bus.emit(&event),
                Effect::Invoke(hook, boundary_id, callback) => {
                    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                        warn!(boundary_id = %boundary_id, hook, "Boundary callback panicked");
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
