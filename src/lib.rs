//! Sluice: Priority-Based Content Delivery
//!
//! Schedules independently produced units of content ("boundaries") for
//! delivery. Boundaries are admitted by priority up to a concurrency
//! ceiling, their chunks are buffered in a shared ring buffer with a
//! byte-based high-water mark, transient failures are retried with
//! exponential backoff, and every lifecycle step is published as an event.
//!
//! ```no_run
//! use sluice::{BoundaryConfig, Chunk, EngineConfig, Priority, StreamEngine};
//!
//! # async fn demo() -> Result<(), sluice::StreamError> {
//! let engine = StreamEngine::new(EngineConfig::default())?;
//! engine.register("hero", BoundaryConfig::new(Priority::Critical))?;
//! engine.start("hero")?;
//! engine.process_chunk(Chunk::new("hero", 0, "<h1>Hi</h1>").final_chunk()).await;
//! let ready = engine.deliver_chunks("hero");
//! # Ok(())
//! # }
//! ```

pub mod boundary;
pub mod buffer;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod queue;
pub mod simulation;
pub mod types;

pub use boundary::{BoundaryConfig, BoundaryMetrics, BoundarySnapshot};
pub use buffer::{BufferStats, ChunkBuffer};
pub use chunk::Chunk;
pub use config::{BackpressureStrategy, EngineConfig, RetryConfig, SluiceConfig};
pub use engine::StreamEngine;
pub use error::{ErrorCode, StreamError};
pub use events::{EventKind, StreamEvent, Subscription};
pub use lifecycle::BoundaryState;
pub use metrics::StreamMetrics;
pub use queue::PriorityQueue;
pub use types::{BoundaryId, ChunkId, Priority};
