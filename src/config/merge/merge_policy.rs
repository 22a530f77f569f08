//! Merge rules: defaults, override order, conflict handling.
//!
//! Later sources win key by key; tables merge rather than replace, so a file
//! that sets only `engine.retry.max_retries` keeps every other default.

use crate::config::{BufferConfig, EngineConfig, RetryConfig};
use crate::logging::LoggingConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let engine = EngineConfig::default();
    let buffer = BufferConfig::default();
    let retry = RetryConfig::default();
    let logging = LoggingConfig::default();

    Config::builder()
        .set_default(
            "engine.max_concurrent_streams",
            engine.max_concurrent_streams as u64,
        )?
        .set_default("engine.backpressure", engine.backpressure.as_str())?
        .set_default("engine.latency_window", engine.latency_window as u64)?
        .set_default("engine.buffer.capacity", buffer.capacity as u64)?
        .set_default("engine.buffer.high_water_mark", buffer.high_water_mark as u64)?
        .set_default("engine.buffer.max_capacity", buffer.max_capacity as u64)?
        .set_default("engine.retry.max_retries", u64::from(retry.max_retries))?
        .set_default("engine.retry.base_delay_ms", retry.base_delay_ms)?
        .set_default("engine.retry.max_delay_ms", retry.max_delay_ms)?
        .set_default("logging.level", logging.level)?
        .set_default("logging.format", logging.format)?
        .set_default("logging.output", logging.output)
}
