//! Configuration System
//!
//! Engine tuning (concurrency ceiling, buffer sizing, backpressure strategy,
//! retry policy) and logging settings. Values are layered by
//! [`ConfigLoader`]: built-in defaults, the user's global file, workspace
//! files, then `SLUICE__`-prefixed environment variables.

use crate::error::StreamError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

mod loader;
mod merge;
mod sources;

pub use loader::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SluiceConfig {
    /// Scheduler and buffer settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What the engine does with an incoming chunk while the buffer is at or
/// above its high-water mark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureStrategy {
    /// Wait until delivery brings the buffer below the mark.
    #[default]
    Pause,
    /// Discard the chunk.
    Drop,
    /// Fail the boundary with a buffer overflow.
    Error,
    /// Grow the buffer up to `buffer.max_capacity`, then behave like `Pause`.
    Expand,
}

impl BackpressureStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            BackpressureStrategy::Pause => "pause",
            BackpressureStrategy::Drop => "drop",
            BackpressureStrategy::Error => "error",
            BackpressureStrategy::Expand => "expand",
        }
    }
}

impl fmt::Display for BackpressureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackpressureStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pause" => Ok(BackpressureStrategy::Pause),
            "drop" => Ok(BackpressureStrategy::Drop),
            "error" => Ok(BackpressureStrategy::Error),
            "expand" | "buffer" => Ok(BackpressureStrategy::Expand),
            other => Err(format!("unknown backpressure strategy '{}'", other)),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of boundaries streaming at once
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: usize,

    /// Shared chunk buffer sizing
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Strategy applied above the high-water mark
    #[serde(default)]
    pub backpressure: BackpressureStrategy,

    /// Retry policy for retryable chunk failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Number of recent chunk latency samples kept for the rolling average
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
}

fn default_max_concurrent_streams() -> usize {
    4
}

fn default_latency_window() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: default_max_concurrent_streams(),
            buffer: BufferConfig::default(),
            backpressure: BackpressureStrategy::default(),
            retry: RetryConfig::default(),
            latency_window: default_latency_window(),
        }
    }
}

/// Buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Chunk slots
    #[serde(default = "default_buffer_capacity")]
    pub capacity: usize,

    /// Occupied bytes at which backpressure applies
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// Ceiling for the `expand` strategy, in chunk slots
    #[serde(default = "default_max_capacity")]
    pub max_capacity: usize,
}

fn default_buffer_capacity() -> usize {
    1024
}

fn default_high_water_mark() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_max_capacity() -> usize {
    8192
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_buffer_capacity(),
            high_water_mark: default_high_water_mark(),
            max_capacity: default_max_capacity(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed per boundary before it fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each further retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single retry delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64 << exponent;
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Engine(String),
    Buffer(String),
    Retry(String),
    Logging(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Engine(msg) => write!(f, "Engine: {}", msg),
            ValidationError::Buffer(msg) => write!(f, "Buffer: {}", msg),
            ValidationError::Retry(msg) => write!(f, "Retry: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl EngineConfig {
    /// Validate engine settings, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.max_concurrent_streams == 0 {
            errors.push(ValidationError::Engine(
                "max_concurrent_streams must be at least 1".to_string(),
            ));
        }
        if self.latency_window == 0 {
            errors.push(ValidationError::Engine(
                "latency_window must be at least 1".to_string(),
            ));
        }
        if self.buffer.capacity == 0 {
            errors.push(ValidationError::Buffer(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.buffer.high_water_mark == 0 {
            errors.push(ValidationError::Buffer(
                "high_water_mark must be at least 1 byte".to_string(),
            ));
        }
        if self.buffer.max_capacity < self.buffer.capacity {
            errors.push(ValidationError::Buffer(format!(
                "max_capacity ({}) is below capacity ({})",
                self.buffer.max_capacity, self.buffer.capacity
            )));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            errors.push(ValidationError::Retry(format!(
                "max_delay_ms ({}) is below base_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl SluiceConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = match self.engine.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Fold a list of validation errors into one `ConfigError`.
pub fn validation_failure(errors: &[ValidationError]) -> StreamError {
    let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    StreamError::config(format!(
        "Configuration validation failed:\n{}",
        error_msgs.join("\n")
    ))
}
