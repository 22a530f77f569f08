//! Error types for the sluice delivery engine.
//!
//! Every failure the engine reports is a [`StreamError`] carrying an
//! [`ErrorCode`] from a closed taxonomy. The code decides retryability.

use crate::types::now_millis;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Closed error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NetworkError,
    TimeoutError,
    AbortError,
    BufferOverflow,
    InvalidChunk,
    ChecksumError,
    ServerError,
    UnknownError,
    ConfigError,
    StateError,
}

impl ErrorCode {
    /// Network, timeout and server failures may succeed on a later attempt.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError | ErrorCode::TimeoutError | ErrorCode::ServerError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NetworkError => "network_error",
            ErrorCode::TimeoutError => "timeout_error",
            ErrorCode::AbortError => "abort_error",
            ErrorCode::BufferOverflow => "buffer_overflow",
            ErrorCode::InvalidChunk => "invalid_chunk",
            ErrorCode::ChecksumError => "checksum_error",
            ErrorCode::ServerError => "server_error",
            ErrorCode::UnknownError => "unknown_error",
            ErrorCode::ConfigError => "config_error",
            ErrorCode::StateError => "state_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause attached to a [`StreamError`].
pub type ErrorCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Engine error: code, message and the boundary/chunk it concerns.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct StreamError {
    pub code: ErrorCode,
    pub message: String,
    pub boundary_id: Option<String>,
    pub chunk_id: Option<String>,
    pub retryable: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[source]
    pub cause: Option<ErrorCause>,
}

impl StreamError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            boundary_id: None,
            chunk_id: None,
            retryable: code.is_retryable(),
            timestamp: now_millis(),
            cause: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TimeoutError, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServerError, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StateError, message)
    }

    pub fn buffer_overflow(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BufferOverflow, message)
    }

    /// Wrap a foreign error as an `UnknownError`, keeping it as the source.
    pub fn unknown<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(ErrorCode::UnknownError, cause.to_string()).with_cause(cause)
    }

    pub fn with_boundary(mut self, boundary_id: impl Into<String>) -> Self {
        self.boundary_id = Some(boundary_id.into());
        self
    }

    pub fn with_chunk(mut self, chunk_id: impl Into<String>) -> Self {
        self.chunk_id = Some(chunk_id.into());
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Fill in boundary and chunk ids that the producer of the error left out.
    pub(crate) fn normalize(mut self, boundary_id: &str, chunk_id: &str) -> Self {
        if self.boundary_id.is_none() {
            self.boundary_id = Some(boundary_id.to_string());
        }
        if self.chunk_id.is_none() {
            self.chunk_id = Some(chunk_id.to_string());
        }
        self
    }
}

impl From<config::ConfigError> for StreamError {
    fn from(err: config::ConfigError) -> Self {
        StreamError::config(err.to_string())
    }
}
