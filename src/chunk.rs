//! Chunk: one ordered unit of a boundary's output.
//!
//! Chunks are immutable once built. Transformers return new chunks rather
//! than editing payloads in place; payloads are `bytes::Bytes` so clones
//! share storage.

use crate::error::{ErrorCode, StreamError};
use crate::types::{now_millis, BoundaryId, ChunkId};
use bytes::Bytes;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    pub boundary_id: BoundaryId,
    /// Position within the owning boundary's sequence.
    pub sequence: u64,
    pub data: Bytes,
    pub size: usize,
    /// Hex-encoded BLAKE3 digest of `data`.
    pub checksum: Option<String>,
    pub is_final: bool,
    /// Milliseconds since the Unix epoch at creation.
    pub timestamp: u64,
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    pub fn new(boundary_id: impl Into<BoundaryId>, sequence: u64, data: impl Into<Bytes>) -> Self {
        let boundary_id = boundary_id.into();
        let data = data.into();
        Self {
            id: format!("{}:{}", boundary_id, sequence),
            size: data.len(),
            boundary_id,
            sequence,
            data,
            checksum: None,
            is_final: false,
            timestamp: now_millis(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<ChunkId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn final_chunk(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn with_final(mut self, is_final: bool) -> Self {
        self.is_final = is_final;
        self
    }

    /// Attach a checksum computed over the current payload.
    pub fn with_checksum(mut self) -> Self {
        self.checksum = Some(compute_checksum(&self.data));
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Same chunk identity and flags with a new payload. Size follows the
    /// payload; a checksum, if present, is recomputed.
    pub fn with_data(&self, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let checksum = self.checksum.as_ref().map(|_| compute_checksum(&data));
        Self {
            id: self.id.clone(),
            boundary_id: self.boundary_id.clone(),
            sequence: self.sequence,
            size: data.len(),
            data,
            checksum,
            is_final: self.is_final,
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
        }
    }

    /// Check that `size` matches the payload and the checksum (if any) matches.
    pub fn verify(&self) -> Result<(), StreamError> {
        if self.size != self.data.len() {
            return Err(StreamError::new(
                ErrorCode::InvalidChunk,
                format!(
                    "declared size {} does not match payload length {}",
                    self.size,
                    self.data.len()
                ),
            )
            .with_boundary(self.boundary_id.clone())
            .with_chunk(self.id.clone()));
        }
        if let Some(expected) = &self.checksum {
            let actual = compute_checksum(&self.data);
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(StreamError::new(
                    ErrorCode::ChecksumError,
                    format!("checksum mismatch: expected {}, got {}", expected, actual),
                )
                .with_boundary(self.boundary_id.clone())
                .with_chunk(self.id.clone()));
            }
        }
        Ok(())
    }
}

/// Hex-encoded BLAKE3 digest.
pub fn compute_checksum(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}
