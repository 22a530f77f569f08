//! Chunk buffer
//!
//! Fixed-capacity ring buffer shared by all boundaries. Capacity is counted
//! in chunks; backpressure is decided on bytes against a high-water mark.
//! The occupied byte count is maintained on every insert and removal, never
//! recomputed by scanning.

use crate::chunk::Chunk;
use serde::Serialize;

/// Point-in-time view of the buffer for metrics and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferStats {
    pub len: usize,
    pub capacity: usize,
    pub occupied_bytes: usize,
    pub high_water_mark: usize,
    pub utilization: f64,
    pub backpressure: bool,
}

#[derive(Debug)]
pub struct ChunkBuffer {
    slots: Vec<Option<Chunk>>,
    /// Index of the oldest chunk.
    head: usize,
    len: usize,
    occupied_bytes: usize,
    high_water_mark: usize,
}

impl ChunkBuffer {
    pub fn new(capacity: usize, high_water_mark: usize) -> Self {
        Self {
            slots: empty_slots(capacity),
            head: 0,
            len: 0,
            occupied_bytes: 0,
            high_water_mark,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.slots.len()
    }

    pub fn occupied_bytes(&self) -> usize {
        self.occupied_bytes
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Fraction of chunk slots in use.
    pub fn utilization(&self) -> f64 {
        if self.slots.is_empty() {
            return 1.0;
        }
        self.len as f64 / self.slots.len() as f64
    }

    pub fn should_apply_backpressure(&self) -> bool {
        self.occupied_bytes >= self.high_water_mark
    }

    /// Append a chunk. Returns false, leaving the buffer untouched, when full.
    pub fn push(&mut self, chunk: Chunk) -> bool {
        if self.is_full() {
            return false;
        }
        let tail = (self.head + self.len) % self.slots.len();
        self.occupied_bytes += chunk.size;
        self.slots[tail] = Some(chunk);
        self.len += 1;
        true
    }

    /// Remove the oldest chunk.
    pub fn shift(&mut self) -> Option<Chunk> {
        if self.len == 0 {
            return None;
        }
        let chunk = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        if let Some(chunk) = &chunk {
            self.occupied_bytes -= chunk.size;
        }
        chunk
    }

    pub fn peek(&self) -> Option<&Chunk> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    /// Remove every chunk, oldest first.
    pub fn drain(&mut self) -> Vec<Chunk> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(chunk) = self.shift() {
            out.push(chunk);
        }
        out
    }

    /// Remove every chunk matching `predicate`, oldest first. Retained chunks
    /// keep their relative order.
    pub fn extract<F>(&mut self, mut predicate: F) -> Vec<Chunk>
    where
        F: FnMut(&Chunk) -> bool,
    {
        let mut extracted = Vec::new();
        let mut retained = Vec::with_capacity(self.len);
        for chunk in self.drain() {
            if predicate(&chunk) {
                extracted.push(chunk);
            } else {
                retained.push(chunk);
            }
        }
        for chunk in retained {
            self.push(chunk);
        }
        extracted
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        let capacity = self.slots.len();
        (0..self.len).filter_map(move |offset| self.slots[(self.head + offset) % capacity].as_ref())
    }

    /// Double chunk capacity and the high-water mark, bounded by
    /// `max_capacity`. Returns false when already at the ceiling.
    ///
    /// Existing chunks are re-laid out oldest first; byte accounting is
    /// unchanged.
    pub fn expand(&mut self, max_capacity: usize) -> bool {
        let current = self.slots.len();
        if current >= max_capacity {
            return false;
        }
        let new_capacity = (current.max(1) * 2).min(max_capacity);
        let scale = new_capacity as f64 / current.max(1) as f64;
        let chunks = self.drain();
        self.slots = empty_slots(new_capacity);
        self.head = 0;
        for chunk in chunks {
            self.push(chunk);
        }
        self.high_water_mark = (self.high_water_mark as f64 * scale).ceil() as usize;
        true
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
        self.occupied_bytes = 0;
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            len: self.len,
            capacity: self.capacity(),
            occupied_bytes: self.occupied_bytes,
            high_water_mark: self.high_water_mark,
            utilization: self.utilization(),
            backpressure: self.should_apply_backpressure(),
        }
    }
}

fn empty_slots(capacity: usize) -> Vec<Option<Chunk>> {
    std::iter::repeat_with(|| None).take(capacity).collect()
}
