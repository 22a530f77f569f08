//! Pending-work queue
//!
//! Binary min-heap used by the scheduler to order started boundaries. The
//! smallest element is served first; [`QueueEntry`] orders by numeric
//! priority, then eligible time, then enqueue sequence so equal-priority
//! work is served FIFO.
//!
//! Unlike `std::collections::BinaryHeap` this heap supports removing an
//! arbitrary element (used when a pending boundary is aborted) while keeping
//! heap order.

use crate::types::BoundaryId;
use std::cmp::Ordering;
use tokio::time::Instant;

/// A started boundary waiting for a concurrency slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub boundary_id: BoundaryId,
    /// Lower = more urgent.
    pub priority: u32,
    pub enqueued_at: Instant,
    /// Earliest instant the scheduler may admit this entry.
    pub eligible_at: Instant,
    /// Monotonic tie-breaker assigned by the engine.
    pub seq: u64,
}

impl QueueEntry {
    pub fn is_eligible(&self, now: Instant) -> bool {
        self.eligible_at <= now
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.eligible_at.cmp(&other.eligible_at))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Array-backed binary min-heap.
#[derive(Debug, Clone)]
pub struct PriorityQueue<T> {
    heap: Vec<T>,
}

impl<T: Ord> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord> PriorityQueue<T> {
    pub fn new() -> Self {
        Self { heap: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Insert an item. O(log n).
    pub fn enqueue(&mut self, item: T) {
        self.heap.push(item);
        let last = self.heap.len() - 1;
        self.sift_up(last);
    }

    /// Remove and return the minimum item. O(log n).
    pub fn dequeue(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }
        let item = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.heap.first()
    }

    /// Remove the first item matching `predicate`.
    ///
    /// The last element is moved into the vacated slot and then sifted up if
    /// it is smaller than its new parent, otherwise down past its children.
    pub fn remove<F>(&mut self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let index = self.heap.iter().position(|item| predicate(item))?;
        let removed = self.heap.swap_remove(index);
        if index < self.heap.len() {
            if index > 0 && self.heap[index] < self.heap[(index - 1) / 2] {
                self.sift_up(index);
            } else {
                self.sift_down(index);
            }
        }
        Some(removed)
    }

    pub fn contains<F>(&self, predicate: F) -> bool
    where
        F: FnMut(&T) -> bool,
    {
        self.heap.iter().any(predicate)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Iterate in storage order (not priority order).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.heap.iter()
    }

    /// Consume the queue, returning items smallest first.
    pub fn into_sorted_vec(mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(item) = self.dequeue() {
            out.push(item);
        }
        out
    }

    /// True when every parent is <= both children.
    pub fn is_heap_ordered(&self) -> bool {
        (1..self.heap.len()).all(|i| self.heap[(i - 1) / 2] <= self.heap[i])
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.heap[index] >= self.heap[parent] {
                break;
            }
            self.heap.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;
            if left < len && self.heap[left] < self.heap[smallest] {
                smallest = left;
            }
            if right < len && self.heap[right] < self.heap[smallest] {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.heap.swap(index, smallest);
            index = smallest;
        }
    }
}
