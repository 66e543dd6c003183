use std::collections::{HashSet, VecDeque};

use tracing::debug;

/// Remembers processed event ids within a bounded window.
///
/// Not synchronized: owned by whichever task drives dispatch.
#[derive(Debug)]
pub struct Deduplicator {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
    evict_count: usize,
}

impl Deduplicator {
    /// Evicts the oldest half when `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        Self::with_eviction(capacity, capacity / 2)
    }

    pub fn with_eviction(capacity: usize, evict_count: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity + 1),
            order: VecDeque::with_capacity(capacity + 1),
            capacity,
            evict_count: evict_count.clamp(1, capacity),
        }
    }

    /// Returns true if `event_id` was already seen; otherwise marks it.
    pub fn seen(&mut self, event_id: &str) -> bool {
        if self.seen.contains(event_id) {
            return true;
        }

        self.seen.insert(event_id.to_string());
        self.order.push_back(event_id.to_string());

        if self.order.len() > self.capacity {
            self.evict();
        }
        false
    }

    fn evict(&mut self) {
        let count = self.evict_count.min(self.order.len());
        for id in self.order.drain(..count) {
            self.seen.remove(&id);
        }
        debug!("[DEDUP] Evicted {} ids, {} remain", count, self.order.len());
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}
