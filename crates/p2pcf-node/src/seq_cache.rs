use std::collections::{HashSet, VecDeque};

/// Bounded memory of `(from, seq)` pairs seen on accepted handshakes.
///
/// Oldest entries are evicted first once `capacity` is reached.
#[derive(Debug)]
pub struct RecentSeqCache {
    capacity: usize,
    order: VecDeque<(String, u64)>,
    seen: HashSet<(String, u64)>,
}

impl RecentSeqCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, from: &str, seq: u64) -> bool {
        self.seen.contains(&(from.to_string(), seq))
    }

    /// Record a pair. Returns false if it was already present.
    pub fn insert(&mut self, from: &str, seq: u64) -> bool {
        let key = (from.to_string(), seq);
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
