//! Capacity-bounded FIFO containers.
//!
//! Shared by the conversation store (history truncation) and the reply
//! mapping table (mapping eviction). Eviction tracks recency of *creation*,
//! never of use: reading an entry does not refresh it.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use serde::{Serialize, Serializer};

/// A ring-buffer-style deque that drops its oldest element on overflow.
#[derive(Debug, Clone)]
pub struct FifoDeque<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> FifoDeque<T> {
    /// Capacity must be at least 1.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "FifoDeque capacity must be non-zero");
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an element, returning the evicted oldest element if the
    /// deque was full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.buf.len() == self.capacity {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(value);
        evicted
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn back(&self) -> Option<&T> {
        self.buf.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Serializes as a plain sequence, oldest first. Capacity is a runtime
/// bound, not part of the persisted shape.
impl<T: Serialize> Serialize for FifoDeque<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.buf.iter())
    }
}

/// An insertion-ordered map that evicts its oldest entry on overflow.
///
/// Re-inserting an existing key updates the value in place without
/// refreshing its position in the eviction order.
#[derive(Debug, Clone)]
pub struct FifoMap<K, V> {
    order: VecDeque<K>,
    map: HashMap<K, V>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> FifoMap<K, V> {
    /// Capacity must be at least 1.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "FifoMap capacity must be non-zero");
        Self {
            order: VecDeque::with_capacity(capacity),
            map: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert an entry, returning the evicted oldest entry if the map
    /// was at capacity.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.map.contains_key(&key) {
            self.map.insert(key, value);
            return None;
        }

        let evicted = if self.map.len() == self.capacity {
            self.order.pop_front().and_then(|oldest| {
                let value = self.map.remove(&oldest)?;
                Some((oldest, value))
            })
        } else {
            None
        };

        self.order.push_back(key.clone());
        self.map.insert(key, value);
        evicted
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
