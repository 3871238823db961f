//! Bounded caches for streamed records
//!
//! `ArrayCache` is a ring buffer for append-only tapes (public trades).
//! `KeyedCache` replaces records in place by key (orders, positions, own
//! trades) and evicts the oldest key once full.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use sync_core::{Order, Position, Trade};

/// Records that belong to one partition (symbol) of a shared cache
pub trait Partitioned {
    fn partition(&self) -> &str;
}

impl Partitioned for Trade {
    fn partition(&self) -> &str {
        &self.symbol
    }
}

impl Partitioned for Order {
    fn partition(&self) -> &str {
        &self.symbol
    }
}

impl Partitioned for Position {
    fn partition(&self) -> &str {
        &self.symbol
    }
}

/// Newest `n` items of `partition`, oldest first
fn tail_of<'a, T: Partitioned + Clone + 'a>(
    items: impl DoubleEndedIterator<Item = &'a T>,
    partition: &str,
    n: usize,
) -> Vec<T> {
    let mut tail: Vec<T> = items
        .rev()
        .filter(|item| item.partition() == partition)
        .take(n)
        .cloned()
        .collect();
    tail.reverse();
    tail
}

/// Append-only ring buffer
#[derive(Debug, Clone)]
pub struct ArrayCache<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> ArrayCache<T> {
    /// A zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ArrayCache {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest item when full
    pub fn append(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Current contents, oldest first
    pub fn snapshot_view(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone + Partitioned> ArrayCache<T> {
    pub fn limit_for(&self, partition: &str, n: usize) -> Vec<T> {
        tail_of(self.items.iter(), partition, n)
    }
}

/// Keyed upsert cache. Position order is first-insertion order; replacing a
/// key keeps its position.
#[derive(Debug, Clone)]
pub struct KeyedCache<K, T> {
    order: VecDeque<K>,
    entries: HashMap<K, T>,
    capacity: usize,
}

impl<K, T> KeyedCache<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    pub fn new(capacity: usize) -> Self {
        KeyedCache {
            order: VecDeque::new(),
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert or replace. Returns the replaced record.
    pub fn upsert(&mut self, key: K, item: T) -> Option<T> {
        if let Some(existing) = self.entries.get_mut(&key) {
            return Some(std::mem::replace(existing, item));
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.entries.remove(&oldest);
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, item);
        None
    }

    pub fn get(&self, key: &K) -> Option<&T> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut T> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Current contents in first-insertion order
    pub fn snapshot_view(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.order.iter().filter_map(|key| self.entries.get(key))
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
}

impl<K, T> KeyedCache<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Partitioned,
{
    pub fn limit_for(&self, partition: &str, n: usize) -> Vec<T> {
        tail_of(self.iter(), partition, n)
    }
}
