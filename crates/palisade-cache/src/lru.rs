//! Intrusive doubly-linked LRU list over a slab.
//!
//! The cache contract requires O(1) `get`/`put` including the
//! move-to-most-recent touch on every hit, so the recency order is kept as
//! an intrusive linked list threaded through slab slots, with a `HashMap`
//! from key to slot index. Evicting the least recently used entry is a
//! constant-time unlink at the tail.
//!
//! This structure is not synchronized; [`ContentCache`](crate::ContentCache)
//! wraps it in a mutex with bounded critical sections.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

/// Sentinel index marking the absence of a neighbor.
const NIL: usize = usize::MAX;

/// A single slab slot: key, value, timestamps, and recency links.
#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    created: Instant,
    last_access: Instant,
    prev: usize,
    next: usize,
}

/// Bounded LRU store with O(1) lookup, touch, insert, and eviction.
///
/// Head of the list is the most recently used entry, tail the least.
/// Freed slots are recycled through a free list so the slab never grows
/// past `capacity`.
#[derive(Debug)]
pub(crate) struct LruList<K: Eq + Hash + Clone, V> {
    map: HashMap<K, usize>,
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> LruList<K, V> {
    /// Creates an empty list bounded at `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be at least 1");
        Self {
            map: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Maximum number of entries before eviction.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Creation time of an entry, without touching recency.
    pub fn peek_created(&self, key: &K) -> Option<Instant> {
        let idx = *self.map.get(key)?;
        self.nodes[idx].as_ref().map(|n| n.created)
    }

    /// Marks `key` most recently used and returns its value.
    pub fn touch(&mut self, key: &K, now: Instant) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.unlink(idx);
        self.push_front(idx);
        let node = self.nodes[idx].as_mut()?;
        node.last_access = now;
        Some(&node.value)
    }

    /// Inserts `key` at the most-recent position, evicting the LRU entry
    /// if at capacity. Returns the evicted `(key, value)` pair, if any.
    ///
    /// Re-inserting an existing key must go through [`remove`](Self::remove)
    /// first; the caller owns that two-step so it can account both sides.
    pub fn insert(&mut self, key: K, value: V, now: Instant) -> Option<(K, V)> {
        debug_assert!(!self.map.contains_key(&key), "insert over live key");

        let evicted = if self.map.len() >= self.capacity {
            self.pop_tail()
        } else {
            None
        };

        let node = Node {
            key: key.clone(),
            value,
            created: now,
            last_access: now,
            prev: NIL,
            next: NIL,
        };

        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };

        self.map.insert(key, idx);
        self.push_front(idx);
        evicted
    }

    /// Removes an entry, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.nodes[idx].take().map(|n| n.value)
    }

    /// Evicts the least recently used entry.
    pub fn pop_tail(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        self.unlink(idx);
        self.free.push(idx);
        let node = self.nodes[idx].take()?;
        self.map.remove(&node.key);
        Some((node.key, node.value))
    }

    /// Keys of all entries created at or before `cutoff`.
    pub fn created_before(&self, cutoff: Instant) -> Vec<K> {
        self.nodes
            .iter()
            .flatten()
            .filter(|n| n.created <= cutoff)
            .map(|n| n.key.clone())
            .collect()
    }

    /// Removes every entry, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.map.len();
        self.map.clear();
        self.nodes.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
        dropped
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.nodes[idx].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            NIL => self.head = next,
            p => {
                if let Some(node) = self.nodes[p].as_mut() {
                    node.next = next;
                }
            }
        }
        match next {
            NIL => self.tail = prev,
            n => {
                if let Some(node) = self.nodes[n].as_mut() {
                    node.prev = prev;
                }
            }
        }

        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = NIL;
            node.next = NIL;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = NIL;
            node.next = old_head;
        }
        match old_head {
            NIL => self.tail = idx,
            h => {
                if let Some(node) = self.nodes[h].as_mut() {
                    node.prev = idx;
                }
            }
        }
        self.head = idx;
    }
}
