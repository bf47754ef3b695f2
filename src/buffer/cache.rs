//! A capacity-bounded LRU cache with a load callback on miss and an
//! unload callback on eviction.
//!
//! Backed by an arena of nodes linked into a doubly-linked list (recency
//! order, head = most recent) plus a `HashMap` from key to arena index.
//! Reusing evicted node slots instead of shrinking the arena keeps
//! `get` allocation-free on the steady-state path once the cache has
//! warmed up to capacity.

use crate::error::Result;
use std::collections::HashMap;
use std::hash::Hash;

const NIL: usize = usize::MAX;

struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// An LRU cache of capacity `> 2`. `load` is invoked synchronously on a
/// miss to produce the value for a key; `unload` is invoked when a value
/// is evicted to make room, or when the cache is cleared.
pub struct LruCache<K, V, L, U>
where
    K: Eq + Hash + Clone,
    L: FnMut(&K) -> Result<V>,
    U: FnMut(K, V),
{
    capacity: usize,
    nodes: Vec<Option<Node<K, V>>>,
    index: HashMap<K, usize>,
    head: usize,
    tail: usize,
    load: L,
    unload: U,
}

impl<K, V, L, U> LruCache<K, V, L, U>
where
    K: Eq + Hash + Clone,
    L: FnMut(&K) -> Result<V>,
    U: FnMut(K, V),
{
    /// Creates a new cache. Panics if `capacity <= 2`, per the
    /// invariant that the cache must hold both pinned paging slots
    /// (prefetch target, background-write target) alongside at least
    /// one resident page.
    pub fn new(capacity: usize, load: L, unload: U) -> Self {
        assert!(capacity > 2, "LruCache capacity must be > 2");
        LruCache {
            capacity,
            nodes: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
            load,
            unload,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn has_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.nodes[slot].as_ref().unwrap();
            (node.prev, node.next)
        };
        if prev != NIL {
            self.nodes[prev].as_mut().unwrap().next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].as_mut().unwrap().prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, slot: usize) {
        {
            let node = self.nodes[slot].as_mut().unwrap();
            node.prev = NIL;
            node.next = self.head;
        }
        if self.head != NIL {
            self.nodes[self.head].as_mut().unwrap().prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    /// Returns a reference to the value for `key`, loading it on a miss
    /// and evicting the least-recently-used entry first if the cache is
    /// at capacity. The head fast path applies when `key` is already the
    /// most-recently-used entry: the map lookup is skipped entirely.
    pub fn get(&mut self, key: &K) -> Result<&mut V> {
        if self.head != NIL && self.nodes[self.head].as_ref().unwrap().key == *key {
            return Ok(&mut self.nodes[self.head].as_mut().unwrap().value);
        }

        if let Some(&slot) = self.index.get(key) {
            self.unlink(slot);
            self.push_front(slot);
            return Ok(&mut self.nodes[self.head].as_mut().unwrap().value);
        }

        let value = (self.load)(key)?;

        let slot = if self.index.len() >= self.capacity {
            let tail = self.tail;
            self.unlink(tail);
            let evicted = self.nodes[tail].take().unwrap();
            self.index.remove(&evicted.key);
            (self.unload)(evicted.key, evicted.value);
            self.nodes[tail] = Some(Node {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            });
            tail
        } else {
            self.nodes.push(Some(Node {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            }));
            self.nodes.len() - 1
        };

        self.push_front(slot);
        self.index.insert(key.clone(), slot);
        Ok(&mut self.nodes[self.head].as_mut().unwrap().value)
    }

    /// Evicts every resident entry from tail to head, calling `unload`
    /// on each, and resets the cache to empty.
    pub fn clear(&mut self) {
        let mut cur = self.tail;
        while cur != NIL {
            let node = self.nodes[cur].take().unwrap();
            cur = node.prev;
            (self.unload)(node.key, node.value);
        }
        self.nodes.clear();
        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
    }
}
