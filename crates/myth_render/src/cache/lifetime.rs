use std::hash::Hash;

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};

use myth_core::errors::{GpuError, Result};

new_key_type! {
    struct NodeKey;
}

#[derive(Debug)]
struct CacheNode<K, V> {
    key: K,
    value: V,
    /// Tick of the last `insert` or `refer`.
    age: u64,
    /// Towards the most recently used end.
    prev: Option<NodeKey>,
    /// Towards the least recently used end.
    next: Option<NodeKey>,
}

/// Recency-ordered cache with tick-based eviction.
///
/// Nodes form a doubly linked list, most recently used first, stored in a
/// slot-map arena. The hash index maps keys to node slots and owns nothing.
///
/// ```text
///   head (newest)                                  tail (oldest)
///   [k3 age 9] <-> [k1 age 7] <-> [k4 age 2] <-> [k2 age 0]
///                                                      ^ check() looks here
/// ```
///
/// [`check`](Self::check) only ever inspects the tail, so a sweep costs one
/// comparison plus one per evicted node.
#[derive(Debug)]
pub struct LifetimeCache<K, V> {
    nodes: SlotMap<NodeKey, CacheNode<K, V>>,
    index: FxHashMap<K, NodeKey>,
    head: Option<NodeKey>,
    tail: Option<NodeKey>,
    tick: u64,
}

impl<K, V> Default for LifetimeCache<K, V>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> LifetimeCache<K, V>
where
    K: Hash + Eq + Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            index: FxHashMap::default(),
            head: None,
            tail: None,
            tick: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn in_cache(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Looks up `key`, moving its node to the front and stamping it with the
    /// current tick.
    pub fn refer(&mut self, key: &K) -> Option<&mut V> {
        let node = *self.index.get(key)?;
        self.unlink(node);
        self.push_front(node);
        let tick = self.tick;
        let entry = self.nodes.get_mut(node)?;
        entry.age = tick;
        Some(&mut entry.value)
    }

    /// Looks up `key` without touching recency or age.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        let node = self.index.get(key)?;
        self.nodes.get(*node).map(|n| &n.value)
    }

    /// Inserts a new node at the front.
    ///
    /// Fails with [`GpuError::AlreadyExists`] when the key is cached; callers
    /// `refer` first.
    pub fn insert(&mut self, key: K, value: V) -> Result<&mut V> {
        if self.index.contains_key(&key) {
            return Err(GpuError::AlreadyExists("lifetime cache key".into()));
        }
        let node = self.nodes.insert(CacheNode {
            key: key.clone(),
            value,
            age: self.tick,
            prev: None,
            next: None,
        });
        self.index.insert(key, node);
        self.push_front(node);
        self.nodes
            .get_mut(node)
            .map(|n| &mut n.value)
            .ok_or_else(|| GpuError::failed("cache", "node vanished after insert"))
    }

    /// Advances the logical clock by one.
    #[inline]
    pub fn update_tick(&mut self) {
        self.tick += 1;
    }

    /// Evicts tail nodes whose age lags the current tick by at least
    /// `threshold`, stopping at the first young enough node. Returns the
    /// number of evicted nodes.
    ///
    /// A node stamped during the current tick is never evicted.
    pub fn check(&mut self, threshold: u64, mut evict: impl FnMut(K, V)) -> usize {
        let mut evicted = 0;
        while let Some(tail) = self.tail {
            let Some(node) = self.nodes.get(tail) else {
                break;
            };
            let lag = self.tick.saturating_sub(node.age);
            if lag == 0 || lag < threshold {
                break;
            }
            self.unlink(tail);
            if let Some(node) = self.nodes.remove(tail) {
                self.index.remove(&node.key);
                evict(node.key, node.value);
                evicted += 1;
            }
        }
        evicted
    }

    /// Removes one node without running any eviction hook.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let node = self.index.remove(key)?;
        self.unlink(node);
        self.nodes.remove(node).map(|n| n.value)
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    /// Evicts every node through `evict`, oldest first.
    pub fn clear_with(&mut self, mut evict: impl FnMut(K, V)) {
        while let Some(tail) = self.tail {
            self.unlink(tail);
            if let Some(node) = self.nodes.remove(tail) {
                self.index.remove(&node.key);
                evict(node.key, node.value);
            }
        }
        self.clear();
    }

    /// Visits every node, most recently used first.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        let mut cursor = self.head;
        while let Some(node) = cursor.and_then(|k| self.nodes.get(k)) {
            f(&node.key, &node.value);
            cursor = node.next;
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Tick at which `key` was last inserted or referred.
    #[must_use]
    pub fn age_of(&self, key: &K) -> Option<u64> {
        let node = self.index.get(key)?;
        self.nodes.get(*node).map(|n| n.age)
    }

    // ── List plumbing ────────────────────────────────────────────────────────

    fn unlink(&mut self, node: NodeKey) {
        let Some((prev, next)) = self.nodes.get(node).map(|n| (n.prev, n.next)) else {
            return;
        };
        match prev.and_then(|p| self.nodes.get_mut(p)) {
            Some(p) => p.next = next,
            None => self.head = next,
        }
        match next.and_then(|n| self.nodes.get_mut(n)) {
            Some(n) => n.prev = prev,
            None => self.tail = prev,
        }
        if let Some(n) = self.nodes.get_mut(node) {
            n.prev = None;
            n.next = None;
        }
    }

    fn push_front(&mut self, node: NodeKey) {
        let old_head = self.head;
        if let Some(n) = self.nodes.get_mut(node) {
            n.prev = None;
            n.next = old_head;
        }
        if let Some(h) = old_head.and_then(|h| self.nodes.get_mut(h)) {
            h.prev = Some(node);
        }
        self.head = Some(node);
        if self.tail.is_none() {
            self.tail = Some(node);
        }
    }
}
