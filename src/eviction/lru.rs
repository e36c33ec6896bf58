// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Access-ordered map with O(1) touch, insert, remove and evict.
//!
//! Nodes live in a slab (`Vec<Option<Node>>` plus a free list) and are linked
//! by index into a doubly linked list ordered from most- to least-recently
//! used. A `HashMap` maps each key to its slot.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct LruMap<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> Default for LruMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone, V> LruMap<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Look up and mark as most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.move_to_front(idx);
        self.slots[idx].as_ref().map(|n| &n.value)
    }

    /// Look up without touching the access order.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.slots[idx].as_ref().map(|n| &n.value)
    }

    /// Mutable access without touching the access order.
    pub fn peek_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = *self.index.get(key)?;
        self.slots[idx].as_mut().map(|n| &mut n.value)
    }

    /// Insert or replace, marking the key most recently used.
    /// Returns the previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&idx) = self.index.get(&key) {
            self.move_to_front(idx);
            return self.slots[idx]
                .as_mut()
                .map(|n| std::mem::replace(&mut n.value, value));
        }

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: self.head,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        if let Some(old_head) = self.head {
            if let Some(n) = self.slots[old_head].as_mut() {
                n.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.index.insert(key, idx);
        None
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.unlink(idx);
        let node = self.slots[idx].take()?;
        self.free.push(idx);
        Some(node.value)
    }

    /// Remove and return the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let idx = self.tail?;
        self.unlink(idx);
        let node = self.slots[idx].take()?;
        self.index.remove(&node.key);
        self.free.push(idx);
        Some((node.key, node.value))
    }

    /// The entry [`pop_lru`](Self::pop_lru) would remove.
    #[must_use]
    pub fn peek_lru(&self) -> Option<(&K, &V)> {
        let idx = self.tail?;
        self.slots[idx].as_ref().map(|n| (&n.key, &n.value))
    }

    /// Keys from least to most recently used.
    #[must_use]
    pub fn keys_lru_first(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.tail;
        while let Some(idx) = cursor {
            match self.slots[idx].as_ref() {
                Some(n) => {
                    keys.push(n.key.clone());
                    cursor = n.prev;
                }
                None => break,
            }
        }
        keys
    }

    /// Drop every entry for which `keep` returns false. Order of survivors
    /// is unchanged.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let doomed: Vec<K> = self
            .slots
            .iter()
            .flatten()
            .filter(|n| !keep(&n.key, &n.value))
            .map(|n| n.key.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(n) => (n.prev, n.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(n) = self.slots[p].as_mut() {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.slots[nx].as_mut() {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(n) = self.slots[idx].as_mut() {
            n.prev = None;
            n.next = None;
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        if let Some(n) = self.slots[idx].as_mut() {
            n.next = self.head;
        }
        if let Some(old_head) = self.head {
            if let Some(n) = self.slots[old_head].as_mut() {
                n.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(keys: &[&'static str]) -> LruMap<&'static str, u32> {
        let mut map = LruMap::new();
        for (i, k) in keys.iter().enumerate() {
            map.insert(*k, i as u32);
        }
        map
    }

    #[test]
    fn test_pop_lru_follows_insertion_without_access() {
        let mut map = filled(&["a", "b", "c"]);
        assert_eq!(map.pop_lru(), Some(("a", 0)));
        assert_eq!(map.pop_lru(), Some(("b", 1)));
        assert_eq!(map.pop_lru(), Some(("c", 2)));
        assert_eq!(map.pop_lru(), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_get_touches_access_order() {
        let mut map = filled(&["a", "b", "c"]);
        assert_eq!(map.get(&"a"), Some(&0));

        assert_eq!(map.keys_lru_first(), vec!["b", "c", "a"]);
        assert_eq!(map.pop_lru().map(|(k, _)| k), Some("b"));
    }

    #[test]
    fn test_peek_does_not_touch() {
        let mut map = filled(&["a", "b"]);
        assert_eq!(map.peek(&"a"), Some(&0));
        assert_eq!(map.peek_lru(), Some((&"a", &0)));
    }

    #[test]
    fn test_reinsert_replaces_and_touches() {
        let mut map = filled(&["a", "b"]);
        assert_eq!(map.insert("a", 9), Some(0));
        assert_eq!(map.len(), 2);
        assert_eq!(map.keys_lru_first(), vec!["b", "a"]);
    }

    #[test]
    fn test_remove_middle_keeps_links() {
        let mut map = filled(&["a", "b", "c", "d"]);
        assert_eq!(map.remove(&"b"), Some(1));
        assert_eq!(map.remove(&"b"), None);
        assert_eq!(map.keys_lru_first(), vec!["a", "c", "d"]);

        map.remove(&"d");
        map.remove(&"a");
        assert_eq!(map.keys_lru_first(), vec!["c"]);
        assert_eq!(map.peek_lru(), Some((&"c", &2)));
    }

    #[test]
    fn test_slots_are_reused() {
        let mut map = LruMap::new();
        for round in 0..10u32 {
            map.insert(round, round);
            if map.len() > 3 {
                map.pop_lru();
            }
        }
        assert_eq!(map.len(), 3);
        assert!(map.slots.len() <= 4);
        assert_eq!(map.keys_lru_first(), vec![7, 8, 9]);
    }

    #[test]
    fn test_retain() {
        let mut map = filled(&["a", "b", "c", "d"]);
        let dropped = map.retain(|_, v| v % 2 == 0);
        assert_eq!(dropped, 2);
        assert_eq!(map.keys_lru_first(), vec!["a", "c"]);
    }

    #[test]
    fn test_clear() {
        let mut map = filled(&["a", "b"]);
        map.clear();
        assert!(map.is_empty());
        assert!(map.pop_lru().is_none());
        map.insert("z", 1);
        assert_eq!(map.keys_lru_first(), vec!["z"]);
    }
}
