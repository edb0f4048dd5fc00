use std::cell::Cell;
use std::collections::HashMap;
use std::hash::Hash;

/// Memoization table for decision-diagram operations.
///
/// Backed by a [`HashMap`], so lookups never collide and the table resizes on
/// its own. Hit/miss counters use interior mutability so that read-only
/// lookups work through a shared borrow of the manager.
pub struct OpCache<K, V> {
    map: HashMap<K, V>,
    hits: Cell<usize>,
    misses: Cell<usize>,
}

impl<K, V> Default for OpCache<K, V> {
    fn default() -> Self {
        Self::with_capacity(1 << 14)
    }
}

impl<K, V> OpCache<K, V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits.get()
    }

    pub fn misses(&self) -> usize {
        self.misses.get()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

impl<K: Eq + Hash, V> OpCache<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        let result = self.map.get(key);
        match result {
            Some(_) => self.hits.set(self.hits.get() + 1),
            None => self.misses.set(self.misses.get() + 1),
        }
        result
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.map.insert(key, value);
    }
}
