//! Bounded in-memory working set
//!
//! Recency-ordered map of the last few fully materialized sessions. Front of
//! the deque is least recently used. Capacities are tiny (ten sessions), so
//! linear scans beat any hashing overhead and keep the ordering obvious.
//!
//! No TTL: contents live exactly as long as the owning controller.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct WorkingSet<K, V> {
    capacity: usize,
    entries: VecDeque<(K, V)>,
}

impl<K: PartialEq, V> WorkingSet<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1) + 1),
        }
    }

    /// Insert or replace as most recently used
    ///
    /// Returns the evicted least-recently-used entry, if capacity was exceeded.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(index) = self.position(&key) {
            self.entries.remove(index);
        }
        self.entries.push_back((key, value));

        if self.entries.len() > self.capacity {
            return self.entries.pop_front();
        }
        None
    }

    /// Look up and mark as most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let index = self.position(key)?;
        let entry = self.entries.remove(index)?;
        self.entries.push_back(entry);
        self.entries.back().map(|(_, v)| v)
    }

    /// Look up without touching recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let index = self.position(key)?;
        self.entries.remove(index).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.position(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from least to most recently used
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn position(&self, key: &K) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: usize) -> WorkingSet<String, usize> {
        let mut set = WorkingSet::new(10);
        for i in 0..n {
            set.insert(format!("s{}", i), i);
        }
        set
    }

    #[test]
    fn test_eleventh_insert_evicts_least_recent() {
        let mut set = filled(10);

        let evicted = set.insert("s10".to_string(), 10);

        assert_eq!(evicted, Some(("s0".to_string(), 0)));
        assert_eq!(set.len(), 10);
        assert!(!set.contains(&"s0".to_string()));
    }

    #[test]
    fn test_get_refreshes_recency() {
        let mut set = filled(10);

        assert_eq!(set.get(&"s0".to_string()), Some(&0));
        let evicted = set.insert("s10".to_string(), 10);

        assert_eq!(evicted.map(|(k, _)| k), Some("s1".to_string()));
        assert!(set.contains(&"s0".to_string()));
    }

    #[test]
    fn test_peek_does_not_refresh() {
        let mut set = filled(10);

        assert_eq!(set.peek(&"s0".to_string()), Some(&0));
        let evicted = set.insert("s10".to_string(), 10);

        assert_eq!(evicted.map(|(k, _)| k), Some("s0".to_string()));
    }

    #[test]
    fn test_reinsert_replaces_without_duplicate() {
        let mut set = filled(3);

        assert!(set.insert("s0".to_string(), 100).is_none());

        assert_eq!(set.len(), 3);
        assert_eq!(set.peek(&"s0".to_string()), Some(&100));
        let order: Vec<_> = set.keys().cloned().collect();
        assert_eq!(order, vec!["s1", "s2", "s0"]);
    }

    #[test]
    fn test_remove() {
        let mut set = filled(2);
        assert_eq!(set.remove(&"s1".to_string()), Some(1));
        assert_eq!(set.remove(&"s1".to_string()), None);
        assert_eq!(set.len(), 1);
    }
}
