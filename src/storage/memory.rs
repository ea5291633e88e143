//! An in-process counter store.
//!
//! Each key owns its own atomic integer, so increments on different keys
//! never touch the same memory. The map lock is only taken to find (or
//! create) a key's counter, never during the increment itself.

use std::{
    collections::HashMap,
    num::NonZeroU64,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::storage::{CounterKey, CounterStore, StoreError};

/// Counters held in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: RwLock<HashMap<CounterKey, Arc<AtomicU64>>>,
}

impl MemoryCounterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current value of a counter, e.g. when importing existing
    /// sequences. The next increment returns `value + 1`.
    pub fn seed(&self, key: CounterKey, value: u64) {
        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        counters.insert(key, Arc::new(AtomicU64::new(value)));
    }

    fn counter(&self, key: &CounterKey) -> Arc<AtomicU64> {
        {
            let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(counter) = counters.get(key) {
                return Arc::clone(counter);
            }
        }
        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(counters.entry(key.clone()).or_default())
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(&self, key: &CounterKey) -> Result<NonZeroU64, StoreError> {
        let previous = self
            .counter(key)
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
            .map_err(|_| StoreError::Overflow(key.clone()))?;
        NonZeroU64::new(previous + 1).ok_or_else(|| StoreError::Overflow(key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, thread};

    use super::*;
    use crate::domain::{IdentifierKind, Scope};

    fn key(scope: &str, kind: IdentifierKind) -> CounterKey {
        CounterKey::new(Scope::try_from(scope).unwrap(), kind)
    }

    #[test]
    fn first_increment_returns_one() {
        let store = MemoryCounterStore::new();
        let key = key("lab1", IdentifierKind::Sample);
        assert_eq!(store.increment(&key).unwrap().get(), 1);
        assert_eq!(store.increment(&key).unwrap().get(), 2);
    }

    #[test]
    fn keys_are_independent() {
        let store = MemoryCounterStore::new();
        let sample = key("lab1", IdentifierKind::Sample);
        let report = key("lab1", IdentifierKind::Report);
        let other_lab = key("lab2", IdentifierKind::Sample);

        store.increment(&sample).unwrap();
        store.increment(&sample).unwrap();

        assert_eq!(store.increment(&report).unwrap().get(), 1);
        assert_eq!(store.increment(&other_lab).unwrap().get(), 1);
        assert_eq!(store.increment(&sample).unwrap().get(), 3);
    }

    #[test]
    fn seeded_counter_continues() {
        let store = MemoryCounterStore::new();
        let key = key("lab1", IdentifierKind::Invoice);
        store.seed(key.clone(), 41);
        assert_eq!(store.increment(&key).unwrap().get(), 42);
    }

    #[test]
    fn overflow_is_an_error() {
        let store = MemoryCounterStore::new();
        let key = key("lab1", IdentifierKind::Patient);
        store.seed(key.clone(), u64::MAX);
        assert!(matches!(
            store.increment(&key),
            Err(StoreError::Overflow(_))
        ));
    }

    #[test]
    fn concurrent_increments_are_unique() {
        let store = MemoryCounterStore::new();
        let key = key("lab1", IdentifierKind::Sample);

        let values: Vec<u64> = thread::scope(|s| {
            let handles: Vec<_> = (0..100)
                .map(|_| s.spawn(|| store.increment(&key).unwrap().get()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let distinct: HashSet<_> = values.iter().copied().collect();
        assert_eq!(distinct.len(), 100);
        assert_eq!(distinct, (1..=100).collect());
    }
}
