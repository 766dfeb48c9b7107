//! Request-coalescing caches
//!
//! Every cache in the resolver is keyed by a URL or lookup string and filled
//! by an async fetch. Concurrent callers asking for the same key share one
//! in-flight initialization; entries live for the process lifetime since
//! package URLs are version-immutable.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

/// Keyed cache whose entries are initialized at most once
#[derive(Debug)]
pub struct CoalescingCache<V> {
    entries: DashMap<String, Arc<OnceCell<V>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<V: Clone> CoalescingCache<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Return the cached value for `key`, running `init` if no caller has
    /// filled it yet. A failed `init` leaves the entry empty.
    pub async fn get_or_try_init<F, Fut, E>(&self, key: &str, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if let Some(value) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value.clone());
        }

        let value = cell
            .get_or_try_init(|| {
                self.misses.fetch_add(1, Ordering::Relaxed);
                init()
            })
            .await?;
        Ok(value.clone())
    }

    /// Cached value, if initialized
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key)?.get().cloned()
    }

    /// Overwrite the entry for `key`
    pub fn set(&self, key: &str, value: V) {
        self.entries
            .insert(key.to_string(), Arc::new(OnceCell::new_with(Some(value))));
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let (_, cell) = self.entries.remove(key)?;
        cell.get().cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total_entries: self.entries.iter().filter(|cell| cell.initialized()).count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone> Default for CoalescingCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Initialized entries
    pub total_entries: usize,
    /// Lookups answered without running an initializer
    pub hits: usize,
    /// Initializers run
    pub misses: usize,
}
