use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use tracing::debug;
use crate::core::error::Result;
use crate::table::table::Table;

pub type EvictionCallback = Box<dyn Fn(&str, &Arc<Table>) + Send + Sync>;

/// LRU registry of live tables.
///
/// Entries leave through LRU eviction, `invalidate` or `clear`. Each time,
/// the eviction callback runs first; then, if the cache held the last
/// reference, the table is disposed.
pub struct TableCache {
    cache: Mutex<LruCache<String, Arc<Table>>>,
    size_limit: usize,
    on_evict: Option<EvictionCallback>,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
    eviction_count: AtomicUsize,
}

impl TableCache {
    pub fn new(size_limit: usize) -> Self {
        let cap = NonZeroUsize::new(size_limit).unwrap_or(NonZeroUsize::MIN);
        TableCache {
            cache: Mutex::new(LruCache::new(cap)),
            size_limit: cap.get(),
            on_evict: None,
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
            eviction_count: AtomicUsize::new(0),
        }
    }

    pub fn with_eviction_callback(mut self, callback: impl Fn(&str, &Arc<Table>) + Send + Sync + 'static) -> Self {
        self.on_evict = Some(Box::new(callback));
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<Table>> {
        let found = self.cache.lock().get(key).cloned();
        match &found {
            Some(_) => self.hit_count.fetch_add(1, Ordering::Relaxed),
            None => self.miss_count.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Cache `table` under `key`. A displaced entry (same key or least
    /// recently used) is released.
    pub fn insert(&self, key: impl Into<String>, table: Arc<Table>) {
        let key = key.into();
        let displaced = self.cache.lock().push(key.clone(), table);
        // push() also hands back the value it replaced under the same key
        if let Some((old_key, old)) = displaced {
            let reinserted = old_key == key && self.peek(&key).is_some_and(|t| Arc::ptr_eq(&t, &old));
            if !reinserted {
                self.release(&old_key, old);
            }
        }
    }

    /// Cached table for `key`, or the one built by `load` (then cached).
    pub fn get_or_load(&self, key: &str, load: impl FnOnce() -> Result<Table>) -> Result<Arc<Table>> {
        if let Some(table) = self.get(key) {
            return Ok(table);
        }
        let table = Arc::new(load()?);
        self.insert(key, Arc::clone(&table));
        Ok(table)
    }

    fn peek(&self, key: &str) -> Option<Arc<Table>> {
        self.cache.lock().peek(key).cloned()
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.cache.lock().pop(key);
        match removed {
            Some(table) => {
                self.release(key, table);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let drained: Vec<(String, Arc<Table>)> = {
            let mut cache = self.cache.lock();
            let mut drained = Vec::with_capacity(cache.len());
            while let Some(entry) = cache.pop_lru() {
                drained.push(entry);
            }
            drained
        };
        for (key, table) in drained {
            self.release(&key, table);
        }
    }

    // Runs with the cache lock released; the callback may call back in.
    fn release(&self, key: &str, table: Arc<Table>) {
        self.eviction_count.fetch_add(1, Ordering::Relaxed);
        if let Some(callback) = &self.on_evict {
            callback(key, &table);
        }
        if Arc::strong_count(&table) == 1 {
            debug!(key, "disposing evicted table");
            table.dispose();
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
            size: self.len(),
            capacity: self.size_limit,
        }
    }
}

impl Drop for TableCache {
    fn drop(&mut self) {
        self.clear();
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub eviction_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}
