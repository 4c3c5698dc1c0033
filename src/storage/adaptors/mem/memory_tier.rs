//! Volatile tier backed by a concurrent map, optionally bounded by an LRU.

use std::num::NonZeroUsize;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::key;
use crate::storage::tier::sort_ascending;
use crate::Object;
use crate::Result;
use crate::StorageTier;

enum Entries {
    Unbounded(DashMap<String, Object>),
    Bounded(Mutex<LruCache<String, Object>>),
}

pub struct MemoryTier {
    entries: Entries,
    running: AtomicBool,
}

impl std::fmt::Debug for MemoryTier {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MemoryTier")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTier {
    pub fn new() -> Self {
        Self {
            entries: Entries::Unbounded(DashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    /// `capacity == 0` means unbounded.
    pub fn with_capacity(capacity: usize) -> Self {
        match NonZeroUsize::new(capacity) {
            Some(cap) => Self {
                entries: Entries::Bounded(Mutex::new(LruCache::new(cap))),
                running: AtomicBool::new(false),
            },
            None => Self::new(),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        match &self.entries {
            Entries::Unbounded(_) => None,
            Entries::Bounded(cache) => Some(cache.lock().cap().get()),
        }
    }

    pub fn len(&self) -> usize {
        match &self.entries {
            Entries::Unbounded(map) => map.len(),
            Entries::Bounded(cache) => cache.lock().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn start(&self) -> Result<()> {
        debug!("start memory tier");
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        debug!("close memory tier");
        self.running.store(false, Ordering::Release);
        self.clear()
    }

    fn active(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn get(
        &self,
        key: &str,
    ) -> Result<Option<Object>> {
        Ok(match &self.entries {
            Entries::Unbounded(map) => map.get(key).map(|entry| entry.value().clone()),
            Entries::Bounded(cache) => cache.lock().get(key).cloned(),
        })
    }

    fn get_list(
        &self,
        pattern: &str,
    ) -> Result<Vec<Object>> {
        let mut objects: Vec<Object> = match &self.entries {
            Entries::Unbounded(map) => map
                .iter()
                .filter(|entry| key::matches(pattern, entry.key()))
                .map(|entry| entry.value().clone())
                .collect(),
            Entries::Bounded(cache) => cache
                .lock()
                .iter()
                .filter(|(k, _)| key::matches(pattern, k))
                .map(|(_, v)| v.clone())
                .collect(),
        };
        sort_ascending(&mut objects);
        Ok(objects)
    }

    fn set(
        &self,
        key: &str,
        object: Object,
    ) -> Result<()> {
        match &self.entries {
            Entries::Unbounded(map) => {
                map.insert(key.to_string(), object);
            }
            Entries::Bounded(cache) => {
                if let Some((evicted, _)) = cache.lock().push(key.to_string(), object) {
                    if evicted != key {
                        debug!(%evicted, "memory tier evicted least recently used object");
                    }
                }
            }
        }
        Ok(())
    }

    fn del(
        &self,
        key: &str,
    ) -> Result<bool> {
        Ok(match &self.entries {
            Entries::Unbounded(map) => map.remove(key).is_some(),
            Entries::Bounded(cache) => cache.lock().pop(key).is_some(),
        })
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(match &self.entries {
            Entries::Unbounded(map) => map.iter().map(|entry| entry.key().clone()).collect(),
            Entries::Bounded(cache) => cache.lock().iter().map(|(k, _)| k.clone()).collect(),
        })
    }

    fn clear(&self) -> Result<()> {
        match &self.entries {
            Entries::Unbounded(map) => map.clear(),
            Entries::Bounded(cache) => cache.lock().clear(),
        }
        Ok(())
    }
}
