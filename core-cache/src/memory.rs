//! Bounded in-memory LRU caches.
//!
//! [`MetadataCache`] is bounded by entry count, [`ThumbnailCache`] by the
//! aggregate size of the stored bytes.

use crate::error::{CacheError, Result};
use crate::stats::{CacheStats, ClearReason, ClearableCache};
use bytes::Bytes;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

fn emit_evicted(bus: &Option<EventBus>, cache: &str, entries: u64, bytes: u64) {
    if entries == 0 {
        return;
    }
    debug!(cache, entries, bytes, "cache entries evicted");
    if let Some(bus) = bus {
        let _ = bus.emit(CoreEvent::Cache(CacheEvent::Evicted {
            cache: cache.to_string(),
            entries,
            bytes,
        }));
    }
}

fn emit_cleared(bus: &Option<EventBus>, cache: &str, reason: ClearReason) {
    if let Some(bus) = bus {
        let _ = bus.emit(CoreEvent::Cache(CacheEvent::Cleared {
            cache: cache.to_string(),
            reason: reason.to_string(),
        }));
    }
}

// =============================================================================
// Metadata
// =============================================================================

struct MetadataState<V> {
    entries: LruCache<String, V>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Entry-count bounded LRU.
pub struct MetadataCache<V> {
    name: String,
    state: Mutex<MetadataState<V>>,
    event_bus: Option<EventBus>,
}

fn non_zero(capacity: usize) -> Result<NonZeroUsize> {
    NonZeroUsize::new(capacity)
        .ok_or_else(|| CacheError::InvalidCapacity("capacity must be greater than zero".into()))
}

impl<V: Clone + Send> MetadataCache<V> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            state: Mutex::new(MetadataState {
                entries: LruCache::new(non_zero(capacity)?),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            event_bus: None,
        })
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MetadataState<V>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Value for `key`, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.lock();
        match state.entries.get(key).cloned() {
            Some(value) => {
                state.hits += 1;
                Some(value)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let evicted = {
            let mut state = self.lock();
            match state.entries.push(key.clone(), value) {
                // `push` also returns the old value when the key was present.
                Some((old_key, _)) if old_key != key => {
                    state.evictions += 1;
                    1
                }
                _ => 0,
            }
        };
        emit_evicted(&self.event_bus, &self.name, evicted, 0);
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock().entries.pop(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().entries.cap().get()
    }

    /// Change the entry capacity. Shrinking drops the least recently used
    /// entries immediately; returns how many were dropped.
    pub fn resize(&self, capacity: usize) -> Result<usize> {
        let capacity = non_zero(capacity)?;
        let evicted = {
            let mut state = self.lock();
            let before = state.entries.len();
            state.entries.resize(capacity);
            let evicted = before - state.entries.len();
            state.evictions += evicted as u64;
            evicted
        };
        emit_evicted(&self.event_bus, &self.name, evicted as u64, 0);
        Ok(evicted)
    }
}

impl<V: Clone + Send> ClearableCache for MetadataCache<V> {
    fn cache_name(&self) -> &str {
        &self.name
    }

    fn clear(&self, reason: ClearReason) -> usize {
        let cleared = {
            let mut state = self.lock();
            let n = state.entries.len();
            state.entries.clear();
            n
        };
        debug!(cache = %self.name, cleared, %reason, "cache cleared");
        emit_cleared(&self.event_bus, &self.name, reason);
        cleared
    }

    fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len() as u64,
            bytes: 0,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

// =============================================================================
// Thumbnails
// =============================================================================

struct ThumbnailState {
    entries: LruCache<String, Bytes>,
    used_bytes: u64,
    budget_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl ThumbnailState {
    /// Drop least recently used entries until `incoming` more bytes fit.
    fn evict_to_fit(&mut self, incoming: u64) -> (u64, u64) {
        let mut entries = 0;
        let mut bytes = 0;
        while self.used_bytes + incoming > self.budget_bytes {
            let Some((_, evicted)) = self.entries.pop_lru() else {
                break;
            };
            let size = evicted.len() as u64;
            self.used_bytes -= size;
            entries += 1;
            bytes += size;
        }
        self.evictions += entries;
        (entries, bytes)
    }
}

/// Byte-budget bounded LRU for image bytes.
pub struct ThumbnailCache {
    name: String,
    state: Mutex<ThumbnailState>,
    event_bus: Option<EventBus>,
}

impl ThumbnailCache {
    pub fn new(name: impl Into<String>, budget_bytes: u64) -> Result<Self> {
        if budget_bytes == 0 {
            return Err(CacheError::InvalidCapacity(
                "byte budget must be greater than zero".into(),
            ));
        }
        Ok(Self {
            name: name.into(),
            state: Mutex::new(ThumbnailState {
                entries: LruCache::unbounded(),
                used_bytes: 0,
                budget_bytes,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            event_bus: None,
        })
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn lock(&self) -> MutexGuard<'_, ThumbnailState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let mut state = self.lock();
        match state.entries.get(key).cloned() {
            Some(data) => {
                state.hits += 1;
                Some(data)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Insert `data`, evicting least recently used entries until it fits.
    ///
    /// Data larger than the whole budget is rejected and the cache is left
    /// untouched.
    pub fn put(&self, key: impl Into<String>, data: Bytes) -> Result<()> {
        let key = key.into();
        let size = data.len() as u64;

        let (entries, bytes) = {
            let mut state = self.lock();
            if size > state.budget_bytes {
                return Err(CacheError::EntryTooLarge {
                    size,
                    budget: state.budget_bytes,
                });
            }

            if let Some(previous) = state.entries.pop(&key) {
                state.used_bytes -= previous.len() as u64;
            }
            let evicted = state.evict_to_fit(size);
            state.entries.put(key, data);
            state.used_bytes += size;
            evicted
        };

        emit_evicted(&self.event_bus, &self.name, entries, bytes);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Bytes> {
        let mut state = self.lock();
        let removed = state.entries.pop(key);
        if let Some(data) = &removed {
            state.used_bytes -= data.len() as u64;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate size of the stored bytes; never above the budget.
    pub fn size_bytes(&self) -> u64 {
        self.lock().used_bytes
    }

    pub fn budget_bytes(&self) -> u64 {
        self.lock().budget_bytes
    }

    /// Change the byte budget. Shrinking evicts immediately; returns the
    /// number of entries dropped.
    pub fn set_budget(&self, budget_bytes: u64) -> Result<usize> {
        if budget_bytes == 0 {
            return Err(CacheError::InvalidCapacity(
                "byte budget must be greater than zero".into(),
            ));
        }
        let (entries, bytes) = {
            let mut state = self.lock();
            state.budget_bytes = budget_bytes;
            state.evict_to_fit(0)
        };
        emit_evicted(&self.event_bus, &self.name, entries, bytes);
        Ok(entries as usize)
    }
}

impl ClearableCache for ThumbnailCache {
    fn cache_name(&self) -> &str {
        &self.name
    }

    fn clear(&self, reason: ClearReason) -> usize {
        let cleared = {
            let mut state = self.lock();
            let n = state.entries.len();
            state.entries.clear();
            state.used_bytes = 0;
            n
        };
        debug!(cache = %self.name, cleared, %reason, "cache cleared");
        emit_cleared(&self.event_bus, &self.name, reason);
        cleared
    }

    fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len() as u64,
            bytes: state.used_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}
