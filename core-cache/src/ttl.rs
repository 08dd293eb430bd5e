//! TTL memo cache for remote call results.
//!
//! Both successes and errors are memoized; `Loading` never is. Concurrent
//! misses on the same key each run their own loader.

use crate::stats::{CacheStats, ClearReason, ClearableCache};
use bridge_traits::Clock;
use chrono::{DateTime, Utc};
use core_request::RemoteCallResult;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace};

/// Stored value with its insertion time.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub inserted_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, inserted_at: DateTime<Utc>) -> Self {
        Self { value, inserted_at }
    }

    /// Expired once `now - inserted_at >= ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age_ms = now.signed_duration_since(self.inserted_at).num_milliseconds();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        age_ms >= ttl_ms
    }
}

struct Slot<V> {
    entry: CacheEntry<RemoteCallResult<V>>,
    ttl: Duration,
}

struct TtlState<V> {
    slots: HashMap<String, Slot<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct TtlCache<V> {
    name: String,
    clock: Arc<dyn Clock>,
    state: Mutex<TtlState<V>>,
    event_bus: Option<EventBus>,
}

impl<V: Clone + Send> TtlCache<V> {
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            clock,
            state: Mutex::new(TtlState {
                slots: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TtlState<V>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stored result for `key`, or the loader's result on miss or expiry.
    pub async fn get_or_load<F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> RemoteCallResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RemoteCallResult<V>>,
    {
        if let Some(hit) = self.lookup(key) {
            trace!(cache = %self.name, key, "memo hit");
            return hit;
        }

        let result = loader().await;
        if !result.is_loading() {
            let entry = CacheEntry::new(result.clone(), self.clock.now());
            self.lock().slots.insert(key.to_string(), Slot { entry, ttl });
        }
        result
    }

    fn lookup(&self, key: &str) -> Option<RemoteCallResult<V>> {
        let now = self.clock.now();
        let mut state = self.lock();

        let fresh = match state.slots.get(key) {
            Some(slot) if !slot.entry.is_expired(now, slot.ttl) => Some(slot.entry.value.clone()),
            Some(_) => {
                state.slots.remove(key);
                state.evictions += 1;
                None
            }
            None => None,
        };

        match fresh {
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

    /// Unexpired stored result, without counting a hit or miss.
    pub fn peek(&self, key: &str) -> Option<RemoteCallResult<V>> {
        let now = self.clock.now();
        self.lock()
            .slots
            .get(key)
            .filter(|slot| !slot.entry.is_expired(now, slot.ttl))
            .map(|slot| slot.entry.value.clone())
    }

    /// Drop `key` so the next `get_or_load` invokes its loader.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.lock().slots.remove(key).is_some();
        if removed {
            debug!(cache = %self.name, key, "memo entry invalidated");
            if let Some(bus) = &self.event_bus {
                let _ = bus.emit(CoreEvent::Cache(CacheEvent::Invalidated {
                    cache: self.name.clone(),
                    key: key.to_string(),
                }));
            }
        }
        removed
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let before = state.slots.len();
        state.slots.retain(|_, slot| !slot.entry.is_expired(now, slot.ttl));
        let purged = before - state.slots.len();
        state.evictions += purged as u64;
        purged
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone + Send> ClearableCache for TtlCache<V> {
    fn cache_name(&self) -> &str {
        &self.name
    }

    fn clear(&self, reason: ClearReason) -> usize {
        let cleared = {
            let mut state = self.lock();
            let n = state.slots.len();
            state.slots.clear();
            n
        };
        debug!(cache = %self.name, cleared, %reason, "memo cache cleared");
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Cache(CacheEvent::Cleared {
                cache: self.name.clone(),
                reason: reason.to_string(),
            }));
        }
        cleared
    }

    fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.slots.len() as u64,
            bytes: 0,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ManualClock;
    use chrono::TimeZone;
    use core_request::{ErrorKind, RemoteError};
    use std::sync::atomic::{AtomicU32, Ordering};

    const TTL: Duration = Duration::from_millis(60_000);

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
    }

    async fn load(cache: &TtlCache<u32>, calls: &AtomicU32) -> RemoteCallResult<u32> {
        cache
            .get_or_load("k", TTL, || async {
                RemoteCallResult::Success(calls.fetch_add(1, Ordering::SeqCst) + 1)
            })
            .await
    }

    #[test]
    fn test_entry_expiry_boundary() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let entry = CacheEntry::new(1, t0);
        let ttl = Duration::from_secs(10);
        assert!(!entry.is_expired(t0 + chrono::Duration::milliseconds(9_999), ttl));
        assert!(entry.is_expired(t0 + chrono::Duration::seconds(10), ttl));
    }

    #[tokio::test]
    async fn test_hit_within_ttl_and_reload_after() {
        let clock = clock();
        let cache = TtlCache::new("memo", clock.clone());
        let calls = AtomicU32::new(0);

        assert_eq!(load(&cache, &calls).await, RemoteCallResult::Success(1));

        clock.advance(TTL - Duration::from_millis(1));
        assert_eq!(load(&cache, &calls).await, RemoteCallResult::Success(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_millis(2));
        assert_eq!(load(&cache, &calls).await, RemoteCallResult::Success(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let cache = TtlCache::new("memo", clock());
        let calls = AtomicU32::new(0);

        load(&cache, &calls).await;
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
        assert_eq!(load(&cache, &calls).await, RemoteCallResult::Success(2));
    }

    #[tokio::test]
    async fn test_errors_are_memoized_loading_is_not() {
        let cache: TtlCache<u32> = TtlCache::new("memo", clock());

        let err = RemoteError::new(ErrorKind::Network, "offline");
        let first = cache
            .get_or_load("e", TTL, || async { RemoteCallResult::Error(err.clone()) })
            .await;
        assert!(first.is_error());
        let again = cache
            .get_or_load("e", TTL, || async { RemoteCallResult::Success(7) })
            .await;
        assert_eq!(again, RemoteCallResult::Error(err));

        let loading = cache
            .get_or_load("l", TTL, || async { RemoteCallResult::Loading })
            .await;
        assert!(loading.is_loading());
        assert!(cache.peek("l").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_and_purge() {
        let clock = clock();
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let cache = TtlCache::new("memo", clock.clone()).with_event_bus(bus);

        cache
            .get_or_load("short", Duration::from_secs(1), || async { RemoteCallResult::Success(1) })
            .await;
        cache
            .get_or_load("long", TTL, || async { RemoteCallResult::Success(2) })
            .await;

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.clear(ClearReason::Explicit), 1);
        assert!(cache.is_empty());

        match rx.recv().await.unwrap() {
            CoreEvent::Cache(CacheEvent::Cleared { cache, reason }) => {
                assert_eq!(cache, "memo");
                assert_eq!(reason, "explicit");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
