//! In-memory window cache in front of the grid projection repository.

use crate::error::Result;
use crate::stats::{CacheStats, ClearReason, ClearableCache};
use core_library::{AlphaIndexEntry, GridProjectionRepository, GridRow, ScopeMeta};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, instrument};

const DEFAULT_WINDOWS_PER_SCOPE: usize = 32;

#[derive(Default)]
struct GridState {
    scopes: HashMap<String, LruCache<(i64, i64), Vec<GridRow>>>,
    /// Bumped on every invalidation so loads started earlier are not stored.
    generation: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl GridState {
    fn entry_count(&self) -> usize {
        self.scopes.values().map(LruCache::len).sum()
    }
}

pub struct GridWindowCache {
    repository: Arc<dyn GridProjectionRepository>,
    state: Mutex<GridState>,
    windows_per_scope: NonZeroUsize,
    event_bus: Option<EventBus>,
}

impl GridWindowCache {
    pub const NAME: &'static str = "grid_windows";

    pub fn new(repository: Arc<dyn GridProjectionRepository>) -> Self {
        Self {
            repository,
            state: Mutex::new(GridState::default()),
            windows_per_scope: NonZeroUsize::new(DEFAULT_WINDOWS_PER_SCOPE)
                .unwrap_or(NonZeroUsize::MIN),
            event_bus: None,
        }
    }

    /// Distinct windows kept per scope; the least recently read is evicted.
    pub fn with_windows_per_scope(mut self, windows: NonZeroUsize) -> Self {
        self.windows_per_scope = windows;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn lock(&self) -> MutexGuard<'_, GridState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rows with `start <= sort_index <= end`, served from memory when the
    /// same window was read since the scope was last replaced.
    pub async fn get_window(&self, scope_key: &str, start: i64, end: i64) -> Result<Vec<GridRow>> {
        let generation = {
            let mut state = self.lock();
            let cached = state
                .scopes
                .get_mut(scope_key)
                .and_then(|windows| windows.get(&(start, end)).cloned());
            if let Some(rows) = cached {
                state.hits += 1;
                return Ok(rows);
            }
            state.misses += 1;
            state.generation
        };

        let rows = self.repository.get_window(scope_key, start, end).await?;

        let mut state = self.lock();
        if state.generation == generation {
            let capacity = self.windows_per_scope;
            let windows = state
                .scopes
                .entry(scope_key.to_string())
                .or_insert_with(|| LruCache::new(capacity));
            let evicted = match windows.push((start, end), rows.clone()) {
                Some((old, _)) if old != (start, end) => 1,
                _ => 0,
            };
            state.evictions += evicted;
        }
        Ok(rows)
    }

    /// Replace the projection of `scope_key` and drop its cached windows.
    #[instrument(skip(self, rows, alpha_index), fields(rows = rows.len()))]
    pub async fn replace_index(
        &self,
        scope_key: &str,
        rows: &[GridRow],
        alpha_index: &[AlphaIndexEntry],
        total_count: i64,
    ) -> Result<()> {
        self.repository
            .replace_index(scope_key, rows, alpha_index, total_count)
            .await?;
        self.invalidate_scope(scope_key);

        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Cache(CacheEvent::GridScopeReplaced {
                scope_key: scope_key.to_string(),
                total_count: total_count.max(0) as u64,
            }));
        }
        Ok(())
    }

    /// Drop cached windows of `scope_key`. Returns how many were dropped.
    pub fn invalidate_scope(&self, scope_key: &str) -> usize {
        let mut state = self.lock();
        state.generation += 1;
        let dropped = state
            .scopes
            .remove(scope_key)
            .map(|windows| windows.len())
            .unwrap_or(0);
        debug!(scope_key, dropped, "grid windows invalidated");
        dropped
    }

    pub async fn alpha_index(&self, scope_key: &str) -> Result<Vec<AlphaIndexEntry>> {
        Ok(self.repository.alpha_index(scope_key).await?)
    }

    pub async fn offset_for_letter(&self, scope_key: &str, letter: &str) -> Result<Option<i64>> {
        Ok(self.repository.offset_for_letter(scope_key, letter).await?)
    }

    pub async fn scope_meta(&self, scope_key: &str) -> Result<Option<ScopeMeta>> {
        Ok(self.repository.scope_meta(scope_key).await?)
    }

    pub async fn delete_scope(&self, scope_key: &str) -> Result<()> {
        self.repository.delete_scope(scope_key).await?;
        self.invalidate_scope(scope_key);
        Ok(())
    }
}

impl ClearableCache for GridWindowCache {
    fn cache_name(&self) -> &str {
        Self::NAME
    }

    fn clear(&self, reason: ClearReason) -> usize {
        let cleared = {
            let mut state = self.lock();
            let n = state.entry_count();
            state.generation += 1;
            state.scopes.clear();
            n
        };
        debug!(cleared, %reason, "grid window cache cleared");
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Cache(CacheEvent::Cleared {
                cache: Self::NAME.to_string(),
                reason: reason.to_string(),
            }));
        }
        cleared
    }

    fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entry_count() as u64,
            bytes: 0,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}
