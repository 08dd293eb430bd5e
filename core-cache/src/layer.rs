//! Cache layer owning the shared LRUs and routing memory pressure.

use crate::error::Result;
use crate::grid::GridWindowCache;
use crate::memory::{MetadataCache, ThumbnailCache};
use crate::stats::{CacheStats, ClearReason, ClearableCache};
use bridge_traits::{ItemDetail, MemoryPressureLevel};
use core_runtime::events::EventBus;
use core_runtime::settings::CacheSettings;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::info;

pub struct CacheLayer {
    metadata: Arc<MetadataCache<ItemDetail>>,
    thumbnails: Arc<ThumbnailCache>,
    memos: RwLock<Vec<Arc<dyn ClearableCache>>>,
    grid: Option<Arc<GridWindowCache>>,
    memo_ttl: RwLock<Duration>,
}

impl CacheLayer {
    pub const METADATA: &'static str = "metadata";
    pub const THUMBNAILS: &'static str = "thumbnails";

    pub fn new(settings: &CacheSettings, event_bus: Option<EventBus>) -> Result<Self> {
        let mut metadata = MetadataCache::new(Self::METADATA, settings.metadata_capacity)?;
        let mut thumbnails = ThumbnailCache::new(Self::THUMBNAILS, settings.thumbnail_budget_bytes)?;
        if let Some(bus) = event_bus {
            metadata = metadata.with_event_bus(bus.clone());
            thumbnails = thumbnails.with_event_bus(bus);
        }

        Ok(Self {
            metadata: Arc::new(metadata),
            thumbnails: Arc::new(thumbnails),
            memos: RwLock::new(Vec::new()),
            grid: None,
            memo_ttl: RwLock::new(settings.memo_ttl()),
        })
    }

    pub fn with_grid(mut self, grid: Arc<GridWindowCache>) -> Self {
        self.grid = Some(grid);
        self
    }

    pub fn metadata(&self) -> &Arc<MetadataCache<ItemDetail>> {
        &self.metadata
    }

    pub fn thumbnails(&self) -> &Arc<ThumbnailCache> {
        &self.thumbnails
    }

    pub fn grid(&self) -> Option<&Arc<GridWindowCache>> {
        self.grid.as_ref()
    }

    /// TTL memo caches are created by their owners and registered here so
    /// critical memory pressure reaches them.
    pub fn register_memo(&self, cache: Arc<dyn ClearableCache>) {
        self.memos
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(cache);
    }

    /// Default TTL for memoized remote results.
    pub fn memo_ttl(&self) -> Duration {
        *self.memo_ttl.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Clear caches for `level`. Returns the number of entries dropped.
    ///
    /// `Moderate` clears the LRUs; `Critical` also clears every registered
    /// memo cache and the grid window cache.
    pub fn handle_memory_pressure(&self, level: MemoryPressureLevel) -> usize {
        let reason = ClearReason::MemoryPressure(level);
        let mut cleared = self.metadata.clear(reason) + self.thumbnails.clear(reason);

        if level == MemoryPressureLevel::Critical {
            for memo in self.memos.read().unwrap_or_else(|e| e.into_inner()).iter() {
                cleared += memo.clear(reason);
            }
            if let Some(grid) = &self.grid {
                cleared += grid.clear(reason);
            }
        }

        info!(level = level.as_str(), cleared, "memory pressure handled");
        cleared
    }

    /// Drop everything, e.g. on sign-out.
    pub fn clear_all(&self, reason: ClearReason) -> usize {
        let mut cleared = self.metadata.clear(reason) + self.thumbnails.clear(reason);
        for memo in self.memos.read().unwrap_or_else(|e| e.into_inner()).iter() {
            cleared += memo.clear(reason);
        }
        if let Some(grid) = &self.grid {
            cleared += grid.clear(reason);
        }
        cleared
    }

    /// Apply new cache settings to the live caches.
    pub fn apply_settings(&self, settings: &CacheSettings) -> Result<()> {
        if self.metadata.capacity() != settings.metadata_capacity {
            self.metadata.resize(settings.metadata_capacity)?;
        }
        if self.thumbnails.budget_bytes() != settings.thumbnail_budget_bytes {
            self.thumbnails.set_budget(settings.thumbnail_budget_bytes)?;
        }
        *self.memo_ttl.write().unwrap_or_else(|e| e.into_inner()) = settings.memo_ttl();
        Ok(())
    }

    /// Statistics of every cache, keyed by cache name.
    pub fn stats(&self) -> BTreeMap<String, CacheStats> {
        let mut all = BTreeMap::new();
        all.insert(Self::METADATA.to_string(), self.metadata.stats());
        all.insert(Self::THUMBNAILS.to_string(), self.thumbnails.stats());
        for memo in self.memos.read().unwrap_or_else(|e| e.into_inner()).iter() {
            all.insert(memo.cache_name().to_string(), memo.stats());
        }
        if let Some(grid) = &self.grid {
            all.insert(grid.cache_name().to_string(), grid.stats());
        }
        all
    }
}
