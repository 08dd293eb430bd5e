//! Disk cache sizing policy.
//!
//! The core does not own the media segment and image tile caches on disk; it
//! resolves how large the host should let them grow.

use core_runtime::settings::{CacheSettings, SettingsHandle};
use serde::{Deserialize, Serialize};

/// On-disk cache the host maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskCacheKind {
    MediaSegments,
    ImageTiles,
}

impl DiskCacheKind {
    pub const ALL: [DiskCacheKind; 2] = [DiskCacheKind::MediaSegments, DiskCacheKind::ImageTiles];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiskCacheKind::MediaSegments => "media_segments",
            DiskCacheKind::ImageTiles => "image_tiles",
        }
    }
}

/// Cache eviction policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Evict least recently used entries first
    #[default]
    LeastRecentlyUsed,
}

impl EvictionPolicy {
    pub fn description(&self) -> &'static str {
        match self {
            EvictionPolicy::LeastRecentlyUsed => "Evict least recently used entries first",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCacheLimit {
    pub kind: DiskCacheKind,
    pub max_bytes: u64,
    pub eviction_policy: EvictionPolicy,
}

/// `available * fraction`, clamped to `[min, max]`.
pub fn clamp_fraction(available_bytes: u64, fraction: f64, min_bytes: u64, max_bytes: u64) -> u64 {
    let share = (available_bytes as f64 * fraction.clamp(0.0, 1.0)).floor() as u64;
    share.clamp(min_bytes, max_bytes.max(min_bytes))
}

/// Resolves disk cache limits from the current cache settings.
#[derive(Clone)]
pub struct DiskCachePolicy {
    settings: SettingsHandle,
}

impl DiskCachePolicy {
    pub fn new(settings: SettingsHandle) -> Self {
        Self { settings }
    }

    pub fn resolve(&self, kind: DiskCacheKind, available_bytes: u64) -> DiskCacheLimit {
        resolve_with(&self.settings.current().cache, kind, available_bytes)
    }

    pub fn resolve_all(&self, available_bytes: u64) -> Vec<DiskCacheLimit> {
        let cache = self.settings.current().cache;
        DiskCacheKind::ALL
            .iter()
            .map(|kind| resolve_with(&cache, *kind, available_bytes))
            .collect()
    }
}

fn resolve_with(settings: &CacheSettings, kind: DiskCacheKind, available_bytes: u64) -> DiskCacheLimit {
    let fraction = match kind {
        DiskCacheKind::MediaSegments => settings.media_disk_fraction,
        DiskCacheKind::ImageTiles => settings.image_disk_fraction,
    };
    DiskCacheLimit {
        kind,
        max_bytes: clamp_fraction(
            available_bytes,
            fraction,
            settings.disk_min_bytes,
            settings.disk_max_bytes,
        ),
        eviction_policy: EvictionPolicy::LeastRecentlyUsed,
    }
}
