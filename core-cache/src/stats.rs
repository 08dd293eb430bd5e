//! Cache statistics and the clearing contract shared by all in-memory caches.

use bridge_traits::MemoryPressureLevel;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Why a cache was emptied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    MemoryPressure(MemoryPressureLevel),
    SignOut,
    Explicit,
}

impl fmt::Display for ClearReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearReason::MemoryPressure(level) => write!(f, "memory_pressure_{}", level.as_str()),
            ClearReason::SignOut => f.write_str("sign_out"),
            ClearReason::Explicit => f.write_str("explicit"),
        }
    }
}

/// In-memory cache that can be emptied on demand.
pub trait ClearableCache: Send + Sync {
    fn cache_name(&self) -> &str;

    /// Drop every entry. Returns the number of entries removed.
    fn clear(&self, reason: ClearReason) -> usize;

    fn stats(&self) -> CacheStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(
            ClearReason::MemoryPressure(MemoryPressureLevel::Critical).to_string(),
            "memory_pressure_critical"
        );
        assert_eq!(ClearReason::SignOut.to_string(), "sign_out");
    }
}
