//! Memory pressure signal forwarded by the host (`onTrimMemory`,
//! `didReceiveMemoryWarning`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemoryPressureLevel {
    /// Drop in-memory LRU caches.
    Moderate,
    /// Drop every in-memory cache the core holds.
    Critical,
}

impl MemoryPressureLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryPressureLevel::Moderate => "moderate",
            MemoryPressureLevel::Critical => "critical",
        }
    }
}
