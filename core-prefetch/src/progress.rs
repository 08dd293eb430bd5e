//! Prefetch run bookkeeping.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What started a prefetch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrefetchTrigger {
    /// New continue-watching list observed by the UI.
    ContinueWatching,
    /// Host background task.
    Scheduled,
}

impl PrefetchTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrefetchTrigger::ContinueWatching => "continue_watching",
            PrefetchTrigger::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for PrefetchTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gate that kept a run from starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    Disabled,
    Offline,
    /// Wi-Fi only is set and the connection is not Wi-Fi or wired.
    NotOnWifi,
    NoSession,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::Offline => "offline",
            SkipReason::NotOnWifi => "not_on_wifi",
            SkipReason::NoSession => "no_session",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one prefetch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchProgress {
    /// Items selected for this run.
    pub total: usize,

    /// Items whose metadata was written to the cache.
    pub items: usize,

    /// Items cached from the list summary because the full fetch failed.
    pub fallbacks: usize,

    /// Thumbnails stored.
    pub images: usize,

    /// Image fetches, thumbnail writes and item store writes that failed.
    pub failures: usize,

    /// Run stopped at a cancellation check.
    pub cancelled: bool,
}

impl PrefetchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn percent_complete(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.items as f64 / self.total as f64) * 100.0).min(100.0) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOutcome {
    Completed(PrefetchProgress),
    Skipped(SkipReason),
}

impl PrefetchOutcome {
    pub fn progress(&self) -> Option<&PrefetchProgress> {
        match self {
            PrefetchOutcome::Completed(progress) => Some(progress),
            PrefetchOutcome::Skipped(_) => None,
        }
    }
}
