//! Runtime-adjustable settings.
//!
//! Components read the current snapshot whenever they make a decision (retry
//! budget, cache capacity, prefetch gates), so updates take effect without a
//! restart. Components that must react to a change (LRU resizing) subscribe
//! to the underlying `watch` channel.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per call, first attempt included.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Entry capacity of the metadata LRU.
    pub metadata_capacity: usize,
    /// Aggregate byte budget of the thumbnail LRU.
    pub thumbnail_budget_bytes: u64,
    /// Default TTL for memoized remote results.
    pub memo_ttl_ms: u64,
    /// Share of available storage granted to the media segment cache.
    pub media_disk_fraction: f64,
    /// Share of available storage granted to the image tile cache.
    pub image_disk_fraction: f64,
    pub disk_min_bytes: u64,
    pub disk_max_bytes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            metadata_capacity: 256,
            thumbnail_budget_bytes: 32 * 1024 * 1024,
            memo_ttl_ms: 60_000,
            media_disk_fraction: 0.10,
            image_disk_fraction: 0.02,
            disk_min_bytes: 64 * 1024 * 1024,
            disk_max_bytes: 4 * 1024 * 1024 * 1024,
        }
    }
}

impl CacheSettings {
    pub fn memo_ttl(&self) -> Duration {
        Duration::from_millis(self.memo_ttl_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefetchSettings {
    pub enabled: bool,
    pub wifi_only: bool,
    /// Upper bound on items fetched per run.
    pub max_items: usize,
    pub image_max_width: u32,
    /// Interval of the scheduled prefetch job.
    pub job_interval_secs: u64,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            wifi_only: true,
            max_items: 10,
            image_max_width: 400,
            job_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Period of the mutation queue drain timer.
    pub drain_interval_secs: u64,
}

impl SyncSettings {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            drain_interval_secs: 300,
        }
    }
}

/// Complete set of runtime-adjustable settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub prefetch: PrefetchSettings,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl RuntimeSettings {
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.retry.max_attempts) {
            return Err(Error::setting("retry.max_attempts", "must be between 1 and 10"));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(Error::setting("reconnect.base_delay_ms", "must be positive"));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(Error::setting(
                "reconnect.max_delay_ms",
                "must not be below the base delay",
            ));
        }
        if self.cache.metadata_capacity == 0 {
            return Err(Error::setting("cache.metadata_capacity", "must be positive"));
        }
        if self.cache.thumbnail_budget_bytes == 0 {
            return Err(Error::setting("cache.thumbnail_budget_bytes", "must be positive"));
        }
        for (setting, fraction) in [
            ("cache.media_disk_fraction", self.cache.media_disk_fraction),
            ("cache.image_disk_fraction", self.cache.image_disk_fraction),
        ] {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(Error::setting(setting, format!("{fraction} is outside (0, 1]")));
            }
        }
        if self.cache.disk_min_bytes > self.cache.disk_max_bytes {
            return Err(Error::setting("cache.disk_min_bytes", "exceeds cache.disk_max_bytes"));
        }
        if self.sync.drain_interval_secs == 0 {
            return Err(Error::setting("sync.drain_interval_secs", "must be positive"));
        }
        if self.prefetch.job_interval_secs == 0 {
            return Err(Error::setting("prefetch.job_interval_secs", "must be positive"));
        }
        Ok(())
    }
}

/// Shared handle to the live settings.
#[derive(Clone)]
pub struct SettingsHandle {
    sender: Arc<watch::Sender<RuntimeSettings>>,
}

impl SettingsHandle {
    pub fn new(initial: RuntimeSettings) -> Result<Self> {
        initial.validate()?;
        let (sender, _) = watch::channel(initial);
        Ok(Self {
            sender: Arc::new(sender),
        })
    }

    /// Current snapshot.
    pub fn current(&self) -> RuntimeSettings {
        self.sender.borrow().clone()
    }

    /// Apply a change. Invalid results are rejected and the live settings
    /// stay untouched.
    pub fn update<F>(&self, change: F) -> Result<RuntimeSettings>
    where
        F: FnOnce(&mut RuntimeSettings),
    {
        let mut next = self.current();
        change(&mut next);
        next.validate()?;
        self.sender.send_replace(next.clone());
        Ok(next)
    }

    pub fn subscribe(&self) -> watch::Receiver<RuntimeSettings> {
        self.sender.subscribe()
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        let (sender, _) = watch::channel(RuntimeSettings::default());
        Self {
            sender: Arc::new(sender),
        }
    }
}

impl std::fmt::Debug for SettingsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SettingsHandle")
            .field(&*self.sender.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = RuntimeSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.base_delay(), Duration::from_millis(1000));
        assert_eq!(settings.reconnect.max_delay_ms, 30_000);
    }

    #[test]
    fn test_update_rejects_invalid_and_keeps_previous() {
        let handle = SettingsHandle::default();
        let err = handle.update(|s| s.retry.max_attempts = 0);
        assert!(err.is_err());
        assert_eq!(handle.current().retry.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_subscribers_observe_updates() {
        let handle = SettingsHandle::default();
        let mut rx = handle.subscribe();

        handle
            .update(|s| {
                s.prefetch.wifi_only = false;
                s.cache.metadata_capacity = 32;
            })
            .unwrap();

        rx.changed().await.unwrap();
        let seen = rx.borrow().clone();
        assert!(!seen.prefetch.wifi_only);
        assert_eq!(seen.cache.metadata_capacity, 32);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: RuntimeSettings =
            serde_json::from_str(r#"{ "retry": { "max_attempts": 5, "base_delay_ms": 200 } }"#)
                .unwrap();
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.cache, CacheSettings::default());
    }

    #[test]
    fn test_disk_fraction_bounds() {
        let mut settings = RuntimeSettings::default();
        settings.cache.media_disk_fraction = 1.5;
        match settings.validate() {
            Err(Error::InvalidSetting { setting, .. }) => {
                assert_eq!(setting, "cache.media_disk_fraction")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
