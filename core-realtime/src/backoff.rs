//! Reconnect delay schedule.

use core_runtime::settings::ReconnectSettings;
use rand::Rng;
use std::time::Duration;

/// Failure counter ceiling; the exponent stops growing here.
pub const MAX_FAILURES: u32 = 30;

/// `min(base * 2^(failures - 1), cap) + jitter`.
pub fn delay_for(failures: u32, base: Duration, cap: Duration, jitter: Duration) -> Duration {
    let exponent = failures.clamp(1, MAX_FAILURES) - 1;
    let scaled = base.saturating_mul(1u32 << exponent);
    scaled.min(cap) + jitter
}

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    cap: Duration,
    failures: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            failures: 0,
        }
    }

    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
        )
    }

    /// Pick up changed settings without losing the failure count.
    pub fn configure(&mut self, settings: &ReconnectSettings) {
        self.base = Duration::from_millis(settings.base_delay_ms);
        self.cap = Duration::from_millis(settings.max_delay_ms);
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Count a failure and return the delay before the next attempt.
    ///
    /// Jitter is uniform in `[0, base)`.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = (self.failures + 1).min(MAX_FAILURES);
        let base_ms = self.base.as_millis() as u64;
        let jitter = if base_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..base_ms))
        };
        delay_for(self.failures, self.base, self.cap, jitter)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from_settings(&ReconnectSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(30);

    #[test]
    fn test_delay_doubles_until_cap() {
        assert_eq!(delay_for(1, BASE, CAP, Duration::ZERO), Duration::from_secs(1));
        assert_eq!(delay_for(3, BASE, CAP, Duration::ZERO), Duration::from_secs(4));
        assert_eq!(delay_for(5, BASE, CAP, Duration::ZERO), Duration::from_secs(16));
        assert_eq!(delay_for(6, BASE, CAP, Duration::ZERO), CAP);
        assert_eq!(delay_for(200, BASE, CAP, Duration::ZERO), CAP);
    }

    #[test]
    fn test_jitter_added_after_cap() {
        let jitter = Duration::from_millis(250);
        assert_eq!(delay_for(10, BASE, CAP, jitter), CAP + jitter);
    }

    #[test]
    fn test_fifth_failure_delay_range() {
        let mut backoff = ReconnectBackoff::default();
        let mut delay = Duration::ZERO;
        for _ in 0..5 {
            delay = backoff.next_delay();
        }
        assert!(delay >= Duration::from_millis(16_000));
        assert!(delay < Duration::from_millis(17_000));
    }

    #[test]
    fn test_failures_saturate_and_reset() {
        let mut backoff = ReconnectBackoff::default();
        for _ in 0..50 {
            let delay = backoff.next_delay();
            assert!(delay < CAP + BASE);
        }
        assert_eq!(backoff.failures(), MAX_FAILURES);
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert!(backoff.next_delay() < Duration::from_secs(2));
    }
}
