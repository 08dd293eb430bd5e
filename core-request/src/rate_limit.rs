//! Process-wide adaptive throttling.

use async_trait::async_trait;
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

const DEFAULT_STEP: Duration = Duration::from_millis(250);
const DEFAULT_CAP: Duration = Duration::from_secs(5);

/// Gate consulted before every attempt.
///
/// A single instance is shared by all callers of the executor so that a
/// failing server slows down every caller, not just the one that saw the
/// failure.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait for the current throttle delay, if any.
    async fn acquire(&self);

    fn record_success(&self);

    fn record_failure(&self);

    fn current_delay(&self) -> Duration;
}

/// Delay grows with consecutive failures: `step * 2^(n-1)`, capped, and
/// drops to zero on the first success.
pub struct AdaptiveRateLimiter {
    consecutive_failures: AtomicU32,
    step: Duration,
    cap: Duration,
    event_bus: Option<EventBus>,
}

impl AdaptiveRateLimiter {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_STEP, DEFAULT_CAP)
    }

    pub fn with_limits(step: Duration, cap: Duration) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            step,
            cap,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures - 1);
        self.step.saturating_mul(factor).min(self.cap)
    }
}

impl Default for AdaptiveRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for AdaptiveRateLimiter {
    async fn acquire(&self) {
        let failures = self.consecutive_failures();
        let delay = self.delay_for(failures);
        if delay.is_zero() {
            return;
        }

        debug!(delay_ms = delay.as_millis() as u64, failures, "Throttling request");
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Network(NetworkEvent::Throttled {
                delay_ms: delay.as_millis() as u64,
                consecutive_failures: failures,
            }));
        }
        tokio::time::sleep(delay).await;
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    fn record_failure(&self) {
        let _ = self
            .consecutive_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(1))
            });
    }

    fn current_delay(&self) -> Duration {
        self.delay_for(self.consecutive_failures())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_delay_steps_and_cap() {
        let limiter = AdaptiveRateLimiter::new();
        let mut seen = Vec::new();
        for _ in 0..7 {
            limiter.record_failure();
            seen.push(limiter.current_delay().as_millis());
        }
        assert_eq!(seen, vec![250, 500, 1000, 2000, 4000, 5000, 5000]);
    }

    #[test]
    fn test_success_resets() {
        let limiter = AdaptiveRateLimiter::new();
        limiter.record_failure();
        limiter.record_failure();
        limiter.record_success();
        assert_eq!(limiter.current_delay(), Duration::ZERO);
        assert_eq!(limiter.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_sleeps_for_current_delay() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let limiter = AdaptiveRateLimiter::new().with_event_bus(bus);

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.record_failure();
        limiter.record_failure();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_millis(500));

        match rx.recv().await.unwrap() {
            CoreEvent::Network(NetworkEvent::Throttled {
                delay_ms,
                consecutive_failures,
            }) => {
                assert_eq!(delay_ms, 500);
                assert_eq!(consecutive_failures, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
