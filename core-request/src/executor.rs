//! Request executor: admission, throttling, retry and classification for
//! every remote call the core makes.

use crate::dispatcher::{Priority, PriorityDispatcher};
use crate::health::EndpointHealthRegistry;
use crate::rate_limit::RateLimiter;
use crate::result::{classify, ErrorKind, RemoteCallResult, RemoteError};
use bridge_traits::BridgeError;
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent};
use core_runtime::settings::SettingsHandle;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay after attempt `attempt` (1-based): `base * 2^(attempt-1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Shared entry point for remote calls. Clone to share between components.
#[derive(Clone)]
pub struct RequestExecutor {
    dispatcher: PriorityDispatcher,
    rate_limiter: Arc<dyn RateLimiter>,
    health: Arc<EndpointHealthRegistry>,
    settings: SettingsHandle,
    event_bus: Option<EventBus>,
}

impl RequestExecutor {
    pub fn new(
        dispatcher: PriorityDispatcher,
        rate_limiter: Arc<dyn RateLimiter>,
        health: Arc<EndpointHealthRegistry>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            dispatcher,
            rate_limiter,
            health,
            settings,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn health(&self) -> &Arc<EndpointHealthRegistry> {
        &self.health
    }

    pub fn dispatcher(&self) -> &PriorityDispatcher {
        &self.dispatcher
    }

    /// Run `call` until it succeeds, fails terminally, or the attempt budget
    /// is spent.
    ///
    /// `call` is invoked once per attempt. Every failure, including a panic
    /// while building or polling the returned future, resolves to
    /// [`RemoteCallResult::Error`].
    ///
    /// The rate limiter gates the first attempt. Retries wait for the larger
    /// of the backoff delay and the limiter's current delay, so the two never
    /// stack.
    pub async fn execute<T, F, Fut>(
        &self,
        priority: Priority,
        endpoint: Option<&str>,
        mut call: F,
    ) -> RemoteCallResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let retry = self.settings.current().retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if attempt == 1 {
                self.rate_limiter.acquire().await;
            }

            let outcome = {
                let _permit = self.dispatcher.acquire(priority).await;
                match panic::catch_unwind(AssertUnwindSafe(&mut call)) {
                    Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
                    Err(payload) => Err(payload),
                }
            };

            let error = match outcome {
                Ok(Ok(value)) => {
                    self.rate_limiter.record_success();
                    if let Some(endpoint) = endpoint {
                        self.health.record_success(endpoint);
                    }
                    if attempt > 1 {
                        debug!(attempt, ?endpoint, "Call succeeded after retry");
                    }
                    return RemoteCallResult::Success(value);
                }
                Ok(Err(error)) => error,
                Err(payload) => {
                    let message = format!("call panicked: {}", panic_message(payload.as_ref()));
                    return self.fail(
                        endpoint,
                        RemoteError::new(ErrorKind::Unknown, message),
                        attempt,
                    );
                }
            };

            let classification = classify(&error);
            if classification.retryable {
                self.rate_limiter.record_failure();
            }

            if classification.retryable && attempt < max_attempts {
                let delay = backoff_delay(retry.base_delay(), attempt)
                    .max(self.rate_limiter.current_delay());
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Remote call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return self.fail(endpoint, RemoteError::from_bridge(error), attempt);
        }
    }

    fn fail<T>(
        &self,
        endpoint: Option<&str>,
        error: RemoteError,
        attempts: u32,
    ) -> RemoteCallResult<T> {
        warn!(
            kind = %error.kind,
            attempts,
            ?endpoint,
            message = %error.message,
            "Remote call failed"
        );

        if let Some(endpoint) = endpoint {
            self.health.record_failure(endpoint, error.message.clone());
        }
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Network(NetworkEvent::CallFailed {
                endpoint: endpoint.map(str::to_string),
                kind: error.kind.as_str().to_string(),
                attempts,
                message: error.message.clone(),
            }));
        }
        RemoteCallResult::Error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_saturates() {
        let delay = backoff_delay(Duration::from_secs(1), 200);
        assert!(delay >= Duration::from_secs(1 << 30));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
