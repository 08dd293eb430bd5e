//! Per-endpoint health used to pick among several connection methods
//! (LAN address, public address, relay) for the same server.

use bridge_traits::Clock;
use chrono::{DateTime, Utc};
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointHealth {
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub consecutive_failures: u32,
}

impl EndpointHealth {
    /// `None` until the endpoint has seen at least one outcome.
    pub fn is_healthy(&self) -> Option<bool> {
        if self.consecutive_failures > 0 {
            Some(false)
        } else if self.last_success_at.is_some() {
            Some(true)
        } else {
            None
        }
    }
}

pub struct EndpointHealthRegistry {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, EndpointHealth>>,
    event_bus: Option<EventBus>,
}

impl EndpointHealthRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn record_success(&self, endpoint: &str) {
        let now = self.clock.now();
        let was = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let entry = entries.entry(endpoint.to_string()).or_default();
            let was = entry.is_healthy();
            entry.last_success_at = Some(now);
            entry.consecutive_failures = 0;
            entry.failure_reason = None;
            was
        };

        if was != Some(true) {
            info!(endpoint, "Endpoint healthy");
            self.emit(endpoint, true, None);
        }
    }

    pub fn record_failure(&self, endpoint: &str, reason: impl Into<String>) {
        let now = self.clock.now();
        let reason = reason.into();
        let was = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let entry = entries.entry(endpoint.to_string()).or_default();
            let was = entry.is_healthy();
            entry.last_failure_at = Some(now);
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
            entry.failure_reason = Some(reason.clone());
            was
        };

        if was != Some(false) {
            warn!(endpoint, reason = %reason, "Endpoint failing");
            self.emit(endpoint, false, Some(reason));
        }
    }

    pub fn get(&self, endpoint: &str) -> Option<EndpointHealth> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(endpoint)
            .cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, EndpointHealth> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Pick the endpoint to try first.
    ///
    /// Healthy endpoints rank first (most recent success wins), then endpoints
    /// without history in candidate order, then failing endpoints with the
    /// oldest failure first.
    pub fn preferred<S: AsRef<str>>(&self, candidates: &[S]) -> Option<String> {
        self.ranked(candidates).into_iter().next()
    }

    /// All candidates in preference order.
    pub fn ranked<S: AsRef<str>>(&self, candidates: &[S]) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let mut healthy = Vec::new();
        let mut unknown = Vec::new();
        let mut failing = Vec::new();
        for candidate in candidates {
            let key = candidate.as_ref();
            match entries.get(key) {
                Some(h) if h.is_healthy() == Some(true) => {
                    healthy.push((key.to_string(), h.last_success_at))
                }
                Some(h) if h.is_healthy() == Some(false) => {
                    failing.push((key.to_string(), h.last_failure_at))
                }
                _ => unknown.push(key.to_string()),
            }
        }

        healthy.sort_by(|a, b| b.1.cmp(&a.1));
        failing.sort_by(|a, b| a.1.cmp(&b.1));

        healthy
            .into_iter()
            .map(|(k, _)| k)
            .chain(unknown)
            .chain(failing.into_iter().map(|(k, _)| k))
            .collect()
    }

    fn emit(&self, endpoint: &str, healthy: bool, reason: Option<String>) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Network(NetworkEvent::EndpointHealthChanged {
                endpoint: endpoint.to_string(),
                healthy,
                reason,
            }));
        }
    }
}
