//! # Event Bus System
//!
//! Telemetry and change notifications for the media client core, delivered
//! over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per component (network, cache, mutations,
//!   real-time connection, prefetch)
//! - **EventBus**: central broadcast channel
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! Emitting never blocks. With no subscribers `emit` returns an error that
//! producers ignore; slow subscribers receive `RecvError::Lagged`.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, MutationEvent};
//!
//! let bus = EventBus::new(64);
//! let rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Mutation(MutationEvent::Enqueued {
//!     subject_id: "item-1".to_string(),
//!     kind: "favorite".to_string(),
//!     desired_value: true,
//! }))
//! .ok();
//! # drop(rx);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Network(NetworkEvent),
    Cache(CacheEvent),
    Mutation(MutationEvent),
    Realtime(RealtimeEvent),
    Prefetch(PrefetchEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Network(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Mutation(e) => e.description(),
            CoreEvent::Realtime(e) => e.description(),
            CoreEvent::Prefetch(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Realtime(RealtimeEvent::AuthFailed) => EventSeverity::Error,
            CoreEvent::Network(NetworkEvent::CallFailed { kind, .. }) if kind == "auth" => {
                EventSeverity::Error
            }
            CoreEvent::Network(NetworkEvent::CallFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Mutation(MutationEvent::Abandoned { .. }) => EventSeverity::Warning,
            CoreEvent::Network(NetworkEvent::EndpointHealthChanged { healthy: false, .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Cache(CacheEvent::Cleared { .. }) => EventSeverity::Info,
            CoreEvent::Mutation(MutationEvent::DrainCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Realtime(RealtimeEvent::StateChanged { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Network Events
// ============================================================================

/// Request executor telemetry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum NetworkEvent {
    /// An endpoint flipped between healthy and failing.
    EndpointHealthChanged {
        endpoint: String,
        healthy: bool,
        reason: Option<String>,
    },
    /// A call ended in a classified error.
    CallFailed {
        endpoint: Option<String>,
        /// `network`, `auth`, `validation` or `unknown`
        kind: String,
        attempts: u32,
        message: String,
    },
    /// The global rate limiter delayed an attempt.
    Throttled { delay_ms: u64, consecutive_failures: u32 },
}

impl NetworkEvent {
    fn description(&self) -> &str {
        match self {
            NetworkEvent::EndpointHealthChanged { healthy: true, .. } => "Endpoint recovered",
            NetworkEvent::EndpointHealthChanged { healthy: false, .. } => "Endpoint failing",
            NetworkEvent::CallFailed { .. } => "Remote call failed",
            NetworkEvent::Throttled { .. } => "Request throttled",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

/// Cache layer notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Entries were evicted to respect a capacity or byte budget.
    Evicted {
        cache: String,
        entries: u64,
        bytes: u64,
    },
    /// A cache was emptied (memory pressure, sign-out, explicit request).
    Cleared { cache: String, reason: String },
    /// A single memo key was invalidated.
    Invalidated { cache: String, key: String },
    /// A grid scope was rebuilt.
    GridScopeReplaced { scope_key: String, total_count: u64 },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Evicted { .. } => "Cache entries evicted",
            CacheEvent::Cleared { .. } => "Cache cleared",
            CacheEvent::Invalidated { .. } => "Cache key invalidated",
            CacheEvent::GridScopeReplaced { .. } => "Grid projection replaced",
        }
    }
}

// ============================================================================
// Mutation Events
// ============================================================================

/// Offline mutation queue lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum MutationEvent {
    Enqueued {
        subject_id: String,
        kind: String,
        desired_value: bool,
    },
    /// Server accepted the mutation; local state is confirmed.
    Applied {
        subject_id: String,
        kind: String,
        value: bool,
    },
    /// Reconciliation failed; local state reverted to `reverted_to`.
    Abandoned {
        subject_id: String,
        kind: String,
        reverted_to: bool,
        reason: String,
    },
    DrainCompleted {
        applied: u64,
        abandoned: u64,
        remaining: u64,
    },
}

impl MutationEvent {
    fn description(&self) -> &str {
        match self {
            MutationEvent::Enqueued { .. } => "Mutation queued",
            MutationEvent::Applied { .. } => "Mutation applied",
            MutationEvent::Abandoned { .. } => "Mutation abandoned and reverted",
            MutationEvent::DrainCompleted { .. } => "Mutation drain finished",
        }
    }
}

// ============================================================================
// Real-time Events
// ============================================================================

/// Push connection lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RealtimeEvent {
    StateChanged { state: String },
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    AuthFailed,
}

impl RealtimeEvent {
    fn description(&self) -> &str {
        match self {
            RealtimeEvent::StateChanged { .. } => "Push connection state changed",
            RealtimeEvent::ReconnectScheduled { .. } => "Push reconnect scheduled",
            RealtimeEvent::AuthFailed => "Push connection rejected credentials",
        }
    }
}

// ============================================================================
// Prefetch Events
// ============================================================================

/// Speculative prefetch runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PrefetchEvent {
    Skipped {
        trigger: String,
        reason: String,
    },
    Completed {
        trigger: String,
        items: u64,
        images: u64,
        fallbacks: u64,
        failures: u64,
    },
}

impl PrefetchEvent {
    fn description(&self) -> &str {
        match self {
            PrefetchEvent::Skipped { .. } => "Prefetch skipped",
            PrefetchEvent::Completed { .. } => "Prefetch completed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`CoreEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// New independent receiver; past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let cache_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Cache(_)));
/// # drop(cache_only);
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive; `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
