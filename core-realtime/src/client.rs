//! # Real-Time Event Client
//!
//! Keeps one push connection open for the signed-in session and fans
//! playback updates out through a broadcast channel.
//!
//! ## States
//!
//! `Disconnected -> Connecting -> Connected -> (Disconnected | AuthFailed)`
//!
//! Losing the connection schedules a reconnect with exponential backoff and
//! jitter. Credential rejection stops the client in `AuthFailed` and invokes
//! the `on_auth_failed` callback exactly once.

use crate::backoff::ReconnectBackoff;
use crate::error::RealtimeError;
use crate::message::{decode, Inbound, PushEvent, SessionFilter, KEEP_ALIVE_MESSAGE};
use crate::transport::{Frame, PushConnection, PushTransport};
use bridge_traits::{Clock, ServerSession};
use core_runtime::events::{CoreEvent, EventBus, RealtimeEvent};
use core_runtime::settings::SettingsHandle;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the push event channel. Slow subscribers lag.
pub const PUSH_CHANNEL_CAPACITY: usize = 16;

/// Close codes the server uses for rejected credentials.
const AUTH_CLOSE_CODES: [u16; 2] = [4401, 4403];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    AuthFailed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::AuthFailed => "auth_failed",
        }
    }
}

type AuthFailedCallback = Box<dyn FnOnce() + Send>;

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Shared between the client handle and its connection task.
struct Shared {
    transport: Arc<dyn PushTransport>,
    settings: SettingsHandle,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<PushEvent>,
    state: watch::Sender<ConnectionState>,
    event_bus: Option<EventBus>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!(state = state.as_str(), "push connection state");
            self.emit(RealtimeEvent::StateChanged {
                state: state.as_str().to_string(),
            });
        }
    }

    fn emit(&self, event: RealtimeEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Realtime(event));
        }
    }
}

pub struct RealtimeClient {
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl RealtimeClient {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        settings: SettingsHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                transport,
                settings,
                clock,
                events,
                state,
                event_bus: None,
            }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Must be called before `start`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.event_bus = Some(bus);
        }
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Connect for `session`, replacing any previous connection.
    pub async fn start<F>(&self, session: ServerSession, on_auth_failed: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            shutdown(previous).await;
        }

        let cancel = CancellationToken::new();
        let shared = self.shared.clone();
        let task_cancel = cancel.clone();
        shared.set_state(ConnectionState::Connecting);
        let task = tokio::spawn(async move {
            connection_loop(shared, session, Box::new(on_auth_failed), task_cancel).await;
        });
        *running = Some(Running { cancel, task });
    }

    /// Close the connection and cancel any pending reconnect. Idempotent.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            shutdown(previous).await;
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

async fn shutdown(running: Running) {
    running.cancel.cancel();
    if let Err(e) = running.task.await {
        if e.is_panic() {
            warn!(error = %e, "push connection task panicked");
        }
    }
}

enum ConnectionEnd {
    Cancelled,
    AuthRejected(u16),
    Lost(String),
}

async fn next_keep_alive(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn connection_loop(
    shared: Arc<Shared>,
    session: ServerSession,
    on_auth_failed: AuthFailedCallback,
    cancel: CancellationToken,
) {
    let mut backoff = ReconnectBackoff::from_settings(&shared.settings.current().reconnect);
    let filter = SessionFilter {
        user_id: session.user_id.clone(),
        device_id: session.device_id.clone(),
    };

    loop {
        shared.set_state(ConnectionState::Connecting);

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = shared.transport.connect(&session) => result,
        };

        let reason = match connected {
            Ok(mut connection) => {
                backoff.reset();
                shared.set_state(ConnectionState::Connected);
                let end = read_loop(&shared, connection.as_mut(), &filter, &cancel).await;
                connection.close().await;
                match end {
                    ConnectionEnd::Cancelled => return,
                    ConnectionEnd::AuthRejected(code) => {
                        auth_failed(&shared, on_auth_failed, code);
                        return;
                    }
                    ConnectionEnd::Lost(reason) => reason,
                }
            }
            Err(RealtimeError::AuthRejected { code }) => {
                auth_failed(&shared, on_auth_failed, code);
                return;
            }
            Err(e) => e.to_string(),
        };

        shared.set_state(ConnectionState::Disconnected);
        backoff.configure(&shared.settings.current().reconnect);
        let delay = backoff.next_delay();
        warn!(
            reason = %reason,
            attempt = backoff.failures(),
            delay_ms = delay.as_millis() as u64,
            "Push connection lost, reconnecting"
        );
        shared.emit(RealtimeEvent::ReconnectScheduled {
            attempt: backoff.failures(),
            delay_ms: delay.as_millis() as u64,
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn auth_failed(shared: &Shared, on_auth_failed: AuthFailedCallback, code: u16) {
    warn!(code, "Push connection rejected credentials");
    shared.set_state(ConnectionState::AuthFailed);
    shared.emit(RealtimeEvent::AuthFailed);
    on_auth_failed();
}

async fn read_loop(
    shared: &Shared,
    connection: &mut dyn PushConnection,
    filter: &SessionFilter,
    cancel: &CancellationToken,
) -> ConnectionEnd {
    let mut keep_alive: Option<Interval> = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ConnectionEnd::Cancelled,
            _ = next_keep_alive(&mut keep_alive) => {
                if let Err(e) = connection.send_text(KEEP_ALIVE_MESSAGE).await {
                    return ConnectionEnd::Lost(e.to_string());
                }
            }
            frame = connection.next_frame() => match frame {
                Some(Frame::Text(text)) => match decode(&text, filter, shared.clock.now()) {
                    Inbound::Push(event) => {
                        // No subscribers is fine.
                        let _ = shared.events.send(event);
                    }
                    Inbound::KeepAliveRequested(period) => {
                        let every = (period / 2).max(Duration::from_secs(1));
                        info!(every_secs = every.as_secs(), "Push keep-alive enabled");
                        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
                        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                        keep_alive = Some(interval);
                    }
                    Inbound::Ignored => {}
                },
                Some(Frame::Closed { code: Some(code), .. }) if AUTH_CLOSE_CODES.contains(&code) => {
                    return ConnectionEnd::AuthRejected(code);
                }
                Some(Frame::Closed { code, reason }) => {
                    return ConnectionEnd::Lost(format!("closed ({code:?}): {reason}"));
                }
                Some(Frame::Error(e)) => return ConnectionEnd::Lost(e),
                None => return ConnectionEnd::Lost("stream ended".to_string()),
            }
        }
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.try_lock() {
            if let Some(running) = running.take() {
                running.cancel.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_labels() {
        assert_eq!(ConnectionState::AuthFailed.as_str(), "auth_failed");
        assert_eq!(ConnectionState::Connecting.as_str(), "connecting");
    }
}
