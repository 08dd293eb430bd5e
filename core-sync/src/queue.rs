//! # Offline Mutation Queue
//!
//! User-data changes (favorite, played, watchlist) are applied locally at
//! once and recorded as pending mutations. A drain later replays them
//! against the server through the request executor, oldest first.
//!
//! ## Reconciliation
//!
//! - Watchlist is local-authoritative: its rows are confirmed without a
//!   remote call.
//! - Favorite and played are sent at `Normal` priority. Success confirms the
//!   flag; failure restores the prior value, drops the row and halts the
//!   batch so the remaining rows wait for the next trigger.
//! - Only one drain runs at a time. Overlapping calls return
//!   [`DrainReport::AlreadyRunning`].

use crate::error::{Result, SyncError};
use crate::store::{Settled, SqliteMutationStore};
use bridge_traits::{MediaServerApi, NetworkMonitor};
use core_library::{FlagState, MutationKind, PendingMutation, SubjectFlags};
use core_request::{Priority, RemoteCallResult, RequestExecutor};
use core_runtime::events::{CoreEvent, EventBus, MutationEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Counters of a finished drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub applied: u64,
    pub abandoned: u64,
    /// Rows still pending after the drain.
    pub remaining: u64,
    /// Stopped early because a mutation was abandoned.
    pub halted: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainSkipReason {
    Offline,
    NoSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReport {
    Completed(DrainSummary),
    Skipped(DrainSkipReason),
    AlreadyRunning,
}

/// Local projection of subject flags kept outside the store, e.g. cached
/// item metadata. Told when a drain reverts an optimistic value.
pub trait RevertListener: Send + Sync {
    fn reverted(&self, subject_id: &str, kind: MutationKind, value: bool);
}

/// Clears the running flag when the drain future finishes or is dropped.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct OfflineMutationQueue {
    store: Arc<SqliteMutationStore>,
    executor: RequestExecutor,
    media_api: Arc<dyn MediaServerApi>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    endpoint: RwLock<Option<String>>,
    /// Serializes local writes between `toggle` and the drain.
    write_lock: Mutex<()>,
    draining: AtomicBool,
    drain_requested: Notify,
    event_bus: Option<EventBus>,
    revert_listener: Option<Arc<dyn RevertListener>>,
}

impl OfflineMutationQueue {
    pub fn new(
        store: Arc<SqliteMutationStore>,
        executor: RequestExecutor,
        media_api: Arc<dyn MediaServerApi>,
    ) -> Self {
        Self {
            store,
            executor,
            media_api,
            network_monitor: None,
            endpoint: RwLock::new(None),
            write_lock: Mutex::new(()),
            draining: AtomicBool::new(false),
            drain_requested: Notify::new(),
            event_bus: None,
            revert_listener: None,
        }
    }

    pub fn with_network_monitor(mut self, monitor: Option<Arc<dyn NetworkMonitor>>) -> Self {
        self.network_monitor = monitor;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_revert_listener(mut self, listener: Arc<dyn RevertListener>) -> Self {
        self.revert_listener = Some(listener);
        self
    }

    /// Server base URL remote mutations are sent to. `None` pauses draining.
    pub fn set_endpoint(&self, endpoint: Option<String>) {
        *self.endpoint.write().unwrap_or_else(|e| e.into_inner()) = endpoint;
    }

    fn endpoint(&self) -> Option<String> {
        self.endpoint
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn emit(&self, event: MutationEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Mutation(event));
        }
    }

    /// Apply `desired_value` locally and queue it for reconciliation.
    ///
    /// Returns once the flag and the pending row are both durable.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn toggle(
        &self,
        subject_id: &str,
        kind: MutationKind,
        desired_value: bool,
    ) -> Result<FlagState> {
        if subject_id.trim().is_empty() {
            return Err(SyncError::InvalidMutation(
                "subject id cannot be empty".to_string(),
            ));
        }

        let state = {
            let _write = self.write_lock.lock().await;
            self.store.toggle(subject_id, kind, desired_value).await?
        };

        self.emit(MutationEvent::Enqueued {
            subject_id: subject_id.to_string(),
            kind: kind.to_string(),
            desired_value,
        });
        self.request_drain();
        Ok(state)
    }

    /// Wake the drain trigger loop.
    pub fn request_drain(&self) {
        self.drain_requested.notify_one();
    }

    pub(crate) async fn drain_requested(&self) {
        self.drain_requested.notified().await
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Reconcile pending mutations, oldest first.
    ///
    /// `cancel` is checked before each row; a row is either fully settled or
    /// left pending.
    #[instrument(skip_all)]
    pub async fn drain(&self, cancel: &CancellationToken) -> Result<DrainReport> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("drain already running");
            return Ok(DrainReport::AlreadyRunning);
        }
        let _guard = DrainGuard(&self.draining);

        if let Some(monitor) = &self.network_monitor {
            if !monitor.is_connected().await {
                debug!("drain skipped: offline");
                return Ok(DrainReport::Skipped(DrainSkipReason::Offline));
            }
        }
        let Some(endpoint) = self.endpoint() else {
            debug!("drain skipped: no session");
            return Ok(DrainReport::Skipped(DrainSkipReason::NoSession));
        };

        let mut summary = DrainSummary::default();
        for mutation in self.store.pending().await? {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let outcome = if mutation.kind.is_remote() {
                self.send(&endpoint, &mutation).await
            } else {
                RemoteCallResult::Success(())
            };

            match outcome {
                RemoteCallResult::Success(()) => {
                    let settled = {
                        let _write = self.write_lock.lock().await;
                        self.store.confirm(&mutation).await?
                    };
                    summary.applied += 1;
                    if let Settled::Done { value } = settled {
                        self.emit(MutationEvent::Applied {
                            subject_id: mutation.subject_id.clone(),
                            kind: mutation.kind.to_string(),
                            value,
                        });
                    }
                }
                RemoteCallResult::Error(err) => {
                    let settled = {
                        let _write = self.write_lock.lock().await;
                        self.store.revert(&mutation).await?
                    };
                    warn!(
                        subject_id = %mutation.subject_id,
                        kind = %mutation.kind,
                        error = %err,
                        "mutation abandoned"
                    );
                    if let Settled::Done { value } = settled {
                        summary.abandoned += 1;
                        if let Some(listener) = &self.revert_listener {
                            listener.reverted(&mutation.subject_id, mutation.kind, value);
                        }
                        self.emit(MutationEvent::Abandoned {
                            subject_id: mutation.subject_id.clone(),
                            kind: mutation.kind.to_string(),
                            reverted_to: value,
                            reason: err.to_string(),
                        });
                    }
                    summary.halted = true;
                    break;
                }
                RemoteCallResult::Loading => {
                    summary.halted = true;
                    break;
                }
            }
        }

        summary.remaining = self.store.pending_count().await?;
        info!(
            applied = summary.applied,
            abandoned = summary.abandoned,
            remaining = summary.remaining,
            "drain finished"
        );
        self.emit(MutationEvent::DrainCompleted {
            applied: summary.applied,
            abandoned: summary.abandoned,
            remaining: summary.remaining,
        });
        Ok(DrainReport::Completed(summary))
    }

    async fn send(&self, endpoint: &str, mutation: &PendingMutation) -> RemoteCallResult<()> {
        let api = &self.media_api;
        let subject_id = mutation.subject_id.as_str();
        let value = mutation.desired_value;
        let kind = mutation.kind;

        self.executor
            .execute(Priority::Normal, Some(endpoint), || async move {
                match kind {
                    MutationKind::Favorite => {
                        api.set_favorite(endpoint, subject_id, value).await.map(|_| ())
                    }
                    MutationKind::Played => {
                        api.set_played(endpoint, subject_id, value).await.map(|_| ())
                    }
                    // Local-authoritative; drain never sends it.
                    MutationKind::Watchlist => Ok(()),
                }
            })
            .await
    }

    /// Pending mutations, oldest first.
    pub async fn pending(&self) -> Result<Vec<PendingMutation>> {
        self.store.pending().await
    }

    pub async fn pending_count(&self) -> Result<u64> {
        self.store.pending_count().await
    }

    pub async fn flags(&self, subject_id: &str) -> Result<SubjectFlags> {
        self.store.flags(subject_id).await
    }
}
