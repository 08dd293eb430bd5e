//! # Prefetch Scheduler
//!
//! ## Gates
//!
//! A run starts only when prefetch is enabled, the device is online, the
//! connection is Wi-Fi (or wired) when `wifi_only` is set, and a session
//! endpoint is known. The reactive path reports an unmet gate as
//! [`PrefetchOutcome::Skipped`]; the job path asks the host to retry.
//!
//! ## Per item
//!
//! ```text
//! get_item (Low) ──ok──> metadata LRU ──> get_primary_image (Low) ──> thumbnail LRU
//!        └─err──> summary fallback ─┘                 └─err──> counted, swallowed
//! ```
//!
//! The job path also upserts each item into the item store. Cancellation is
//! checked before every network call.

use crate::error::Result;
use crate::progress::{PrefetchOutcome, PrefetchProgress, PrefetchTrigger, SkipReason};
use bridge_traits::{
    BackgroundExecutor, Clock, ItemDetail, ItemSummary, MediaServerApi, NetworkInfo,
    NetworkMonitor, TaskConstraints, TaskHandler, TaskId, TaskOutcome,
};
use core_cache::CacheLayer;
use core_library::{FlagState, ItemRepository, StoredItem};
use core_request::{Priority, RemoteCallResult, RequestExecutor};
use core_runtime::events::{CoreEvent, EventBus, PrefetchEvent};
use core_runtime::settings::SettingsHandle;
use futures::future::BoxFuture;
use std::ops::ControlFlow;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Task id of the scheduled prefetch job.
pub const PREFETCH_TASK_ID: &str = "prefetch.continue_watching";

/// Thumbnail cache key for the primary image of `item_id` at `max_width`.
pub fn thumbnail_key(item_id: &str, max_width: u32) -> String {
    format!("{item_id}/primary/{max_width}")
}

pub struct PrefetchScheduler {
    media_api: Arc<dyn MediaServerApi>,
    executor: RequestExecutor,
    caches: Arc<CacheLayer>,
    settings: SettingsHandle,
    clock: Arc<dyn Clock>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    item_repository: Option<Arc<dyn ItemRepository>>,
    endpoint: RwLock<Option<String>>,
    cancel: CancellationToken,
    event_bus: Option<EventBus>,
}

impl PrefetchScheduler {
    pub fn new(
        media_api: Arc<dyn MediaServerApi>,
        executor: RequestExecutor,
        caches: Arc<CacheLayer>,
        settings: SettingsHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            media_api,
            executor,
            caches,
            settings,
            clock,
            network_monitor: None,
            item_repository: None,
            endpoint: RwLock::new(None),
            cancel: CancellationToken::new(),
            event_bus: None,
        }
    }

    /// Without a monitor the device is assumed online on an unmetered link.
    pub fn with_network_monitor(mut self, monitor: Option<Arc<dyn NetworkMonitor>>) -> Self {
        self.network_monitor = monitor;
        self
    }

    /// Item store the job path writes through to.
    pub fn with_item_repository(mut self, repository: Arc<dyn ItemRepository>) -> Self {
        self.item_repository = Some(repository);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn set_endpoint(&self, endpoint: Option<String>) {
        *self.endpoint.write().unwrap_or_else(|e| e.into_inner()) = endpoint;
    }

    fn endpoint(&self) -> Option<String> {
        self.endpoint
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Stop the current run at its next check and end `listen`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn emit(&self, event: PrefetchEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Prefetch(event));
        }
    }

    /// Endpoint to prefetch from, or the first gate that is not met.
    async fn admit(&self) -> std::result::Result<String, SkipReason> {
        let settings = self.settings.current().prefetch;
        if !settings.enabled {
            return Err(SkipReason::Disabled);
        }

        if let Some(monitor) = &self.network_monitor {
            let info = monitor.get_network_info().await.unwrap_or_else(|e| {
                warn!(error = %e, "network info unavailable, treating as offline");
                NetworkInfo::disconnected()
            });
            if !info.is_connected() {
                return Err(SkipReason::Offline);
            }
            if settings.wifi_only && !info.is_wifi() {
                return Err(SkipReason::NotOnWifi);
            }
        }

        self.endpoint().ok_or(SkipReason::NoSession)
    }

    fn skipped(&self, trigger: PrefetchTrigger, reason: SkipReason) {
        debug!(trigger = %trigger, reason = %reason, "prefetch skipped");
        self.emit(PrefetchEvent::Skipped {
            trigger: trigger.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Prefetch the head of a freshly observed continue-watching list.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn on_continue_watching_changed(&self, items: &[ItemSummary]) -> PrefetchOutcome {
        let trigger = PrefetchTrigger::ContinueWatching;
        match self.admit().await {
            Ok(endpoint) => {
                PrefetchOutcome::Completed(self.run(trigger, &endpoint, items, false).await)
            }
            Err(reason) => {
                self.skipped(trigger, reason);
                PrefetchOutcome::Skipped(reason)
            }
        }
    }

    /// React to every new value of `lists` until the sender is dropped or
    /// the scheduler shuts down.
    pub async fn listen(&self, mut lists: watch::Receiver<Vec<ItemSummary>>) {
        loop {
            let items = lists.borrow_and_update().clone();
            if !items.is_empty() {
                self.on_continue_watching_changed(&items).await;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = lists.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("prefetch listener stopped");
    }

    /// Scheduled variant: fetch continue-watching and prefetch it, writing
    /// items through to the store.
    #[instrument(skip(self), name = "prefetch_job")]
    pub async fn run_job(&self) -> bridge_traits::error::Result<TaskOutcome> {
        let trigger = PrefetchTrigger::Scheduled;
        let endpoint = match self.admit().await {
            Ok(endpoint) => endpoint,
            Err(reason) => {
                self.skipped(trigger, reason);
                return Ok(TaskOutcome::Retry);
            }
        };
        if self.cancel.is_cancelled() {
            return Ok(TaskOutcome::Completed);
        }

        let limit = u32::try_from(self.settings.current().prefetch.max_items).unwrap_or(u32::MAX);
        let api = &self.media_api;
        let ep = endpoint.as_str();
        let listed = self
            .executor
            .execute(Priority::Low, Some(ep), || async move {
                api.continue_watching(ep, limit).await
            })
            .await;

        let items = match listed {
            RemoteCallResult::Success(items) => items,
            RemoteCallResult::Error(e) => {
                warn!(error = %e, "continue watching unavailable, retrying later");
                return Ok(TaskOutcome::Retry);
            }
            RemoteCallResult::Loading => return Ok(TaskOutcome::Retry),
        };

        self.run(trigger, ep, &items, true).await;
        Ok(TaskOutcome::Completed)
    }

    /// Register [`run_job`](Self::run_job) with the host scheduler.
    pub async fn register_job(self: &Arc<Self>, host: &dyn BackgroundExecutor) -> Result<TaskId> {
        let scheduler = Arc::clone(self);
        let handler: TaskHandler = Arc::new(
            move || -> BoxFuture<'static, bridge_traits::error::Result<TaskOutcome>> {
                let scheduler = scheduler.clone();
                Box::pin(async move { scheduler.run_job().await })
            },
        );
        host.register_handler(PREFETCH_TASK_ID, handler).await?;

        let settings = self.settings.current().prefetch;
        let constraints = TaskConstraints {
            requires_wifi: settings.wifi_only,
            requires_network: true,
            requires_charging: false,
        };
        let task_id = host
            .schedule_task(
                PREFETCH_TASK_ID,
                Duration::from_secs(settings.job_interval_secs),
                constraints,
            )
            .await?;

        info!(task_id = %task_id.as_str(), "prefetch job scheduled");
        Ok(task_id)
    }

    async fn run(
        &self,
        trigger: PrefetchTrigger,
        endpoint: &str,
        items: &[ItemSummary],
        persist: bool,
    ) -> PrefetchProgress {
        let settings = self.settings.current().prefetch;
        let selected: Vec<&ItemSummary> = items
            .iter()
            .filter(|item| !item.id.is_empty())
            .take(settings.max_items)
            .collect();

        let mut progress = PrefetchProgress::new(selected.len());
        for summary in selected {
            let step = self
                .prefetch_item(endpoint, summary, settings.image_max_width, persist, &mut progress)
                .await;
            if step.is_break() {
                progress.cancelled = true;
                break;
            }
        }

        info!(
            trigger = %trigger,
            items = progress.items,
            images = progress.images,
            fallbacks = progress.fallbacks,
            failures = progress.failures,
            cancelled = progress.cancelled,
            "prefetch finished"
        );
        self.emit(PrefetchEvent::Completed {
            trigger: trigger.to_string(),
            items: progress.items as u64,
            images: progress.images as u64,
            fallbacks: progress.fallbacks as u64,
            failures: progress.failures as u64,
        });
        progress
    }

    async fn prefetch_item(
        &self,
        endpoint: &str,
        summary: &ItemSummary,
        max_width: u32,
        persist: bool,
        progress: &mut PrefetchProgress,
    ) -> ControlFlow<()> {
        if self.cancel.is_cancelled() {
            return ControlFlow::Break(());
        }

        let api = &self.media_api;
        let id = summary.id.as_str();
        let fetched = self
            .executor
            .execute(Priority::Low, Some(endpoint), || async move {
                api.get_item(endpoint, id).await
            })
            .await;
        let detail = match fetched {
            RemoteCallResult::Success(detail) => detail,
            failed => {
                if let Some(e) = failed.error() {
                    debug!(subject_id = %id, error = %e, "detail fetch failed, caching summary");
                }
                progress.fallbacks += 1;
                ItemDetail::from(summary)
            }
        };

        if persist {
            if let Some(repository) = &self.item_repository {
                let item = stored_item(&detail, self.clock.unix_timestamp_millis());
                if let Err(e) = repository.upsert(&item).await {
                    warn!(subject_id = %id, error = %e, "item store write failed");
                    progress.failures += 1;
                }
            }
        }

        let image_tag = detail.primary_image_tag().map(str::to_owned);
        self.caches.metadata().put(id, detail);
        progress.items += 1;

        if image_tag.is_none() {
            return ControlFlow::Continue(());
        }
        if self.cancel.is_cancelled() {
            return ControlFlow::Break(());
        }

        let image = self
            .executor
            .execute(Priority::Low, Some(endpoint), || async move {
                api.get_primary_image(endpoint, id, max_width).await
            })
            .await;
        match image {
            RemoteCallResult::Success(bytes) => {
                match self.caches.thumbnails().put(thumbnail_key(id, max_width), bytes) {
                    Ok(()) => progress.images += 1,
                    Err(e) => {
                        debug!(subject_id = %id, error = %e, "thumbnail not cached");
                        progress.failures += 1;
                    }
                }
            }
            failed => {
                if let Some(e) = failed.error() {
                    debug!(subject_id = %id, error = %e, "image fetch failed");
                }
                progress.failures += 1;
            }
        }

        ControlFlow::Continue(())
    }
}

fn stored_item(detail: &ItemDetail, updated_at: i64) -> StoredItem {
    let mut item = StoredItem::new(detail.id.clone(), detail.name.clone(), updated_at);
    item.item_type = detail.item_type.clone();
    item.overview = detail.overview.clone();
    item.production_year = detail.production_year;
    item.runtime_ticks = detail.run_time_ticks;
    item.primary_image_tag = detail.primary_image_tag().map(str::to_owned);
    if let Some(user_data) = &detail.user_data {
        item.flags.favorite = FlagState::Confirmed(user_data.is_favorite);
        item.flags.played = FlagState::Confirmed(user_data.played);
    }
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::UserData;
    use std::collections::HashMap;

    #[test]
    fn test_thumbnail_key() {
        assert_eq!(thumbnail_key("abc", 400), "abc/primary/400");
    }

    #[test]
    fn test_stored_item_takes_server_flags() {
        let detail = ItemDetail {
            id: "m1".into(),
            name: "Heat".into(),
            overview: Some("Crime".into()),
            run_time_ticks: Some(100),
            image_tags: HashMap::from([("Primary".to_string(), "tag1".to_string())]),
            user_data: Some(UserData {
                is_favorite: true,
                played: false,
                playback_position_ticks: 10,
            }),
            ..ItemDetail::default()
        };

        let item = stored_item(&detail, 42);
        assert_eq!(item.updated_at, 42);
        assert_eq!(item.primary_image_tag.as_deref(), Some("tag1"));
        assert_eq!(item.flags.favorite, FlagState::Confirmed(true));
        assert_eq!(item.flags.played, FlagState::Confirmed(false));
        assert_eq!(item.flags.watchlist, FlagState::Confirmed(false));
    }
}
