//! # Core Service
//!
//! Owns one instance of every component and the background tasks that tie
//! them together:
//!
//! - the drain trigger loop (timer, reconnect, explicit requests)
//! - the settings watcher that resizes caches without a restart
//! - the continue-watching listener feeding the prefetch scheduler
//!
//! All of them stop on [`CoreService::shutdown`].

use crate::error::Result;
use crate::jobs::register_drain_job;
use bridge_traits::{
    Clock, ItemDetail, ItemSummary, MediaServerApi, MemoryPressureLevel, ServerSession, TaskId,
};
use bytes::Bytes;
use core_cache::{
    CacheLayer, CacheStats, ClearReason, DiskCacheLimit, DiskCachePolicy, GridWindowCache,
    TtlCache,
};
use core_library::db::{create_pool, DatabaseConfig};
use core_library::{
    FlagState, ItemRepository, MutationKind, PendingMutation, SqliteGridProjectionRepository,
    SqliteItemRepository, SubjectFlags,
};
use core_prefetch::{thumbnail_key, PrefetchScheduler};
use core_realtime::{ConnectionState, PushEvent, PushTransport, RealtimeClient, WebSocketTransport};
use core_request::{
    AdaptiveRateLimiter, EndpointHealthRegistry, ErrorKind, Priority, PriorityDispatcher,
    RemoteCallResult, RemoteError, RequestExecutor,
};
use core_runtime::config::{CoreConfig, FeatureFlags};
use core_runtime::events::{CoreEvent, EventBus};
use core_runtime::logging::{init_logging, LoggingConfig};
use core_runtime::settings::SettingsHandle;
use core_sync::{
    DrainReport, DrainTriggers, OfflineMutationQueue, RevertListener, SqliteMutationStore,
};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const EVENT_BUS_CAPACITY: usize = 256;

/// Memo cache name for interactive item lookups.
const ITEM_MEMO: &str = "item_details";

/// Cached item metadata mirroring subject flags. Patched on toggle and on
/// revert so readers of the metadata LRU see the same value as the store.
struct MetadataProjection {
    caches: Arc<CacheLayer>,
    item_memo: Arc<TtlCache<ItemDetail>>,
}

impl MetadataProjection {
    fn apply(&self, subject_id: &str, kind: MutationKind, value: bool) {
        if let Some(mut cached) = self.caches.metadata().get(subject_id) {
            let user_data = cached.user_data.get_or_insert_with(Default::default);
            match kind {
                MutationKind::Favorite => user_data.is_favorite = value,
                MutationKind::Played => user_data.played = value,
                MutationKind::Watchlist => {}
            }
            self.caches.metadata().put(subject_id, cached);
        }
        self.item_memo.invalidate(subject_id);
    }
}

impl RevertListener for MetadataProjection {
    fn reverted(&self, subject_id: &str, kind: MutationKind, value: bool) {
        debug!(subject_id, %kind, value, "reverting cached metadata");
        self.apply(subject_id, kind, value);
    }
}

pub struct CoreService {
    features: FeatureFlags,
    settings: SettingsHandle,
    events: EventBus,
    pool: SqlitePool,
    media_api: Arc<dyn MediaServerApi>,
    executor: RequestExecutor,
    caches: Arc<CacheLayer>,
    grid: Arc<GridWindowCache>,
    item_memo: Arc<TtlCache<ItemDetail>>,
    projection: Arc<MetadataProjection>,
    disk_policy: DiskCachePolicy,
    items: Arc<dyn ItemRepository>,
    queue: Arc<OfflineMutationQueue>,
    prefetch: Arc<PrefetchScheduler>,
    realtime: RealtimeClient,
    continue_watching: watch::Sender<Vec<ItemSummary>>,
    session: RwLock<Option<ServerSession>>,
    scheduled: Vec<TaskId>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn open_database(config: &CoreConfig) -> DatabaseConfig {
    if config.database_path.as_os_str() == ":memory:" {
        DatabaseConfig::in_memory()
    } else {
        DatabaseConfig::new(&config.database_path)
    }
}

impl CoreService {
    /// Build every component and start the background tasks.
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        Self::bootstrap_with_transport(config, Arc::new(WebSocketTransport::new())).await
    }

    /// [`bootstrap`](Self::bootstrap) with a custom push transport.
    #[instrument(skip_all, fields(database = %config.database_path.display()))]
    pub async fn bootstrap_with_transport(
        config: CoreConfig,
        push_transport: Arc<dyn PushTransport>,
    ) -> Result<Self> {
        config.validate()?;

        if let Some(sink) = &config.logger_sink {
            let logging = LoggingConfig::default().with_logger_sink(sink.clone());
            if let Err(e) = init_logging(logging) {
                debug!(error = %e, "logging already initialized");
            }
        }

        let settings = SettingsHandle::new(config.settings.clone())?;
        let events = EventBus::new(EVENT_BUS_CAPACITY);
        let clock: Arc<dyn Clock> = config.clock.clone();
        let cancel = CancellationToken::new();

        let pool = create_pool(open_database(&config)).await?;

        let limiter = AdaptiveRateLimiter::new().with_event_bus(events.clone());
        let executor = RequestExecutor::new(
            PriorityDispatcher::new(config.max_concurrent_requests)?,
            Arc::new(limiter),
            Arc::new(EndpointHealthRegistry::new(clock.clone())),
            settings.clone(),
        )
        .with_event_bus(events.clone());

        let grid_repository = Arc::new(SqliteGridProjectionRepository::new(
            pool.clone(),
            clock.clone(),
        ));
        let grid = Arc::new(GridWindowCache::new(grid_repository).with_event_bus(events.clone()));
        let caches = Arc::new(
            CacheLayer::new(&settings.current().cache, Some(events.clone()))?
                .with_grid(grid.clone()),
        );
        let item_memo =
            Arc::new(TtlCache::new(ITEM_MEMO, clock.clone()).with_event_bus(events.clone()));
        caches.register_memo(item_memo.clone());
        let projection = Arc::new(MetadataProjection {
            caches: caches.clone(),
            item_memo: item_memo.clone(),
        });

        let items: Arc<dyn ItemRepository> = Arc::new(SqliteItemRepository::new(pool.clone()));
        let store = Arc::new(SqliteMutationStore::new(pool.clone(), clock.clone()));
        let queue = Arc::new(
            OfflineMutationQueue::new(store, executor.clone(), config.media_api.clone())
                .with_network_monitor(config.network_monitor.clone())
                .with_event_bus(events.clone())
                .with_revert_listener(projection.clone()),
        );

        let prefetch = Arc::new(
            PrefetchScheduler::new(
                config.media_api.clone(),
                executor.clone(),
                caches.clone(),
                settings.clone(),
                clock.clone(),
            )
            .with_network_monitor(config.network_monitor.clone())
            .with_item_repository(items.clone())
            .with_event_bus(events.clone())
            .with_cancellation(cancel.child_token()),
        );

        let realtime = RealtimeClient::new(push_transport, settings.clone(), clock)
            .with_event_bus(events.clone());

        let (continue_watching, lists) = watch::channel(Vec::new());
        let mut tasks = vec![
            DrainTriggers::new(queue.clone(), settings.clone())
                .with_network_monitor(config.network_monitor.clone())
                .spawn(cancel.child_token()),
            spawn_settings_watcher(&settings, caches.clone(), cancel.child_token()),
        ];
        let listener = prefetch.clone();
        tasks.push(tokio::spawn(async move { listener.listen(lists).await }));

        let mut scheduled = Vec::new();
        if let Some(host) = &config.background_executor {
            if config.features.enable_background_sync {
                scheduled.push(
                    register_drain_job(host.as_ref(), queue.clone(), &settings, cancel.child_token())
                        .await?,
                );
            }
            if config.features.enable_background_prefetch {
                scheduled.push(prefetch.register_job(host.as_ref()).await?);
            }
        }

        info!(
            realtime = config.features.enable_realtime,
            background_sync = config.features.enable_background_sync,
            background_prefetch = config.features.enable_background_prefetch,
            "core service started"
        );

        Ok(Self {
            features: config.features,
            disk_policy: DiskCachePolicy::new(settings.clone()),
            settings,
            events,
            pool,
            media_api: config.media_api,
            executor,
            caches,
            grid,
            item_memo,
            projection,
            items,
            queue,
            prefetch,
            realtime,
            continue_watching,
            session: RwLock::new(None),
            scheduled,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Host background tasks registered at bootstrap.
    pub fn scheduled_jobs(&self) -> &[TaskId] {
        &self.scheduled
    }

    fn endpoint(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|session| session.server_url.clone())
    }

    // -------------------------------------------------------------------------
    // Session
    // -------------------------------------------------------------------------

    /// Install credentials, resume draining and, when enabled, open the push
    /// connection. `on_auth_failed` runs once if the push connection rejects
    /// the credentials.
    #[instrument(skip_all, fields(user_id = %session.user_id))]
    pub async fn sign_in<F>(&self, session: ServerSession, on_auth_failed: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.media_api.set_session(Some(session.clone()));
        self.queue.set_endpoint(Some(session.server_url.clone()));
        self.prefetch.set_endpoint(Some(session.server_url.clone()));
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());

        if self.features.enable_realtime {
            self.realtime.start(session, on_auth_failed).await;
        }
        self.queue.request_drain();
        info!("signed in");
    }

    /// Close the push connection, forget credentials and drop cached data.
    /// Pending mutations stay queued for the next sign-in.
    pub async fn sign_out(&self) {
        self.realtime.stop().await;
        self.media_api.set_session(None);
        self.queue.set_endpoint(None);
        self.prefetch.set_endpoint(None);
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.continue_watching.send_replace(Vec::new());

        let cleared = self.caches.clear_all(ClearReason::SignOut);
        info!(cleared, "signed out");
    }

    // -------------------------------------------------------------------------
    // Remote reads
    // -------------------------------------------------------------------------

    /// Item detail, memoized for the cache TTL and kept in the metadata LRU.
    pub async fn item(&self, item_id: &str) -> RemoteCallResult<ItemDetail> {
        let Some(endpoint) = self.endpoint() else {
            return RemoteCallResult::Error(RemoteError::new(ErrorKind::Auth, "no active session"));
        };

        let api = &self.media_api;
        let executor = &self.executor;
        let ep = endpoint.as_str();
        let result = self
            .item_memo
            .get_or_load(item_id, self.caches.memo_ttl(), || async move {
                executor
                    .execute(Priority::High, Some(ep), || async move {
                        api.get_item(ep, item_id).await
                    })
                    .await
            })
            .await;

        if let Some(detail) = result.as_success() {
            self.caches.metadata().put(item_id, detail.clone());
        }
        result
    }

    /// Drop the memoized detail of `item_id`.
    pub fn invalidate_item(&self, item_id: &str) -> bool {
        self.item_memo.invalidate(item_id)
    }

    /// Fetch continue-watching and hand the list to the prefetch scheduler.
    pub async fn continue_watching(&self) -> RemoteCallResult<Vec<ItemSummary>> {
        let Some(endpoint) = self.endpoint() else {
            return RemoteCallResult::Error(RemoteError::new(ErrorKind::Auth, "no active session"));
        };

        let limit = u32::try_from(self.settings.current().prefetch.max_items.max(1))
            .unwrap_or(u32::MAX);
        let api = &self.media_api;
        let ep = endpoint.as_str();
        let result = self
            .executor
            .execute(Priority::High, Some(ep), || async move {
                api.continue_watching(ep, limit).await
            })
            .await;

        if let Some(items) = result.as_success() {
            self.continue_watching.send_replace(items.clone());
        }
        result
    }

    /// Prefetched primary image of `item_id`.
    pub fn thumbnail(&self, item_id: &str) -> Option<Bytes> {
        let width = self.settings.current().prefetch.image_max_width;
        self.caches.thumbnails().get(&thumbnail_key(item_id, width))
    }

    /// Locally stored item record, including flag states.
    pub async fn stored_item(&self, item_id: &str) -> Result<Option<core_library::StoredItem>> {
        Ok(self.items.find_by_id(item_id).await?)
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Apply a user-data change locally and queue it for the server.
    pub async fn toggle(
        &self,
        subject_id: &str,
        kind: MutationKind,
        desired_value: bool,
    ) -> Result<FlagState> {
        let state = self.queue.toggle(subject_id, kind, desired_value).await?;
        self.projection.apply(subject_id, kind, desired_value);
        Ok(state)
    }

    pub async fn flags(&self, subject_id: &str) -> Result<SubjectFlags> {
        Ok(self.queue.flags(subject_id).await?)
    }

    pub async fn pending_mutations(&self) -> Result<Vec<PendingMutation>> {
        Ok(self.queue.pending().await?)
    }

    /// Drain now and wait for the result.
    pub async fn drain_now(&self) -> Result<DrainReport> {
        Ok(self.queue.drain(&self.cancel).await?)
    }

    // -------------------------------------------------------------------------
    // Host signals
    // -------------------------------------------------------------------------

    /// Connectivity reported by a host without a [`NetworkMonitor`](bridge_traits::NetworkMonitor)
    /// subscription.
    pub fn on_connectivity_changed(&self, connected: bool) {
        debug!(connected, "connectivity signal");
        if connected {
            self.queue.request_drain();
        }
    }

    pub fn handle_memory_pressure(&self, level: MemoryPressureLevel) -> usize {
        self.caches.handle_memory_pressure(level)
    }

    /// Byte limits the host should apply to its disk caches.
    pub fn disk_cache_limits(&self, available_bytes: u64) -> Vec<DiskCacheLimit> {
        self.disk_policy.resolve_all(available_bytes)
    }

    // -------------------------------------------------------------------------
    // Components
    // -------------------------------------------------------------------------

    pub fn caches(&self) -> &Arc<CacheLayer> {
        &self.caches
    }

    pub fn grid(&self) -> &Arc<GridWindowCache> {
        &self.grid
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn cache_stats(&self) -> BTreeMap<String, CacheStats> {
        self.caches.stats()
    }

    pub fn subscribe_playback(&self) -> broadcast::Receiver<PushEvent> {
        self.realtime.subscribe()
    }

    pub fn realtime_state(&self) -> ConnectionState {
        self.realtime.state()
    }

    /// Stop background tasks, the push connection and the database pool.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.prefetch.shutdown();
        self.realtime.stop().await;

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(error = %e, "background task panicked");
                }
            }
        }

        self.pool.close().await;
        info!("core service stopped");
    }
}

fn spawn_settings_watcher(
    settings: &SettingsHandle,
    caches: Arc<CacheLayer>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut updates = settings.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let cache = updates.borrow_and_update().cache.clone();
                    match caches.apply_settings(&cache) {
                        Ok(()) => debug!("cache settings applied"),
                        Err(e) => warn!(error = %e, "cache settings rejected"),
                    }
                }
            }
        }
    })
}
