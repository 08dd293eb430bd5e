//! End-to-end flows through a bootstrapped core with fake host bridges.

use async_trait::async_trait;
use bridge_traits::{
    BackgroundExecutor, BridgeError, HttpClient, HttpRequest, HttpResponse, ItemDetail,
    ItemSummary, MediaServerApi, MemoryPressureLevel, NetworkChangeStream, NetworkInfo,
    NetworkMonitor, NetworkType, ServerSession, TaskConstraints, TaskHandler, TaskId,
    TaskOutcome, TaskStatus, UserData,
};
use bytes::Bytes;
use core_library::{FlagState, MutationKind};
use core_prefetch::PREFETCH_TASK_ID;
use core_realtime::{PushConnection, PushTransport, RealtimeError};
use core_request::ErrorKind;
use core_service::{CoreConfig, CoreService, DRAIN_TASK_ID};
use core_sync::{DrainReport, DrainSkipReason};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const SERVER: &str = "https://media.local";

fn session() -> ServerSession {
    ServerSession {
        server_url: SERVER.to_string(),
        access_token: "token".to_string(),
        user_id: "user-1".to_string(),
        device_id: "desktop-1".to_string(),
    }
}

fn detail(id: &str) -> ItemDetail {
    ItemDetail {
        id: id.to_string(),
        name: format!("Item {id}"),
        image_tags: HashMap::from([("Primary".to_string(), format!("tag-{id}"))]),
        ..ItemDetail::default()
    }
}

/// Poll `check` every 10ms for up to five seconds.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[derive(Default)]
struct FakeMediaServer {
    details: Mutex<HashMap<String, ItemDetail>>,
    continue_watching: Mutex<Vec<ItemSummary>>,
    item_calls: AtomicUsize,
    favorites: Mutex<Vec<(String, bool)>>,
    rejected: Mutex<Vec<String>>,
    sessions: Mutex<Vec<Option<String>>>,
}

impl FakeMediaServer {
    fn with_items(ids: &[&str]) -> Arc<Self> {
        let server = Self::default();
        {
            let mut details = server.details.lock().unwrap();
            for id in ids {
                details.insert(id.to_string(), detail(id));
            }
        }
        Arc::new(server)
    }

    fn item_calls(&self) -> usize {
        self.item_calls.load(Ordering::SeqCst)
    }

    fn favorites(&self) -> Vec<(String, bool)> {
        self.favorites.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaServerApi for FakeMediaServer {
    fn set_session(&self, session: Option<ServerSession>) {
        self.sessions
            .lock()
            .unwrap()
            .push(session.map(|s| s.user_id));
    }

    async fn get_item(&self, _endpoint: &str, item_id: &str) -> bridge_traits::Result<ItemDetail> {
        self.item_calls.fetch_add(1, Ordering::SeqCst);
        self.details
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .ok_or_else(|| BridgeError::Status {
                status: 404,
                message: item_id.to_string(),
            })
    }

    async fn get_primary_image(
        &self,
        _endpoint: &str,
        item_id: &str,
        max_width: u32,
    ) -> bridge_traits::Result<Bytes> {
        Ok(Bytes::from(format!("{item_id}@{max_width}")))
    }

    async fn set_favorite(
        &self,
        _endpoint: &str,
        item_id: &str,
        favorite: bool,
    ) -> bridge_traits::Result<UserData> {
        if self.rejected.lock().unwrap().iter().any(|id| id == item_id) {
            return Err(BridgeError::Status {
                status: 404,
                message: format!("unknown item {item_id}"),
            });
        }
        self.favorites
            .lock()
            .unwrap()
            .push((item_id.to_string(), favorite));
        Ok(UserData {
            is_favorite: favorite,
            ..UserData::default()
        })
    }

    async fn set_played(
        &self,
        _endpoint: &str,
        _item_id: &str,
        played: bool,
    ) -> bridge_traits::Result<UserData> {
        Ok(UserData {
            played,
            ..UserData::default()
        })
    }

    async fn continue_watching(
        &self,
        _endpoint: &str,
        _limit: u32,
    ) -> bridge_traits::Result<Vec<ItemSummary>> {
        Ok(self.continue_watching.lock().unwrap().clone())
    }
}

struct OfflineHttp;

#[async_trait]
impl HttpClient for OfflineHttp {
    async fn execute(&self, _request: HttpRequest) -> bridge_traits::Result<HttpResponse> {
        Err(BridgeError::NotAvailable("no http in tests".to_string()))
    }
}

struct ChannelStream(mpsc::UnboundedReceiver<NetworkInfo>);

#[async_trait]
impl NetworkChangeStream for ChannelStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        self.0.recv().await
    }
}

struct FakeNetwork {
    connected: AtomicBool,
    changes: Mutex<Option<mpsc::UnboundedReceiver<NetworkInfo>>>,
}

impl FakeNetwork {
    fn new(connected: bool) -> (Arc<Self>, mpsc::UnboundedSender<NetworkInfo>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let network = Arc::new(Self {
            connected: AtomicBool::new(connected),
            changes: Mutex::new(Some(rx)),
        });
        (network, tx)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl NetworkMonitor for FakeNetwork {
    async fn get_network_info(&self) -> bridge_traits::Result<NetworkInfo> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(NetworkInfo::connected(NetworkType::WiFi))
        } else {
            Ok(NetworkInfo::disconnected())
        }
    }

    async fn subscribe_changes(&self) -> bridge_traits::Result<Box<dyn NetworkChangeStream>> {
        match self.changes.lock().unwrap().take() {
            Some(rx) => Ok(Box::new(ChannelStream(rx))),
            None => Err(BridgeError::NotAvailable("already subscribed".into())),
        }
    }
}

/// Records registrations; tasks only run when a test invokes the handler.
#[derive(Default)]
struct RecordingHost {
    handlers: Mutex<HashMap<String, TaskHandler>>,
    schedules: Mutex<Vec<(String, Duration, TaskConstraints)>>,
}

impl RecordingHost {
    fn handler(&self, task_id: &str) -> TaskHandler {
        self.handlers.lock().unwrap()[task_id].clone()
    }
}

#[async_trait]
impl BackgroundExecutor for RecordingHost {
    async fn register_handler(&self, task_id: &str, handler: TaskHandler) -> bridge_traits::Result<()> {
        self.handlers
            .lock()
            .unwrap()
            .insert(task_id.to_string(), handler);
        Ok(())
    }

    async fn schedule_task(
        &self,
        task_id: &str,
        interval: Duration,
        constraints: TaskConstraints,
    ) -> bridge_traits::Result<TaskId> {
        self.schedules
            .lock()
            .unwrap()
            .push((task_id.to_string(), interval, constraints));
        Ok(TaskId::new(task_id))
    }

    async fn schedule_once(
        &self,
        task_id: &str,
        delay: Duration,
        constraints: TaskConstraints,
    ) -> bridge_traits::Result<TaskId> {
        self.schedule_task(task_id, delay, constraints).await
    }

    async fn cancel_task(&self, _task_id: &TaskId) -> bridge_traits::Result<()> {
        Ok(())
    }

    async fn get_task_status(&self, _task_id: &TaskId) -> bridge_traits::Result<TaskStatus> {
        Ok(TaskStatus::Scheduled)
    }

    async fn list_tasks(&self) -> bridge_traits::Result<Vec<TaskId>> {
        Ok(self
            .schedules
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _, _)| TaskId::new(id.clone()))
            .collect())
    }
}

/// Transport that refuses every handshake with 401.
struct RejectingTransport {
    attempts: AtomicUsize,
}

#[async_trait]
impl PushTransport for RejectingTransport {
    async fn connect(
        &self,
        _session: &ServerSession,
    ) -> core_realtime::Result<Box<dyn PushConnection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(RealtimeError::AuthRejected { code: 401 })
    }
}

struct Harness {
    core: CoreService,
    server: Arc<FakeMediaServer>,
    network: Arc<FakeNetwork>,
    changes: mpsc::UnboundedSender<NetworkInfo>,
    host: Arc<RecordingHost>,
}

fn config(
    server: &Arc<FakeMediaServer>,
    network: &Arc<FakeNetwork>,
    host: &Arc<RecordingHost>,
) -> core_service::CoreConfigBuilder {
    CoreConfig::builder()
        .database_path(":memory:")
        .http_client(Arc::new(OfflineHttp))
        .media_api(server.clone())
        .network_monitor(network.clone())
        .background_executor(host.clone())
}

async fn harness(connected: bool) -> Harness {
    let server = FakeMediaServer::with_items(&["a", "b"]);
    let (network, changes) = FakeNetwork::new(connected);
    let host = Arc::new(RecordingHost::default());
    let config = config(&server, &network, &host).build().unwrap();
    let core = CoreService::bootstrap(config).await.unwrap();
    Harness {
        core,
        server,
        network,
        changes,
        host,
    }
}

#[tokio::test]
async fn test_offline_favorite_syncs_after_reconnect() {
    let h = harness(false).await;
    h.core.sign_in(session(), || {}).await;

    let state = h
        .core
        .toggle("a", MutationKind::Favorite, true)
        .await
        .unwrap();
    assert_eq!(
        state,
        FlagState::PendingSync {
            value: true,
            prior: false
        }
    );
    assert_eq!(h.core.pending_mutations().await.unwrap().len(), 1);
    assert_eq!(
        h.core.drain_now().await.unwrap(),
        DrainReport::Skipped(DrainSkipReason::Offline)
    );
    assert!(h.server.favorites().is_empty());

    // Let the trigger loop observe the offline state before the change.
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.network.set_connected(true);
    h.changes
        .send(NetworkInfo::connected(NetworkType::WiFi))
        .unwrap();

    let core = &h.core;
    assert!(
        eventually(|| async move { core.pending_mutations().await.unwrap().is_empty() }).await
    );
    assert_eq!(
        h.core.flags("a").await.unwrap().favorite,
        FlagState::Confirmed(true)
    );
    assert_eq!(h.server.favorites(), vec![("a".to_string(), true)]);

    h.core.shutdown().await;
}

#[tokio::test]
async fn test_item_is_memoized_and_cached() {
    let h = harness(true).await;
    h.core.sign_in(session(), || {}).await;

    let first = h.core.item("a").await;
    assert_eq!(first.as_success().map(|d| d.name.as_str()), Some("Item a"));
    let second = h.core.item("a").await;
    assert!(second.as_success().is_some());

    assert_eq!(h.server.item_calls(), 1);
    assert!(h.core.caches().metadata().contains("a"));

    h.core.shutdown().await;
}

#[tokio::test]
async fn test_item_without_session_is_auth_error() {
    let h = harness(true).await;

    let result = h.core.item("a").await;
    assert_eq!(result.error().map(|e| e.kind), Some(ErrorKind::Auth));
    assert_eq!(h.server.item_calls(), 0);

    h.core.shutdown().await;
}

#[tokio::test]
async fn test_critical_memory_pressure_clears_caches() {
    let h = harness(true).await;
    h.core.sign_in(session(), || {}).await;
    assert!(h.core.item("a").await.as_success().is_some());

    let cleared = h.core.handle_memory_pressure(MemoryPressureLevel::Critical);
    assert!(cleared >= 2);
    assert!(!h.core.caches().metadata().contains("a"));

    assert!(h.core.item("a").await.as_success().is_some());
    assert_eq!(h.server.item_calls(), 2);

    h.core.shutdown().await;
}

#[tokio::test]
async fn test_sign_out_clears_session_and_caches() {
    let h = harness(true).await;
    h.core.sign_in(session(), || {}).await;
    assert!(h.core.item("a").await.as_success().is_some());

    h.core.sign_out().await;

    assert!(h.core.caches().metadata().is_empty());
    assert_eq!(
        h.core.drain_now().await.unwrap(),
        DrainReport::Skipped(DrainSkipReason::NoSession)
    );
    assert_eq!(
        h.server.sessions.lock().unwrap().last().cloned(),
        Some(None)
    );

    h.core.shutdown().await;
}

#[tokio::test]
async fn test_toggle_updates_cached_metadata() {
    let h = harness(false).await;
    h.core.sign_in(session(), || {}).await;
    h.core.caches().metadata().put("b", detail("b"));

    h.core
        .toggle("b", MutationKind::Played, true)
        .await
        .unwrap();

    let cached = h.core.caches().metadata().get("b").unwrap();
    assert_eq!(cached.user_data.map(|u| u.played), Some(true));

    h.core.shutdown().await;
}

#[tokio::test]
async fn test_rejected_toggle_reverts_cached_metadata() {
    let h = harness(false).await;
    h.server.rejected.lock().unwrap().push("c".to_string());
    h.core.sign_in(session(), || {}).await;
    h.core.caches().metadata().put("c", detail("c"));

    h.core
        .toggle("c", MutationKind::Favorite, true)
        .await
        .unwrap();
    let cached = h.core.caches().metadata().get("c").unwrap();
    assert_eq!(cached.user_data.map(|u| u.is_favorite), Some(true));

    h.network.set_connected(true);
    let core = &h.core;
    assert!(
        eventually(|| async move {
            let _ = core.drain_now().await;
            core.pending_mutations().await.unwrap().is_empty()
        })
        .await
    );

    assert_eq!(
        h.core.flags("c").await.unwrap().favorite,
        FlagState::Confirmed(false)
    );
    let cached = h.core.caches().metadata().get("c").unwrap();
    assert_eq!(cached.user_data.map(|u| u.is_favorite), Some(false));
    assert!(h.server.favorites().is_empty());

    h.core.shutdown().await;
}

#[tokio::test]
async fn test_settings_update_resizes_metadata_cache() {
    let h = harness(true).await;

    h.core
        .settings()
        .update(|s| s.cache.metadata_capacity = 7)
        .unwrap();

    let caches = h.core.caches();
    assert!(eventually(|| async move { caches.metadata().capacity() == 7 }).await);

    h.core.shutdown().await;
}

#[tokio::test]
async fn test_continue_watching_prefetches_thumbnails() {
    let h = harness(true).await;
    *h.server.continue_watching.lock().unwrap() = vec![ItemSummary {
        id: "a".to_string(),
        name: "Item a".to_string(),
        ..ItemSummary::default()
    }];
    h.core.sign_in(session(), || {}).await;

    let list = h.core.continue_watching().await;
    assert_eq!(list.as_success().map(Vec::len), Some(1));

    let core = &h.core;
    assert!(eventually(|| async move { core.thumbnail("a").is_some() }).await);
    assert_eq!(h.core.thumbnail("a"), Some(Bytes::from("a@400")));
    assert!(h.core.caches().metadata().contains("a"));

    h.core.shutdown().await;
}

#[tokio::test]
async fn test_background_jobs_registered_with_host() {
    let server = FakeMediaServer::with_items(&["a"]);
    let (network, _changes) = FakeNetwork::new(true);
    let host = Arc::new(RecordingHost::default());
    let config = config(&server, &network, &host)
        .enable_background_sync(true)
        .enable_background_prefetch(true)
        .build()
        .unwrap();
    let core = CoreService::bootstrap(config).await.unwrap();

    let ids: Vec<&str> = core.scheduled_jobs().iter().map(TaskId::as_str).collect();
    assert_eq!(ids, vec![DRAIN_TASK_ID, PREFETCH_TASK_ID]);

    let schedules = host.schedules.lock().unwrap().clone();
    let (_, drain_interval, _) = &schedules[0];
    assert_eq!(*drain_interval, Duration::from_secs(300));
    let (_, prefetch_interval, prefetch_constraints) = &schedules[1];
    assert_eq!(*prefetch_interval, Duration::from_secs(3600));
    assert!(prefetch_constraints.requires_wifi);

    // Signed out: both jobs ask the host to retry.
    assert_eq!(
        (host.handler(DRAIN_TASK_ID))().await.unwrap(),
        TaskOutcome::Retry
    );
    assert_eq!(
        (host.handler(PREFETCH_TASK_ID))().await.unwrap(),
        TaskOutcome::Retry
    );

    core.shutdown().await;
}

#[tokio::test]
async fn test_jobs_not_registered_when_disabled() {
    let h = harness(true).await;

    assert!(h.core.scheduled_jobs().is_empty());
    assert!(h.host.handlers.lock().unwrap().is_empty());

    h.core.shutdown().await;
}

#[tokio::test]
async fn test_disk_cache_limits_follow_settings() {
    let h = harness(true).await;
    let cache = h.core.settings().current().cache;

    let limits = h.core.disk_cache_limits(1_000_000_000_000);
    assert!(!limits.is_empty());
    for limit in &limits {
        assert!(limit.max_bytes >= cache.disk_min_bytes);
        assert!(limit.max_bytes <= cache.disk_max_bytes);
    }

    let tiny = h.core.disk_cache_limits(0);
    assert!(tiny.iter().all(|l| l.max_bytes == cache.disk_min_bytes));

    h.core.shutdown().await;
}

#[tokio::test]
async fn test_realtime_auth_failure_reaches_host_callback() {
    let server = FakeMediaServer::with_items(&[]);
    let (network, _changes) = FakeNetwork::new(true);
    let host = Arc::new(RecordingHost::default());
    let transport = Arc::new(RejectingTransport {
        attempts: AtomicUsize::new(0),
    });
    let config = config(&server, &network, &host)
        .enable_realtime(true)
        .build()
        .unwrap();
    let core = CoreService::bootstrap_with_transport(config, transport.clone())
        .await
        .unwrap();

    let (tx, rx) = oneshot::channel();
    core.sign_in(session(), move || {
        let _ = tx.send(());
    })
    .await;

    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("auth callback not invoked")
        .unwrap();
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);

    core.shutdown().await;
}

#[tokio::test]
async fn test_realtime_disabled_does_not_connect() {
    let server = FakeMediaServer::with_items(&[]);
    let (network, _changes) = FakeNetwork::new(true);
    let host = Arc::new(RecordingHost::default());
    let transport = Arc::new(RejectingTransport {
        attempts: AtomicUsize::new(0),
    });
    let config = config(&server, &network, &host).build().unwrap();
    let core = CoreService::bootstrap_with_transport(config, transport.clone())
        .await
        .unwrap();

    core.sign_in(session(), || {}).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(core.realtime_state().as_str(), "disconnected");

    core.shutdown().await;
}
