//! Offline mutation queue against an in-memory database and a scripted
//! media server.

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, ItemDetail, ItemSummary, MediaServerApi, NetworkChangeStream, NetworkInfo,
    NetworkMonitor, NetworkType, SystemClock, UserData,
};
use bytes::Bytes;
use core_library::db::create_test_pool;
use core_library::{FlagState, MutationKind};
use core_request::{AdaptiveRateLimiter, EndpointHealthRegistry, PriorityDispatcher, RequestExecutor};
use core_runtime::events::{CoreEvent, EventBus, MutationEvent};
use core_runtime::settings::SettingsHandle;
use core_sync::{
    DrainReport, DrainSkipReason, DrainSummary, DrainTriggers, OfflineMutationQueue,
    RevertListener, SqliteMutationStore,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

const ENDPOINT: &str = "https://media.local";

struct FakeServer {
    calls: Mutex<Vec<(&'static str, String, bool)>>,
    failures: Mutex<HashMap<String, u16>>,
    blocking: AtomicBool,
    gate: Semaphore,
}

impl FakeServer {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            blocking: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }

    fn fail(&self, item_id: &str, status: u16) {
        self.failures
            .lock()
            .unwrap()
            .insert(item_id.to_string(), status);
    }

    fn calls(&self) -> Vec<(&'static str, String, bool)> {
        self.calls.lock().unwrap().clone()
    }

    async fn record(&self, op: &'static str, item_id: &str, value: bool) -> Result<UserData, BridgeError> {
        if self.blocking.load(Ordering::SeqCst) {
            let _permit = self.gate.acquire().await;
        }
        self.calls
            .lock()
            .unwrap()
            .push((op, item_id.to_string(), value));
        if let Some(status) = self.failures.lock().unwrap().get(item_id) {
            return Err(BridgeError::Status {
                status: *status,
                message: "rejected".to_string(),
            });
        }
        Ok(UserData {
            is_favorite: op == "favorite" && value,
            played: op == "played" && value,
            playback_position_ticks: 0,
        })
    }
}

#[async_trait]
impl MediaServerApi for FakeServer {
    async fn get_item(&self, _endpoint: &str, item_id: &str) -> bridge_traits::Result<ItemDetail> {
        Err(BridgeError::Status {
            status: 404,
            message: item_id.to_string(),
        })
    }

    async fn get_primary_image(
        &self,
        _endpoint: &str,
        _item_id: &str,
        _max_width: u32,
    ) -> bridge_traits::Result<Bytes> {
        Ok(Bytes::new())
    }

    async fn set_favorite(
        &self,
        _endpoint: &str,
        item_id: &str,
        favorite: bool,
    ) -> bridge_traits::Result<UserData> {
        self.record("favorite", item_id, favorite).await
    }

    async fn set_played(
        &self,
        _endpoint: &str,
        item_id: &str,
        played: bool,
    ) -> bridge_traits::Result<UserData> {
        self.record("played", item_id, played).await
    }

    async fn continue_watching(
        &self,
        _endpoint: &str,
        _limit: u32,
    ) -> bridge_traits::Result<Vec<ItemSummary>> {
        Ok(Vec::new())
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
    queries: AtomicUsize,
    changes: Mutex<Option<mpsc::UnboundedReceiver<NetworkInfo>>>,
}

impl FakeNetwork {
    fn new(connected: bool) -> (Arc<Self>, mpsc::UnboundedSender<NetworkInfo>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let network = Arc::new(Self {
            connected: AtomicBool::new(connected),
            queries: AtomicUsize::new(0),
            changes: Mutex::new(Some(rx)),
        });
        (network, tx)
    }
}

#[async_trait]
impl NetworkMonitor for FakeNetwork {
    async fn get_network_info(&self) -> bridge_traits::Result<NetworkInfo> {
        self.queries.fetch_add(1, Ordering::SeqCst);
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

#[derive(Default)]
struct RecordedReverts(Mutex<Vec<(String, MutationKind, bool)>>);

impl RevertListener for RecordedReverts {
    fn reverted(&self, subject_id: &str, kind: MutationKind, value: bool) {
        self.0
            .lock()
            .unwrap()
            .push((subject_id.to_string(), kind, value));
    }
}

struct Harness {
    queue: Arc<OfflineMutationQueue>,
    server: Arc<FakeServer>,
    bus: EventBus,
    reverts: Arc<RecordedReverts>,
}

async fn harness_with(network: Option<Arc<dyn NetworkMonitor>>) -> Harness {
    let pool = create_test_pool().await.unwrap();
    let clock = Arc::new(SystemClock);
    let store = Arc::new(SqliteMutationStore::new(pool, clock.clone()));
    let executor = RequestExecutor::new(
        PriorityDispatcher::new(4).unwrap(),
        Arc::new(AdaptiveRateLimiter::new()),
        Arc::new(EndpointHealthRegistry::new(clock)),
        SettingsHandle::default(),
    );
    let server = Arc::new(FakeServer::new());
    let bus = EventBus::new(64);
    let reverts = Arc::new(RecordedReverts::default());

    let queue = OfflineMutationQueue::new(store, executor, server.clone())
        .with_network_monitor(network)
        .with_event_bus(bus.clone())
        .with_revert_listener(reverts.clone());
    queue.set_endpoint(Some(ENDPOINT.to_string()));

    Harness {
        queue: Arc::new(queue),
        server,
        bus,
        reverts,
    }
}

async fn harness() -> Harness {
    harness_with(None).await
}

fn completed(report: DrainReport) -> DrainSummary {
    match report {
        DrainReport::Completed(summary) => summary,
        other => panic!("expected a completed drain, got {other:?}"),
    }
}

async fn wait_until_drained(queue: &OfflineMutationQueue) {
    for _ in 0..200 {
        if queue.pending_count().await.unwrap() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue was never drained");
}

#[tokio::test]
async fn test_offline_favorite_applied_on_drain() {
    let h = harness().await;

    let state = h.queue.toggle("a", MutationKind::Favorite, true).await.unwrap();
    assert_eq!(
        state,
        FlagState::PendingSync {
            value: true,
            prior: false
        }
    );
    assert!(h.server.calls().is_empty());

    let summary = completed(h.queue.drain(&CancellationToken::new()).await.unwrap());
    assert_eq!(summary.applied, 1);
    assert_eq!(summary.remaining, 0);
    assert_eq!(h.server.calls(), vec![("favorite", "a".to_string(), true)]);
    assert_eq!(
        h.queue.flags("a").await.unwrap().favorite,
        FlagState::Confirmed(true)
    );
}

#[tokio::test]
async fn test_coalesced_toggles_send_only_latest_value() {
    let h = harness().await;
    h.queue.toggle("a", MutationKind::Favorite, true).await.unwrap();
    h.queue.toggle("a", MutationKind::Favorite, false).await.unwrap();

    let pending = h.queue.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].desired_value);

    completed(h.queue.drain(&CancellationToken::new()).await.unwrap());
    assert_eq!(h.server.calls(), vec![("favorite", "a".to_string(), false)]);
    assert_eq!(
        h.queue.flags("a").await.unwrap().favorite,
        FlagState::Confirmed(false)
    );
}

#[tokio::test]
async fn test_failed_reconciliation_reverts_and_halts_batch() {
    let h = harness().await;
    let mut rx = h.bus.subscribe();
    h.server.fail("a", 400);

    h.queue.toggle("a", MutationKind::Favorite, true).await.unwrap();
    h.queue.toggle("b", MutationKind::Played, true).await.unwrap();

    let summary = completed(h.queue.drain(&CancellationToken::new()).await.unwrap());
    assert_eq!(summary.applied, 0);
    assert_eq!(summary.abandoned, 1);
    assert!(summary.halted);
    assert_eq!(summary.remaining, 1);

    let flags = h.queue.flags("a").await.unwrap();
    assert_eq!(flags.favorite, FlagState::Confirmed(false));
    assert!(!flags.has_pending());
    assert!(h.queue.flags("b").await.unwrap().played.is_pending());
    assert_eq!(h.server.calls().len(), 1);
    assert_eq!(
        *h.reverts.0.lock().unwrap(),
        vec![("a".to_string(), MutationKind::Favorite, false)]
    );

    let mut abandoned = None;
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Mutation(MutationEvent::Abandoned {
            subject_id,
            reverted_to,
            ..
        }) = event
        {
            abandoned = Some((subject_id, reverted_to));
        }
    }
    assert_eq!(abandoned, Some(("a".to_string(), false)));
}

#[tokio::test]
async fn test_played_sent_to_played_endpoint() {
    let h = harness().await;
    h.queue.toggle("a", MutationKind::Played, true).await.unwrap();

    let summary = completed(h.queue.drain(&CancellationToken::new()).await.unwrap());
    assert_eq!(summary.applied, 1);
    assert_eq!(h.server.calls(), vec![("played", "a".to_string(), true)]);
    assert_eq!(
        h.queue.flags("a").await.unwrap().played,
        FlagState::Confirmed(true)
    );
    assert!(h.reverts.0.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_watchlist_confirmed_without_remote_call() {
    let h = harness().await;
    h.queue.toggle("a", MutationKind::Watchlist, true).await.unwrap();

    let summary = completed(h.queue.drain(&CancellationToken::new()).await.unwrap());
    assert_eq!(summary.applied, 1);
    assert!(h.server.calls().is_empty());
    assert_eq!(
        h.queue.flags("a").await.unwrap().watchlist,
        FlagState::Confirmed(true)
    );
}

#[tokio::test]
async fn test_overlapping_drain_returns_already_running() {
    let h = harness().await;
    h.server.blocking.store(true, Ordering::SeqCst);
    h.queue.toggle("a", MutationKind::Favorite, true).await.unwrap();

    let first = {
        let queue = h.queue.clone();
        tokio::spawn(async move { queue.drain(&CancellationToken::new()).await })
    };
    while !h.queue.is_draining() {
        tokio::task::yield_now().await;
    }

    let second = h.queue.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(second, DrainReport::AlreadyRunning);

    h.server.gate.add_permits(1);
    let summary = completed(first.await.unwrap().unwrap());
    assert_eq!(summary.applied, 1);
    assert!(!h.queue.is_draining());
}

#[tokio::test]
async fn test_drain_skipped_while_offline() {
    let (network, _tx) = FakeNetwork::new(false);
    let h = harness_with(Some(network)).await;
    h.queue.toggle("a", MutationKind::Favorite, true).await.unwrap();

    let report = h.queue.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(report, DrainReport::Skipped(DrainSkipReason::Offline));
    assert_eq!(h.queue.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_drain_waits_for_session() {
    let h = harness().await;
    h.queue.set_endpoint(None);
    h.queue.toggle("a", MutationKind::Played, true).await.unwrap();

    let report = h.queue.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(report, DrainReport::Skipped(DrainSkipReason::NoSession));
}

#[tokio::test]
async fn test_cancelled_drain_leaves_rows_pending() {
    let h = harness().await;
    h.queue.toggle("a", MutationKind::Favorite, true).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = completed(h.queue.drain(&cancel).await.unwrap());

    assert!(summary.cancelled);
    assert_eq!(summary.remaining, 1);
    assert!(h.server.calls().is_empty());
    assert!(h.queue.flags("a").await.unwrap().favorite.is_pending());
}

#[tokio::test]
async fn test_empty_subject_rejected() {
    let h = harness().await;
    assert!(h.queue.toggle(" ", MutationKind::Favorite, true).await.is_err());
}

#[tokio::test]
async fn test_request_drain_runs_queue() {
    let h = harness().await;
    let cancel = CancellationToken::new();
    let handle = DrainTriggers::new(h.queue.clone(), SettingsHandle::default()).spawn(cancel.clone());

    h.queue.toggle("a", MutationKind::Favorite, true).await.unwrap();
    wait_until_drained(&h.queue).await;
    assert_eq!(h.server.calls().len(), 1);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_reconnect_triggers_drain() {
    let (network, changes) = FakeNetwork::new(false);
    let h = harness_with(Some(network.clone())).await;
    h.queue.toggle("a", MutationKind::Favorite, true).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = DrainTriggers::new(h.queue.clone(), SettingsHandle::default())
        .with_network_monitor(Some(network.clone()))
        .spawn(cancel.clone());

    // Initial state read plus the skipped drain for the queued request.
    for _ in 0..200 {
        if network.queries.load(Ordering::SeqCst) >= 2 && !h.queue.is_draining() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.queue.pending_count().await.unwrap(), 1);

    network.connected.store(true, Ordering::SeqCst);
    changes.send(NetworkInfo::connected(NetworkType::WiFi)).unwrap();

    wait_until_drained(&h.queue).await;
    assert_eq!(h.server.calls(), vec![("favorite", "a".to_string(), true)]);

    cancel.cancel();
    handle.await.unwrap();
}
