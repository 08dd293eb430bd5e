//! Background Task Execution Implementation

use async_trait::async_trait;
use bridge_traits::{
    background::{
        BackgroundExecutor, TaskConstraints, TaskHandler, TaskId, TaskOutcome, TaskStatus,
    },
    error::{BridgeError, Result},
    network::NetworkMonitor,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);
const MAX_ONE_TIME_RETRIES: u32 = 5;

/// Tokio-based background executor for desktop.
///
/// Recurring tasks fire every `interval`; a handler answering
/// [`TaskOutcome::Retry`] runs again after the retry delay instead of waiting
/// a full interval.
pub struct TokioBackgroundExecutor {
    tasks: Arc<RwLock<HashMap<TaskId, TaskInfo>>>,
    handlers: Arc<RwLock<HashMap<String, TaskHandler>>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    retry_delay: Duration,
}

struct TaskInfo {
    status: TaskStatus,
    handle: Option<JoinHandle<()>>,
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Clone, Copy)]
enum Schedule {
    Recurring(Duration),
    Once(Duration),
}

struct TaskRun {
    tasks: Arc<RwLock<HashMap<TaskId, TaskInfo>>>,
    id: TaskId,
    handler: TaskHandler,
    constraints: TaskConstraints,
    monitor: Option<Arc<dyn NetworkMonitor>>,
    retry_delay: Duration,
}

impl TokioBackgroundExecutor {
    pub fn new() -> Self {
        Self::with_network_monitor(None)
    }

    /// Create a background executor that checks network constraints.
    pub fn with_network_monitor(monitor: Option<Arc<dyn NetworkMonitor>>) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            network_monitor: monitor,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    async fn handler_for(&self, task_id: &str) -> Result<TaskHandler> {
        let handlers = self.handlers.read().await;
        handlers.get(task_id).cloned().ok_or_else(|| {
            BridgeError::OperationFailed(format!("No handler registered for task: {}", task_id))
        })
    }

    async fn constraints_satisfied(
        monitor: Option<&Arc<dyn NetworkMonitor>>,
        constraints: &TaskConstraints,
    ) -> bool {
        if !(constraints.requires_network || constraints.requires_wifi) {
            return true;
        }

        let Some(monitor) = monitor else {
            warn!("Network constraints requested but no monitor provided; assuming satisfied");
            return true;
        };

        match monitor.get_network_info().await {
            Ok(info) if info.is_connected() => !constraints.requires_wifi || info.is_wifi(),
            Ok(_) => false,
            Err(err) => {
                warn!(error = %err, "Network monitor error");
                false
            }
        }
    }

    async fn schedule(
        &self,
        task_id: &str,
        schedule: Schedule,
        constraints: TaskConstraints,
    ) -> Result<TaskId> {
        let id = TaskId::new(task_id);
        let handler = self.handler_for(task_id).await?;
        let (cancel_tx, cancel_rx) = oneshot::channel();

        if let Some(previous) = self.tasks.write().await.remove(&id) {
            Self::stop(previous);
        }

        self.tasks.write().await.insert(
            id.clone(),
            TaskInfo {
                status: TaskStatus::Scheduled,
                handle: None,
                cancel: Some(cancel_tx),
            },
        );

        let run = TaskRun {
            tasks: Arc::clone(&self.tasks),
            id: id.clone(),
            handler,
            constraints,
            monitor: self.network_monitor.clone(),
            retry_delay: self.retry_delay,
        };
        let handle = tokio::spawn(run.drive(schedule, cancel_rx));

        if let Some(info) = self.tasks.write().await.get_mut(&id) {
            info.handle = Some(handle);
        }

        Ok(id)
    }

    fn stop(mut info: TaskInfo) {
        if let Some(cancel) = info.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(handle) = info.handle.take() {
            handle.abort();
        }
    }
}

impl TaskRun {
    async fn set_status(&self, status: TaskStatus) {
        if let Some(info) = self.tasks.write().await.get_mut(&self.id) {
            info.status = status;
        }
    }

    /// Runs the handler once if constraints allow. `None` means skipped.
    async fn fire(&self) -> Option<TaskOutcome> {
        if !TokioBackgroundExecutor::constraints_satisfied(self.monitor.as_ref(), &self.constraints)
            .await
        {
            debug!(task_id = %self.id.0, "Constraints not satisfied; skipping run");
            return None;
        }

        self.set_status(TaskStatus::Running).await;
        match (self.handler)().await {
            Ok(TaskOutcome::Completed) => {
                self.set_status(TaskStatus::Completed).await;
                Some(TaskOutcome::Completed)
            }
            Ok(TaskOutcome::Retry) => {
                debug!(task_id = %self.id.0, "Task requested retry");
                self.set_status(TaskStatus::RetryPending).await;
                Some(TaskOutcome::Retry)
            }
            Err(err) => {
                warn!(task_id = %self.id.0, error = %err, "Background task failed");
                self.set_status(TaskStatus::Failed).await;
                Some(TaskOutcome::Completed)
            }
        }
    }

    async fn drive(self, schedule: Schedule, mut cancel_rx: oneshot::Receiver<()>) {
        let mut next_delay = match schedule {
            Schedule::Recurring(_) => Duration::ZERO,
            Schedule::Once(delay) => delay,
        };
        let mut retries = 0u32;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    self.set_status(TaskStatus::Cancelled).await;
                    return;
                }
                _ = sleep(next_delay) => {}
            }

            let outcome = self.fire().await;

            next_delay = match (schedule, outcome) {
                (Schedule::Recurring(_), Some(TaskOutcome::Retry)) => self.retry_delay,
                (Schedule::Recurring(interval), _) => interval,
                (Schedule::Once(_), Some(TaskOutcome::Completed)) => return,
                (Schedule::Once(_), _) => {
                    retries += 1;
                    if retries > MAX_ONE_TIME_RETRIES {
                        warn!(task_id = %self.id.0, "One-time task gave up after retries");
                        self.set_status(TaskStatus::Failed).await;
                        return;
                    }
                    self.retry_delay
                }
            };
        }
    }
}

impl Default for TokioBackgroundExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackgroundExecutor for TokioBackgroundExecutor {
    async fn register_handler(&self, task_id: &str, handler: TaskHandler) -> Result<()> {
        self.handlers
            .write()
            .await
            .insert(task_id.to_string(), handler);
        Ok(())
    }

    async fn schedule_task(
        &self,
        task_id: &str,
        interval: Duration,
        constraints: TaskConstraints,
    ) -> Result<TaskId> {
        debug!(task_id, interval_secs = interval.as_secs(), "Scheduling recurring task");
        self.schedule(task_id, Schedule::Recurring(interval), constraints)
            .await
    }

    async fn schedule_once(
        &self,
        task_id: &str,
        delay: Duration,
        constraints: TaskConstraints,
    ) -> Result<TaskId> {
        debug!(task_id, delay_secs = delay.as_secs(), "Scheduling one-time task");
        self.schedule(task_id, Schedule::Once(delay), constraints)
            .await
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        debug!(task_id = %task_id.0, "Cancelling task");

        match self.tasks.write().await.remove(task_id) {
            Some(info) => {
                Self::stop(info);
                Ok(())
            }
            None => Err(BridgeError::OperationFailed(format!(
                "Task not found: {}",
                task_id.0
            ))),
        }
    }

    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .map(|info| info.status.clone())
            .ok_or_else(|| BridgeError::OperationFailed(format!("Task not found: {}", task_id.0)))
    }

    async fn list_tasks(&self) -> Result<Vec<TaskId>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::network::{NetworkChangeStream, NetworkInfo, NetworkType};
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>, outcome: TaskOutcome) -> TaskHandler {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(outcome)
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_task_runs_handler() {
        let executor = TokioBackgroundExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));
        executor
            .register_handler("test", counting_handler(counter.clone(), TaskOutcome::Completed))
            .await
            .unwrap();

        let task_id = executor
            .schedule_task("test", Duration::from_millis(30), TaskConstraints::default())
            .await
            .unwrap();

        sleep(Duration::from_millis(75)).await;

        assert!(counter.load(Ordering::SeqCst) >= 2);
        executor.cancel_task(&task_id).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_once_executes() {
        let executor = TokioBackgroundExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));
        executor
            .register_handler("once", counting_handler(counter.clone(), TaskOutcome::Completed))
            .await
            .unwrap();

        let task_id = executor
            .schedule_once("once", Duration::from_millis(25), TaskConstraints::default())
            .await
            .unwrap();

        sleep(Duration::from_millis(100)).await;

        assert_eq!(
            executor.get_task_status(&task_id).await.unwrap(),
            TaskStatus::Completed
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_outcome_reruns_after_retry_delay() {
        let executor =
            TokioBackgroundExecutor::new().with_retry_delay(Duration::from_millis(10));
        let counter = Arc::new(AtomicUsize::new(0));
        executor
            .register_handler("job", counting_handler(counter.clone(), TaskOutcome::Retry))
            .await
            .unwrap();

        let task_id = executor
            .schedule_task("job", Duration::from_secs(3600), TaskConstraints::default())
            .await
            .unwrap();

        sleep(Duration::from_millis(35)).await;

        assert!(counter.load(Ordering::SeqCst) >= 3);
        assert_eq!(
            executor.get_task_status(&task_id).await.unwrap(),
            TaskStatus::RetryPending
        );
        executor.cancel_task(&task_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_task_is_rejected() {
        let executor = TokioBackgroundExecutor::new();
        let result = executor
            .schedule_task("missing", Duration::from_secs(1), TaskConstraints::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cancel_task() {
        let executor = TokioBackgroundExecutor::new();
        executor
            .register_handler(
                "cancel",
                counting_handler(Arc::new(AtomicUsize::new(0)), TaskOutcome::Completed),
            )
            .await
            .unwrap();

        let task_id = executor
            .schedule_task("cancel", Duration::from_secs(1), TaskConstraints::default())
            .await
            .unwrap();

        executor.cancel_task(&task_id).await.unwrap();
        assert!(executor.get_task_status(&task_id).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wifi_constraint_blocks_until_wifi() {
        let wifi = Arc::new(AtomicBool::new(false));
        let monitor =
            Arc::new(TestNetworkMonitor { wifi: Arc::clone(&wifi) }) as Arc<dyn NetworkMonitor>;
        let executor = TokioBackgroundExecutor::with_network_monitor(Some(monitor));
        let counter = Arc::new(AtomicUsize::new(0));
        executor
            .register_handler("network", counting_handler(counter.clone(), TaskOutcome::Completed))
            .await
            .unwrap();

        let task_id = executor
            .schedule_task(
                "network",
                Duration::from_millis(40),
                TaskConstraints {
                    requires_wifi: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        sleep(Duration::from_millis(150)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        wifi.store(true, Ordering::SeqCst);
        sleep(Duration::from_millis(150)).await;
        assert!(counter.load(Ordering::SeqCst) >= 1);

        executor.cancel_task(&task_id).await.unwrap();
    }

    struct TestNetworkMonitor {
        wifi: Arc<AtomicBool>,
    }

    #[async_trait]
    impl NetworkMonitor for TestNetworkMonitor {
        async fn get_network_info(&self) -> Result<NetworkInfo> {
            if self.wifi.load(Ordering::SeqCst) {
                Ok(NetworkInfo::connected(NetworkType::WiFi))
            } else {
                Ok(NetworkInfo::connected(NetworkType::Cellular))
            }
        }

        async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
            Err(BridgeError::NotAvailable(
                "Change stream not supported in test monitor".into(),
            ))
        }
    }
}
