//! Background Execution and Task Scheduling
//!
//! Hosts own the scheduling policy (WorkManager, BGTaskScheduler, a tokio
//! timer on desktop). The core registers handlers by task id and asks the host
//! to run them; a handler reports whether the host should retry later.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Task execution constraints
#[derive(Debug, Clone)]
pub struct TaskConstraints {
    pub requires_wifi: bool,
    pub requires_network: bool,
    pub requires_charging: bool,
}

impl Default for TaskConstraints {
    fn default() -> Self {
        Self {
            requires_wifi: false,
            requires_network: true,
            requires_charging: false,
        }
    }
}

/// Scheduled task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Task execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Scheduled,
    Running,
    /// Handler asked to be retried; the host will run it again later.
    RetryPending,
    Completed,
    Failed,
    Cancelled,
}

/// Result a task handler reports back to the host scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Preconditions were not met; run again after the host's retry delay.
    Retry,
}

/// Handler invoked by the host each time a task fires.
pub type TaskHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<TaskOutcome>> + Send + Sync>;

/// Background task executor trait
///
/// # Platform Notes
///
/// - iOS: BGAppRefreshTask, execution timing is system-determined
/// - Android: WorkManager with the given constraints, `Retry` maps to
///   `Result.retry()`
/// - Desktop: tokio timers
///
/// # Example
///
/// ```ignore
/// use bridge_traits::background::{BackgroundExecutor, TaskConstraints, TaskOutcome};
///
/// executor
///     .register_handler("prefetch", Arc::new(|| Box::pin(async { Ok(TaskOutcome::Completed) })))
///     .await?;
/// executor
///     .schedule_task("prefetch", Duration::from_secs(3600), TaskConstraints::default())
///     .await?;
/// ```
#[async_trait]
pub trait BackgroundExecutor: Send + Sync {
    /// Register the handler that runs when `task_id` fires.
    async fn register_handler(&self, task_id: &str, handler: TaskHandler) -> Result<()>;

    /// Schedule a recurring task
    async fn schedule_task(
        &self,
        task_id: &str,
        interval: Duration,
        constraints: TaskConstraints,
    ) -> Result<TaskId>;

    /// Schedule a one-time delayed task
    async fn schedule_once(
        &self,
        task_id: &str,
        delay: Duration,
        constraints: TaskConstraints,
    ) -> Result<TaskId>;

    /// Cancel a scheduled task
    async fn cancel_task(&self, task_id: &TaskId) -> Result<()>;

    /// Get status of a task
    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus>;

    /// List all scheduled tasks
    async fn list_tasks(&self) -> Result<Vec<TaskId>>;

    /// Check if background execution is available
    async fn is_available(&self) -> bool {
        true
    }
}
