//! Host background job for the mutation queue drain.

use crate::error::Result;
use bridge_traits::{
    BackgroundExecutor, BridgeError, TaskConstraints, TaskHandler, TaskId, TaskOutcome,
};
use core_runtime::settings::SettingsHandle;
use core_sync::{DrainReport, OfflineMutationQueue};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Task id of the scheduled mutation drain.
pub const DRAIN_TASK_ID: &str = "sync.drain_mutations";

/// A skipped drain (offline, signed out) asks the host to retry.
fn outcome(report: DrainReport) -> TaskOutcome {
    match report {
        DrainReport::Skipped(_) => TaskOutcome::Retry,
        DrainReport::Completed(_) | DrainReport::AlreadyRunning => TaskOutcome::Completed,
    }
}

pub(crate) async fn register_drain_job(
    host: &dyn BackgroundExecutor,
    queue: Arc<OfflineMutationQueue>,
    settings: &SettingsHandle,
    cancel: CancellationToken,
) -> Result<TaskId> {
    let handler: TaskHandler = Arc::new(
        move || -> BoxFuture<'static, bridge_traits::error::Result<TaskOutcome>> {
            let queue = queue.clone();
            let cancel = cancel.clone();
            Box::pin(async move {
                queue
                    .drain(&cancel)
                    .await
                    .map(outcome)
                    .map_err(|e| BridgeError::OperationFailed(e.to_string()))
            })
        },
    );
    host.register_handler(DRAIN_TASK_ID, handler).await?;

    let task_id = host
        .schedule_task(
            DRAIN_TASK_ID,
            settings.current().sync.drain_interval(),
            TaskConstraints::default(),
        )
        .await?;
    info!(task_id = %task_id.as_str(), "drain job scheduled");
    Ok(task_id)
}
