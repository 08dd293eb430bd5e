//! Drives [`OfflineMutationQueue::drain`] from a timer, connectivity
//! recovery and explicit requests.

use crate::queue::{DrainReport, OfflineMutationQueue};
use bridge_traits::{NetworkChangeStream, NetworkInfo, NetworkMonitor};
use core_runtime::settings::SettingsHandle;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Interval,
    Reconnected,
    Requested,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Trigger::Interval => "interval",
            Trigger::Reconnected => "reconnected",
            Trigger::Requested => "requested",
        }
    }
}

pub struct DrainTriggers {
    queue: Arc<OfflineMutationQueue>,
    settings: SettingsHandle,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
}

async fn next_change(stream: &mut Option<Box<dyn NetworkChangeStream>>) -> Option<NetworkInfo> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

impl DrainTriggers {
    pub fn new(queue: Arc<OfflineMutationQueue>, settings: SettingsHandle) -> Self {
        Self {
            queue,
            settings,
            network_monitor: None,
        }
    }

    pub fn with_network_monitor(mut self, monitor: Option<Arc<dyn NetworkMonitor>>) -> Self {
        self.network_monitor = monitor;
        self
    }

    /// Run the trigger loop until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self, cancel: CancellationToken) {
        let mut changes = None;
        let mut was_connected = None;
        if let Some(monitor) = &self.network_monitor {
            match monitor.subscribe_changes().await {
                Ok(stream) => changes = Some(stream),
                Err(e) => warn!(error = %e, "network change subscription failed"),
            }
            was_connected = Some(monitor.is_connected().await);
        }

        let mut deadline = Instant::now() + self.settings.current().sync.drain_interval();
        loop {
            let trigger = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => Trigger::Interval,
                _ = self.queue.drain_requested() => Trigger::Requested,
                change = next_change(&mut changes) => {
                    let Some(info) = change else {
                        changes = None;
                        continue;
                    };
                    let connected = info.is_connected();
                    let recovered = was_connected == Some(false) && connected;
                    was_connected = Some(connected);
                    if !recovered {
                        continue;
                    }
                    Trigger::Reconnected
                }
            };

            debug!(trigger = trigger.as_str(), "drain triggered");
            deadline = Instant::now() + self.settings.current().sync.drain_interval();
            match self.queue.drain(&cancel).await {
                Ok(DrainReport::Completed(summary)) => {
                    debug!(trigger = trigger.as_str(), ?summary, "drain completed");
                }
                Ok(report) => debug!(trigger = trigger.as_str(), ?report, "drain not run"),
                Err(e) => warn!(trigger = trigger.as_str(), error = %e, "drain failed"),
            }
        }
        debug!("drain triggers stopped");
    }
}
