//! Reachability-based [`NetworkMonitor`].

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType},
};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

const DEFAULT_PROBE_ADDR: &str = "1.1.1.1:53";

/// Probes reachability with a TCP connect.
///
/// Desktop links are reported as Ethernet, which the prefetch gate treats as
/// unmetered. Telling Wi-Fi apart needs platform APIs.
#[derive(Debug, Clone)]
pub struct DesktopNetworkMonitor {
    probe_addr: String,
    poll_interval: Duration,
    probe_timeout: Duration,
}

impl DesktopNetworkMonitor {
    pub fn new() -> Self {
        Self::with_probe(DEFAULT_PROBE_ADDR, Duration::from_secs(5))
    }

    /// Probe a custom address, e.g. the media server's own host:port.
    pub fn with_probe(probe_addr: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            probe_addr: probe_addr.into(),
            poll_interval,
            probe_timeout: Duration::from_secs(5),
        }
    }

    async fn probe(&self) -> NetworkInfo {
        let reachable = matches!(
            tokio::time::timeout(self.probe_timeout, TcpStream::connect(&self.probe_addr)).await,
            Ok(Ok(_))
        );
        if reachable {
            NetworkInfo::connected(NetworkType::Ethernet)
        } else {
            NetworkInfo::disconnected()
        }
    }
}

impl Default for DesktopNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        let info = self.probe().await;
        debug!(status = ?info.status, probe = %self.probe_addr, "network probed");
        Ok(info)
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(ProbeStream {
            monitor: self.clone(),
            last_status: None,
        }))
    }
}

/// Polls the probe and yields only status transitions. The first poll always
/// yields.
struct ProbeStream {
    monitor: DesktopNetworkMonitor,
    last_status: Option<NetworkStatus>,
}

#[async_trait]
impl NetworkChangeStream for ProbeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        loop {
            let info = self.monitor.probe().await;
            if self.last_status != Some(info.status) {
                self.last_status = Some(info.status);
                return Some(info);
            }
            tokio::time::sleep(self.monitor.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reachable_probe_reports_unmetered() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let monitor = DesktopNetworkMonitor::with_probe(addr, Duration::from_millis(50));

        let info = monitor.get_network_info().await.unwrap();
        assert!(info.is_connected());
        assert!(info.is_wifi());
    }

    #[tokio::test]
    async fn test_unreachable_probe_reports_disconnected() {
        let monitor = DesktopNetworkMonitor::with_probe("127.0.0.1:1", Duration::from_millis(50));
        assert!(!monitor.is_connected().await);
    }

    #[tokio::test]
    async fn test_change_stream_emits_initial_status() {
        let monitor = DesktopNetworkMonitor::with_probe("127.0.0.1:1", Duration::from_millis(50));
        let mut stream = monitor.subscribe_changes().await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.status, NetworkStatus::Disconnected);
    }
}
