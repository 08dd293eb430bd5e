//! Network Monitoring Abstraction
//!
//! Connectivity signals drive three behaviors in the core: draining the
//! offline mutation queue when connectivity returns, gating speculative
//! prefetch on Wi-Fi, and skipping background work while offline.

use async_trait::async_trait;

use crate::error::Result;

/// Network connection type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Cellular,
    WiFi,
    Ethernet,
    Other,
}

/// Network connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    /// Status cannot be determined; treated as offline by the core.
    Indeterminate,
}

/// Snapshot of the current connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    pub network_type: Option<NetworkType>,
    /// Whether the connection is metered (has data limits/costs)
    pub is_metered: bool,
}

impl NetworkInfo {
    pub fn connected(network_type: NetworkType) -> Self {
        Self {
            status: NetworkStatus::Connected,
            network_type: Some(network_type),
            is_metered: matches!(network_type, NetworkType::Cellular),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            status: NetworkStatus::Disconnected,
            network_type: None,
            is_metered: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == NetworkStatus::Connected
    }

    /// Wired connections count as unmetered local networks, same as Wi-Fi.
    pub fn is_wifi(&self) -> bool {
        self.is_connected()
            && matches!(
                self.network_type,
                Some(NetworkType::WiFi) | Some(NetworkType::Ethernet)
            )
    }
}

/// Network monitor trait
///
/// # Platform Support
///
/// - **Desktop**: periodic reachability probe (see `bridge-desktop`)
/// - **iOS**: Network framework path monitor
/// - **Android**: ConnectivityManager callbacks
///
/// # Example
///
/// ```ignore
/// use bridge_traits::network::NetworkMonitor;
///
/// async fn may_prefetch(monitor: &dyn NetworkMonitor, wifi_only: bool) -> bool {
///     match monitor.get_network_info().await {
///         Ok(info) => info.is_connected() && (!wifi_only || info.is_wifi()),
///         Err(_) => false,
///     }
/// }
/// ```
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Get current network information
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Check if currently connected to any network
    async fn is_connected(&self) -> bool {
        self.get_network_info()
            .await
            .map(|info| info.is_connected())
            .unwrap_or(false)
    }

    /// Check if connected via Wi-Fi (or Ethernet)
    async fn is_wifi(&self) -> bool {
        self.get_network_info()
            .await
            .map(|info| info.is_wifi())
            .unwrap_or(false)
    }

    /// Subscribe to network status changes
    ///
    /// Implementations emit an update whenever the status or connection type
    /// changes.
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

/// Stream of network status changes
#[async_trait]
pub trait NetworkChangeStream: Send {
    /// Get the next network info update
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<NetworkInfo>;
}
