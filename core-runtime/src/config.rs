//! # Core Configuration Module
//!
//! Builder for the [`CoreConfig`] that wires host-provided bridges and the
//! initial runtime settings into the core.
//!
//! ## Required Dependencies
//!
//! - `database_path` - SQLite file backing the mutation queue and grid index
//! - `HttpClient` - transport for every media server call
//! - `MediaServerApi` - REST surface of the media server
//!
//! ## Optional Dependencies
//!
//! - `NetworkMonitor` - connectivity gates for draining and prefetching
//! - `BackgroundExecutor` - scheduled drain and prefetch jobs
//! - `Clock` - defaults to the system clock
//! - `LoggerSink` - host log forwarding
//!
//! With the `desktop-shims` feature enabled, missing transport, API, network
//! and executor bridges are filled in with the `bridge-desktop` defaults.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/media.db")
//!     .max_concurrent_requests(6)
//!     .enable_realtime(true)
//!     .build()?;
//! ```
//!
//! Omitting the database path fails with an actionable message:
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .build()
//!     .expect("Should fail - missing database path");
//! ```

use crate::error::{Error, Result};
use crate::settings::RuntimeSettings;
use bridge_traits::{
    BackgroundExecutor, Clock, HttpClient, LoggerSink, MediaServerApi, NetworkMonitor,
    SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;
const MAX_CONCURRENT_REQUESTS_LIMIT: usize = 64;

/// Core configuration.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Upper bound on in-flight media server calls
    pub max_concurrent_requests: usize,

    pub http_client: Arc<dyn HttpClient>,

    pub media_api: Arc<dyn MediaServerApi>,

    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,

    pub background_executor: Option<Arc<dyn BackgroundExecutor>>,

    pub clock: Arc<dyn Clock>,

    pub logger_sink: Option<Arc<dyn LoggerSink>>,

    pub features: FeatureFlags,

    /// Initial runtime settings; later changes go through the settings handle.
    pub settings: RuntimeSettings,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("network_monitor", &self.network_monitor.is_some())
            .field("background_executor", &self.background_executor.is_some())
            .field("logger_sink", &self.logger_sink.is_some())
            .field("features", &self.features)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Keep a push connection open while a session is active
    pub enable_realtime: bool,

    /// Run the continue-watching prefetch as a scheduled job (requires BackgroundExecutor)
    pub enable_background_prefetch: bool,

    /// Drain the mutation queue from a scheduled job (requires BackgroundExecutor)
    pub enable_background_sync: bool,
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - Concurrency bound is within range
    /// - Runtime settings are valid
    /// - Feature flags are consistent with available bridges
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.max_concurrent_requests == 0 {
            return Err(Error::Config(
                "Concurrent request limit must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_requests > MAX_CONCURRENT_REQUESTS_LIMIT {
            return Err(Error::Config(format!(
                "Concurrent request limit exceeds maximum of {}",
                MAX_CONCURRENT_REQUESTS_LIMIT
            )));
        }

        self.settings.validate()?;

        let needs_executor =
            self.features.enable_background_sync || self.features.enable_background_prefetch;
        if needs_executor && self.background_executor.is_none() {
            return Err(Error::Config(
                "Background jobs enabled but no BackgroundExecutor provided. \
                 Disable the feature or inject a BackgroundExecutor implementation."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn capability_missing(capability: &str, purpose: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: enable the 'desktop-shims' feature to use the default. \
             Other hosts: inject a native implementation through the builder.",
            capability, purpose
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new().map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: format!("Failed to create default HTTP client: {}", e),
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing("HttpClient", "media server calls"))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_media_api(http: Arc<dyn HttpClient>) -> Result<Arc<dyn MediaServerApi>> {
    Ok(Arc::new(bridge_desktop::HttpMediaServerApi::new(http)))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_media_api(_http: Arc<dyn HttpClient>) -> Result<Arc<dyn MediaServerApi>> {
    Err(capability_missing("MediaServerApi", "the media server REST surface"))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_network_monitor() -> Option<Arc<dyn NetworkMonitor>> {
    Some(Arc::new(bridge_desktop::DesktopNetworkMonitor::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_network_monitor() -> Option<Arc<dyn NetworkMonitor>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn provide_default_background_executor(
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
) -> Option<Arc<dyn BackgroundExecutor>> {
    Some(Arc::new(
        bridge_desktop::TokioBackgroundExecutor::with_network_monitor(network_monitor),
    ))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_background_executor(
    _network_monitor: Option<Arc<dyn NetworkMonitor>>,
) -> Option<Arc<dyn BackgroundExecutor>> {
    None
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    max_concurrent_requests: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    media_api: Option<Arc<dyn MediaServerApi>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    background_executor: Option<Arc<dyn BackgroundExecutor>>,
    clock: Option<Arc<dyn Clock>>,
    logger_sink: Option<Arc<dyn LoggerSink>>,
    features: FeatureFlags,
    settings: Option<RuntimeSettings>,
}

impl CoreConfigBuilder {
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the bound on concurrently executing media server calls.
    ///
    /// Default: 4
    pub fn max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = Some(limit);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn media_api(mut self, api: Arc<dyn MediaServerApi>) -> Self {
        self.media_api = Some(api);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn background_executor(mut self, executor: Arc<dyn BackgroundExecutor>) -> Self {
        self.background_executor = Some(executor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn enable_realtime(mut self, enabled: bool) -> Self {
        self.features.enable_realtime = enabled;
        self
    }

    pub fn enable_background_prefetch(mut self, enabled: bool) -> Self {
        self.features.enable_background_prefetch = enabled;
        self
    }

    pub fn enable_background_sync(mut self, enabled: bool) -> Self {
        self.features.enable_background_sync = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Builds the final `CoreConfig`.
    ///
    /// Fails when a required bridge is missing and no default is available,
    /// or when the assembled configuration does not validate.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let media_api = match self.media_api {
            Some(api) => api,
            None => provide_default_media_api(http_client.clone())?,
        };

        let network_monitor = self
            .network_monitor
            .or_else(provide_default_network_monitor);

        let background_executor = match self.background_executor {
            Some(executor) => Some(executor),
            None => provide_default_background_executor(network_monitor.clone()),
        };

        let config = CoreConfig {
            database_path,
            max_concurrent_requests: self
                .max_concurrent_requests
                .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS),
            http_client,
            media_api,
            network_monitor,
            background_executor,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            logger_sink: self.logger_sink,
            features: self.features,
            settings: self.settings.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}
