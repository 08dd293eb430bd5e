//! # Host Bridge Traits
//!
//! Platform abstraction traits that each host platform implements.
//!
//! ## Overview
//!
//! This crate defines the contract between the media client core and
//! platform-specific implementations. Each trait represents a capability the
//! core requires but that differs per platform (desktop, iOS, Android, TV).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP
//! - [`MediaServerApi`](media::MediaServerApi) - Remote media server calls
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity and Wi-Fi detection
//!
//! ### Platform Integration
//! - [`BackgroundExecutor`](background::BackgroundExecutor) - Host job scheduling
//! - [`MemoryPressureLevel`](memory::MemoryPressureLevel) - Low-memory signal
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is
//! missing:
//!
//! ```ignore
//! let http_client = config.http_client
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "HttpClient".to_string(),
//!         message: "No HTTP client implementation provided".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! keep transport failures, HTTP statuses and local validation failures
//! distinct so the request executor can classify them.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`.

pub mod background;
pub mod error;
pub mod http;
pub mod media;
pub mod memory;
pub mod network;
pub mod time;

pub use error::{BridgeError, Result};

pub use background::{
    BackgroundExecutor, TaskConstraints, TaskHandler, TaskId, TaskOutcome, TaskStatus,
};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use media::{ItemDetail, ItemSummary, MediaServerApi, ServerSession, UserData};
pub use memory::MemoryPressureLevel;
pub use network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
