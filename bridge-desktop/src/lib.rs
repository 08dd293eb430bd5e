//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `MediaServerApi` as a REST client over any `HttpClient`
//! - `NetworkMonitor` using a TCP reachability probe
//! - `BackgroundExecutor` using Tokio timers
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{HttpMediaServerApi, ReqwestHttpClient};
//!
//! let http = Arc::new(ReqwestHttpClient::new()?);
//! let api = HttpMediaServerApi::new(http);
//! api.set_session(Some(session));
//! ```

mod background;
mod http;
mod media_api;
mod network;

pub use background::TokioBackgroundExecutor;
pub use http::ReqwestHttpClient;
pub use media_api::HttpMediaServerApi;
pub use network::DesktopNetworkMonitor;
