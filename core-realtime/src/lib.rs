//! # Real-Time Event Client
//!
//! Persistent push connection to the media server delivering playback
//! progress for the signed-in user and device.

pub mod backoff;
pub mod client;
pub mod error;
pub mod message;
pub mod transport;
pub mod websocket;

pub use backoff::{delay_for, ReconnectBackoff, MAX_FAILURES};
pub use client::{ConnectionState, RealtimeClient, PUSH_CHANNEL_CAPACITY};
pub use error::{RealtimeError, Result};
pub use message::{PushEvent, SessionFilter};
pub use transport::{Frame, PushConnection, PushTransport};
pub use websocket::{socket_url, WebSocketTransport};
