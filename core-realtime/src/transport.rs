//! Connection seam between the realtime client and the wire.

use crate::error::Result;
use async_trait::async_trait;
use bridge_traits::ServerSession;

/// Frame read from an open push connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

#[async_trait]
pub trait PushConnection: Send {
    /// Next frame; `None` once the stream has ended.
    async fn next_frame(&mut self) -> Option<Frame>;

    async fn send_text(&mut self, text: &str) -> Result<()>;

    async fn close(&mut self);
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open a connection for `session`.
    ///
    /// Credential rejection must surface as `RealtimeError::AuthRejected`.
    async fn connect(&self, session: &ServerSession) -> Result<Box<dyn PushConnection>>;
}
