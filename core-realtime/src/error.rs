use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    /// Server refused the credentials (HTTP 401/403 on the handshake or an
    /// auth close code). Not retried.
    #[error("Authentication rejected ({code})")]
    AuthRejected { code: u16 },

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

impl RealtimeError {
    pub fn is_auth(&self) -> bool {
        matches!(self, RealtimeError::AuthRejected { .. })
    }
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
