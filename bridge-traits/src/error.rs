use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The request never produced an HTTP response (DNS, connect, TLS, timeout).
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The server answered with a non-success status code.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Malformed input detected locally before anything was sent.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            BridgeError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
