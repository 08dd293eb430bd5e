//! Outcome type of every remote call and the failure taxonomy.
//!
//! Classification of raw transport failures happens only in this crate; the
//! rest of the core matches on [`ErrorKind`].

use bridge_traits::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Failure category surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Auth,
    Validation,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Auth => "auth",
            ErrorKind::Validation => "validation",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a raw failure is treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub retryable: bool,
}

/// Map a bridge failure onto the taxonomy.
pub fn classify(error: &BridgeError) -> Classification {
    let (kind, retryable) = match error {
        BridgeError::Transport(_) | BridgeError::Io(_) => (ErrorKind::Network, true),
        BridgeError::InvalidInput(_) => (ErrorKind::Validation, false),
        BridgeError::Status { status, .. } => match *status {
            401 | 403 => (ErrorKind::Auth, false),
            400 | 422 => (ErrorKind::Validation, false),
            400..=499 => (ErrorKind::Unknown, false),
            500..=599 => (ErrorKind::Unknown, true),
            _ => (ErrorKind::Unknown, false),
        },
        BridgeError::NotAvailable(_) | BridgeError::OperationFailed(_) => {
            (ErrorKind::Unknown, false)
        }
    };
    Classification { kind, retryable }
}

/// Classified failure of a remote call.
#[derive(Debug, Clone)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
    /// Underlying bridge failure, absent for panics.
    pub cause: Option<Arc<BridgeError>>,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn from_bridge(error: BridgeError) -> Self {
        let kind = classify(&error).kind;
        Self {
            kind,
            message: error.to_string(),
            cause: Some(Arc::new(error)),
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.cause.as_ref().and_then(|c| c.status())
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteError {}

impl PartialEq for RemoteError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

/// Result of a call made through the request executor.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCallResult<T> {
    Success(T),
    Error(RemoteError),
    /// In-progress marker for observers; never stored in caches.
    Loading,
}

impl<T> RemoteCallResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RemoteCallResult::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RemoteCallResult::Error(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, RemoteCallResult::Loading)
    }

    pub fn success(self) -> Option<T> {
        match self {
            RemoteCallResult::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_success(&self) -> Option<&T> {
        match self {
            RemoteCallResult::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&RemoteError> {
        match self {
            RemoteCallResult::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn map<U, F>(self, f: F) -> RemoteCallResult<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            RemoteCallResult::Success(value) => RemoteCallResult::Success(f(value)),
            RemoteCallResult::Error(err) => RemoteCallResult::Error(err),
            RemoteCallResult::Loading => RemoteCallResult::Loading,
        }
    }

    pub fn and_then<U, F>(self, f: F) -> RemoteCallResult<U>
    where
        F: FnOnce(T) -> RemoteCallResult<U>,
    {
        match self {
            RemoteCallResult::Success(value) => f(value),
            RemoteCallResult::Error(err) => RemoteCallResult::Error(err),
            RemoteCallResult::Loading => RemoteCallResult::Loading,
        }
    }

    /// `Loading` maps to an `Unknown` error.
    pub fn into_result(self) -> Result<T, RemoteError> {
        match self {
            RemoteCallResult::Success(value) => Ok(value),
            RemoteCallResult::Error(err) => Err(err),
            RemoteCallResult::Loading => Err(RemoteError::new(
                ErrorKind::Unknown,
                "result still loading",
            )),
        }
    }
}

impl<T> From<Result<T, RemoteError>> for RemoteCallResult<T> {
    fn from(result: Result<T, RemoteError>) -> Self {
        match result {
            Ok(value) => RemoteCallResult::Success(value),
            Err(err) => RemoteCallResult::Error(err),
        }
    }
}
