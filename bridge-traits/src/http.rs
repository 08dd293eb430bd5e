//! HTTP Client Abstraction
//!
//! A single async request/response primitive. Retry, throttling and admission
//! control live in the request executor, so implementations must perform
//! exactly one attempt per call.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Verbs the media server API uses. User flags are set with `Post` and
/// cleared with `Delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Overrides the client's default timeout for this request.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Decode the body; `what` names the payload in the error message.
    pub fn json<T: DeserializeOwned>(&self, what: &str) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| BridgeError::OperationFailed(format!("{what}: {e}")))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn any non-2xx response into [`BridgeError::Status`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let message = String::from_utf8_lossy(&self.body)
            .chars()
            .take(256)
            .collect::<String>();
        Err(BridgeError::Status {
            status: self.status,
            message,
        })
    }
}

/// Async HTTP client trait
///
/// Implementations handle TLS, connection pooling and keep-alive. They must
/// not retry on their own.
///
/// ```ignore
/// let response = client
///     .execute(HttpRequest::new(HttpMethod::Get, url).header("X-Emby-Token", token))
///     .await?
///     .error_for_status()?;
/// let item: ItemDetail = response.json("item")?;
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute an HTTP request
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] when no response was received.
    /// Non-2xx responses are returned as `Ok`; use
    /// [`HttpResponse::error_for_status`] to convert them.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}
