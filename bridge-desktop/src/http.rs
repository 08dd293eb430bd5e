//! [`HttpClient`] over reqwest.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
};
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::{debug, warn};

/// One attempt per call. Retry and pacing are owned by the request executor.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .user_agent(concat!("media-client-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map(|client| Self { client })
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {e}")))
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    /// Errors raised before any response arrived.
    fn transport_error(error: reqwest::Error) -> BridgeError {
        if error.is_builder() {
            BridgeError::InvalidInput(error.to_string())
        } else if error.is_timeout() {
            BridgeError::Transport("request timed out".to_string())
        } else {
            BridgeError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = ?request.method, url = %request.url, "http request");

        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, url = %request.url, "no response");
            Self::transport_error(e)
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();
        let body = response.bytes().await.map_err(Self::transport_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
