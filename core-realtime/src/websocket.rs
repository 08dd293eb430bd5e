//! WebSocket push transport.

use crate::error::{RealtimeError, Result};
use crate::transport::{Frame, PushConnection, PushTransport};
use async_trait::async_trait;
use bridge_traits::ServerSession;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

/// Build the socket URL for `session`: `ws(s)://<server>/socket?api_key=..&deviceId=..`.
pub fn socket_url(session: &ServerSession) -> Result<Url> {
    let mut url = Url::parse(&session.server_url)
        .map_err(|e| RealtimeError::InvalidUrl(format!("{}: {e}", session.server_url)))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(RealtimeError::InvalidUrl(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| RealtimeError::InvalidUrl(session.server_url.clone()))?;

    let path = format!("{}/socket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .clear()
        .append_pair("api_key", &session.access_token)
        .append_pair("deviceId", &session.device_id);
    Ok(url)
}

#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

fn handshake_rejected(status: u16) -> RealtimeError {
    if status == 401 || status == 403 {
        RealtimeError::AuthRejected { code: status }
    } else {
        RealtimeError::Connect(format!("handshake rejected with HTTP {status}"))
    }
}

fn map_connect_error(err: tungstenite::Error) -> RealtimeError {
    match err {
        tungstenite::Error::Http(response) => handshake_rejected(response.status().as_u16()),
        other => RealtimeError::Connect(other.to_string()),
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn connect(&self, session: &ServerSession) -> Result<Box<dyn PushConnection>> {
        let url = socket_url(session)?;
        tracing::info!(host = url.host_str().unwrap_or(""), "Connecting to push socket");

        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(map_connect_error)?;

        tracing::info!("Push socket connected");
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WebSocketConnection {
    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(Message::Text(text)) => Frame::Text(text.to_string()),
                Ok(Message::Close(frame)) => match frame {
                    Some(cf) => Frame::Closed {
                        code: Some(u16::from(cf.code)),
                        reason: cf.reason.to_string(),
                    },
                    None => Frame::Closed {
                        code: None,
                        reason: String::new(),
                    },
                },
                // tungstenite answers pings itself
                Ok(_) => continue,
                Err(e) => Frame::Error(e.to_string()),
            };
            return Some(frame);
        }
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.stream
            .send(Message::Text(text.to_string().into()))
            .await
            .map_err(|e| RealtimeError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
