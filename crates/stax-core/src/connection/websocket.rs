//! Websocket transport

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::transport::{Transport, TransportConnection};
use crate::error::{Error, Result};
use crate::wire::{ClientMessage, ServerMessage};

/// Transport over a websocket endpoint (`ws://` or `wss://`)
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    /// Create a transport for the given server endpoint
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self { url }
    }
}

impl Transport for WebSocketTransport {
    type Conn = WebSocketConnection;

    async fn connect(&self) -> Result<Self::Conn> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|error| Error::Transport(format!("websocket connect failed: {error}")))?;
        Ok(WebSocketConnection { inner: stream })
    }
}

/// One established websocket channel carrying JSON text frames
pub struct WebSocketConnection {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TransportConnection for WebSocketConnection {
    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        let text = serde_json::to_string(&message)?;
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|error| Error::Transport(format!("websocket send failed: {error}")))
    }

    async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        loop {
            let frame = match self.inner.next().await {
                None => return Ok(None),
                Some(Err(error)) => {
                    return Err(Error::Transport(format!("websocket read failed: {error}")))
                }
                Some(Ok(frame)) => frame,
            };

            match frame {
                Message::Text(text) => {
                    return serde_json::from_str(&text).map(Some).map_err(|error| {
                        Error::Protocol(format!("malformed server message: {error}"))
                    });
                }
                Message::Close(close_frame) => {
                    if let Some(frame) = close_frame {
                        tracing::debug!(code = %frame.code, reason = %frame.reason, "server closed the sync channel");
                    } else {
                        tracing::debug!("server closed the sync channel without a reason");
                    }
                    return Ok(None);
                }
                // binary/ping/pong frames are not part of the protocol
                other => {
                    tracing::trace!("ignoring non-text frame: {other:?}");
                }
            }
        }
    }
}
