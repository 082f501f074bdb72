//! In-process transport
//!
//! Carries typed wire messages over tokio channels so multiple simulated
//! devices and a scripted server can run deterministically in one process.
//! Production uses the websocket transport; this one backs tests, the
//! integration scenarios, and local tooling.

use tokio::sync::mpsc;

use super::transport::{Transport, TransportConnection};
use crate::error::{Error, Result};
use crate::wire::{ClientMessage, ServerMessage};

const CHANNEL_CAPACITY: usize = 64;

/// Create a connected transport/listener pair.
///
/// Each [`Transport::connect`] call produces a fresh connection delivered to
/// the listener, mirroring how a real server accepts sockets.
#[must_use]
pub fn channel() -> (MemoryTransport, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport { accept_tx },
        MemoryListener { accept_rx },
    )
}

/// Client side: hands out in-process connections
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<MemoryServerConn>,
}

impl Transport for MemoryTransport {
    type Conn = MemoryConnection;

    async fn connect(&self) -> Result<Self::Conn> {
        let (client_tx, client_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (server_tx, server_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let server_side = MemoryServerConn {
            incoming: client_rx,
            outgoing: server_tx,
        };
        self.accept_tx
            .send(server_side)
            .map_err(|_| Error::Transport("no server is listening".to_string()))?;

        Ok(MemoryConnection {
            outgoing: client_tx,
            incoming: server_rx,
        })
    }
}

/// Server side: yields one [`MemoryServerConn`] per client connect
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryServerConn>,
}

impl MemoryListener {
    /// Wait for the next inbound connection; `None` when every transport
    /// handle has been dropped
    pub async fn accept(&mut self) -> Option<MemoryServerConn> {
        self.accept_rx.recv().await
    }
}

/// Client end of an established in-process channel
pub struct MemoryConnection {
    outgoing: mpsc::Sender<ClientMessage>,
    incoming: mpsc::Receiver<ServerMessage>,
}

impl TransportConnection for MemoryConnection {
    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        self.outgoing
            .send(message)
            .await
            .map_err(|_| Error::Transport("connection closed".to_string()))
    }

    async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        Ok(self.incoming.recv().await)
    }
}

/// Server end of an established in-process channel
pub struct MemoryServerConn {
    incoming: mpsc::Receiver<ClientMessage>,
    outgoing: mpsc::Sender<ServerMessage>,
}

impl MemoryServerConn {
    /// Next message from the client; `None` when the client disconnected
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        self.incoming.recv().await
    }

    /// Send a message to the client
    pub async fn send(&mut self, message: ServerMessage) -> Result<()> {
        self.outgoing
            .send(message)
            .await
            .map_err(|_| Error::Transport("client disconnected".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connect_send_recv_roundtrip() {
        let (transport, mut listener) = channel();

        let mut client = transport.connect().await.unwrap();
        let mut server = listener.accept().await.unwrap();

        client
            .send(ClientMessage::StreamRequest { since: None })
            .await
            .unwrap();
        assert_eq!(
            server.recv().await,
            Some(ClientMessage::StreamRequest { since: None })
        );

        server
            .send(ServerMessage::StreamStart { total_events: 0 })
            .await
            .unwrap();
        assert_eq!(
            client.recv().await.unwrap(),
            Some(ServerMessage::StreamStart { total_events: 0 })
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_drop_closes_client() {
        let (transport, mut listener) = channel();

        let mut client = transport.connect().await.unwrap();
        let server = listener.accept().await.unwrap();
        drop(server);

        assert_eq!(client.recv().await.unwrap(), None);
        assert!(client.send(ClientMessage::Heartbeat).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reconnect_yields_new_server_conn() {
        let (transport, mut listener) = channel();

        let _first = transport.connect().await.unwrap();
        let _first_server = listener.accept().await.unwrap();

        let _second = transport.connect().await.unwrap();
        assert!(listener.accept().await.is_some());
    }
}
