//! Transport seam between the connection state machine and the socket

use crate::error::Result;
use crate::wire::{ClientMessage, ServerMessage};

/// Something that can open a streaming channel to the sync server.
///
/// The controller reconnects by calling [`connect`] again; implementations
/// must support any number of sequential connections.
///
/// [`connect`]: Transport::connect
#[allow(async_fn_in_trait)]
pub trait Transport: Send + Sync + 'static {
    type Conn: TransportConnection + Send;

    /// Open a fresh channel
    async fn connect(&self) -> Result<Self::Conn>;
}

/// One established streaming channel
#[allow(async_fn_in_trait)]
pub trait TransportConnection {
    /// Send one message to the server
    async fn send(&mut self, message: ClientMessage) -> Result<()>;

    /// Receive the next message; `Ok(None)` means the peer closed cleanly
    async fn recv(&mut self) -> Result<Option<ServerMessage>>;
}
