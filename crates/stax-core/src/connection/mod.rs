//! Connection controller
//!
//! Owns the lifecycle of the streaming channel: connect, heartbeat, detect
//! staleness, disconnect, reconnect with jittered exponential backoff. The
//! controller's only outputs are the [`ConnectionState`] watch channel and
//! the inbound message channel - it never touches the event log.

pub mod memory;
mod transport;
mod websocket;

pub use transport::{Transport, TransportConnection};
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};
use crate::wire::{ClientMessage, ServerMessage};

/// Lifecycle of the streaming channel, observed read-only by everyone but
/// the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting {
        /// 1-based attempt counter since the last established connection
        attempt: u32,
        /// When the next connect attempt fires
        next_retry_at: DateTime<Utc>,
    },
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt, .. } => write!(f, "reconnecting (attempt {attempt})"),
        }
    }
}

/// Tuning knobs for the connection controller
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Interval between liveness probes
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered heartbeats before a forced disconnect
    pub heartbeat_misses: u32,
    /// Base delay for the first reconnect attempt
    pub reconnect_base: Duration,
    /// Reconnect attempts before parking and signaling persistent failure
    pub reconnect_max_attempts: u32,
    /// Per-request timeout (connect, push, stream messages)
    pub request_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_misses: 3,
            reconnect_base: Duration::from_secs(1),
            reconnect_max_attempts: 10,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Backoff schedule for reconnect attempts.
///
/// Attempt `k` sleeps for `base * 2^(k-1)` scaled by a uniform factor in
/// `[0.75, 1.25]`, so simultaneously dropped devices do not reconnect in
/// lockstep.
fn reconnect_backoff(base: Duration) -> ExponentialBackoff {
    let mut backoff = ExponentialBackoff {
        initial_interval: base,
        randomization_factor: 0.25,
        multiplier: 2.0,
        max_interval: Duration::from_secs(15 * 60),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    };
    backoff.reset();
    backoff
}

enum Control {
    Reconnect,
    Shutdown,
}

enum Exit {
    Shutdown,
    Lost(String),
}

/// Cloneable handle for observing and steering the controller
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    state_rx: watch::Receiver<ConnectionState>,
    failed_rx: watch::Receiver<bool>,
    outbound_tx: mpsc::Sender<ClientMessage>,
    control_tx: mpsc::UnboundedSender<Control>,
}

impl ConnectionHandle {
    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// A fresh receiver for awaiting state transitions
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Whether the controller exhausted its reconnect attempts and is
    /// parked awaiting [`request_reconnect`]
    ///
    /// [`request_reconnect`]: Self::request_reconnect
    #[must_use]
    pub fn is_persistently_failed(&self) -> bool {
        *self.failed_rx.borrow()
    }

    /// Send a message over the established channel.
    ///
    /// Fails fast with a transport error while not connected; the caller
    /// retries on its next cycle.
    pub async fn send(&self, message: ClientMessage) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(Error::Transport("not connected".to_string()));
        }
        self.outbound_tx
            .send(message)
            .await
            .map_err(|_| Error::Transport("connection task stopped".to_string()))
    }

    /// Ask the controller to drop the current connection (or leave the
    /// parked failure state) and start a fresh attempt round
    pub fn request_reconnect(&self) {
        let _ = self.control_tx.send(Control::Reconnect);
    }

    /// Stop the controller task
    pub fn shutdown(&self) {
        let _ = self.control_tx.send(Control::Shutdown);
    }
}

/// Drives one transport through the connect/heartbeat/reconnect lifecycle.
///
/// Construct with [`new`], then spawn [`run`] as a long-lived task.
///
/// [`new`]: Self::new
/// [`run`]: Self::run
pub struct ConnectionController<T: Transport> {
    transport: T,
    config: ConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
    failed_tx: watch::Sender<bool>,
    outbound_rx: mpsc::Receiver<ClientMessage>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    inbound_tx: mpsc::Sender<ServerMessage>,
}

impl<T: Transport> ConnectionController<T> {
    /// Create a controller plus its handle and the inbound message stream
    pub fn new(
        transport: T,
        config: ConnectionConfig,
    ) -> (Self, ConnectionHandle, mpsc::Receiver<ServerMessage>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (failed_tx, failed_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let controller = Self {
            transport,
            config,
            state_tx,
            failed_tx,
            outbound_rx,
            control_rx,
            inbound_tx,
        };
        let handle = ConnectionHandle {
            state_rx,
            failed_rx,
            outbound_tx,
            control_tx,
        };
        (controller, handle, inbound_rx)
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    /// Run the connect/reconnect loop until shutdown
    pub async fn run(mut self) {
        let mut backoff = reconnect_backoff(self.config.reconnect_base);
        let mut attempt: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            match tokio::time::timeout(self.config.request_timeout, self.transport.connect()).await
            {
                Ok(Ok(mut conn)) => {
                    attempt = 0;
                    backoff.reset();
                    let _ = self.failed_tx.send(false);
                    self.set_state(ConnectionState::Connected);
                    tracing::debug!("sync channel established");

                    match self.drive(&mut conn).await {
                        Exit::Shutdown => break,
                        Exit::Lost(reason) => tracing::warn!(%reason, "sync channel lost"),
                    }
                }
                Ok(Err(error)) => tracing::warn!(%error, "failed to open sync channel"),
                Err(_) => tracing::warn!("timed out opening sync channel"),
            }

            attempt += 1;
            if attempt > self.config.reconnect_max_attempts {
                tracing::warn!(
                    attempts = attempt - 1,
                    "reconnect attempts exhausted, waiting for an explicit reconnect request"
                );
                self.set_state(ConnectionState::Disconnected);
                let _ = self.failed_tx.send(true);
                if !self.wait_for_reconnect_request().await {
                    break;
                }
                attempt = 0;
                backoff.reset();
                continue;
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(self.config.reconnect_base);
            let next_retry_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            self.set_state(ConnectionState::Reconnecting {
                attempt,
                next_retry_at,
            });
            if !self.sleep_or_control(delay).await {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    /// Service an established connection until it is lost or shut down
    async fn drive(&mut self, conn: &mut T::Conn) -> Exit {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut missed: u32 = 0;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if missed >= self.config.heartbeat_misses {
                        return Exit::Lost(format!("{missed} heartbeats went unanswered"));
                    }
                    if let Err(error) = conn.send(ClientMessage::Heartbeat).await {
                        return Exit::Lost(format!("heartbeat send failed: {error}"));
                    }
                    missed += 1;
                }
                message = conn.recv() => match message {
                    Ok(Some(ServerMessage::HeartbeatAck)) => missed = 0,
                    Ok(Some(message)) => {
                        // any traffic proves the channel is alive
                        missed = 0;
                        if self.inbound_tx.send(message).await.is_err() {
                            return Exit::Shutdown;
                        }
                    }
                    Ok(None) => return Exit::Lost("server closed the connection".to_string()),
                    Err(error) => return Exit::Lost(error.to_string()),
                },
                outgoing = self.outbound_rx.recv() => match outgoing {
                    Some(message) => {
                        if let Err(error) = conn.send(message).await {
                            return Exit::Lost(format!("send failed: {error}"));
                        }
                    }
                    None => return Exit::Shutdown,
                },
                control = self.control_rx.recv() => match control {
                    Some(Control::Reconnect) => {
                        return Exit::Lost("reconnect requested".to_string());
                    }
                    Some(Control::Shutdown) | None => return Exit::Shutdown,
                },
            }
        }
    }

    /// Park until a reconnect is requested; false means shutdown
    async fn wait_for_reconnect_request(&mut self) -> bool {
        loop {
            match self.control_rx.recv().await {
                Some(Control::Reconnect) => return true,
                Some(Control::Shutdown) | None => return false,
            }
        }
    }

    /// Sleep out a backoff delay; false means shutdown. A reconnect
    /// request cuts the delay short.
    async fn sleep_or_control(&mut self, delay: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            control = self.control_rx.recv() => {
                !matches!(control, Some(Control::Shutdown) | None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            heartbeat_interval: Duration::from_millis(20),
            heartbeat_misses: 2,
            reconnect_base: Duration::from_millis(5),
            reconnect_max_attempts: 2,
            request_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_backoff_within_jitter_window() {
        let base = Duration::from_millis(100);
        let mut backoff = reconnect_backoff(base);

        for attempt in 1..=10u32 {
            let expected = base.as_secs_f64() * f64::from(2u32.pow(attempt - 1));
            let delay = backoff.next_backoff().unwrap().as_secs_f64();
            assert!(
                delay >= 0.75 * expected && delay <= 1.25 * expected,
                "attempt {attempt}: {delay}s outside [{:.3}, {:.3}]",
                0.75 * expected,
                1.25 * expected
            );
        }
    }

    #[test]
    fn test_backoff_windows_never_overlap() {
        // upper bound of attempt k stays below lower bound of attempt k+1,
        // so the midpoints strictly increase
        let base = 1.0_f64;
        for attempt in 1..10u32 {
            let upper = 1.25 * base * f64::from(2u32.pow(attempt - 1));
            let next_lower = 0.75 * base * f64::from(2u32.pow(attempt));
            assert!(upper < next_lower);
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        let state = ConnectionState::Reconnecting {
            attempt: 3,
            next_retry_at: Utc::now(),
        };
        assert_eq!(state.to_string(), "reconnecting (attempt 3)");
    }

    struct RefusingTransport;

    impl Transport for RefusingTransport {
        type Conn = memory::MemoryConnection;

        async fn connect(&self) -> crate::error::Result<Self::Conn> {
            Err(Error::Transport("connection refused".to_string()))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exhausted_attempts_signal_persistent_failure() {
        let (controller, handle, _inbound) =
            ConnectionController::new(RefusingTransport, test_config());
        tokio::spawn(controller.run());

        let mut failed = handle.failed_rx.clone();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !*failed.borrow_and_update() {
                failed.changed().await.unwrap();
            }
        })
        .await
        .expect("controller never signaled persistent failure");

        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(handle.is_persistently_failed());
        assert!(handle.send(ClientMessage::Heartbeat).await.is_err());

        // an explicit reconnect request restarts the attempt rounds
        handle.request_reconnect();
        tokio::time::timeout(Duration::from_secs(2), async {
            let mut state = handle.state_receiver();
            loop {
                if *state.borrow_and_update() == ConnectionState::Connecting {
                    break;
                }
                state.changed().await.unwrap();
            }
        })
        .await
        .expect("reconnect request did not restart attempts");

        handle.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_heartbeat_loss_forces_reconnect() {
        let (transport, mut listener) = memory::channel();
        let (controller, handle, _inbound) = ConnectionController::new(transport, test_config());
        tokio::spawn(controller.run());

        // first connection: swallow heartbeats without acking
        let mut first = listener.accept().await.unwrap();
        let silent = tokio::spawn(async move { while first.recv().await.is_some() {} });

        // heartbeat loss must produce a second connection
        let second = tokio::time::timeout(Duration::from_secs(2), listener.accept())
            .await
            .expect("controller never reconnected after heartbeat loss");
        assert!(second.is_some());

        handle.shutdown();
        silent.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_heartbeats_acked_keeps_connection() {
        let (transport, mut listener) = memory::channel();
        let (controller, handle, _inbound) = ConnectionController::new(transport, test_config());
        tokio::spawn(controller.run());

        let mut conn = listener.accept().await.unwrap();
        let acker = tokio::spawn(async move {
            while let Some(message) = conn.recv().await {
                if message == ClientMessage::Heartbeat
                    && conn.send(ServerMessage::HeartbeatAck).await.is_err()
                {
                    break;
                }
            }
        });

        // several heartbeat intervals pass without a reconnect
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(handle.state(), ConnectionState::Connected);

        handle.shutdown();
        acker.abort();
    }
}
