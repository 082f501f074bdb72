//! Engine configuration

use std::time::Duration;

use url::Url;

use crate::connection::ConnectionConfig;

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Sync server endpoint (`ws://` or `wss://`); `None` runs local-only
    pub server_url: Option<Url>,
    /// How often the orchestrator runs a cycle while foregrounded
    pub sync_interval: Duration,
    /// Interval between liveness probes
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered heartbeats before a forced disconnect
    pub heartbeat_misses: u32,
    /// Base delay for the first reconnect attempt
    pub reconnect_base: Duration,
    /// Reconnect attempts before parking and signaling persistent failure
    pub reconnect_max_attempts: u32,
    /// Per-request timeout (push, stream start, each stream message)
    pub request_timeout: Duration,
    /// Maximum events pushed per cycle; larger backlogs drain across cycles
    pub push_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            sync_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_misses: 3,
            reconnect_base: Duration::from_secs(1),
            reconnect_max_attempts: 10,
            request_timeout: Duration::from_secs(10),
            push_limit: 500,
        }
    }
}

impl SyncConfig {
    /// Create a configuration pointed at a sync server
    #[must_use]
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url: Some(server_url),
            ..Self::default()
        }
    }

    /// Set the cycle interval
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The connection controller's slice of this configuration
    #[must_use]
    pub const fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_misses: self.heartbeat_misses,
            reconnect_base: self.reconnect_base,
            reconnect_max_attempts: self.reconnect_max_attempts,
            request_timeout: self.request_timeout,
        }
    }
}
