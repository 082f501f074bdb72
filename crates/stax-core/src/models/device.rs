//! Device model
//!
//! Each installation of the app has a stable device identity. The registry
//! uses it to filter self-originated events during incremental sync and to
//! break last-writer-wins ties deterministically.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A device identifier, carried as an opaque string on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Generate a fresh device ID (UUID v7)
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Borrow the string form of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A known device for the local user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable identifier
    pub id: DeviceId,
    /// Owning user
    pub user_id: String,
    /// Optional human-readable label (platform, hostname, ...)
    pub label: Option<String>,
    /// Whether this row describes the local installation
    pub is_local: bool,
    /// Last time an event from this device was seen (Unix ms)
    pub last_seen_at: i64,
}

impl Device {
    /// Create the local device record with a freshly generated ID
    #[must_use]
    pub fn new_local(user_id: impl Into<String>, label: Option<String>) -> Self {
        Self {
            id: DeviceId::generate(),
            user_id: user_id.into(),
            label,
            is_local: true,
            last_seen_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
