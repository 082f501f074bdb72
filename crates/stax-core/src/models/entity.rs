//! Entity revision tracking
//!
//! Every syncable entity (task, stack, tag, ...) carries a monotonic
//! revision counter. The engine compares revisions, not payloads, to detect
//! concurrent edits across devices.

use serde::{Deserialize, Serialize};

/// Sync progress of a single entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Local changes exist that the server has not acknowledged
    Pending,
    /// Entity matches the last server-acknowledged state
    Synced,
    /// The last push for this entity was rejected
    Failed,
}

impl SyncState {
    /// Storage string for this state
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    /// Parse a storage string; unknown values read back as `Pending`,
    /// which at worst re-pushes an already-acknowledged entity.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "synced" => Self::Synced,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Revision row for one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRevision {
    /// Entity this row tracks
    pub entity_id: String,
    /// Monotonically increasing revision counter
    pub revision: i64,
    /// Sync progress
    pub sync_state: SyncState,
    /// Last local mutation or remote application (Unix ms)
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_state_roundtrip() {
        for state in [SyncState::Pending, SyncState::Synced, SyncState::Failed] {
            assert_eq!(SyncState::parse(state.as_str()), state);
        }
    }

    #[test]
    fn test_sync_state_unknown_reads_pending() {
        assert_eq!(SyncState::parse("garbage"), SyncState::Pending);
    }
}
