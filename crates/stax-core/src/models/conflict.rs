//! Sync conflict model

use serde::{Deserialize, Serialize};

/// How a conflict was (or was not) resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictOutcome {
    /// The remote event was applied over the local state
    RemoteWins,
    /// The local state was kept; the remote event was not applied
    LocalWins,
    /// Both versions were combined (not produced by the default policy)
    Merged,
    /// Could not be resolved automatically; kept for manual reconciliation
    Unresolved,
}

impl ConflictOutcome {
    /// Storage string for this outcome
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteWins => "remote-wins",
            Self::LocalWins => "local-wins",
            Self::Merged => "merged",
            Self::Unresolved => "unresolved",
        }
    }

    /// Parse a storage string; unknown values read back as `Unresolved`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "remote-wins" => Self::RemoteWins,
            "local-wins" => Self::LocalWins,
            "merged" => Self::Merged,
            _ => Self::Unresolved,
        }
    }
}

/// Recorded concurrent-edit conflict, retained for audit until acknowledged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier (0 before persistence)
    pub id: i64,
    /// Entity both sides mutated
    pub entity_id: String,
    /// Remote event that collided with local state
    pub event_id: String,
    /// Local revision at detection time
    pub local_revision: i64,
    /// Revision the remote event was generated against
    pub remote_base_revision: i64,
    /// Snapshot of the most recent local payload, when available
    pub local_payload: Option<String>,
    /// The remote event's payload
    pub remote_payload: String,
    /// Local entity's last mutation time (Unix ms)
    pub local_updated_at: i64,
    /// Remote event's wall-clock timestamp (Unix ms)
    pub remote_timestamp: i64,
    /// Device that produced the local state
    pub local_device_id: Option<String>,
    /// Device that produced the remote event
    pub remote_device_id: Option<String>,
    /// Resolution outcome
    pub outcome: ConflictOutcome,
    /// Whether the user/operator has dismissed this conflict
    pub acknowledged: bool,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: i64,
}
