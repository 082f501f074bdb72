//! Conflict detection and resolution
//!
//! A conflict exists when a remote event was generated against an older
//! revision than the entity currently has locally - both devices edited the
//! same entity while apart. The default policy is last-writer-wins by
//! wall-clock timestamp; exact ties fall back to device-id lexical order so
//! every device resolves the same way.

use chrono::Utc;

use crate::models::{ConflictOutcome, DeviceId, EntityRevision, Event, SyncConflict};

/// Whether a remote event conflicts with the local entity state.
///
/// True when the local entity has moved past the revision the remote event
/// was generated against. A remote event based on the current (or a newer)
/// revision applies cleanly.
#[must_use]
pub fn detect(remote: &Event, local: &EntityRevision) -> bool {
    remote.base_revision < local.revision
}

/// Resolve a detected conflict.
///
/// Last-writer-wins: the newer wall-clock timestamp takes the entity. On an
/// exact tie the lexically greater device id wins; a tie against a remote
/// event with no device id cannot be ordered and stays [`Unresolved`]
/// (recorded for manual reconciliation, the sync cycle proceeds).
///
/// [`Unresolved`]: ConflictOutcome::Unresolved
#[must_use]
pub fn resolve(remote: &Event, local: &EntityRevision, local_device: &DeviceId) -> ConflictOutcome {
    match remote.timestamp_ms().cmp(&local.updated_at) {
        std::cmp::Ordering::Greater => ConflictOutcome::RemoteWins,
        std::cmp::Ordering::Less => ConflictOutcome::LocalWins,
        std::cmp::Ordering::Equal => match remote.device_id.as_ref() {
            // same origin device: a replay of our own edit, safe to take
            Some(remote_device) if remote_device == local_device => ConflictOutcome::RemoteWins,
            Some(remote_device) if remote_device > local_device => ConflictOutcome::RemoteWins,
            Some(_) => ConflictOutcome::LocalWins,
            None => ConflictOutcome::Unresolved,
        },
    }
}

/// Build the audit record for a detected conflict.
///
/// `local_payload` is the most recent local event payload for the entity,
/// when the log still has one.
#[must_use]
pub fn conflict_record(
    remote: &Event,
    local: &EntityRevision,
    local_device: &DeviceId,
    local_payload: Option<String>,
    outcome: ConflictOutcome,
) -> SyncConflict {
    SyncConflict {
        id: 0,
        entity_id: remote.entity_id.clone(),
        event_id: remote.id.as_str(),
        local_revision: local.revision,
        remote_base_revision: remote.base_revision,
        local_payload,
        remote_payload: remote.payload.clone(),
        local_updated_at: local.updated_at,
        remote_timestamp: remote.timestamp_ms(),
        local_device_id: Some(local_device.as_str().to_string()),
        remote_device_id: remote.device_id.as_ref().map(|d| d.as_str().to_string()),
        outcome,
        acknowledged: false,
        resolved_at: Utc::now().timestamp_millis(),
    }
}
