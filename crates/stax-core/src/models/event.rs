//! Event model
//!
//! Events are the unit of sync: every domain mutation appends one, and the
//! engine pushes/pulls them between devices. Payloads are opaque serialized
//! blobs; the engine only interprets the envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Payload schema version written by this engine
pub const CURRENT_PAYLOAD_VERSION: i32 = 2;

/// Oldest payload schema version the engine still applies.
///
/// Events below this version are dropped during application rather than
/// crashing the decoder on a legacy shape.
pub const MIN_PAYLOAD_VERSION: i32 = 1;

/// A unique identifier for an event, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Create a new unique event ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Known event types, keyed by the `domain.action` string.
///
/// Unrecognized type strings map to `Unknown` so future producers do not
/// break older clients; unknown events still flow through the log untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskCompleted,
    TaskDeleted,
    StackCreated,
    StackUpdated,
    StackDeleted,
    TagCreated,
    TagUpdated,
    TagDeleted,
    Unknown,
}

impl EventKind {
    /// Parse a `domain.action` type string; never fails.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "task.created" => Self::TaskCreated,
            "task.updated" => Self::TaskUpdated,
            "task.completed" => Self::TaskCompleted,
            "task.deleted" => Self::TaskDeleted,
            "stack.created" => Self::StackCreated,
            "stack.updated" => Self::StackUpdated,
            "stack.deleted" => Self::StackDeleted,
            "tag.created" => Self::TagCreated,
            "tag.updated" => Self::TagUpdated,
            "tag.deleted" => Self::TagDeleted,
            _ => Self::Unknown,
        }
    }

    /// The canonical type string for this kind
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task.created",
            Self::TaskUpdated => "task.updated",
            Self::TaskCompleted => "task.completed",
            Self::TaskDeleted => "task.deleted",
            Self::StackCreated => "stack.created",
            Self::StackUpdated => "stack.updated",
            Self::StackDeleted => "stack.deleted",
            Self::TagCreated => "tag.created",
            Self::TagUpdated => "tag.updated",
            Self::TagDeleted => "tag.deleted",
            Self::Unknown => "unknown",
        }
    }
}

/// A domain-mutation record in the append-only log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier, client-generated, immutable
    pub id: EventId,
    /// `domain.action` type string, e.g. `stack.updated`
    pub event_type: String,
    /// Opaque serialized payload (domain-owned)
    pub payload: String,
    /// Entity this mutation targets
    pub entity_id: String,
    /// Owning user
    pub user_id: String,
    /// Originating device; absent for events from legacy producers
    pub device_id: Option<super::DeviceId>,
    /// Wall-clock time of the mutation
    pub timestamp: DateTime<Utc>,
    /// Entity revision this mutation was generated against
    pub base_revision: i64,
    /// Payload schema version
    pub payload_version: i32,
    /// Whether the remote store has acknowledged this event
    pub is_synced: bool,
    /// Local insertion order, assigned by the log (0 before persistence)
    pub seq: i64,
}

impl Event {
    /// Create a new local event for the given mutation
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        payload: impl Into<String>,
        entity_id: impl Into<String>,
        user_id: impl Into<String>,
        device_id: Option<super::DeviceId>,
        base_revision: i64,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            payload: payload.into(),
            entity_id: entity_id.into(),
            user_id: user_id.into(),
            device_id,
            timestamp: Utc::now(),
            base_revision,
            payload_version: CURRENT_PAYLOAD_VERSION,
            is_synced: false,
            seq: 0,
        }
    }

    /// The typed kind for this event's type string
    #[must_use]
    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event_type)
    }

    /// Event timestamp as Unix milliseconds (storage representation)
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_unique() {
        let id1 = EventId::new();
        let id2 = EventId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_event_id_parse() {
        let id = EventId::new();
        let parsed: EventId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_event_new_defaults() {
        let event = Event::new("task.created", "{}", "task-1", "user-1", None, 0);
        assert!(!event.is_synced);
        assert_eq!(event.seq, 0);
        assert_eq!(event.payload_version, CURRENT_PAYLOAD_VERSION);
        assert_eq!(event.kind(), EventKind::TaskCreated);
    }

    #[test]
    fn test_event_kind_roundtrip() {
        for kind in [
            EventKind::TaskCreated,
            EventKind::StackUpdated,
            EventKind::TagDeleted,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_event_kind_unknown_is_not_fatal() {
        assert_eq!(EventKind::parse("widget.exploded"), EventKind::Unknown);
        assert_eq!(EventKind::parse(""), EventKind::Unknown);
    }
}
