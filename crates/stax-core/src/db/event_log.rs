//! Event log repository - durable append-only storage for events

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{DeviceId, Event, EventId};
use rusqlite::{params, Connection};

/// Trait for event log storage operations
pub trait EventLog {
    /// Append a local event, leaving it unsynced
    fn append(&self, event: &Event) -> Result<EventId>;

    /// Unsynced events in creation order (ties broken by sequence id,
    /// not timestamp, so clock skew cannot reorder a device's own edits)
    fn pending_events(&self, limit: usize) -> Result<Vec<Event>>;

    /// Number of unsynced events
    fn pending_count(&self) -> Result<u64>;

    /// Mark events as synced; already-synced ids are no-ops.
    /// Returns how many rows actually changed.
    fn mark_synced(&self, ids: &[EventId]) -> Result<usize>;

    /// Events newer than the checkpoint, oldest first.
    ///
    /// When `exclude_device` is set, events from that device are filtered
    /// out; events with no device id are never filtered (fail open).
    fn events_since(
        &self,
        checkpoint: Option<i64>,
        exclude_device: Option<&DeviceId>,
    ) -> Result<Vec<Event>>;

    /// Record a remote event as already synced.
    ///
    /// Returns `false` when the id is already present - the caller must
    /// then skip re-applying it (exactly-once effect under redelivery).
    fn record_remote(&self, event: &Event) -> Result<bool>;

    /// Whether an event id is already in the log
    fn contains(&self, id: &EventId) -> Result<bool>;

    /// Most recent event for an entity, excluding the given id
    fn latest_for_entity(&self, entity_id: &str, exclude: &EventId) -> Result<Option<Event>>;
}

/// SQLite implementation of [`EventLog`]
pub struct SqliteEventLog<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteEventLog<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn insert(&self, event: &Event, synced: bool) -> Result<usize> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO events
             (id, event_type, payload, entity_id, user_id, device_id,
              timestamp, base_revision, payload_version, is_synced)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                event.id.as_str(),
                event.event_type,
                event.payload,
                event.entity_id,
                event.user_id,
                event.device_id.as_ref().map(DeviceId::as_str),
                event.timestamp_ms(),
                event.base_revision,
                event.payload_version,
                i32::from(synced)
            ],
        )?;
        Ok(rows)
    }

    /// Parse an event from a database row
    fn parse_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
        let id: String = row.get(1)?;
        let device_id: Option<String> = row.get(6)?;
        let timestamp_ms: i64 = row.get(7)?;
        Ok(Event {
            seq: row.get(0)?,
            id: id.parse().unwrap_or_default(),
            event_type: row.get(2)?,
            payload: row.get(3)?,
            entity_id: row.get(4)?,
            user_id: row.get(5)?,
            device_id: device_id.map(DeviceId::from),
            timestamp: chrono::DateTime::from_timestamp_millis(timestamp_ms)
                .unwrap_or_default(),
            base_revision: row.get(8)?,
            payload_version: row.get(9)?,
            is_synced: row.get::<_, i32>(10)? != 0,
        })
    }
}

const EVENT_COLUMNS: &str = "seq, id, event_type, payload, entity_id, user_id, device_id, \
                             timestamp, base_revision, payload_version, is_synced";

impl EventLog for SqliteEventLog<'_> {
    fn append(&self, event: &Event) -> Result<EventId> {
        if event.event_type.trim().is_empty() {
            return Err(Error::InvalidInput("event type cannot be empty".into()));
        }
        if event.payload.trim().is_empty() {
            return Err(Error::InvalidInput("event payload cannot be empty".into()));
        }

        let rows = self.insert(event, false)?;
        if rows == 0 {
            return Err(Error::InvalidInput(format!(
                "event {} already exists",
                event.id
            )));
        }
        Ok(event.id)
    }

    fn pending_events(&self, limit: usize) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE is_synced = 0
             ORDER BY seq
             LIMIT ?"
        ))?;

        let events = stmt
            .query_map(params![limit as i64], Self::parse_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(events)
    }

    fn pending_count(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM events WHERE is_synced = 0",
            [],
            |row| row.get(0),
        )?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }

    fn mark_synced(&self, ids: &[EventId]) -> Result<usize> {
        let mut changed = 0;
        for id in ids {
            changed += self.conn.execute(
                "UPDATE events SET is_synced = 1 WHERE id = ? AND is_synced = 0",
                params![id.as_str()],
            )?;
        }
        Ok(changed)
    }

    fn events_since(
        &self,
        checkpoint: Option<i64>,
        exclude_device: Option<&DeviceId>,
    ) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE timestamp > ?1
               AND (?2 IS NULL OR device_id IS NULL OR device_id != ?2)
             ORDER BY timestamp, seq"
        ))?;

        let events = stmt
            .query_map(
                params![
                    checkpoint.unwrap_or(i64::MIN),
                    exclude_device.map(DeviceId::as_str)
                ],
                Self::parse_event,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(events)
    }

    fn record_remote(&self, event: &Event) -> Result<bool> {
        Ok(self.insert(event, true)? > 0)
    }

    fn contains(&self, id: &EventId) -> Result<bool> {
        let found: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM events WHERE id = ?",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    fn latest_for_entity(&self, entity_id: &str, exclude: &EventId) -> Result<Option<Event>> {
        let result = self.conn.query_row(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE entity_id = ? AND id != ?
                 ORDER BY seq DESC
                 LIMIT 1"
            ),
            params![entity_id, exclude.as_str()],
            Self::parse_event,
        );

        match result {
            Ok(event) => Ok(Some(event)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
