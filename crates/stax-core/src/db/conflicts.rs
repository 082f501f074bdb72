//! Conflict audit repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{ConflictOutcome, SyncConflict};
use rusqlite::{params, Connection};

/// Trait for persisted conflict records
pub trait ConflictStore {
    /// Persist a conflict; returns the assigned row id
    fn record(&self, conflict: &SyncConflict) -> Result<i64>;

    /// Recent conflicts, newest first. Acknowledged rows are excluded
    /// unless `include_acknowledged` is set.
    fn list(&self, limit: usize, include_acknowledged: bool) -> Result<Vec<SyncConflict>>;

    /// Dismiss a conflict; returns whether the row existed
    fn acknowledge(&self, id: i64) -> Result<bool>;

    /// Number of conflicts awaiting acknowledgment
    fn unacknowledged_count(&self) -> Result<u64>;
}

/// SQLite implementation of [`ConflictStore`]
pub struct SqliteConflictStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictStore<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncConflict> {
        let outcome: String = row.get(11)?;
        Ok(SyncConflict {
            id: row.get(0)?,
            entity_id: row.get(1)?,
            event_id: row.get(2)?,
            local_revision: row.get(3)?,
            remote_base_revision: row.get(4)?,
            local_payload: row.get(5)?,
            remote_payload: row.get(6)?,
            local_updated_at: row.get(7)?,
            remote_timestamp: row.get(8)?,
            local_device_id: row.get(9)?,
            remote_device_id: row.get(10)?,
            outcome: ConflictOutcome::parse(&outcome),
            acknowledged: row.get::<_, i32>(12)? != 0,
            resolved_at: row.get(13)?,
        })
    }
}

const CONFLICT_COLUMNS: &str = "id, entity_id, event_id, local_revision, remote_base_revision, \
                                local_payload, remote_payload, local_updated_at, remote_timestamp, \
                                local_device_id, remote_device_id, outcome, acknowledged, resolved_at";

impl ConflictStore for SqliteConflictStore<'_> {
    fn record(&self, conflict: &SyncConflict) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sync_conflicts
             (entity_id, event_id, local_revision, remote_base_revision,
              local_payload, remote_payload, local_updated_at, remote_timestamp,
              local_device_id, remote_device_id, outcome, acknowledged, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                conflict.entity_id,
                conflict.event_id,
                conflict.local_revision,
                conflict.remote_base_revision,
                conflict.local_payload,
                conflict.remote_payload,
                conflict.local_updated_at,
                conflict.remote_timestamp,
                conflict.local_device_id,
                conflict.remote_device_id,
                conflict.outcome.as_str(),
                i32::from(conflict.acknowledged),
                conflict.resolved_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list(&self, limit: usize, include_acknowledged: bool) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE ?1 OR acknowledged = 0
             ORDER BY resolved_at DESC
             LIMIT ?2"
        ))?;

        let conflicts = stmt
            .query_map(
                params![include_acknowledged, limit as i64],
                Self::parse_conflict,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    fn acknowledge(&self, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_conflicts SET acknowledged = 1 WHERE id = ?",
            params![id],
        )?;
        Ok(rows > 0)
    }

    fn unacknowledged_count(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts WHERE acknowledged = 0",
            [],
            |row| row.get(0),
        )?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn sample(entity: &str) -> SyncConflict {
        SyncConflict {
            id: 0,
            entity_id: entity.to_string(),
            event_id: "event-1".to_string(),
            local_revision: 2,
            remote_base_revision: 1,
            local_payload: Some(r#"{"title":"local"}"#.to_string()),
            remote_payload: r#"{"title":"remote"}"#.to_string(),
            local_updated_at: 2000,
            remote_timestamp: 3000,
            local_device_id: Some("device-a".to_string()),
            remote_device_id: Some("device-b".to_string()),
            outcome: ConflictOutcome::RemoteWins,
            acknowledged: false,
            resolved_at: 3000,
        }
    }

    #[test]
    fn test_record_and_list() {
        let db = setup();
        let conflicts = SqliteConflictStore::new(db.connection());

        let id = conflicts.record(&sample("task-1")).unwrap();
        assert!(id > 0);

        let listed = conflicts.list(10, false).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].outcome, ConflictOutcome::RemoteWins);
        assert_eq!(listed[0].local_payload.as_deref(), Some(r#"{"title":"local"}"#));
    }

    #[test]
    fn test_acknowledge_hides_from_default_listing() {
        let db = setup();
        let conflicts = SqliteConflictStore::new(db.connection());

        let id = conflicts.record(&sample("task-1")).unwrap();
        assert_eq!(conflicts.unacknowledged_count().unwrap(), 1);

        assert!(conflicts.acknowledge(id).unwrap());
        assert!(!conflicts.acknowledge(9999).unwrap());

        assert_eq!(conflicts.unacknowledged_count().unwrap(), 0);
        assert!(conflicts.list(10, false).unwrap().is_empty());
        assert_eq!(conflicts.list(10, true).unwrap().len(), 1);
    }
}
