//! Entity revision repository

use crate::error::Result;
use crate::models::{EntityRevision, SyncState};
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for entity revision tracking
pub trait RevisionStore {
    /// Current revision row for an entity
    fn get(&self, entity_id: &str) -> Result<Option<EntityRevision>>;

    /// Record a local mutation: increments the revision and marks the
    /// entity pending. Returns the row after the increment; the event for
    /// this mutation must carry `revision - 1` as its base revision.
    fn begin_local_mutation(&self, entity_id: &str, now_ms: i64) -> Result<EntityRevision>;

    /// Mark an entity synced, but only when the acknowledged revision still
    /// matches the entity's current revision. Returns whether it matched;
    /// a newer local edit in flight leaves the entity pending.
    fn acknowledge(&self, entity_id: &str, revision: i64) -> Result<bool>;

    /// Record a cleanly applied remote mutation. The revision only ever
    /// moves forward; the entity is marked synced.
    fn apply_remote(&self, entity_id: &str, revision: i64, now_ms: i64) -> Result<()>;

    /// Mark an entity's last push as rejected
    fn mark_failed(&self, entity_id: &str) -> Result<()>;
}

/// SQLite implementation of [`RevisionStore`]
pub struct SqliteRevisionStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRevisionStore<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_revision(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRevision> {
        let state: String = row.get(2)?;
        Ok(EntityRevision {
            entity_id: row.get(0)?,
            revision: row.get(1)?,
            sync_state: SyncState::parse(&state),
            updated_at: row.get(3)?,
        })
    }
}

impl RevisionStore for SqliteRevisionStore<'_> {
    fn get(&self, entity_id: &str) -> Result<Option<EntityRevision>> {
        let row = self
            .conn
            .query_row(
                "SELECT entity_id, revision, sync_state, updated_at
                 FROM entity_revisions WHERE entity_id = ?",
                params![entity_id],
                Self::parse_revision,
            )
            .optional()?;
        Ok(row)
    }

    fn begin_local_mutation(&self, entity_id: &str, now_ms: i64) -> Result<EntityRevision> {
        self.conn.execute(
            "INSERT INTO entity_revisions (entity_id, revision, sync_state, updated_at)
             VALUES (?1, 1, 'pending', ?2)
             ON CONFLICT(entity_id) DO UPDATE SET
                 revision = revision + 1,
                 sync_state = 'pending',
                 updated_at = ?2",
            params![entity_id, now_ms],
        )?;

        self.get(entity_id)?.ok_or_else(|| {
            crate::error::Error::NotFound(format!("entity revision for {entity_id}"))
        })
    }

    fn acknowledge(&self, entity_id: &str, revision: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE entity_revisions SET sync_state = 'synced'
             WHERE entity_id = ? AND revision = ?",
            params![entity_id, revision],
        )?;
        Ok(rows > 0)
    }

    fn apply_remote(&self, entity_id: &str, revision: i64, now_ms: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO entity_revisions (entity_id, revision, sync_state, updated_at)
             VALUES (?1, ?2, 'synced', ?3)
             ON CONFLICT(entity_id) DO UPDATE SET
                 revision = MAX(revision, ?2),
                 sync_state = 'synced',
                 updated_at = ?3",
            params![entity_id, revision, now_ms],
        )?;
        Ok(())
    }

    fn mark_failed(&self, entity_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE entity_revisions SET sync_state = 'failed' WHERE entity_id = ?",
            params![entity_id],
        )?;
        Ok(())
    }
}
