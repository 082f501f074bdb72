//! Sync state repository - checkpoint and cycle bookkeeping

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

const KEY_CHECKPOINT: &str = "checkpoint";
const KEY_LAST_SYNC_AT: &str = "last_sync_at";

/// Trait for the engine's own persisted state
pub trait SyncStateStore {
    /// Newest remote event timestamp fully applied locally (Unix ms)
    fn checkpoint(&self) -> Result<Option<i64>>;

    /// Move the checkpoint forward; a value at or behind the current
    /// checkpoint is a no-op (the cursor never regresses).
    fn advance_checkpoint(&self, timestamp_ms: i64) -> Result<()>;

    /// When the last successful sync cycle finished (Unix ms)
    fn last_sync_at(&self) -> Result<Option<i64>>;

    /// Record a successful sync cycle
    fn set_last_sync_at(&self, timestamp_ms: i64) -> Result<()>;
}

/// SQLite implementation of [`SyncStateStore`]
pub struct SqliteSyncState<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncState<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get_ms(&self, key: &str) -> Result<Option<i64>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        // A value this engine did not write (or wrote before a crash) must
        // not poison sync; unreadable state is treated as absent.
        Ok(value.and_then(|v| v.parse().ok()))
    }

    fn set_ms(&self, key: &str, timestamp_ms: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?, ?)",
            params![key, timestamp_ms.to_string()],
        )?;
        Ok(())
    }
}

impl SyncStateStore for SqliteSyncState<'_> {
    fn checkpoint(&self) -> Result<Option<i64>> {
        self.get_ms(KEY_CHECKPOINT)
    }

    fn advance_checkpoint(&self, timestamp_ms: i64) -> Result<()> {
        let current = self.checkpoint()?;
        if current.map_or(true, |c| timestamp_ms > c) {
            self.set_ms(KEY_CHECKPOINT, timestamp_ms)?;
        }
        Ok(())
    }

    fn last_sync_at(&self) -> Result<Option<i64>> {
        self.get_ms(KEY_LAST_SYNC_AT)
    }

    fn set_last_sync_at(&self, timestamp_ms: i64) -> Result<()> {
        self.set_ms(KEY_LAST_SYNC_AT, timestamp_ms)
    }
}
