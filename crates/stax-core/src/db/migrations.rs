//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|v| v != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: event log, entity revisions, sync state
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS schema_version (
             version INTEGER PRIMARY KEY
         );
         CREATE TABLE IF NOT EXISTS events (
             seq INTEGER PRIMARY KEY AUTOINCREMENT,
             id TEXT NOT NULL UNIQUE,
             event_type TEXT NOT NULL,
             payload TEXT NOT NULL,
             entity_id TEXT NOT NULL,
             user_id TEXT NOT NULL,
             device_id TEXT,
             timestamp INTEGER NOT NULL,
             base_revision INTEGER NOT NULL DEFAULT 0,
             payload_version INTEGER NOT NULL DEFAULT 1,
             is_synced INTEGER NOT NULL DEFAULT 0
         );
         CREATE INDEX IF NOT EXISTS idx_events_pending ON events(is_synced, seq);
         CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
         CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_id, seq DESC);
         CREATE TABLE IF NOT EXISTS entity_revisions (
             entity_id TEXT PRIMARY KEY,
             revision INTEGER NOT NULL DEFAULT 0,
             sync_state TEXT NOT NULL DEFAULT 'pending',
             updated_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS sync_state (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );
         INSERT INTO schema_version (version) VALUES (1);
         COMMIT;",
    )?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: conflict audit log and device registry
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS sync_conflicts (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             entity_id TEXT NOT NULL,
             event_id TEXT NOT NULL,
             local_revision INTEGER NOT NULL,
             remote_base_revision INTEGER NOT NULL,
             local_payload TEXT,
             remote_payload TEXT NOT NULL,
             local_updated_at INTEGER NOT NULL,
             remote_timestamp INTEGER NOT NULL,
             local_device_id TEXT,
             remote_device_id TEXT,
             outcome TEXT NOT NULL,
             acknowledged INTEGER NOT NULL DEFAULT 0,
             resolved_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entity ON sync_conflicts(entity_id);
         CREATE INDEX IF NOT EXISTS idx_sync_conflicts_ack ON sync_conflicts(acknowledged, resolved_at DESC);
         CREATE TABLE IF NOT EXISTS devices (
             id TEXT PRIMARY KEY,
             user_id TEXT NOT NULL,
             label TEXT,
             is_local INTEGER NOT NULL DEFAULT 0,
             last_seen_at INTEGER NOT NULL
         );
         INSERT INTO schema_version (version) VALUES (2);
         COMMIT;",
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
