//! Device registry repository

use crate::error::Result;
use crate::models::{Device, DeviceId};
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for device identity storage
pub trait DeviceRegistry {
    /// The local installation's device row, if one has been created
    fn local(&self) -> Result<Option<Device>>;

    /// Insert a device row
    fn insert(&self, device: &Device) -> Result<()>;

    /// Record that an event from a peer device was seen. Creates the peer
    /// row on first sight, bumps `last_seen_at` afterwards.
    fn observe_peer(&self, id: &DeviceId, user_id: &str, seen_at: i64) -> Result<()>;

    /// All known devices, local first, then most recently seen
    fn list(&self) -> Result<Vec<Device>>;
}

/// SQLite implementation of [`DeviceRegistry`]
pub struct SqliteDeviceRegistry<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteDeviceRegistry<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
        let id: String = row.get(0)?;
        Ok(Device {
            id: DeviceId::from(id),
            user_id: row.get(1)?,
            label: row.get(2)?,
            is_local: row.get::<_, i32>(3)? != 0,
            last_seen_at: row.get(4)?,
        })
    }
}

impl DeviceRegistry for SqliteDeviceRegistry<'_> {
    fn local(&self) -> Result<Option<Device>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, user_id, label, is_local, last_seen_at
                 FROM devices WHERE is_local = 1",
                [],
                Self::parse_device,
            )
            .optional()?;
        Ok(row)
    }

    fn insert(&self, device: &Device) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO devices (id, user_id, label, is_local, last_seen_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                device.id.as_str(),
                device.user_id,
                device.label,
                i32::from(device.is_local),
                device.last_seen_at
            ],
        )?;
        Ok(())
    }

    fn observe_peer(&self, id: &DeviceId, user_id: &str, seen_at: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO devices (id, user_id, label, is_local, last_seen_at)
             VALUES (?1, ?2, NULL, 0, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 last_seen_at = MAX(last_seen_at, ?3)",
            params![id.as_str(), user_id, seen_at],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<Device>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, label, is_local, last_seen_at
             FROM devices
             ORDER BY is_local DESC, last_seen_at DESC",
        )?;

        let devices = stmt
            .query_map([], Self::parse_device)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(devices)
    }
}
