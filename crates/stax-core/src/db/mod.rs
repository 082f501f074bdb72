//! Database layer for the sync engine

mod connection;
mod conflicts;
mod devices;
mod event_log;
mod migrations;
mod revisions;
mod sync_state;

pub use connection::Database;
pub use conflicts::{ConflictStore, SqliteConflictStore};
pub use devices::{DeviceRegistry, SqliteDeviceRegistry};
pub use event_log::{EventLog, SqliteEventLog};
pub use revisions::{RevisionStore, SqliteRevisionStore};
pub use sync_state::{SqliteSyncState, SyncStateStore};
