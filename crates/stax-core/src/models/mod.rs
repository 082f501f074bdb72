//! Data models for the Stax sync engine

mod conflict;
mod device;
mod entity;
mod event;

pub use conflict::{ConflictOutcome, SyncConflict};
pub use device::{Device, DeviceId};
pub use entity::{EntityRevision, SyncState};
pub use event::{Event, EventId, EventKind, CURRENT_PAYLOAD_VERSION, MIN_PAYLOAD_VERSION};
