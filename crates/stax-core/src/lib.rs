//! stax-core - Offline-first event sync engine for Stax
//!
//! Reconciles a locally-mutated, append-only event log with a remote event
//! store over an unreliable link. Domain services append events via
//! [`SyncStore::record_local_mutation`] and supply an [`ApplyRemoteEvent`]
//! callback; the engine handles push, streaming backfill, conflict
//! resolution, and checkpointing.
//!
//! [`SyncStore::record_local_mutation`]: services::SyncStore::record_local_mutation
//! [`ApplyRemoteEvent`]: sync::ApplyRemoteEvent

pub mod codec;
pub mod config;
pub mod conflict;
pub mod connection;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;
pub mod wire;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use models::{Event, EventId};
pub use services::SyncStore;
pub use sync::{SyncContext, SyncHandle, SyncOrchestrator};
