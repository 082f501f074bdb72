//! Thread-safe store handle shared by the orchestrator and the embedding app.
//!
//! All mutable engine state (event log, checkpoint, revisions, conflicts,
//! devices) lives behind one lock per store. Lock scopes never span a
//! network await.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::db::{
    ConflictStore, Database, DeviceRegistry, EventLog, RevisionStore, SqliteConflictStore,
    SqliteDeviceRegistry, SqliteEventLog, SqliteRevisionStore, SqliteSyncState, SyncStateStore,
};
use crate::models::{Device, EntityRevision, Event, EventId, SyncConflict};
use crate::sync::SyncContext;
use crate::Result;

/// Thread-safe handle to the engine's local store
#[derive(Clone)]
pub struct SyncStore {
    db: Arc<Mutex<Database>>,
}

impl SyncStore {
    /// Open a store at the given filesystem path, creating parents as needed
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory store (primarily for tests)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Lock the underlying database for a batch of repository calls
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().await
    }

    /// Record a domain mutation: bumps the entity revision, marks it
    /// pending, and appends the event carrying the pre-increment revision
    /// as its base - all in one transaction.
    ///
    /// This is the append surface the domain CRUD services call on every
    /// local edit.
    pub async fn record_local_mutation(
        &self,
        context: &SyncContext,
        event_type: &str,
        entity_id: &str,
        payload: &str,
    ) -> Result<Event> {
        let db = self.lock().await;
        let tx = db.connection().unchecked_transaction()?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let revision = SqliteRevisionStore::new(&tx).begin_local_mutation(entity_id, now_ms)?;
        let event = Event::new(
            event_type,
            payload,
            entity_id,
            context.user_id.clone(),
            Some(context.device_id.clone()),
            revision.revision - 1,
        );
        SqliteEventLog::new(&tx).append(&event)?;

        tx.commit()?;
        Ok(event)
    }

    /// Unsynced events in creation order
    pub async fn pending_events(&self, limit: usize) -> Result<Vec<Event>> {
        let db = self.lock().await;
        SqliteEventLog::new(db.connection()).pending_events(limit)
    }

    /// Number of unsynced events
    pub async fn pending_event_count(&self) -> Result<u64> {
        let db = self.lock().await;
        SqliteEventLog::new(db.connection()).pending_count()
    }

    /// Mark events synced and confirm their entity revisions.
    ///
    /// An entity becomes `synced` only when the acknowledged revision still
    /// matches its current revision; a newer in-flight edit keeps it
    /// pending. When the server acknowledged only part of the push, the
    /// entities behind the rejected events are marked `failed`; their
    /// events stay in the log and are re-pushed on a later cycle.
    pub async fn confirm_pushed(&self, events: &[Event], acked_ids: &[EventId]) -> Result<()> {
        let db = self.lock().await;
        let tx = db.connection().unchecked_transaction()?;

        SqliteEventLog::new(&tx).mark_synced(acked_ids)?;
        let revisions = SqliteRevisionStore::new(&tx);
        for event in events.iter().filter(|e| acked_ids.contains(&e.id)) {
            revisions.acknowledge(&event.entity_id, event.base_revision + 1)?;
        }
        if !acked_ids.is_empty() {
            for event in events.iter().filter(|e| !acked_ids.contains(&e.id)) {
                tracing::warn!(id = %event.id, entity = %event.entity_id, "push was rejected by the server");
                revisions.mark_failed(&event.entity_id)?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Current checkpoint (Unix ms)
    pub async fn checkpoint(&self) -> Result<Option<i64>> {
        let db = self.lock().await;
        SqliteSyncState::new(db.connection()).checkpoint()
    }

    /// Move the checkpoint forward (never regresses)
    pub async fn advance_checkpoint(&self, timestamp_ms: i64) -> Result<()> {
        let db = self.lock().await;
        SqliteSyncState::new(db.connection()).advance_checkpoint(timestamp_ms)
    }

    /// When the last successful sync cycle finished (Unix ms)
    pub async fn last_sync_at(&self) -> Result<Option<i64>> {
        let db = self.lock().await;
        SqliteSyncState::new(db.connection()).last_sync_at()
    }

    /// Record a successful sync cycle
    pub async fn set_last_sync_at(&self, timestamp_ms: i64) -> Result<()> {
        let db = self.lock().await;
        SqliteSyncState::new(db.connection()).set_last_sync_at(timestamp_ms)
    }

    /// Current revision row for an entity
    pub async fn entity_revision(&self, entity_id: &str) -> Result<Option<EntityRevision>> {
        let db = self.lock().await;
        SqliteRevisionStore::new(db.connection()).get(entity_id)
    }

    /// Recent conflicts, newest first
    pub async fn list_conflicts(
        &self,
        limit: usize,
        include_acknowledged: bool,
    ) -> Result<Vec<SyncConflict>> {
        let db = self.lock().await;
        SqliteConflictStore::new(db.connection()).list(limit, include_acknowledged)
    }

    /// Dismiss a conflict; returns whether the row existed
    pub async fn acknowledge_conflict(&self, id: i64) -> Result<bool> {
        let db = self.lock().await;
        SqliteConflictStore::new(db.connection()).acknowledge(id)
    }

    /// Number of conflicts awaiting acknowledgment
    pub async fn unacknowledged_conflict_count(&self) -> Result<u64> {
        let db = self.lock().await;
        SqliteConflictStore::new(db.connection()).unacknowledged_count()
    }

    /// All known devices, local first
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let db = self.lock().await;
        SqliteDeviceRegistry::new(db.connection()).list()
    }

    /// The local device identity, generated and persisted on first call
    pub async fn ensure_local_device(
        &self,
        user_id: &str,
        label: Option<&str>,
    ) -> Result<Device> {
        let db = self.lock().await;
        let registry = SqliteDeviceRegistry::new(db.connection());

        if let Some(device) = registry.local()? {
            return Ok(device);
        }

        let device = Device::new_local(user_id, label.map(ToString::to_string));
        registry.insert(&device)?;
        tracing::info!(device_id = %device.id, "registered local device");
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncState;
    use pretty_assertions::assert_eq;

    async fn setup() -> (SyncStore, SyncContext) {
        let store = SyncStore::open_in_memory().await.unwrap();
        let device = store.ensure_local_device("user-1", None).await.unwrap();
        (store, SyncContext::new(device.id, "user-1"))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_local_mutation_links_revision_and_event() {
        let (store, context) = setup().await;

        let first = store
            .record_local_mutation(&context, "task.created", "task-1", r#"{"title":"a"}"#)
            .await
            .unwrap();
        assert_eq!(first.base_revision, 0);

        let second = store
            .record_local_mutation(&context, "task.updated", "task-1", r#"{"title":"b"}"#)
            .await
            .unwrap();
        assert_eq!(second.base_revision, 1);

        let revision = store.entity_revision("task-1").await.unwrap().unwrap();
        assert_eq!(revision.revision, 2);
        assert_eq!(revision.sync_state, SyncState::Pending);
        assert_eq!(store.pending_event_count().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_confirm_pushed_respects_in_flight_edits() {
        let (store, context) = setup().await;

        let event = store
            .record_local_mutation(&context, "task.created", "task-1", "{}")
            .await
            .unwrap();
        // a newer edit lands before the ack comes back
        store
            .record_local_mutation(&context, "task.updated", "task-1", r#"{"v":2}"#)
            .await
            .unwrap();

        store
            .confirm_pushed(std::slice::from_ref(&event), &[event.id])
            .await
            .unwrap();

        // the first event is synced, but the entity stays pending
        assert_eq!(store.pending_event_count().await.unwrap(), 1);
        let revision = store.entity_revision("task-1").await.unwrap().unwrap();
        assert_eq!(revision.sync_state, SyncState::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_partial_ack_marks_rejected_entity_failed() {
        let (store, context) = setup().await;

        let accepted = store
            .record_local_mutation(&context, "task.created", "task-1", "{}")
            .await
            .unwrap();
        let rejected = store
            .record_local_mutation(&context, "stack.created", "stack-1", "{}")
            .await
            .unwrap();

        store
            .confirm_pushed(&[accepted.clone(), rejected.clone()], &[accepted.id])
            .await
            .unwrap();

        let ok = store.entity_revision("task-1").await.unwrap().unwrap();
        assert_eq!(ok.sync_state, SyncState::Synced);
        let failed = store.entity_revision("stack-1").await.unwrap().unwrap();
        assert_eq!(failed.sync_state, SyncState::Failed);
        // the rejected event stays pending for the next cycle
        assert_eq!(store.pending_event_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ensure_local_device_is_stable() {
        let (store, _context) = setup().await;

        let first = store.ensure_local_device("user-1", None).await.unwrap();
        let second = store.ensure_local_device("user-1", None).await.unwrap();
        assert_eq!(first.id, second.id);

        let devices = store.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
    }
}
