//! Sync orchestrator
//!
//! Drives the end-to-end cycle: push pending local events, pull the
//! streaming backfill, apply remote events through the conflict detector,
//! and advance the checkpoint. Cycles run periodically and immediately on
//! reconnect; every failure short of local-store corruption is retried on
//! the next cycle.

mod context;

pub use context::SyncContext;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::codec;
use crate::config::SyncConfig;
use crate::conflict;
use crate::connection::{ConnectionHandle, ConnectionState};
use crate::db::{
    ConflictStore, DeviceRegistry, EventLog, RevisionStore, SqliteConflictStore,
    SqliteDeviceRegistry, SqliteEventLog, SqliteRevisionStore, SqliteSyncState, SyncStateStore,
};
use crate::error::{Error, Result};
use crate::models::{ConflictOutcome, Event, EventId, SyncConflict, MIN_PAYLOAD_VERSION};
use crate::services::SyncStore;
use crate::wire::{ClientMessage, ServerMessage};

/// Domain-apply callback supplied by the CRUD services layer.
///
/// Called synchronously while a batch transaction is open; implementations
/// must be fast, must not re-enter the engine's store, and must be
/// idempotent (the same event can be redelivered after a dropped stream).
pub trait ApplyRemoteEvent: Send + Sync {
    /// Apply one remote event to local domain state
    fn apply(&self, event: &Event) -> Result<()>;
}

impl<F> ApplyRemoteEvent for F
where
    F: Fn(&Event) -> Result<()> + Send + Sync,
{
    fn apply(&self, event: &Event) -> Result<()> {
        self(event)
    }
}

/// Number of batch messages a backfill of `total_events` events produces at
/// the given batch size. Zero events means zero batches, not one.
#[must_use]
pub fn batch_count(total_events: u64, batch_size: u64) -> u64 {
    if batch_size == 0 {
        return 0;
    }
    total_events.div_ceil(batch_size)
}

/// What one sync cycle accomplished
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Events pushed and acknowledged
    pub pushed: usize,
    /// Remote events applied cleanly
    pub applied: usize,
    /// Conflicts detected (and resolved per policy)
    pub conflicts: usize,
    /// Remote events dropped (malformed or legacy payload version)
    pub dropped: usize,
    /// The cycle did nothing because no connection was available
    pub skipped_offline: bool,
}

/// Snapshot of the engine for status-surfacing UI
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub connection: ConnectionState,
    pub pending_events: u64,
    pub is_syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub unacknowledged_conflicts: u64,
}

struct StatusShared {
    is_syncing: AtomicBool,
    last_sync_ms: AtomicI64,
}

/// Cloneable handle for observing and stopping a running orchestrator
#[derive(Clone)]
pub struct SyncHandle {
    shared: Arc<StatusShared>,
    connection: ConnectionHandle,
    store: SyncStore,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl SyncHandle {
    /// Current connection state
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Whether a cycle is in flight right now
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.shared.is_syncing.load(Ordering::SeqCst)
    }

    /// When the last successful cycle finished
    #[must_use]
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        let ms = self.shared.last_sync_ms.load(Ordering::SeqCst);
        if ms == 0 {
            None
        } else {
            DateTime::from_timestamp_millis(ms)
        }
    }

    /// Number of local events awaiting push
    pub async fn pending_event_count(&self) -> Result<u64> {
        self.store.pending_event_count().await
    }

    /// Full status snapshot
    pub async fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            connection: self.connection_state(),
            pending_events: self.store.pending_event_count().await?,
            is_syncing: self.is_syncing(),
            last_sync_time: self.last_sync_time(),
            unacknowledged_conflicts: self.store.unacknowledged_conflict_count().await?,
        })
    }

    /// Stop the run loop and tear down the connection
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.connection.shutdown();
    }
}

/// Drives sync cycles against one store and one connection.
///
/// Construct with [`new`], spawn [`run`] (or call [`sync_cycle`] directly
/// for one-shot tooling).
///
/// [`new`]: Self::new
/// [`run`]: Self::run
/// [`sync_cycle`]: Self::sync_cycle
pub struct SyncOrchestrator {
    store: SyncStore,
    context: SyncContext,
    connection: ConnectionHandle,
    incoming: mpsc::Receiver<ServerMessage>,
    apply: Arc<dyn ApplyRemoteEvent>,
    config: SyncConfig,
    shared: Arc<StatusShared>,
    conflict_tx: mpsc::UnboundedSender<SyncConflict>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SyncOrchestrator {
    /// Create an orchestrator plus its handle and conflict notifications
    pub fn new(
        store: SyncStore,
        context: SyncContext,
        connection: ConnectionHandle,
        incoming: mpsc::Receiver<ServerMessage>,
        apply: impl ApplyRemoteEvent + 'static,
        config: SyncConfig,
    ) -> (Self, SyncHandle, mpsc::UnboundedReceiver<SyncConflict>) {
        let shared = Arc::new(StatusShared {
            is_syncing: AtomicBool::new(false),
            last_sync_ms: AtomicI64::new(0),
        });
        let (conflict_tx, conflict_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = SyncHandle {
            shared: Arc::clone(&shared),
            connection: connection.clone(),
            store: store.clone(),
            shutdown_tx: Arc::new(shutdown_tx),
        };
        let orchestrator = Self {
            store,
            context,
            connection,
            incoming,
            apply: Arc::new(apply),
            config,
            shared,
            conflict_tx,
            shutdown_rx,
        };
        (orchestrator, handle, conflict_rx)
    }

    /// Run periodic cycles until shutdown.
    ///
    /// Returns `Err` only for local-store corruption; everything else is
    /// logged and retried.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = self.connection.state_receiver();
        let mut shutdown = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // sync immediately on reconnect, ignore other transitions
                    if *state.borrow_and_update() != ConnectionState::Connected {
                        continue;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                    continue;
                }
            }

            match self.sync_cycle().await {
                Ok(outcome) => {
                    if !outcome.skipped_offline {
                        tracing::debug!(
                            pushed = outcome.pushed,
                            applied = outcome.applied,
                            conflicts = outcome.conflicts,
                            dropped = outcome.dropped,
                            "sync cycle finished"
                        );
                    }
                }
                Err(error) if error.is_corruption() => {
                    tracing::error!(%error, "local store corrupted, stopping sync");
                    self.connection.shutdown();
                    return Err(error);
                }
                Err(error) => tracing::warn!(%error, "sync cycle failed, will retry"),
            }
        }

        self.connection.shutdown();
        Ok(())
    }

    /// Run one push + pull cycle
    pub async fn sync_cycle(&mut self) -> Result<CycleOutcome> {
        // messages left over from an aborted cycle are meaningless now
        while self.incoming.try_recv().is_ok() {}

        if self.connection.is_persistently_failed() {
            // the controller parked after exhausting its attempts; ask for
            // a fresh round and try again next cycle
            self.connection.request_reconnect();
            return Ok(CycleOutcome {
                skipped_offline: true,
                ..CycleOutcome::default()
            });
        }
        if self.connection.state() != ConnectionState::Connected {
            return Ok(CycleOutcome {
                skipped_offline: true,
                ..CycleOutcome::default()
            });
        }

        self.shared.is_syncing.store(true, Ordering::SeqCst);
        let result = self.cycle_inner().await;
        self.shared.is_syncing.store(false, Ordering::SeqCst);

        if let Ok(outcome) = &result {
            if !outcome.skipped_offline {
                let now = Utc::now().timestamp_millis();
                self.shared.last_sync_ms.store(now, Ordering::SeqCst);
                self.store.set_last_sync_at(now).await?;
            }
        }
        result
    }

    async fn cycle_inner(&mut self) -> Result<CycleOutcome> {
        let mut outcome = CycleOutcome::default();
        self.push_pending(&mut outcome).await?;
        self.pull_backfill(&mut outcome).await?;
        Ok(outcome)
    }

    /// Push all pending events in a single request; failures leave them
    /// pending for the next cycle (at-least-once push).
    async fn push_pending(&mut self, outcome: &mut CycleOutcome) -> Result<()> {
        let pending = self.store.pending_events(self.config.push_limit).await?;
        if pending.is_empty() {
            return Ok(());
        }

        let events = pending.iter().map(codec::wire_event).collect();
        self.connection.send(ClientMessage::Push { events }).await?;

        let acked = self.await_push_ack().await?;
        let acked_ids: Vec<EventId> = acked.iter().filter_map(|id| id.parse().ok()).collect();
        self.store.confirm_pushed(&pending, &acked_ids).await?;

        outcome.pushed = acked_ids.len();
        tracing::debug!(pushed = outcome.pushed, "pushed pending events");
        Ok(())
    }

    async fn await_push_ack(&mut self) -> Result<Vec<String>> {
        loop {
            match self.next_message().await? {
                ServerMessage::PushAck { event_ids } => return Ok(event_ids),
                ServerMessage::Unknown | ServerMessage::HeartbeatAck => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message while awaiting push ack: {other:?}"
                    )))
                }
            }
        }
    }

    /// Next inbound message, bounded by the request timeout
    async fn next_message(&mut self) -> Result<ServerMessage> {
        match tokio::time::timeout(self.config.request_timeout, self.incoming.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(Error::Transport("connection task stopped".to_string())),
            Err(_) => Err(Error::Timeout(
                "no server message within the request timeout".to_string(),
            )),
        }
    }

    /// Consume one backfill stream: start, batches in order, completion.
    ///
    /// Batches received out of order are buffered and applied strictly by
    /// `batch_index`. The checkpoint advances per fully-applied batch and
    /// is set to the server's `newCheckpoint` on completion; a stream error
    /// aborts the cycle with the checkpoint untouched past the last
    /// committed batch.
    async fn pull_backfill(&mut self, outcome: &mut CycleOutcome) -> Result<()> {
        let checkpoint = self.store.checkpoint().await?;
        let initial_sync = checkpoint.is_none();
        let since = checkpoint
            .and_then(DateTime::from_timestamp_millis)
            .map(codec::format_timestamp);
        self.connection
            .send(ClientMessage::StreamRequest { since })
            .await?;

        let total_events = loop {
            match self.next_message().await? {
                ServerMessage::StreamStart { total_events } => break total_events,
                ServerMessage::StreamError { error, code } => {
                    return Err(Error::Stream {
                        reason: error,
                        code,
                    })
                }
                // a stale ack can trail an aborted push
                ServerMessage::Unknown
                | ServerMessage::HeartbeatAck
                | ServerMessage::PushAck { .. } => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "expected stream start, got {other:?}"
                    )))
                }
            }
        };
        tracing::debug!(total_events, initial_sync, "backfill stream started");

        let mut next_index: u64 = 0;
        let mut reorder_buffer: BTreeMap<u64, Vec<serde_json::Value>> = BTreeMap::new();

        loop {
            match self.next_message().await? {
                ServerMessage::StreamBatch {
                    batch_index,
                    is_last: _,
                    events,
                } => {
                    if batch_index < next_index {
                        // redelivery of a batch already committed
                        continue;
                    }
                    reorder_buffer.insert(batch_index, events);
                    while let Some(events) = reorder_buffer.remove(&next_index) {
                        self.apply_batch(&events, initial_sync, outcome).await?;
                        next_index += 1;
                    }
                }
                ServerMessage::StreamComplete {
                    processed_events,
                    new_checkpoint,
                } => {
                    if !reorder_buffer.is_empty() {
                        return Err(Error::Protocol(format!(
                            "stream completed with {} batches missing from the sequence",
                            reorder_buffer.len()
                        )));
                    }
                    let Some(checkpoint_ts) = codec::parse_timestamp(&new_checkpoint) else {
                        return Err(Error::Protocol(format!(
                            "unparseable stream checkpoint: {new_checkpoint}"
                        )));
                    };
                    self.store
                        .advance_checkpoint(checkpoint_ts.timestamp_millis())
                        .await?;
                    tracing::debug!(processed_events, batches = next_index, "backfill complete");
                    return Ok(());
                }
                ServerMessage::StreamError { error, code } => {
                    return Err(Error::Stream {
                        reason: error,
                        code,
                    })
                }
                ServerMessage::StreamStart { .. } => {
                    return Err(Error::Protocol("duplicate stream start".to_string()))
                }
                ServerMessage::Unknown
                | ServerMessage::HeartbeatAck
                | ServerMessage::PushAck { .. } => {}
            }
        }
    }

    /// Apply one batch atomically: events, revisions, conflicts, device
    /// sightings, and the checkpoint advance commit together or not at all.
    async fn apply_batch(
        &self,
        events: &[serde_json::Value],
        initial_sync: bool,
        outcome: &mut CycleOutcome,
    ) -> Result<()> {
        let db = self.store.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        let log = SqliteEventLog::new(&tx);
        let revisions = SqliteRevisionStore::new(&tx);
        let conflict_rows = SqliteConflictStore::new(&tx);
        let registry = SqliteDeviceRegistry::new(&tx);
        let state = SqliteSyncState::new(&tx);

        let mut newest_applied: Option<i64> = None;
        let mut notifications = Vec::new();

        for value in events {
            let Some(event) = codec::decode_wire_event(value) else {
                outcome.dropped += 1;
                continue;
            };
            if event.payload_version < MIN_PAYLOAD_VERSION {
                tracing::debug!(id = %event.id, version = event.payload_version, "dropping legacy payload");
                outcome.dropped += 1;
                continue;
            }
            // incremental sync skips our own reflected events; an event
            // with no device id is never filtered
            if !initial_sync && event.device_id.as_ref() == Some(&self.context.device_id) {
                continue;
            }

            let timestamp_ms = event.timestamp_ms();
            let local = revisions.get(&event.entity_id)?;

            if !log.record_remote(&event)? {
                // redelivered after a dropped stream; already applied
                newest_applied = Some(newest_applied.map_or(timestamp_ms, |n| n.max(timestamp_ms)));
                continue;
            }
            if let Some(device) = &event.device_id {
                registry.observe_peer(device, &event.user_id, timestamp_ms)?;
            }

            match local.filter(|l| conflict::detect(&event, l)) {
                Some(local_rev) => {
                    let resolution = conflict::resolve(&event, &local_rev, &self.context.device_id);
                    if resolution == ConflictOutcome::RemoteWins {
                        self.apply.apply(&event)?;
                        revisions.apply_remote(
                            &event.entity_id,
                            event.base_revision + 1,
                            timestamp_ms,
                        )?;
                    }
                    let snapshot = log
                        .latest_for_entity(&event.entity_id, &event.id)?
                        .map(|e| e.payload);
                    let mut record = conflict::conflict_record(
                        &event,
                        &local_rev,
                        &self.context.device_id,
                        snapshot,
                        resolution,
                    );
                    record.id = conflict_rows.record(&record)?;
                    notifications.push(record);
                    outcome.conflicts += 1;
                }
                None => {
                    self.apply.apply(&event)?;
                    revisions.apply_remote(
                        &event.entity_id,
                        event.base_revision + 1,
                        timestamp_ms,
                    )?;
                    outcome.applied += 1;
                }
            }
            newest_applied = Some(newest_applied.map_or(timestamp_ms, |n| n.max(timestamp_ms)));
        }

        if let Some(timestamp_ms) = newest_applied {
            state.advance_checkpoint(timestamp_ms)?;
        }
        tx.commit()?;
        drop(db);

        for record in notifications {
            let _ = self.conflict_tx.send(record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_batch_count_ceil() {
        assert_eq!(batch_count(250, 100), 3);
        assert_eq!(batch_count(200, 100), 2);
        assert_eq!(batch_count(1, 100), 1);
        assert_eq!(batch_count(101, 100), 2);
    }

    #[test]
    fn test_batch_count_zero_events_means_zero_batches() {
        assert_eq!(batch_count(0, 100), 0);
        assert_eq!(batch_count(0, 1), 0);
    }

    #[test]
    fn test_batch_count_matches_ceil_formula() {
        for total in 0..=512u64 {
            for batch_size in 1..=64u64 {
                let expected = if total == 0 {
                    0
                } else {
                    (total - 1) / batch_size + 1
                };
                assert_eq!(batch_count(total, batch_size), expected);
            }
        }
    }

    #[test]
    fn test_cycle_outcome_default_is_empty() {
        let outcome = CycleOutcome::default();
        assert_eq!(outcome.pushed, 0);
        assert!(!outcome.skipped_offline);
    }
}
