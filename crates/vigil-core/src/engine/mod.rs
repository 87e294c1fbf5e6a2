// ── Engine ──
//
// Full lifecycle of one supervision engine: the shared store, the
// supervision state machine, oscillation detection, the ingest pool
// and the periodic background tasks.

mod configure;
mod tasks;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use strum::Display;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use configure::{AlarmDef, EquipmentDef, ProcessDef, SubEquipmentDef, TagDef, TagOwner};

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::ingest::{self, Inbound, IngestHandle};
use crate::model::{
    AlarmSnapshot, AlarmState, AliveTimer, EntityId, QualityHint, SupervisedEntity,
    SupervisedKind, SupervisionEvent, SupervisionStatus, Tag,
};
use crate::oscillation::OscillationDetector;
use crate::store::{DataStore, Loaders};
use crate::supervision::{AliveOutcome, SupervisionService};

// ── EngineState ──────────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum EngineState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

// ── Engine ───────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<EngineInner>`. Construct once, configure
/// the topology, then [`start`](Self::start) the background tasks.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    store: Arc<DataStore>,
    supervision: SupervisionService,
    oscillation: OscillationDetector,
    state: watch::Sender<EngineState>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    ingest: parking_lot::Mutex<Option<IngestHandle>>,
    /// Serializes configuration changes so validation sees a stable topology.
    config_lock: parking_lot::Mutex<()>,
}

impl Engine {
    /// Create an engine over an empty store. Does NOT start anything --
    /// call [`start()`](Self::start) once the topology is in place.
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        Self::with_store(config, Arc::new(DataStore::new()))
    }

    /// Create an engine over an existing store.
    pub fn with_store(config: EngineConfig, store: Arc<DataStore>) -> Result<Self, CoreError> {
        config.validate()?;
        let (state, _) = watch::channel(EngineState::Created);

        Ok(Self {
            inner: Arc::new(EngineInner {
                supervision: SupervisionService::new(
                    Arc::clone(&store),
                    config.event_channel_capacity,
                ),
                oscillation: OscillationDetector::new(config.oscillation),
                store,
                state,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
                ingest: parking_lot::Mutex::new(None),
                config_lock: parking_lot::Mutex::new(()),
                config,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    pub fn oscillation(&self) -> &OscillationDetector {
        &self.inner.oscillation
    }

    pub fn supervision(&self) -> &SupervisionService {
        &self.inner.supervision
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Cold-start the store from a backing store. Call before `start`.
    pub fn preload(&self, loaders: &Loaders) -> Result<usize, CoreError> {
        let loaded = self.inner.store.preload(loaders)?;
        info!(loaded, "store preloaded");
        Ok(loaded)
    }

    /// Recover supervision state and spawn the background tasks.
    ///
    /// Idempotent while running; an engine that was shut down cannot be
    /// restarted.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ShutDown);
        }
        let mut handles = self.inner.task_handles.lock().await;
        if *self.inner.state.borrow() == EngineState::Running {
            return Ok(());
        }

        let recovered = self.inner.supervision.recover_after_restart(Utc::now());
        let config = &self.inner.config;
        let cancel = &self.inner.cancel;

        handles.push(tokio::spawn(tasks::alive_sweep_task(
            self.clone(),
            config.sweep_interval,
            cancel.clone(),
        )));
        handles.push(tokio::spawn(tasks::oscillation_check_task(
            self.clone(),
            config.oscillation_check_interval,
            cancel.clone(),
        )));
        let ingest = ingest::spawn_workers(
            self,
            config.ingest_workers,
            config.ingest_queue_capacity,
            cancel,
            &mut handles,
        );
        *self.inner.ingest.lock() = Some(ingest);

        let _ = self.inner.state.send(EngineState::Running);
        info!(
            workers = config.ingest_workers,
            sweep_ms = config.sweep_interval.as_millis(),
            recovered,
            "engine started"
        );
        Ok(())
    }

    /// Stop accepting input, cancel the background tasks and wait for
    /// them to finish. Subscriber tasks are stopped last.
    pub async fn shutdown(&self) {
        let _ = self.inner.state.send(EngineState::ShuttingDown);
        self.inner.cancel.cancel();
        self.inner.ingest.lock().take();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        self.inner.store.close_listeners();
        let _ = self.inner.state.send(EngineState::Stopped);
        info!("engine stopped");
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    /// Handle for feeding the sharded ingest pool. Only available while
    /// the engine is running.
    pub fn ingest(&self) -> Result<IngestHandle, CoreError> {
        self.inner.ingest.lock().clone().ok_or(CoreError::ShutDown)
    }

    /// Subscribe to supervision transitions.
    pub fn subscribe_supervision(&self) -> broadcast::Receiver<SupervisionEvent> {
        self.inner.supervision.subscribe()
    }

    // ── Inputs ───────────────────────────────────────────────────

    pub fn heartbeat(
        &self,
        alive_id: EntityId,
        timestamp: DateTime<Utc>,
    ) -> Result<AliveOutcome, CoreError> {
        self.ensure_accepting()?;
        self.inner
            .supervision
            .on_heartbeat(alive_id, timestamp, Utc::now())
    }

    pub fn report(
        &self,
        kind: SupervisedKind,
        entity_id: EntityId,
        status: SupervisionStatus,
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Result<Option<SupervisionEvent>, CoreError> {
        self.ensure_accepting()?;
        self.inner
            .supervision
            .report(kind, entity_id, status, timestamp, message, Utc::now())
    }

    /// Apply a driver value update. Returns `false` for stale or
    /// identical updates.
    pub fn update_tag(
        &self,
        tag_id: EntityId,
        value: serde_json::Value,
        timestamp: DateTime<Utc>,
        quality: Option<QualityHint>,
    ) -> Result<bool, CoreError> {
        self.ensure_accepting()?;
        self.inner.store.tags.update(tag_id, |tag| {
            let mut next = tag.clone();
            next.value = Some(value);
            next.source_timestamp = Some(timestamp);
            next.quality.clear_source_flags();
            if let Some(hint) = quality {
                next.quality.add(hint.flag, hint.description);
            }
            next
        })
    }

    pub fn comm_fault(
        &self,
        tag_id: EntityId,
        value: bool,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<SupervisionEvent>, CoreError> {
        self.ensure_accepting()?;
        self.inner
            .supervision
            .on_comm_fault(tag_id, value, timestamp, Utc::now())
    }

    /// Record the freshly evaluated state of an alarm and run oscillation
    /// detection on it.
    pub fn evaluate_alarm(
        &self,
        alarm_id: EntityId,
        active: bool,
        timestamp: DateTime<Utc>,
    ) -> Result<AlarmSnapshot, CoreError> {
        self.ensure_accepting()?;
        let detector = &self.inner.oscillation;
        self.inner.store.alarms.update(alarm_id, |alarm| {
            let mut next = alarm.clone();
            next.active = active;
            next.timestamp = Some(timestamp);
            detector.update(&mut next, timestamp);
            next
        })?;
        let alarm = self.inner.store.alarms.get(alarm_id)?;
        Ok(detector.snapshot(&alarm, timestamp))
    }

    /// Route one inbound message to its handler. Failures are logged.
    pub(crate) fn dispatch(&self, message: Inbound) {
        let key = message.shard_key();
        let result = match message {
            Inbound::Heartbeat {
                alive_id,
                timestamp,
            } => self.heartbeat(alive_id, timestamp).map(|_| ()),
            Inbound::Report {
                kind,
                entity_id,
                status,
                timestamp,
                message,
            } => self
                .report(kind, entity_id, status, timestamp, message)
                .map(|_| ()),
            Inbound::TagUpdate {
                tag_id,
                value,
                timestamp,
                quality,
            } => self.update_tag(tag_id, value, timestamp, quality).map(|_| ()),
            Inbound::CommFault {
                tag_id,
                value,
                timestamp,
            } => self.comm_fault(tag_id, value, timestamp).map(|_| ()),
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(%key, error = %e, "inbound for unknown entity"),
            Err(CoreError::ShutDown) => debug!(%key, "inbound dropped during shutdown"),
            Err(e) => warn!(%key, error = %e, "inbound update failed"),
        }
    }

    // ── Snapshot accessors (delegate to DataStore) ───────────────

    pub fn tag(&self, id: EntityId) -> Result<Arc<Tag>, CoreError> {
        self.inner.store.tags.get(id)
    }

    pub fn alarm(&self, id: EntityId) -> Result<Arc<AlarmState>, CoreError> {
        self.inner.store.alarms.get(id)
    }

    pub fn alarm_snapshot(&self, id: EntityId) -> Result<AlarmSnapshot, CoreError> {
        let alarm = self.inner.store.alarms.get(id)?;
        Ok(self.inner.oscillation.snapshot(&alarm, Utc::now()))
    }

    pub fn supervised(
        &self,
        kind: SupervisedKind,
        id: EntityId,
    ) -> Result<Arc<SupervisedEntity>, CoreError> {
        self.inner.store.supervised(kind).get(id)
    }

    pub fn alive_timer(&self, id: EntityId) -> Result<Arc<AliveTimer>, CoreError> {
        self.inner.store.alive_timers.get(id)
    }

    // ── Private helpers ──────────────────────────────────────────

    fn ensure_accepting(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            Err(CoreError::ShutDown)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn engine() -> Engine {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        engine
            .configure_process(&ProcessDef {
                id: EntityId::new(1),
                name: "P1".into(),
                alive_id: EntityId::new(100),
                alive_interval_ms: 30_000,
                local_config: false,
            })
            .unwrap();
        engine
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            sweep_interval: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert!(Engine::new(config).is_err());
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let engine = engine();
        assert_eq!(engine.state(), EngineState::Created);
        assert!(engine.ingest().is_err());

        engine.start().await.unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.ingest().unwrap().workers(), 4);
        engine.start().await.unwrap();

        engine.shutdown().await;
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(matches!(engine.start().await, Err(CoreError::ShutDown)));
    }

    #[tokio::test]
    async fn no_heartbeat_after_shutdown() {
        let engine = engine();
        engine.start().await.unwrap();
        engine.shutdown().await;

        let err = engine.heartbeat(EntityId::new(100), Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::ShutDown));
        assert!(engine.alive_timer(EntityId::new(100)).unwrap().last_update.is_none());
    }

    #[test]
    fn heartbeat_for_unknown_timer_is_not_found() {
        let engine = engine();
        let err = engine.heartbeat(EntityId::new(1), Utc::now()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn dispatch_routes_heartbeat() {
        let engine = engine();
        engine.dispatch(Inbound::Heartbeat {
            alive_id: EntityId::new(100),
            timestamp: Utc::now(),
        });
        assert_eq!(
            engine.supervised(SupervisedKind::Process, EntityId::new(1)).unwrap().status,
            SupervisionStatus::Running
        );
    }
}
