//! Cache-backed supervision and health-monitoring engine.
//!
//! This crate owns the domain model, the in-memory entity store and the
//! supervision logic of the vigil workspace:
//!
//! - **[`Engine`]**: central facade. Configure the topology with the
//!   `configure_*` methods, then [`start()`](Engine::start) the alive sweep,
//!   the oscillation checker and the sharded ingest pool.
//!   [`shutdown()`](Engine::shutdown) cancels and joins them.
//!
//! - **[`DataStore`]**: one [`EntityCollection`] per entity type
//!   (`DashMap` slots, `ArcSwap` values, per-key `parking_lot` write locks).
//!   Writes pass through a [`Flow`] policy; admitted writes fan out to
//!   subscribers as [`CacheEvent`]s.
//!
//! - **Supervision** ([`supervision`]): alive timers, the
//!   STARTUP/RUNNING/DOWN/UNCERTAIN state machine and the cascade of
//!   `*_DOWN` quality flags onto owned tags. Transitions are published as
//!   [`SupervisionEvent`]s on a broadcast channel.
//!
//! - **Oscillation** ([`oscillation`]): per-alarm flapping detection with
//!   runtime-swappable thresholds.
//!
//! - **Domain model** ([`model`]): tags, alarms, alive timers and
//!   supervised entities, all keyed by [`EntityId`].

pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod model;
pub mod notify;
pub mod oscillation;
pub mod store;
pub mod supervision;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{BufferConfig, EngineConfig, OscillationConfig};
pub use engine::{
    AlarmDef, Engine, EngineState, EquipmentDef, ProcessDef, SubEquipmentDef, TagDef, TagOwner,
};
pub use error::CoreError;
pub use ingest::{Inbound, IngestHandle};
pub use notify::{
    CacheEvent, CacheListener, DeliveryMode, EventMask, FnListener, ListenerHandle,
    ListenerResult, Notification,
};
pub use oscillation::{OscillationChecker, OscillationDetector};
pub use store::{
    DataStore, DefaultFlow, EntityCollection, Flow, Loader, Loaders, PersistentWriter, TagFlow,
};
pub use supervision::{AliveOutcome, AliveTimerOp, AliveTimerRegistry, SupervisionService};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    // Alarms
    AlarmSnapshot, AlarmState,
    // Supervision
    AliveTimer, CommFault, SupervisedEntity, SupervisedKind, SupervisionEvent, SupervisionStatus,
    // Identity
    EntityId,
    // Tags
    QualityFlag, QualityHint, Tag, TagQuality,
};
