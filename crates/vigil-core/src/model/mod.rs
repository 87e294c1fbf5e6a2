// ── Domain model ──
//
// Canonical types held by the entity store.

pub mod alarm;
pub mod alive;
pub mod entity_id;
pub mod supervision;
pub mod tag;

pub use alarm::{AlarmSnapshot, AlarmState};
pub use alive::AliveTimer;
pub use entity_id::EntityId;
pub use supervision::{
    CommFault, SupervisedEntity, SupervisedKind, SupervisionEvent, SupervisionStatus,
};
pub use tag::{QualityFlag, QualityHint, Tag, TagQuality};
