// ── Alarm domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;

/// Live state of one alarm, including its oscillation bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmState {
    pub id: EntityId,
    /// Tag the alarm condition is evaluated against.
    pub tag_id: EntityId,
    pub active: bool,
    /// `active` as seen on the previous evaluation.
    pub last_active_state: bool,
    pub counter_fault: u32,
    /// Only meaningful while `counter_fault > 0`.
    pub first_oscillation: Option<DateTime<Utc>>,
    pub last_state_change: Option<DateTime<Utc>>,
    pub oscillating: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

impl AlarmState {
    pub fn new(id: EntityId, tag_id: EntityId) -> Self {
        Self {
            id,
            tag_id,
            ..Self::default()
        }
    }
}

/// What the alerting layer sees of an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmSnapshot {
    pub id: EntityId,
    pub tag_id: EntityId,
    pub active: bool,
    /// Oscillating and still flapping recently enough to be shown as such.
    pub oscillating: bool,
}
