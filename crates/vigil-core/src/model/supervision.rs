// ── Supervision domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::entity_id::EntityId;
use super::tag::QualityFlag;

/// Which level of the supervision hierarchy an entity lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum SupervisedKind {
    Process,
    Equipment,
    #[serde(rename = "SUBEQUIPMENT")]
    #[strum(serialize = "SUBEQUIPMENT")]
    SubEquipment,
}

impl SupervisedKind {
    /// The tag quality flag raised on every owned tag while an entity
    /// of this kind is down.
    pub fn down_flag(self) -> QualityFlag {
        match self {
            Self::Process => QualityFlag::ProcessDown,
            Self::Equipment => QualityFlag::EquipmentDown,
            Self::SubEquipment => QualityFlag::SubEquipmentDown,
        }
    }
}

/// Supervision state of a process, equipment or sub-equipment.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum SupervisionStatus {
    #[default]
    Startup,
    Running,
    Down,
    Uncertain,
    RunningLocal,
}

impl SupervisionStatus {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::RunningLocal)
    }

    /// States in which the tags of the entity must carry its down flag.
    pub fn invalidates_tags(self) -> bool {
        matches!(self, Self::Down | Self::Uncertain)
    }

    /// States a heartbeat or `Start` lifts to running.
    pub fn awaits_alive(self) -> bool {
        matches!(self, Self::Down | Self::Startup | Self::Uncertain)
    }
}

/// One supervision transition. Emitted exactly once per status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisionEvent {
    pub kind: SupervisedKind,
    pub entity_id: EntityId,
    pub status: SupervisionStatus,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Control tag reporting the communication state of an equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommFault {
    pub tag_id: EntityId,
    /// Value that signals a communication failure.
    pub fault_value: bool,
}

/// A process, equipment or sub-equipment as held in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisedEntity {
    pub id: EntityId,
    pub kind: SupervisedKind,
    pub name: String,
    /// Owning process for equipment, owning equipment for sub-equipment.
    pub parent_id: Option<EntityId>,
    pub alive_timer_id: EntityId,
    pub comm_fault: Option<CommFault>,
    /// Processes running on a local configuration report RUNNING_LOCAL.
    pub local_config: bool,
    /// Equipment of a process, sub-equipment of an equipment.
    pub children: Vec<EntityId>,
    /// Tags attached directly to this entity.
    pub tag_ids: Vec<EntityId>,

    pub status: SupervisionStatus,
    pub status_time: Option<DateTime<Utc>>,
    pub status_message: Option<String>,
}

impl SupervisedEntity {
    pub fn new(
        kind: SupervisedKind,
        id: EntityId,
        name: impl Into<String>,
        alive_timer_id: EntityId,
    ) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            parent_id: None,
            alive_timer_id,
            comm_fault: None,
            local_config: false,
            children: Vec::new(),
            tag_ids: Vec::new(),
            status: SupervisionStatus::Startup,
            status_time: None,
            status_message: None,
        }
    }

    /// The status an alive signal moves this entity to.
    pub fn running_status(&self) -> SupervisionStatus {
        if self.kind == SupervisedKind::Process && self.local_config {
            SupervisionStatus::RunningLocal
        } else {
            SupervisionStatus::Running
        }
    }
}
