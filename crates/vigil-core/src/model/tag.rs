// ── Tag domain types ──

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::entity_id::EntityId;

/// A named reason for a tag to be invalid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum QualityFlag {
    ProcessDown,
    EquipmentDown,
    #[serde(rename = "SUBEQUIPMENT_DOWN")]
    #[strum(serialize = "SUBEQUIPMENT_DOWN")]
    SubEquipmentDown,
    Inaccessible,
    ValueOutOfBounds,
    UnknownReason,
}

impl QualityFlag {
    /// Flags owned by the supervision cascade rather than the driver.
    pub fn is_supervision(self) -> bool {
        matches!(
            self,
            Self::ProcessDown | Self::EquipmentDown | Self::SubEquipmentDown
        )
    }
}

/// Invalidation flags currently set on a tag, each with its own description.
///
/// Flags are tracked per cause so a process coming back cannot clear the
/// flag an equipment failure raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagQuality {
    flags: BTreeMap<QualityFlag, String>,
}

impl TagQuality {
    pub fn valid() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn has(&self, flag: QualityFlag) -> bool {
        self.flags.contains_key(&flag)
    }

    pub fn flags(&self) -> impl Iterator<Item = QualityFlag> + '_ {
        self.flags.keys().copied()
    }

    /// Set `flag`, replacing the description if it was already set.
    pub fn add(&mut self, flag: QualityFlag, description: impl Into<String>) {
        self.flags.insert(flag, description.into());
    }

    /// Clear `flag`. Returns whether it was set.
    pub fn remove(&mut self, flag: QualityFlag) -> bool {
        self.flags.remove(&flag).is_some()
    }

    /// Drop every driver-side flag, keeping supervision flags.
    pub fn clear_source_flags(&mut self) {
        self.flags.retain(|flag, _| flag.is_supervision());
    }

    /// Whether both sides carry the same driver flags and descriptions.
    pub fn same_source_flags(&self, other: &Self) -> bool {
        let source = |q: &Self| {
            q.flags
                .iter()
                .filter(|(flag, _)| !flag.is_supervision())
                .map(|(flag, text)| (*flag, text.clone()))
                .collect::<Vec<_>>()
        };
        source(self) == source(other)
    }

    /// Human-readable description built from every flag still set.
    pub fn description(&self) -> String {
        self.flags
            .iter()
            .map(|(flag, text)| format!("{flag}: {text}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A data point tracked in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: EntityId,
    pub name: String,
    pub process_id: Option<EntityId>,
    pub equipment_id: Option<EntityId>,
    pub sub_equipment_id: Option<EntityId>,

    pub value: Option<serde_json::Value>,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub quality: TagQuality,
}

impl Tag {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            process_id: None,
            equipment_id: None,
            sub_equipment_id: None,
            value: None,
            source_timestamp: None,
            quality: TagQuality::valid(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.quality.is_valid()
    }
}

/// Driver-supplied quality accompanying a value update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityHint {
    pub flag: QualityFlag,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_quality_is_valid() {
        assert!(TagQuality::valid().is_valid());
    }

    #[test]
    fn flags_from_different_causes_are_independent() {
        let mut q = TagQuality::valid();
        q.add(QualityFlag::ProcessDown, "process P stopped");
        q.add(QualityFlag::EquipmentDown, "equipment E1 alive expired");

        assert!(q.remove(QualityFlag::ProcessDown));
        assert!(!q.is_valid());
        assert!(q.has(QualityFlag::EquipmentDown));
        assert_eq!(q.description(), "EQUIPMENT_DOWN: equipment E1 alive expired");
    }

    #[test]
    fn clear_source_flags_keeps_supervision_flags() {
        let mut q = TagQuality::valid();
        q.add(QualityFlag::Inaccessible, "driver lost connection");
        q.add(QualityFlag::SubEquipmentDown, "board 3 down");

        q.clear_source_flags();

        assert_eq!(q.flags().collect::<Vec<_>>(), vec![QualityFlag::SubEquipmentDown]);
    }
}
