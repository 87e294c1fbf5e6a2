// ── Write admission policies ──
//
// A flow decides whether a write is admitted and which events an
// admitted write publishes. It sees the previous and the proposed value
// and nothing else; it runs under the key's write lock.

use tracing::debug;

use crate::model::Tag;
use crate::notify::CacheEvent;

pub trait Flow<T>: Send + Sync {
    /// `old` is `None` on first insert.
    fn pre_insert_validate(&self, old: Option<&T>, new: &T) -> bool;

    /// Events for a write that passed validation.
    fn post_insert_events(&self, old: Option<&T>, new: &T) -> Vec<CacheEvent>;
}

/// Admits anything that differs from the current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFlow;

impl<T: PartialEq> Flow<T> for DefaultFlow {
    fn pre_insert_validate(&self, old: Option<&T>, new: &T) -> bool {
        old.is_none_or(|old| old != new)
    }

    fn post_insert_events(&self, old: Option<&T>, _new: &T) -> Vec<CacheEvent> {
        match old {
            None => vec![CacheEvent::Inserted],
            Some(_) => vec![CacheEvent::Updated],
        }
    }
}

/// Flow for tags.
///
/// A source update (new value, timestamp or driver quality) must carry a
/// strictly newer source timestamp. Changes that only touch supervision
/// flags are always admitted and reported as
/// [`CacheEvent::SupervisionChange`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TagFlow;

impl TagFlow {
    fn is_source_update(old: &Tag, new: &Tag) -> bool {
        old.value != new.value
            || old.source_timestamp != new.source_timestamp
            || !old.quality.same_source_flags(&new.quality)
    }

    fn is_quality_only(old: &Tag, new: &Tag) -> bool {
        old.quality != new.quality
            && !Self::is_source_update(old, new)
            && old.name == new.name
            && old.process_id == new.process_id
            && old.equipment_id == new.equipment_id
            && old.sub_equipment_id == new.sub_equipment_id
    }
}

impl Flow<Tag> for TagFlow {
    fn pre_insert_validate(&self, old: Option<&Tag>, new: &Tag) -> bool {
        let Some(old) = old else { return true };
        if old == new {
            return false;
        }
        if Self::is_source_update(old, new) && new.source_timestamp <= old.source_timestamp {
            debug!(
                tag_id = %new.id,
                stored = ?old.source_timestamp,
                received = ?new.source_timestamp,
                "rejecting stale tag update"
            );
            return false;
        }
        true
    }

    fn post_insert_events(&self, old: Option<&Tag>, new: &Tag) -> Vec<CacheEvent> {
        match old {
            None => vec![CacheEvent::Inserted],
            Some(old) if Self::is_quality_only(old, new) => vec![CacheEvent::SupervisionChange],
            Some(_) => vec![CacheEvent::Updated],
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::model::{EntityId, QualityFlag};

    fn tag_at(secs: i64, value: i64) -> Tag {
        let mut tag = Tag::new(EntityId::new(1), "T1");
        tag.value = Some(json!(value));
        tag.source_timestamp = Utc.timestamp_opt(secs, 0).single();
        tag
    }

    #[test]
    fn default_flow_skips_identical_writes() {
        assert!(DefaultFlow.pre_insert_validate(None, &1));
        assert!(DefaultFlow.pre_insert_validate(Some(&1), &2));
        assert!(!DefaultFlow.pre_insert_validate(Some(&2), &2));
    }

    #[test]
    fn default_flow_events() {
        assert_eq!(
            DefaultFlow.post_insert_events(None, &1),
            vec![CacheEvent::Inserted]
        );
        assert_eq!(
            DefaultFlow.post_insert_events(Some(&1), &2),
            vec![CacheEvent::Updated]
        );
    }

    #[test]
    fn tag_flow_rejects_older_or_equal_timestamps() {
        let stored = tag_at(100, 1);
        assert!(!TagFlow.pre_insert_validate(Some(&stored), &tag_at(99, 2)));
        assert!(!TagFlow.pre_insert_validate(Some(&stored), &tag_at(100, 2)));
        assert!(TagFlow.pre_insert_validate(Some(&stored), &tag_at(101, 2)));
    }

    #[test]
    fn tag_flow_admits_quality_change_at_same_timestamp() {
        let stored = tag_at(100, 1);
        let mut flagged = stored.clone();
        flagged.quality.add(QualityFlag::ProcessDown, "P down");

        assert!(TagFlow.pre_insert_validate(Some(&stored), &flagged));
        assert_eq!(
            TagFlow.post_insert_events(Some(&stored), &flagged),
            vec![CacheEvent::SupervisionChange]
        );
    }

    #[test]
    fn tag_flow_rejects_driver_quality_at_same_timestamp() {
        let stored = tag_at(100, 1);
        let mut hinted = stored.clone();
        hinted.quality.add(QualityFlag::Inaccessible, "driver");

        assert!(!TagFlow.pre_insert_validate(Some(&stored), &hinted));

        let mut newer = tag_at(101, 1);
        newer.quality.add(QualityFlag::Inaccessible, "driver");
        assert!(TagFlow.pre_insert_validate(Some(&stored), &newer));
        assert_eq!(
            TagFlow.post_insert_events(Some(&stored), &newer),
            vec![CacheEvent::Updated]
        );
    }

    #[test]
    fn tag_flow_value_change_is_an_update() {
        let stored = tag_at(100, 1);
        assert_eq!(
            TagFlow.post_insert_events(Some(&stored), &tag_at(101, 5)),
            vec![CacheEvent::Updated]
        );
    }
}
