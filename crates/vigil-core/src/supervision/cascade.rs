// ── Tag invalidation cascade ──
//
// Reconciles the down flag of one supervised entity onto every tag it
// owns. Each tag is written under its own lock and the entity status is
// re-read inside that lock, so when two transitions race the one that
// committed last decides the flag.

use tracing::{debug, warn};

use crate::model::{EntityId, SupervisedKind};
use crate::store::DataStore;

/// Every tag owned by the entity, directly or through its equipment and
/// sub-equipment.
pub(crate) fn owned_tags(store: &DataStore, kind: SupervisedKind, id: EntityId) -> Vec<EntityId> {
    let Some(entity) = store.supervised(kind).try_get(id) else {
        return Vec::new();
    };

    let mut tags = entity.tag_ids.clone();
    let child_kind = match kind {
        SupervisedKind::Process => Some(SupervisedKind::Equipment),
        SupervisedKind::Equipment => Some(SupervisedKind::SubEquipment),
        SupervisedKind::SubEquipment => None,
    };
    if let Some(child_kind) = child_kind {
        for child in &entity.children {
            tags.extend(owned_tags(store, child_kind, *child));
        }
    }
    tags
}

/// Bring the tags of `id` in line with its current status. Returns how
/// many tags changed.
pub(crate) fn reconcile(store: &DataStore, kind: SupervisedKind, id: EntityId) -> usize {
    let flag = kind.down_flag();
    let mut changed = 0;

    for tag_id in owned_tags(store, kind, id) {
        let result = store.tags.update_with(tag_id, |tag| {
            let entity = store.supervised(kind).try_get(id)?;
            let mut next = tag.clone();
            if entity.status.invalidates_tags() {
                let description = entity
                    .status_message
                    .clone()
                    .unwrap_or_else(|| format!("{kind} {} is {}", entity.name, entity.status));
                next.quality.add(flag, description);
            } else if entity.status.is_running() {
                if !next.quality.remove(flag) {
                    return None;
                }
            } else {
                return None;
            }
            Some(next)
        });

        match result {
            Ok(true) => changed += 1,
            Ok(false) => {}
            Err(e) if e.is_not_found() => {
                debug!(%tag_id, entity_id = %id, "cascade skipped missing tag");
            }
            Err(e) => warn!(%tag_id, entity_id = %id, error = %e, "cascade failed for tag"),
        }
    }

    if changed > 0 {
        debug!(%kind, entity_id = %id, tags = changed, %flag, "cascade applied");
    }
    changed
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{QualityFlag, SupervisedEntity, SupervisionStatus, Tag};

    fn store() -> DataStore {
        let store = DataStore::new();

        let mut process = SupervisedEntity::new(
            SupervisedKind::Process,
            EntityId::new(1),
            "P",
            EntityId::new(100),
        );
        process.children = vec![EntityId::new(10)];
        store.processes.put(process.id, process);

        let mut equipment = SupervisedEntity::new(
            SupervisedKind::Equipment,
            EntityId::new(10),
            "E",
            EntityId::new(110),
        );
        equipment.parent_id = Some(EntityId::new(1));
        equipment.children = vec![EntityId::new(20)];
        equipment.tag_ids = vec![EntityId::new(1000)];
        store.equipment.put(equipment.id, equipment);

        let mut sub = SupervisedEntity::new(
            SupervisedKind::SubEquipment,
            EntityId::new(20),
            "S",
            EntityId::new(120),
        );
        sub.parent_id = Some(EntityId::new(10));
        sub.tag_ids = vec![EntityId::new(2000)];
        store.sub_equipment.put(sub.id, sub);

        store.tags.put(EntityId::new(1000), Tag::new(EntityId::new(1000), "T_E"));
        store.tags.put(EntityId::new(2000), Tag::new(EntityId::new(2000), "T_S"));
        store
    }

    fn set_status(store: &DataStore, kind: SupervisedKind, id: u64, status: SupervisionStatus) {
        store
            .supervised(kind)
            .update(EntityId::new(id), |e| {
                let mut e = e.clone();
                e.status = status;
                e.status_message = Some(format!("{status}"));
                e
            })
            .unwrap();
    }

    #[test]
    fn owned_tags_walks_hierarchy() {
        let store = store();
        let mut tags = owned_tags(&store, SupervisedKind::Process, EntityId::new(1));
        tags.sort();
        assert_eq!(tags, vec![EntityId::new(1000), EntityId::new(2000)]);
        assert_eq!(
            owned_tags(&store, SupervisedKind::SubEquipment, EntityId::new(20)),
            vec![EntityId::new(2000)]
        );
    }

    #[test]
    fn down_then_running_round_trips_flag() {
        let store = store();
        set_status(&store, SupervisedKind::Equipment, 10, SupervisionStatus::Down);
        assert_eq!(reconcile(&store, SupervisedKind::Equipment, EntityId::new(10)), 2);

        let tag = store.tags.get(EntityId::new(2000)).unwrap();
        assert!(tag.quality.has(QualityFlag::EquipmentDown));

        set_status(&store, SupervisedKind::Equipment, 10, SupervisionStatus::Running);
        assert_eq!(reconcile(&store, SupervisedKind::Equipment, EntityId::new(10)), 2);
        assert!(store.tags.get(EntityId::new(2000)).unwrap().is_valid());

        // Nothing left to clear.
        assert_eq!(reconcile(&store, SupervisedKind::Equipment, EntityId::new(10)), 0);
    }

    #[test]
    fn startup_leaves_tags_alone() {
        let store = store();
        assert_eq!(reconcile(&store, SupervisedKind::Process, EntityId::new(1)), 0);
    }
}
