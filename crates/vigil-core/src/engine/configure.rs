// ── Topology configuration ──
//
// Adding and removing supervised entities, tags and alarms. Every
// request is validated in full against the current topology before
// anything is written, so a rejected request leaves the store untouched.
// Each supervised entity is created together with its alive timer.

use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Engine;
use crate::error::CoreError;
use crate::model::{
    AlarmState, AliveTimer, CommFault, EntityId, SupervisedEntity, SupervisedKind, Tag,
};
use crate::store::EntityCollection;
use crate::supervision;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDef {
    pub id: EntityId,
    pub name: String,
    pub alive_id: EntityId,
    pub alive_interval_ms: u64,
    #[serde(default)]
    pub local_config: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentDef {
    pub id: EntityId,
    pub name: String,
    pub process_id: EntityId,
    pub alive_id: EntityId,
    pub alive_interval_ms: u64,
    #[serde(default)]
    pub comm_fault: Option<CommFault>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubEquipmentDef {
    pub id: EntityId,
    pub name: String,
    pub equipment_id: EntityId,
    pub alive_id: EntityId,
    pub alive_interval_ms: u64,
    #[serde(default)]
    pub comm_fault: Option<CommFault>,
}

/// The supervised entity a tag is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagOwner {
    Process(EntityId),
    Equipment(EntityId),
    #[serde(rename = "SUBEQUIPMENT")]
    SubEquipment(EntityId),
}

impl TagOwner {
    pub fn kind(self) -> SupervisedKind {
        match self {
            Self::Process(_) => SupervisedKind::Process,
            Self::Equipment(_) => SupervisedKind::Equipment,
            Self::SubEquipment(_) => SupervisedKind::SubEquipment,
        }
    }

    pub fn id(self) -> EntityId {
        match self {
            Self::Process(id) | Self::Equipment(id) | Self::SubEquipment(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDef {
    pub id: EntityId,
    pub name: String,
    pub owner: TagOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmDef {
    pub id: EntityId,
    pub tag_id: EntityId,
}

impl Engine {
    // ── Configuration ────────────────────────────────────────────

    pub fn configure_process(&self, def: &ProcessDef) -> Result<(), CoreError> {
        let _config = self.inner.config_lock.lock();
        let store = &self.inner.store;

        require_name(&def.name)?;
        require_unused(&store.processes, def.id)?;
        self.require_alive_slot(def.alive_id, def.alive_interval_ms)?;

        let timer = AliveTimer::new(
            def.alive_id,
            SupervisedKind::Process,
            def.id,
            &def.name,
            Duration::from_millis(def.alive_interval_ms),
        );
        let mut process =
            SupervisedEntity::new(SupervisedKind::Process, def.id, &def.name, def.alive_id);
        process.local_config = def.local_config;

        store.alive_timers.put(def.alive_id, timer.clone());
        store.processes.put(def.id, process.clone());

        persist(&store.alive_timers, &timer, def.alive_id);
        persist(&store.processes, &process, def.id);
        info!(process_id = %def.id, name = %def.name, "process configured");
        Ok(())
    }

    pub fn configure_equipment(&self, def: &EquipmentDef) -> Result<(), CoreError> {
        let _config = self.inner.config_lock.lock();
        let store = &self.inner.store;

        require_name(&def.name)?;
        require_unused(&store.equipment, def.id)?;
        require_present(&store.processes, def.process_id)?;
        self.require_alive_slot(def.alive_id, def.alive_interval_ms)?;
        self.require_comm_fault_slot(def.comm_fault)?;

        let timer = AliveTimer::new(
            def.alive_id,
            SupervisedKind::Equipment,
            def.id,
            &def.name,
            Duration::from_millis(def.alive_interval_ms),
        );
        let mut equipment =
            SupervisedEntity::new(SupervisedKind::Equipment, def.id, &def.name, def.alive_id);
        equipment.parent_id = Some(def.process_id);
        equipment.comm_fault = def.comm_fault;

        store.alive_timers.put(def.alive_id, timer.clone());
        store.equipment.put(def.id, equipment.clone());
        link_child(&store.processes, def.process_id, def.id)?;

        persist(&store.alive_timers, &timer, def.alive_id);
        persist(&store.equipment, &equipment, def.id);
        info!(equipment_id = %def.id, process_id = %def.process_id, "equipment configured");
        Ok(())
    }

    pub fn configure_sub_equipment(&self, def: &SubEquipmentDef) -> Result<(), CoreError> {
        let _config = self.inner.config_lock.lock();
        let store = &self.inner.store;

        require_name(&def.name)?;
        require_unused(&store.sub_equipment, def.id)?;
        require_present(&store.equipment, def.equipment_id)?;
        self.require_alive_slot(def.alive_id, def.alive_interval_ms)?;
        self.require_comm_fault_slot(def.comm_fault)?;

        let timer = AliveTimer::new(
            def.alive_id,
            SupervisedKind::SubEquipment,
            def.id,
            &def.name,
            Duration::from_millis(def.alive_interval_ms),
        );
        let mut sub = SupervisedEntity::new(
            SupervisedKind::SubEquipment,
            def.id,
            &def.name,
            def.alive_id,
        );
        sub.parent_id = Some(def.equipment_id);
        sub.comm_fault = def.comm_fault;

        store.alive_timers.put(def.alive_id, timer.clone());
        store.sub_equipment.put(def.id, sub.clone());
        link_child(&store.equipment, def.equipment_id, def.id)?;

        persist(&store.alive_timers, &timer, def.alive_id);
        persist(&store.sub_equipment, &sub, def.id);
        info!(sub_equipment_id = %def.id, equipment_id = %def.equipment_id, "sub-equipment configured");
        Ok(())
    }

    pub fn configure_tag(&self, def: &TagDef) -> Result<(), CoreError> {
        let _config = self.inner.config_lock.lock();
        let store = &self.inner.store;

        require_name(&def.name)?;
        require_unused(&store.tags, def.id)?;
        let owner_kind = def.owner.kind();
        let owner = store.supervised(owner_kind).get(def.owner.id()).map_err(|_| {
            CoreError::validation(format!("{owner_kind} {} does not exist", def.owner.id()))
        })?;

        // Resolve the full ownership chain up to the process.
        let mut tag = Tag::new(def.id, &def.name);
        match def.owner {
            TagOwner::Process(id) => tag.process_id = Some(id),
            TagOwner::Equipment(id) => {
                tag.equipment_id = Some(id);
                tag.process_id = owner.parent_id;
            }
            TagOwner::SubEquipment(id) => {
                tag.sub_equipment_id = Some(id);
                tag.equipment_id = owner.parent_id;
                tag.process_id = owner
                    .parent_id
                    .and_then(|eq| store.equipment.try_get(eq))
                    .and_then(|eq| eq.parent_id);
            }
        }

        store.tags.put(def.id, tag.clone());
        store.supervised(owner_kind).update(owner.id, |e| {
            let mut next = e.clone();
            next.tag_ids.push(def.id);
            next
        })?;

        // A tag attached below a failed entity starts out flagged.
        let ancestors = [
            (SupervisedKind::Process, tag.process_id),
            (SupervisedKind::Equipment, tag.equipment_id),
            (SupervisedKind::SubEquipment, tag.sub_equipment_id),
        ];
        for (kind, id) in ancestors {
            if let Some(id) = id {
                supervision::reconcile_tags(store, kind, id);
            }
        }

        persist(&store.tags, &tag, def.id);
        info!(tag_id = %def.id, owner = %def.owner.id(), "tag configured");
        Ok(())
    }

    pub fn configure_alarm(&self, def: &AlarmDef) -> Result<(), CoreError> {
        let _config = self.inner.config_lock.lock();
        let store = &self.inner.store;

        require_unused(&store.alarms, def.id)?;
        require_present(&store.tags, def.tag_id)?;

        let alarm = AlarmState::new(def.id, def.tag_id);
        store.alarms.put(def.id, alarm.clone());
        persist(&store.alarms, &alarm, def.id);
        info!(alarm_id = %def.id, tag_id = %def.tag_id, "alarm configured");
        Ok(())
    }

    // ── Deconfiguration ──────────────────────────────────────────

    /// Remove a process with all of its equipment, tags and alive timers.
    pub fn remove_process(&self, id: EntityId) -> Result<(), CoreError> {
        let _config = self.inner.config_lock.lock();
        self.remove_supervised(SupervisedKind::Process, id)
    }

    pub fn remove_equipment(&self, id: EntityId) -> Result<(), CoreError> {
        let _config = self.inner.config_lock.lock();
        self.remove_supervised(SupervisedKind::Equipment, id)
    }

    pub fn remove_sub_equipment(&self, id: EntityId) -> Result<(), CoreError> {
        let _config = self.inner.config_lock.lock();
        self.remove_supervised(SupervisedKind::SubEquipment, id)
    }

    /// Remove a tag and every alarm defined on it.
    pub fn remove_tag(&self, id: EntityId) -> Result<(), CoreError> {
        let _config = self.inner.config_lock.lock();
        self.remove_tag_inner(id)
    }

    pub fn remove_alarm(&self, id: EntityId) -> Result<(), CoreError> {
        let _config = self.inner.config_lock.lock();
        self.inner
            .store
            .alarms
            .remove(id)
            .ok_or_else(|| CoreError::not_found("alarm", id))?;
        info!(alarm_id = %id, "alarm removed");
        Ok(())
    }

    // ── Private helpers ──────────────────────────────────────────

    fn require_alive_slot(&self, alive_id: EntityId, interval_ms: u64) -> Result<(), CoreError> {
        if interval_ms == 0 {
            return Err(CoreError::validation("alive_interval_ms must be positive"));
        }
        require_unused(&self.inner.store.alive_timers, alive_id)
    }

    fn require_comm_fault_slot(&self, comm_fault: Option<CommFault>) -> Result<(), CoreError> {
        let Some(cf) = comm_fault else { return Ok(()) };
        let store = &self.inner.store;
        let taken = [SupervisedKind::Equipment, SupervisedKind::SubEquipment]
            .into_iter()
            .any(|kind| {
                !store
                    .supervised(kind)
                    .query(|e| e.comm_fault.is_some_and(|other| other.tag_id == cf.tag_id))
                    .is_empty()
            });
        if taken {
            return Err(CoreError::validation(format!(
                "comm-fault tag {} is already assigned",
                cf.tag_id
            )));
        }
        Ok(())
    }

    fn remove_supervised(&self, kind: SupervisedKind, id: EntityId) -> Result<(), CoreError> {
        let store = &self.inner.store;
        let entity = store.supervised(kind).get(id)?;

        let child_kind = match kind {
            SupervisedKind::Process => Some(SupervisedKind::Equipment),
            SupervisedKind::Equipment => Some(SupervisedKind::SubEquipment),
            SupervisedKind::SubEquipment => None,
        };
        if let Some(child_kind) = child_kind {
            for child in &entity.children {
                match self.remove_supervised(child_kind, *child) {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        for tag_id in &entity.tag_ids {
            match self.remove_tag_inner(*tag_id) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        if let Some(parent) = entity.parent_id {
            let parent_kind = match kind {
                SupervisedKind::SubEquipment => SupervisedKind::Equipment,
                _ => SupervisedKind::Process,
            };
            unlink(store.supervised(parent_kind), parent, |e| {
                e.children.retain(|c| *c != id);
            });
        }

        store.alive_timers.remove(entity.alive_timer_id);
        store.supervised(kind).remove(id);
        info!(%kind, entity_id = %id, "supervised entity removed");
        Ok(())
    }

    fn remove_tag_inner(&self, id: EntityId) -> Result<(), CoreError> {
        let store = &self.inner.store;
        let tag = store
            .tags
            .remove(id)
            .ok_or_else(|| CoreError::not_found("tag", id))?;

        for alarm in store.alarms.query(|a| a.tag_id == id) {
            store.alarms.remove(alarm.id);
        }

        let owner = [
            (SupervisedKind::SubEquipment, tag.sub_equipment_id),
            (SupervisedKind::Equipment, tag.equipment_id),
            (SupervisedKind::Process, tag.process_id),
        ]
        .into_iter()
        .find_map(|(kind, owner)| owner.map(|o| (kind, o)));
        if let Some((kind, owner)) = owner {
            unlink(store.supervised(kind), owner, |e| e.tag_ids.retain(|t| *t != id));
        }
        info!(tag_id = %id, "tag removed");
        Ok(())
    }
}

fn require_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::validation("name must not be empty"));
    }
    Ok(())
}

fn require_unused<T: Send + Sync + 'static>(
    collection: &EntityCollection<T>,
    id: EntityId,
) -> Result<(), CoreError> {
    if collection.contains(id) {
        return Err(CoreError::validation(format!(
            "{} {id} already exists",
            collection.name()
        )));
    }
    Ok(())
}

fn require_present<T: Send + Sync + 'static>(
    collection: &EntityCollection<T>,
    id: EntityId,
) -> Result<(), CoreError> {
    if !collection.contains(id) {
        return Err(CoreError::validation(format!(
            "{} {id} does not exist",
            collection.name()
        )));
    }
    Ok(())
}

fn link_child(
    parents: &EntityCollection<SupervisedEntity>,
    parent: EntityId,
    child: EntityId,
) -> Result<(), CoreError> {
    parents.update(parent, |e| {
        let mut next = e.clone();
        next.children.push(child);
        next
    })?;
    Ok(())
}

fn unlink(
    collection: &EntityCollection<SupervisedEntity>,
    id: EntityId,
    edit: impl FnOnce(&mut SupervisedEntity),
) {
    let result = collection.update(id, |e| {
        let mut next = e.clone();
        edit(&mut next);
        next
    });
    if let Err(e) = result {
        if !e.is_not_found() {
            warn!(entity_id = %id, error = %e, "failed to unlink removed entity");
        }
    }
}

/// Save through the collection's writer. The in-memory store stays
/// authoritative; a failed save is logged and retried on the next change.
fn persist<T: Send + Sync + 'static>(collection: &EntityCollection<T>, entity: &T, id: impl Display) {
    if let Err(e) = collection.persist(entity) {
        warn!(collection = collection.name(), %id, error = %e, "persisting configuration failed");
    }
}
