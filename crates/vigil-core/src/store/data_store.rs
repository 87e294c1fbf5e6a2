// ── Central data store ──
//
// One collection per entity type, each with its own flow policy and
// subscribers. Shared by the engine and all of its background tasks.

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::collection::EntityCollection;
use super::flow::{DefaultFlow, TagFlow};
use super::loader::Loader;
use crate::error::CoreError;
use crate::model::{AlarmState, AliveTimer, SupervisedEntity, SupervisedKind, Tag};

/// Central store for every cached entity.
///
/// Reads are wait-free snapshots; writes are serialized per key.
pub struct DataStore {
    pub(crate) tags: EntityCollection<Tag>,
    pub(crate) alarms: EntityCollection<AlarmState>,
    pub(crate) alive_timers: EntityCollection<AliveTimer>,
    pub(crate) processes: EntityCollection<SupervisedEntity>,
    pub(crate) equipment: EntityCollection<SupervisedEntity>,
    pub(crate) sub_equipment: EntityCollection<SupervisedEntity>,
    pub(crate) last_sweep: watch::Sender<Option<DateTime<Utc>>>,
    listeners_shutdown: CancellationToken,
}

/// Backing-store sources for a cold start. Absent loaders are skipped.
#[derive(Default)]
pub struct Loaders {
    pub processes: Option<Box<dyn Loader<SupervisedEntity>>>,
    pub equipment: Option<Box<dyn Loader<SupervisedEntity>>>,
    pub sub_equipment: Option<Box<dyn Loader<SupervisedEntity>>>,
    pub alive_timers: Option<Box<dyn Loader<AliveTimer>>>,
    pub tags: Option<Box<dyn Loader<Tag>>>,
    pub alarms: Option<Box<dyn Loader<AlarmState>>>,
}

impl DataStore {
    pub fn new() -> Self {
        let listeners_shutdown = CancellationToken::new();
        let (last_sweep, _) = watch::channel(None);

        Self {
            tags: EntityCollection::new("tag", TagFlow, listeners_shutdown.clone()),
            alarms: EntityCollection::new("alarm", DefaultFlow, listeners_shutdown.clone()),
            alive_timers: EntityCollection::new(
                "alive_timer",
                DefaultFlow,
                listeners_shutdown.clone(),
            ),
            processes: EntityCollection::new("process", DefaultFlow, listeners_shutdown.clone()),
            equipment: EntityCollection::new("equipment", DefaultFlow, listeners_shutdown.clone()),
            sub_equipment: EntityCollection::new(
                "sub_equipment",
                DefaultFlow,
                listeners_shutdown.clone(),
            ),
            last_sweep,
            listeners_shutdown,
        }
    }

    // ── Collection accessors ─────────────────────────────────────────

    pub fn tags(&self) -> &EntityCollection<Tag> {
        &self.tags
    }

    pub fn alarms(&self) -> &EntityCollection<AlarmState> {
        &self.alarms
    }

    pub fn alive_timers(&self) -> &EntityCollection<AliveTimer> {
        &self.alive_timers
    }

    pub fn processes(&self) -> &EntityCollection<SupervisedEntity> {
        &self.processes
    }

    pub fn equipment(&self) -> &EntityCollection<SupervisedEntity> {
        &self.equipment
    }

    pub fn sub_equipment(&self) -> &EntityCollection<SupervisedEntity> {
        &self.sub_equipment
    }

    /// The collection holding supervised entities of `kind`.
    pub fn supervised(&self, kind: SupervisedKind) -> &EntityCollection<SupervisedEntity> {
        match kind {
            SupervisedKind::Process => &self.processes,
            SupervisedKind::Equipment => &self.equipment,
            SupervisedKind::SubEquipment => &self.sub_equipment,
        }
    }

    // ── Sweep bookkeeping ────────────────────────────────────────────

    pub fn last_sweep(&self) -> Option<DateTime<Utc>> {
        *self.last_sweep.borrow()
    }

    pub fn subscribe_last_sweep(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_sweep.subscribe()
    }

    pub(crate) fn mark_swept(&self, at: DateTime<Utc>) {
        self.last_sweep.send_modify(|t| *t = Some(at));
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Cold-start every collection that has a loader. Returns the total
    /// number of entities loaded.
    pub fn preload(&self, loaders: &Loaders) -> Result<usize, CoreError> {
        let mut total = 0;
        if let Some(loader) = &loaders.processes {
            total += self.processes.preload(loader.as_ref())?;
        }
        if let Some(loader) = &loaders.equipment {
            total += self.equipment.preload(loader.as_ref())?;
        }
        if let Some(loader) = &loaders.sub_equipment {
            total += self.sub_equipment.preload(loader.as_ref())?;
        }
        if let Some(loader) = &loaders.alive_timers {
            total += self.alive_timers.preload(loader.as_ref())?;
        }
        if let Some(loader) = &loaders.tags {
            total += self.tags.preload(loader.as_ref())?;
        }
        if let Some(loader) = &loaders.alarms {
            total += self.alarms.preload(loader.as_ref())?;
        }
        Ok(total)
    }

    /// Stop every subscriber task of every collection.
    pub(crate) fn close_listeners(&self) {
        self.listeners_shutdown.cancel();
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::model::EntityId;

    #[test]
    fn supervised_selects_collection_by_kind() {
        let store = DataStore::new();
        assert_eq!(store.supervised(SupervisedKind::Process).name(), "process");
        assert_eq!(store.supervised(SupervisedKind::Equipment).name(), "equipment");
        assert_eq!(
            store.supervised(SupervisedKind::SubEquipment).name(),
            "sub_equipment"
        );
    }

    #[test]
    fn preload_fills_only_configured_collections() {
        let store = DataStore::new();
        let timers: HashMap<EntityId, AliveTimer> = [(
            EntityId::new(100),
            AliveTimer::new(
                EntityId::new(100),
                SupervisedKind::Process,
                EntityId::new(1),
                "P1",
                Duration::from_secs(30),
            ),
        )]
        .into_iter()
        .collect();

        let loaders = Loaders {
            alive_timers: Some(Box::new(timers)),
            ..Loaders::default()
        };

        assert_eq!(store.preload(&loaders).unwrap(), 1);
        assert!(store.alive_timers().contains(EntityId::new(100)));
        assert!(store.tags().is_empty());
    }

    #[test]
    fn mark_swept_updates_watch() {
        let store = DataStore::new();
        assert!(store.last_sweep().is_none());
        let now = Utc::now();
        store.mark_swept(now);
        assert_eq!(store.last_sweep(), Some(now));
    }
}
