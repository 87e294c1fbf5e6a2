// ── Generic entity collection ──
//
// Concurrent keyed storage with per-key write serialization. Reads are
// lock-free snapshots (`Arc<T>`); writes take the key's own mutex, run
// the collection's flow, swap the value in whole and enqueue events
// before the lock is released, which keeps per-key event order.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::flow::Flow;
use super::loader::{Loader, PersistentWriter};
use crate::error::CoreError;
use crate::model::EntityId;
use crate::notify::{
    CacheEvent, CacheListener, DeliveryMode, EventMask, FnListener, ListenerHandle,
    ListenerResult, ListenerSet, Notification,
};

/// Storage cell for one key. Lives as long as the key is mapped; a
/// removed slot is detached from the map so late writers notice.
struct Slot<T> {
    value: ArcSwapOption<T>,
    write: Mutex<()>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self {
            value: ArcSwapOption::empty(),
            write: Mutex::new(()),
        }
    }
}

/// Keyed, concurrent collection for a single entity type.
pub struct EntityCollection<T: Send + Sync + 'static> {
    name: &'static str,
    slots: DashMap<EntityId, Arc<Slot<T>>>,
    flow: Box<dyn Flow<T>>,
    listeners: ListenerSet<T>,
    writer: RwLock<Option<Arc<dyn PersistentWriter<T>>>>,
}

impl<T: Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new(
        name: &'static str,
        flow: impl Flow<T> + 'static,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name,
            slots: DashMap::new(),
            flow: Box::new(flow),
            listeners: ListenerSet::new(name, shutdown),
            writer: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: EntityId) -> Result<Arc<T>, CoreError> {
        self.try_get(id)
            .ok_or_else(|| CoreError::not_found(self.name, id))
    }

    pub fn try_get(&self, id: EntityId) -> Option<Arc<T>> {
        let slot = self.slot(id)?;
        slot.value.load_full()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.try_get(id).is_some()
    }

    /// Every value matching `predicate`, in no particular order.
    pub fn query(&self, predicate: impl Fn(&T) -> bool) -> Vec<Arc<T>> {
        self.slots
            .iter()
            .filter_map(|r| r.value().value.load_full())
            .filter(|v| predicate(v.as_ref()))
            .collect()
    }

    pub fn keys(&self) -> Vec<EntityId> {
        self.slots
            .iter()
            .filter(|r| r.value().value.load().is_some())
            .map(|r| *r.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|r| r.value().value.load().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Insert or replace the value for `id`. Returns whether the flow
    /// admitted the write.
    pub fn put(&self, id: EntityId, value: T) -> bool {
        self.put_inner(id, value, false)
    }

    /// Like [`put`](Self::put) but publishes nothing.
    pub fn put_quiet(&self, id: EntityId, value: T) -> bool {
        self.put_inner(id, value, true)
    }

    /// Read-modify-write under the key's lock. `f` must not touch the
    /// same key of this collection.
    pub fn update<F>(&self, id: EntityId, f: F) -> Result<bool, CoreError>
    where
        F: FnOnce(&T) -> T,
    {
        self.update_with(id, |current| Some(f(current)))
    }

    /// Like [`update`](Self::update); `f` returning `None` leaves the
    /// value untouched.
    pub fn update_with<F>(&self, id: EntityId, f: F) -> Result<bool, CoreError>
    where
        F: FnOnce(&T) -> Option<T>,
    {
        let name = self.name;
        self.locked_write(id, false, false, move |current| match current {
            Some(current) => Ok(f(current)),
            None => Err(CoreError::not_found(name, id)),
        })
    }

    /// Remove `id`, publishing [`CacheEvent::Removed`] with the last value.
    pub fn remove(&self, id: EntityId) -> Option<Arc<T>> {
        let slot = self.slot(id)?;
        let _guard = slot.write.lock();
        let removed = slot.value.swap(None);
        self.slots.remove_if(&id, |_, s| Arc::ptr_eq(s, &slot));

        if let Some(ref last) = removed {
            self.listeners.publish(CacheEvent::Removed, id, last);
        }
        removed
    }

    /// Publish [`CacheEvent::StatusConfirmed`] for the current value.
    pub fn confirm_status(&self, id: EntityId) -> Result<(), CoreError> {
        self.notify(id, CacheEvent::StatusConfirmed)
    }

    /// Publish `event` for the current value without changing it.
    pub(crate) fn notify(&self, id: EntityId, event: CacheEvent) -> Result<(), CoreError> {
        let slot = self
            .slot(id)
            .ok_or_else(|| CoreError::not_found(self.name, id))?;
        let _guard = slot.write.lock();
        let current = slot
            .value
            .load_full()
            .ok_or_else(|| CoreError::not_found(self.name, id))?;
        self.listeners.publish(event, id, &current);
        Ok(())
    }

    // ── Backing store ────────────────────────────────────────────────

    /// Load every entity from `loader` without notifying listeners.
    /// Returns how many values were admitted.
    pub fn preload(&self, loader: &dyn Loader<T>) -> Result<usize, CoreError> {
        let loaded = loader.load_all()?;
        let total = loaded.len();
        let mut admitted = 0usize;
        for (id, value) in loaded {
            if self.contains(id) {
                continue;
            }
            if self.put_quiet(id, value) {
                admitted += 1;
            }
        }
        debug!(collection = self.name, total, admitted, "preloaded");
        Ok(admitted)
    }

    pub fn set_writer(&self, writer: Arc<dyn PersistentWriter<T>>) {
        *self.writer.write() = Some(writer);
    }

    /// Save `entity` through the configured writer, if any.
    pub fn persist(&self, entity: &T) -> Result<(), CoreError> {
        let writer = self.writer.read().clone();
        match writer {
            Some(writer) => writer.save(entity),
            None => Ok(()),
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Subscribe `listener` to the events in `events`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(
        &self,
        events: impl Into<EventMask>,
        mode: DeliveryMode,
        listener: Arc<dyn CacheListener<T>>,
    ) -> ListenerHandle {
        self.listeners.register(events.into(), mode, listener)
    }

    /// Closure variant of [`subscribe`](Self::subscribe).
    pub fn subscribe_fn<F>(
        &self,
        events: impl Into<EventMask>,
        mode: DeliveryMode,
        f: F,
    ) -> ListenerHandle
    where
        F: Fn(&Notification<T>) -> ListenerResult + Send + Sync + 'static,
    {
        self.subscribe(events, mode, Arc::new(FnListener(f)))
    }

    pub fn unsubscribe(&self, handle: &ListenerHandle) {
        self.listeners.unregister(handle);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Events published but not yet picked up by subscriber tasks.
    pub fn listener_backlog(&self) -> usize {
        self.listeners.backlog()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn slot(&self, id: EntityId) -> Option<Arc<Slot<T>>> {
        self.slots.get(&id).map(|r| Arc::clone(r.value()))
    }

    fn slot_or_insert(&self, id: EntityId) -> Arc<Slot<T>> {
        Arc::clone(
            self.slots
                .entry(id)
                .or_insert_with(|| Arc::new(Slot::empty()))
                .value(),
        )
    }

    /// Whether `slot` is still the one mapped for `id`.
    fn is_current(&self, id: EntityId, slot: &Arc<Slot<T>>) -> bool {
        self.slots
            .get(&id)
            .is_some_and(|r| Arc::ptr_eq(r.value(), slot))
    }

    fn put_inner(&self, id: EntityId, value: T, quiet: bool) -> bool {
        match self.locked_write(id, quiet, true, move |_| Ok(Some(value))) {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(collection = self.name, %id, error = %e, "write failed");
                false
            }
        }
    }

    /// Apply `compute` to the current value under the key's lock.
    ///
    /// `compute` returning `Ok(None)` is a no-op. With `create` set, a
    /// missing key is inserted; otherwise it is `NotFound`.
    fn locked_write<F>(
        &self,
        id: EntityId,
        quiet: bool,
        create: bool,
        compute: F,
    ) -> Result<bool, CoreError>
    where
        F: FnOnce(Option<&T>) -> Result<Option<T>, CoreError>,
    {
        let mut compute = Some(compute);
        loop {
            let slot = if create {
                self.slot_or_insert(id)
            } else {
                self.slot(id)
                    .ok_or_else(|| CoreError::not_found(self.name, id))?
            };
            let _guard = slot.write.lock();
            if !self.is_current(id, &slot) {
                // Removed between lookup and lock; retry against the map.
                continue;
            }

            let compute = compute
                .take()
                .ok_or_else(|| CoreError::Internal("write closure consumed twice".into()))?;
            let old = slot.value.load_full();
            let Some(new) = compute(old.as_deref())? else {
                return Ok(false);
            };

            if !self.flow.pre_insert_validate(old.as_deref(), &new) {
                if old.is_none() {
                    self.slots.remove_if(&id, |_, s| Arc::ptr_eq(s, &slot));
                }
                return Ok(false);
            }

            let events = self.flow.post_insert_events(old.as_deref(), &new);
            let new = Arc::new(new);
            slot.value.store(Some(Arc::clone(&new)));

            if !quiet {
                for event in events {
                    self.listeners.publish(event, id, &new);
                }
            }
            return Ok(true);
        }
    }
}
