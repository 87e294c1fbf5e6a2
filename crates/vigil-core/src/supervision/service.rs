// ── Supervision state machine ──
//
// Drives process, equipment and sub-equipment status from heartbeats,
// explicit reports, comm-fault tags and timer expiry. Every accepted
// status change emits exactly one `SupervisionEvent` and reconciles the
// entity's down flag onto its tags.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::alive::{AliveOutcome, AliveTimerOp, AliveTimerRegistry};
use super::cascade;
use crate::error::CoreError;
use crate::model::{
    AliveTimer, EntityId, SupervisedEntity, SupervisedKind, SupervisionEvent, SupervisionStatus,
};
use crate::store::DataStore;

const ALL_KINDS: [SupervisedKind; 3] = [
    SupervisedKind::Process,
    SupervisedKind::Equipment,
    SupervisedKind::SubEquipment,
];

/// How a transition's timestamp is checked against the current status.
#[derive(Debug, Clone, Copy)]
enum Order {
    /// Dropped when older than the current status time.
    Strict,
    /// An accepted alive: stamped no earlier than the current status time.
    Alive,
    /// Expiry of alive timer `alive_id`: dropped once the timer is active
    /// again.
    Expiry(EntityId),
}

/// How a requested transition resolved.
enum Resolution {
    Changed {
        previous: SupervisionStatus,
        stamped: DateTime<Utc>,
    },
    Confirmed,
    Stale,
    Revived,
}

pub struct SupervisionService {
    store: Arc<DataStore>,
    timers: AliveTimerRegistry,
    events: broadcast::Sender<SupervisionEvent>,
}

impl SupervisionService {
    pub fn new(store: Arc<DataStore>, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            timers: AliveTimerRegistry::new(Arc::clone(&store)),
            store,
            events,
        }
    }

    pub fn timers(&self) -> &AliveTimerRegistry {
        &self.timers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisionEvent> {
        self.events.subscribe()
    }

    // ── Inputs ───────────────────────────────────────────────────────

    /// Heartbeat for alive timer `alive_id`, stamped `timestamp` by its source.
    pub fn on_heartbeat(
        &self,
        alive_id: EntityId,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<AliveOutcome, CoreError> {
        let outcome = self
            .timers
            .apply(alive_id, AliveTimerOp::Update { timestamp }, now)?;
        if outcome != AliveOutcome::Refreshed {
            return Ok(outcome);
        }

        let timer = self.timers.get(alive_id)?;
        let message = format!(
            "Alive of {} {} received (alive id {alive_id})",
            timer.kind, timer.related_name
        );
        self.on_up(
            timer.kind,
            timer.related_id,
            timestamp.min(now),
            message,
            Order::Alive,
        )?;
        Ok(outcome)
    }

    /// Explicit status report, e.g. a process announcing it is stopping.
    pub fn report(
        &self,
        kind: SupervisedKind,
        id: EntityId,
        status: SupervisionStatus,
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<SupervisionEvent>, CoreError> {
        let entity = self.store.supervised(kind).get(id)?;
        let target = match status {
            SupervisionStatus::Running => {
                self.drive_timer(&entity, AliveTimerOp::Start, now);
                entity.running_status()
            }
            SupervisionStatus::RunningLocal => {
                self.drive_timer(&entity, AliveTimerOp::Start, now);
                SupervisionStatus::RunningLocal
            }
            SupervisionStatus::Down => {
                self.drive_timer(&entity, AliveTimerOp::Stop, now);
                SupervisionStatus::Down
            }
            SupervisionStatus::Startup | SupervisionStatus::Uncertain => status,
        };
        self.transition(kind, id, target, timestamp, message.into(), Order::Strict)
    }

    /// Value of a comm-fault control tag.
    pub fn on_comm_fault(
        &self,
        tag_id: EntityId,
        value: bool,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<SupervisionEvent>, CoreError> {
        let (kind, entity) = self
            .comm_fault_owner(tag_id)
            .ok_or_else(|| CoreError::not_found("comm_fault_tag", tag_id))?;
        let is_fault = entity
            .comm_fault
            .is_some_and(|cf| cf.fault_value == value);
        let timestamp = timestamp.min(now);

        if is_fault {
            let message = format!(
                "Communication fault tag {tag_id} indicates that {kind} {} is down",
                entity.name
            );
            self.transition(
                kind,
                entity.id,
                SupervisionStatus::Down,
                timestamp,
                message,
                Order::Strict,
            )
        } else {
            let message = format!(
                "Communication fault tag {tag_id} indicates that {kind} {} is up",
                entity.name
            );
            self.on_up(kind, entity.id, timestamp, message, Order::Strict)
        }
    }

    // ── Periodic work ────────────────────────────────────────────────

    /// Expire overdue timers and take their entities down.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<SupervisionEvent> {
        let expired = self.timers.sweep(now);
        self.store.mark_swept(now);

        expired
            .iter()
            .filter_map(|timer| match self.expire(timer, now) {
                Ok(event) => event,
                Err(e) => {
                    warn!(alive_id = %timer.id, error = %e, "expiry transition failed");
                    None
                }
            })
            .collect()
    }

    /// After a restart, entities recorded as running but without an
    /// active timer are uncertain until they prove themselves alive.
    pub fn recover_after_restart(&self, now: DateTime<Utc>) -> usize {
        let mut recovered = 0;
        for kind in ALL_KINDS {
            for entity in self.store.supervised(kind).query(|e| e.status.is_running()) {
                let timer_active = self
                    .store
                    .alive_timers
                    .try_get(entity.alive_timer_id)
                    .is_some_and(|t| t.active);
                if timer_active {
                    continue;
                }

                let message = "Server restarted; awaiting alive signal".to_owned();
                if let Err(e) = self.transition(
                    kind,
                    entity.id,
                    SupervisionStatus::Uncertain,
                    now,
                    message,
                    Order::Strict,
                ) {
                    warn!(%kind, entity_id = %entity.id, error = %e, "restart recovery failed");
                    continue;
                }
                self.drive_timer(&entity, AliveTimerOp::Start, now);
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!(recovered, "running entities marked uncertain after restart");
        }
        recovered
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Take the entity behind an expired timer down, unless a heartbeat
    /// revived the timer after the sweep released it.
    fn expire(
        &self,
        timer: &AliveTimer,
        now: DateTime<Utc>,
    ) -> Result<Option<SupervisionEvent>, CoreError> {
        let message = format!(
            "Alive timer for {} {} expired: no alive received within {} ms",
            timer.kind,
            timer.related_name,
            timer.expiry_threshold().num_milliseconds()
        );
        self.transition(
            timer.kind,
            timer.related_id,
            SupervisionStatus::Down,
            now,
            message,
            Order::Expiry(timer.id),
        )
    }

    fn on_up(
        &self,
        kind: SupervisedKind,
        id: EntityId,
        timestamp: DateTime<Utc>,
        message: String,
        order: Order,
    ) -> Result<Option<SupervisionEvent>, CoreError> {
        let entity = self.store.supervised(kind).get(id)?;
        if entity.status.is_running() {
            self.store.supervised(kind).confirm_status(id)?;
            return Ok(None);
        }
        self.transition(kind, id, entity.running_status(), timestamp, message, order)
    }

    fn drive_timer(&self, entity: &SupervisedEntity, op: AliveTimerOp, now: DateTime<Utc>) {
        if let Err(e) = self.timers.apply(entity.alive_timer_id, op, now) {
            warn!(
                entity_id = %entity.id,
                alive_id = %entity.alive_timer_id,
                ?op,
                error = %e,
                "alive timer operation failed"
            );
        }
    }

    /// Move `id` to `status`. A request matching the current status is a
    /// confirmation; `order` decides what happens to an out-of-date one.
    ///
    /// Runs under the entity's lock. A heartbeat refreshes its timer before
    /// taking this lock, so an expiry that finds the timer active here has
    /// lost the race and backs off.
    fn transition(
        &self,
        kind: SupervisedKind,
        id: EntityId,
        status: SupervisionStatus,
        timestamp: DateTime<Utc>,
        message: String,
        order: Order,
    ) -> Result<Option<SupervisionEvent>, CoreError> {
        let collection = self.store.supervised(kind);
        let mut resolution = Resolution::Confirmed;

        collection.update_with(id, |entity| {
            if entity.status == status {
                return None;
            }
            let stamped = match order {
                Order::Alive => entity
                    .status_time
                    .map_or(timestamp, |last| timestamp.max(last)),
                Order::Strict | Order::Expiry(_)
                    if entity.status_time.is_some_and(|last| timestamp < last) =>
                {
                    resolution = Resolution::Stale;
                    return None;
                }
                Order::Expiry(alive_id)
                    if self
                        .store
                        .alive_timers
                        .try_get(alive_id)
                        .is_some_and(|t| t.active) =>
                {
                    resolution = Resolution::Revived;
                    return None;
                }
                Order::Strict | Order::Expiry(_) => timestamp,
            };
            resolution = Resolution::Changed {
                previous: entity.status,
                stamped,
            };
            let mut next = entity.clone();
            next.status = status;
            next.status_time = Some(stamped);
            next.status_message = Some(message.clone());
            Some(next)
        })?;

        let (previous, timestamp) = match resolution {
            Resolution::Changed { previous, stamped } => (previous, stamped),
            Resolution::Confirmed => {
                collection.confirm_status(id)?;
                return Ok(None);
            }
            Resolution::Stale => {
                debug!(%kind, entity_id = %id, %status, "ignoring out-of-date status change");
                return Ok(None);
            }
            Resolution::Revived => {
                debug!(%kind, entity_id = %id, "alive received during expiry, staying up");
                return Ok(None);
            }
        };

        info!(%kind, entity_id = %id, from = %previous, to = %status, "{message}");
        cascade::reconcile(&self.store, kind, id);

        let event = SupervisionEvent {
            kind,
            entity_id: id,
            status,
            timestamp,
            message,
        };
        let _ = self.events.send(event.clone());
        Ok(Some(event))
    }

    fn comm_fault_owner(&self, tag_id: EntityId) -> Option<(SupervisedKind, Arc<SupervisedEntity>)> {
        [SupervisedKind::Equipment, SupervisedKind::SubEquipment]
            .into_iter()
            .find_map(|kind| {
                self.store
                    .supervised(kind)
                    .query(|e| e.comm_fault.is_some_and(|cf| cf.tag_id == tag_id))
                    .into_iter()
                    .next()
                    .map(|entity| (kind, entity))
            })
    }
}
