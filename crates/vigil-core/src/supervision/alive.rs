// ── Alive timer registry ──
//
// All timer mutations go through `apply`, which runs the requested
// operation under the timer's own lock. The sweep therefore never
// overwrites a heartbeat that landed between its read and its write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{AliveTimer, EntityId};
use crate::store::DataStore;

/// One operation on an alive timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliveTimerOp {
    /// Activate and reset the timer to `now`.
    Start,
    /// Heartbeat stamped `timestamp` by its source.
    Update { timestamp: DateTime<Utc> },
    /// Deactivate the timer.
    Stop,
    /// Deactivate the timer if it is active and past its threshold.
    CheckExpired,
}

/// What an [`AliveTimerOp`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliveOutcome {
    Started,
    Refreshed,
    Stopped,
    Expired,
    /// Nothing to do (e.g. `CheckExpired` on a healthy timer).
    Unchanged,
    /// Heartbeat not newer than the last accepted one.
    Stale,
    /// Heartbeat older than two intervals on arrival.
    Delayed,
}

/// Operations over the alive-timer collection.
#[derive(Clone)]
pub struct AliveTimerRegistry {
    store: Arc<DataStore>,
}

impl AliveTimerRegistry {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, id: EntityId) -> Result<Arc<AliveTimer>, CoreError> {
        self.store.alive_timers.get(id)
    }

    /// Run `op` against timer `id` at wall-clock `now`.
    pub fn apply(
        &self,
        id: EntityId,
        op: AliveTimerOp,
        now: DateTime<Utc>,
    ) -> Result<AliveOutcome, CoreError> {
        let mut outcome = AliveOutcome::Unchanged;
        self.store.alive_timers.update_with(id, |timer| {
            let (next, result) = step(timer, op, now);
            outcome = result;
            next
        })?;

        match outcome {
            AliveOutcome::Stale => debug!(alive_id = %id, "ignoring stale heartbeat"),
            AliveOutcome::Delayed => debug!(alive_id = %id, "rejecting delayed heartbeat"),
            _ => {}
        }
        Ok(outcome)
    }

    /// Expire every active timer past its threshold. Returns the timers
    /// that expired on this pass, as stored after expiry.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<Arc<AliveTimer>> {
        let mut expired = Vec::new();
        for id in self.store.alive_timers.keys() {
            match self.apply(id, AliveTimerOp::CheckExpired, now) {
                Ok(AliveOutcome::Expired) => {
                    if let Some(timer) = self.store.alive_timers.try_get(id) {
                        expired.push(timer);
                    }
                }
                Ok(_) => {}
                // Deconfigured between listing and checking.
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(alive_id = %id, error = %e, "alive sweep failed for timer"),
            }
        }
        expired
    }

    /// Ids of every timer currently active.
    pub fn active_ids(&self) -> Vec<EntityId> {
        self.store
            .alive_timers
            .query(|t| t.active)
            .iter()
            .map(|t| t.id)
            .collect()
    }
}

/// Pure transition for one timer. `None` leaves the stored value alone.
fn step(
    timer: &AliveTimer,
    op: AliveTimerOp,
    now: DateTime<Utc>,
) -> (Option<AliveTimer>, AliveOutcome) {
    match op {
        AliveTimerOp::Start => {
            let mut next = timer.clone();
            next.active = true;
            next.last_update = Some(now);
            (Some(next), AliveOutcome::Started)
        }
        AliveTimerOp::Update { timestamp } => {
            if timer.is_delayed(timestamp, now) {
                return (None, AliveOutcome::Delayed);
            }
            let received = timestamp.min(now);
            if timer.last_update.is_some_and(|last| received <= last) {
                return (None, AliveOutcome::Stale);
            }
            let mut next = timer.clone();
            next.active = true;
            next.last_update = Some(received);
            (Some(next), AliveOutcome::Refreshed)
        }
        AliveTimerOp::Stop => {
            let mut next = timer.clone();
            next.active = false;
            next.last_update = Some(now);
            (Some(next), AliveOutcome::Stopped)
        }
        AliveTimerOp::CheckExpired => {
            if timer.active && timer.has_expired(now) {
                let mut next = timer.clone();
                next.active = false;
                (Some(next), AliveOutcome::Expired)
            } else {
                (None, AliveOutcome::Unchanged)
            }
        }
    }
}
