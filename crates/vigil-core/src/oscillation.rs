// ── Alarm oscillation detection ──
//
// Counts consecutive state toggles of an alarm. Enough toggles inside
// the configured window mark the alarm as oscillating; a single
// evaluation without a toggle resets the count.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::OscillationConfig;
use crate::model::{AlarmSnapshot, AlarmState, EntityId};
use crate::notify::CacheEvent;
use crate::store::EntityCollection;

/// Flapping detector with runtime-swappable thresholds.
pub struct OscillationDetector {
    config: ArcSwap<OscillationConfig>,
}

impl OscillationDetector {
    pub fn new(config: OscillationConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
        }
    }

    pub fn config(&self) -> Arc<OscillationConfig> {
        self.config.load_full()
    }

    /// Replace the thresholds. Alarms pick them up on their next evaluation.
    pub fn set_config(&self, config: OscillationConfig) {
        info!(
            osc_numbers = config.osc_numbers,
            time_range_secs = config.time_range.as_secs(),
            "oscillation thresholds changed"
        );
        self.config.store(Arc::new(config));
    }

    /// Apply one evaluation tick. `alarm.active` must already hold the
    /// freshly evaluated state.
    pub fn update(&self, alarm: &mut AlarmState, now: DateTime<Utc>) {
        let config = self.config.load();

        if alarm.active == alarm.last_active_state {
            alarm.counter_fault = 0;
            alarm.oscillating = false;
        } else {
            alarm.counter_fault = alarm.counter_fault.saturating_add(1);
            alarm.last_state_change = Some(now);
            if alarm.counter_fault == 1 {
                alarm.first_oscillation = Some(now);
            }
            let within_range = alarm
                .first_oscillation
                .is_some_and(|first| now - first <= to_chrono(config.time_range));
            let was_oscillating = alarm.oscillating;
            alarm.oscillating = alarm.counter_fault >= config.osc_numbers && within_range;

            if alarm.oscillating && !was_oscillating {
                debug!(
                    alarm_id = %alarm.id,
                    toggles = alarm.counter_fault,
                    "alarm started oscillating"
                );
            }
        }

        alarm.last_active_state = alarm.active;
    }

    /// Whether the alarm toggled recently enough to still be shown as
    /// oscillating. Read-only.
    pub fn is_oscillation_alive(&self, alarm: &AlarmState, now: DateTime<Utc>) -> bool {
        let alive = to_chrono(self.config.load().time_oscillation_alive);
        alarm
            .last_state_change
            .is_some_and(|changed| now - changed <= alive)
    }

    /// What the alerting layer sees of `alarm` at `now`.
    pub fn snapshot(&self, alarm: &AlarmState, now: DateTime<Utc>) -> AlarmSnapshot {
        AlarmSnapshot {
            id: alarm.id,
            tag_id: alarm.tag_id,
            active: alarm.active,
            oscillating: alarm.oscillating && self.is_oscillation_alive(alarm, now),
        }
    }
}

/// Periodic scan for oscillating alarms that went quiet.
///
/// Publishes [`CacheEvent::OscillationExpired`] once per quiet period of
/// each alarm; the alarm itself is left untouched.
#[derive(Debug, Default)]
pub struct OscillationChecker {
    reported: HashSet<EntityId>,
}

impl OscillationChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one check. Returns the alarms an event was published for.
    pub fn check(
        &mut self,
        detector: &OscillationDetector,
        alarms: &EntityCollection<AlarmState>,
        now: DateTime<Utc>,
    ) -> Vec<EntityId> {
        let quiet: HashSet<EntityId> = alarms
            .query(|a| a.oscillating && !detector.is_oscillation_alive(a, now))
            .iter()
            .map(|a| a.id)
            .collect();

        // Alarms that resumed flapping or stopped oscillating may expire again.
        self.reported.retain(|id| quiet.contains(id));

        let mut published = Vec::new();
        for id in quiet {
            if self.reported.contains(&id) {
                continue;
            }
            match alarms.notify(id, CacheEvent::OscillationExpired) {
                Ok(()) => {
                    debug!(alarm_id = %id, "oscillation expired");
                    self.reported.insert(id);
                    published.push(id);
                }
                Err(e) => debug!(alarm_id = %id, error = %e, "alarm vanished during check"),
            }
        }
        published
    }
}

fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
