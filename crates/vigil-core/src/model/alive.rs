// ── Alive timer ──

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;
use super::supervision::SupervisedKind;

/// Heartbeat record for one supervised entity.
///
/// `id` is the alive identifier the driver publishes heartbeats under;
/// `related_id` is the supervised entity it watches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliveTimer {
    pub id: EntityId,
    pub related_id: EntityId,
    pub related_name: String,
    pub kind: SupervisedKind,
    pub alive_interval: Duration,
    pub last_update: Option<DateTime<Utc>>,
    pub active: bool,
}

impl AliveTimer {
    pub fn new(
        id: EntityId,
        kind: SupervisedKind,
        related_id: EntityId,
        related_name: impl Into<String>,
        alive_interval: Duration,
    ) -> Self {
        Self {
            id,
            related_id,
            related_name: related_name.into(),
            kind,
            alive_interval,
            last_update: None,
            active: false,
        }
    }

    /// Silence tolerated before the timer counts as expired: the interval
    /// plus a third of it for network jitter.
    pub fn expiry_threshold(&self) -> chrono::Duration {
        to_chrono(self.alive_interval + self.alive_interval / 3)
    }

    /// Whether no refresh arrived within the expiry threshold.
    /// A timer that was never refreshed cannot expire.
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.last_update
            .is_some_and(|last| now - last > self.expiry_threshold())
    }

    /// Whether a heartbeat stamped `timestamp` arrived too late to be trusted.
    pub fn is_delayed(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - timestamp > to_chrono(self.alive_interval * 2)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
