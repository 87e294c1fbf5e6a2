// ── Notification pipeline ──
//
// Per-subscriber delivery of cache events. Every subscriber owns an
// unbounded FIFO channel and a dedicated tokio task, so a slow or
// failing listener never blocks a writer or another subscriber.

mod buffered;
mod listener;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::model::EntityId;

pub use listener::{CacheListener, FnListener, ListenerHandle, ListenerResult};
pub(crate) use listener::ListenerSet;

/// Kind of change a cache write produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CacheEvent {
    /// First write for a key.
    Inserted,
    /// Value of an existing key changed.
    Updated,
    /// A report confirmed the current status without changing it.
    StatusConfirmed,
    /// Only supervision-driven quality flags changed.
    SupervisionChange,
    /// An oscillating alarm stopped flapping.
    OscillationExpired,
    Removed,
}

impl CacheEvent {
    pub const ALL: [Self; 6] = [
        Self::Inserted,
        Self::Updated,
        Self::StatusConfirmed,
        Self::SupervisionChange,
        Self::OscillationExpired,
        Self::Removed,
    ];

    fn bit(self) -> u8 {
        match self {
            Self::Inserted => 1,
            Self::Updated => 1 << 1,
            Self::StatusConfirmed => 1 << 2,
            Self::SupervisionChange => 1 << 3,
            Self::OscillationExpired => 1 << 4,
            Self::Removed => 1 << 5,
        }
    }
}

/// Set of event kinds a subscriber is interested in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventMask(u8);

impl EventMask {
    pub fn all() -> Self {
        Self::from_iter(CacheEvent::ALL)
    }

    pub fn contains(self, event: CacheEvent) -> bool {
        self.0 & event.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<CacheEvent> for EventMask {
    fn from_iter<I: IntoIterator<Item = CacheEvent>>(iter: I) -> Self {
        Self(iter.into_iter().fold(0, |acc, e| acc | e.bit()))
    }
}

impl From<&[CacheEvent]> for EventMask {
    fn from(events: &[CacheEvent]) -> Self {
        events.iter().copied().collect()
    }
}

impl<const N: usize> From<[CacheEvent; N]> for EventMask {
    fn from(events: [CacheEvent; N]) -> Self {
        events.into_iter().collect()
    }
}

/// One delivered event: what happened, to which key, and the value
/// visible in the store right after the write.
#[derive(Debug)]
pub struct Notification<T> {
    pub event: CacheEvent,
    pub id: EntityId,
    pub entity: Arc<T>,
}

impl<T> Clone for Notification<T> {
    fn clone(&self) -> Self {
        Self {
            event: self.event,
            id: self.id,
            entity: Arc::clone(&self.entity),
        }
    }
}

/// How events reach a subscriber.
///
/// Either way each subscriber has its own unbounded queue: writers never
/// wait on a slow listener, and a stalled one grows its queue instead.
/// Crossing 10 000 queued events is logged at warn; the current depth is
/// available from `EntityCollection::listener_backlog`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// One callback per event, as soon as the subscriber task runs.
    #[default]
    Immediate,
    /// Events are batched and handed over when `capacity` is reached
    /// or on every `flush_interval` tick, whichever comes first.
    Buffered {
        capacity: usize,
        flush_interval: Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_contains_only_selected_events() {
        let mask = EventMask::from([CacheEvent::Inserted, CacheEvent::Removed]);
        assert!(mask.contains(CacheEvent::Inserted));
        assert!(mask.contains(CacheEvent::Removed));
        assert!(!mask.contains(CacheEvent::Updated));
        assert!(!mask.contains(CacheEvent::SupervisionChange));
    }

    #[test]
    fn mask_all_covers_every_event() {
        let mask = EventMask::all();
        assert!(CacheEvent::ALL.iter().all(|e| mask.contains(*e)));
        assert!(EventMask::default().is_empty());
    }

    #[test]
    fn event_names_are_snake_case() {
        assert_eq!(CacheEvent::StatusConfirmed.to_string(), "status_confirmed");
        assert_eq!(
            "oscillation_expired".parse::<CacheEvent>().ok(),
            Some(CacheEvent::OscillationExpired)
        );
    }
}
