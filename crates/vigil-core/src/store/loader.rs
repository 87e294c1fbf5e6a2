// ── Backing-store collaborators ──
//
// The store is purely in-memory. A backend plugs in through these two
// traits: one bulk read at cold start, one save per configuration change.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::model::EntityId;

/// Bulk source for cold-start preload.
pub trait Loader<T>: Send + Sync {
    fn load_all(&self) -> Result<HashMap<EntityId, T>, CoreError>;
}

/// Durable sink for configuration changes. Never called on the hot path.
pub trait PersistentWriter<T>: Send + Sync {
    fn save(&self, entity: &T) -> Result<(), CoreError>;
}

impl<T: Clone + Send + Sync> Loader<T> for HashMap<EntityId, T> {
    fn load_all(&self) -> Result<HashMap<EntityId, T>, CoreError> {
        Ok(self.clone())
    }
}
