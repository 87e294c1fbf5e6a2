// ── Core error types ──
//
// Only configuration-time validation reaches callers as a hard failure.
// Stale updates and sweep failures are handled inside the engine and
// logged; `NotFound` is recoverable and most call sites treat it as
// "no data yet".

use thiserror::Error;

use crate::model::EntityId;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Data errors ──────────────────────────────────────────────────
    #[error("Entity not found: {entity_type} with id {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Collaborator errors ──────────────────────────────────────────
    #[error("Loading {collection} failed: {message}")]
    LoadFailed { collection: String, message: String },

    #[error("Persisting {entity_type} {identifier} failed: {message}")]
    PersistFailed {
        entity_type: String,
        identifier: String,
        message: String,
    },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Engine is shut down")]
    ShutDown,

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity_type: &str, id: EntityId) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            identifier: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
