//! Error types for the coordination service
//!
//! Operations return `anyhow::Result` like the rest of the crate; the
//! `CoordinationError` variants carry the category so callers (the HTTP layer,
//! startup) can `downcast_ref` and decide whether a failure is routine or fatal.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific coordination scenarios
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    #[error("Invalid time range: end {end} precedes start {start}")]
    InvalidRange { start: i64, end: i64 },

    #[error("Table {name} does not exist.")]
    UnknownTable { name: String },

    #[error("Entity {entity} does not exist.")]
    UnknownEntity { entity: String },

    #[error("Entity {entity} is already in queue at table {table}.")]
    AlreadyQueued { entity: String, table: String },

    #[error("Entity {entity} is currently unavailable: {reason}")]
    EntityUnavailable { entity: String, reason: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Corrupt persisted state in {location}: {reason}")]
    CorruptPersistedState { location: String, reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl CoordinationError {
    /// Whether the error is a recoverable, per-request validation failure
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoordinationError::InvalidRange { .. }
                | CoordinationError::UnknownTable { .. }
                | CoordinationError::UnknownEntity { .. }
                | CoordinationError::AlreadyQueued { .. }
                | CoordinationError::EntityUnavailable { .. }
                | CoordinationError::InvalidRequest { .. }
        )
    }

    pub(crate) fn corrupt(location: impl Into<String>, reason: impl Into<String>) -> Self {
        CoordinationError::CorruptPersistedState {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn lock_poisoned(what: &str) -> Self {
        CoordinationError::InternalError {
            message: format!("Failed to acquire {} lock", what),
        }
    }
}
