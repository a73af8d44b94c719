//! Error types for the companion core
//!
//! Validation and state failures are returned to the caller as values.
//! Analysis entry points never surface these; they fall back to neutral
//! results and log instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompanionError {
    /// A submitted request failed field validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The child's nudge queue is at capacity.
    #[error("Nudge queue for child {child_id} is full ({capacity} requests)")]
    QueueFull { child_id: String, capacity: usize },

    /// A near-identical request for the same topic is already queued.
    #[error("Duplicate nudge request: similar to {existing_id}")]
    DuplicateRequest { existing_id: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation is not allowed for the current status.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    /// The switch request does not describe the child's current persona.
    #[error("Persona context mismatch: expected {expected}, got {actual}")]
    PersonaContextMismatch { expected: String, actual: String },

    #[error("Persona switch limit reached ({limit} per session)")]
    SwitchLimitReached { limit: u32 },

    #[error("Persona switch cooldown active: {remaining_secs}s remaining")]
    SwitchCooldown { remaining_secs: i64 },

    /// The registered nudge handler reported a failure.
    #[error("Nudge handler error: {0}")]
    Handler(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CompanionError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CompanionError>;
