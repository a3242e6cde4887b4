use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
///
/// Expected operational conditions (no task due, lock busy, missing routine,
/// lost lock release) are *not* errors — they are [`crate::types::ExitStatus`]
/// values. Errors here mean the storage layer or a rule definition is broken.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The provided execution rules are invalid or unsupported.
    #[error("Invalid execution rules: {0}")]
    InvalidRules(String),

    /// A cron expression has no match within the search horizon
    /// (e.g. day-of-month 31 combined with February).
    #[error("No matching execution time for '{expression}' within the search horizon")]
    NoMatchingTime { expression: String },

    /// A stored rules/params column failed to (de)serialize.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
