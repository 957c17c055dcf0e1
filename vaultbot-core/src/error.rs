//! Error taxonomy. Each component gets its own `thiserror` enum rather than
//! one monolithic type, matching how `lexe-tokio::task::Error` is scoped to
//! just the task-joining concern.

use thiserror::Error;

/// Errors surfaced while loading and validating [`crate::config::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config key: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Errors surfaced by the [`crate::store::Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database could not be opened or is corrupt: {0}")]
    Corrupt(String),
    #[error("key already exists")]
    Conflict,
    #[error("key not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by a [`crate::ledger::LedgerAdapter`] implementation.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned an error: {0}")]
    Upstream(String),
}

/// Top-level error type used at CLI boundaries where any component error
/// can occur and only needs to be logged or turned into an exit code.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("{0}")]
    Other(String),
}

/// The outcome of one execution-engine-wrapped job invocation (§4.9).
///
/// Unlike a bare `Result`, this distinguishes "didn't run" (`Skipped`) and
/// "ran out of time" (`TimedOut`) from both success and hard failure, so
/// the engine can classify outcomes without string-matching on the happy
/// path.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed,
    Skipped { reason: String },
    TimedOut,
    Failed { error: String },
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed)
    }
}
