//! Error handling for unique-locks
//!
//! The error system separates three failure domains:
//! - [`StoreError`] - what the shared store reported (missing script handle, script
//!   failure, connection trouble)
//! - [`ScriptError`] - an atomic operation failed in a way a reload cannot fix; carries
//!   the operation's name, path and source for diagnosis
//! - [`LockError`] - everything the lock protocol surfaces to callers
//!
//! Lock contention is never an error. A request that cannot be admitted, times out
//! waiting for a permit, or is granted too late to be safe is reported as `Ok(None)`
//! (or an [`Outcome`](crate::lock::Outcome) other than `Proceed`), so retry loops and
//! conflict strategies never use errors for control flow.
//!
//! The CLI converts any failure into an [`ErrorContext`] with [`user_friendly_error`],
//! which adds details and an actionable suggestion before printing.
//!
//! # Examples
//!
//! ```rust,no_run
//! use unique_locks::core::{LockError, user_friendly_error};
//!
//! let error = LockError::InvalidConfig("lock_limit must be at least 1".to_string());
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display();
//! ```

use crate::lock::LockStrategy;
use crate::script::ScriptName;
use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// Failures reported by a [`Store`](crate::store::Store) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store no longer knows the script handle (`NOSCRIPT`).
    #[error("script handle not recognized by the store")]
    NoScript,

    /// The script ran and failed inside the store.
    #[error("script failed: {0}")]
    Script(String),

    /// The store could not be reached or the connection dropped.
    #[error("store connection failed: {0}")]
    Connection(String),

    /// Any other command failure.
    #[error("store command failed: {0}")]
    Command(String),
}

/// An atomic operation failed and could not be recovered by reloading it.
#[derive(Error, Debug, Clone)]
#[error("{name} failed ({path}): {message}")]
pub struct ScriptError {
    /// Name of the failing operation.
    pub name: ScriptName,
    /// Path of the operation's source within the crate.
    pub path: &'static str,
    /// Full source submitted to the store.
    pub script_source: &'static str,
    /// Message reported by the store.
    pub message: String,
}

/// The main error type for lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// An atomic operation failed permanently.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// The store failed outside of script execution.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An operation answered with a value outside its contract.
    #[error("unexpected reply from {script}: {reply}")]
    UnexpectedReply {
        /// Operation that answered
        script: ScriptName,
        /// Debug rendering of the reply
        reply: String,
    },

    /// A duplicate job was reported by the `raise` conflict strategy.
    #[error("job {job_id} is a duplicate of a job holding '{digest}' ({strategy})")]
    Conflict {
        /// Fingerprint that was contended
        digest: String,
        /// Job that failed to acquire the lock
        job_id: String,
        /// Strategy that attempted the acquisition
        strategy: LockStrategy,
    },

    /// Lock options that cannot work together.
    #[error("invalid lock configuration: {0}")]
    InvalidConfig(String),
}

impl LockError {
    /// Check if this error reports a duplicate job rather than a store failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LockError::Conflict { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = LockError> = std::result::Result<T, E>;

/// Error wrapper that adds user-facing details and a suggestion.
#[derive(Debug)]
pub struct ErrorContext {
    /// The error message
    pub message: String,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

/// Convert any error into a user-friendly [`ErrorContext`].
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(lock_error) = error.downcast_ref::<LockError>() {
        return lock_error_context(lock_error);
    }

    if let Some(store_error) = error.downcast_ref::<StoreError>() {
        return store_error_context(store_error);
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(format!("invalid configuration file: {toml_error}"))
            .with_suggestion("Check the TOML syntax of the configuration file")
            .with_details("Settings are read from --config, $UNIQUE_LOCKS_CONFIG or ~/.unique-locks/config.toml");
    }

    // Keep the anyhow context chain in the message
    ErrorContext::new(format!("{error:#}"))
}

fn lock_error_context(error: &LockError) -> ErrorContext {
    match error {
        LockError::Script(script) => ErrorContext::new(error.to_string())
            .with_details(format!("The store rejected the '{}' operation loaded from {}", script.name, script.path))
            .with_suggestion("Check that the Redis server is version 6.2 or newer and allows Lua scripting"),
        LockError::Store(store) => store_error_context(store),
        LockError::UnexpectedReply { .. } => ErrorContext::new(error.to_string())
            .with_details("Another client may be writing to the same keys with an incompatible layout")
            .with_suggestion("Inspect the keys with `unique-locks keys <digest>` and purge them with `unique-locks delete`"),
        LockError::Conflict { .. } => ErrorContext::new(error.to_string())
            .with_suggestion("Wait for the running job to finish or release it with `unique-locks unlock`"),
        LockError::InvalidConfig(_) => ErrorContext::new(error.to_string())
            .with_suggestion("Fix the [defaults] section of the configuration file"),
    }
}

fn store_error_context(error: &StoreError) -> ErrorContext {
    match error {
        StoreError::Connection(_) => ErrorContext::new(error.to_string())
            .with_suggestion("Check that Redis is running and that --redis-url or $UNIQUE_LOCKS_REDIS_URL points to it"),
        _ => ErrorContext::new(error.to_string()),
    }
}
