//! Conflict resolution.
//!
//! When a strategy fails to acquire its lock the job is a duplicate. What
//! happens next is decided by an [`OnConflict`] policy, configured separately
//! for the enqueue side (`on_conflict`) and the execution side
//! (`on_server_conflict`).

use crate::core::{LockError, Result};
use crate::lock::LockStrategy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Policy applied to a duplicate job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnConflict {
    /// Report the duplicate as [`LockError::Conflict`].
    Raise,
    /// Drop the duplicate silently.
    #[default]
    Drop,
    /// Log the duplicate, then drop it.
    Log,
    /// Hand the duplicate to the dispatcher's dead set.
    Reject,
    /// Purge the existing lock and let the duplicate take its place.
    Replace,
}

impl OnConflict {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnConflict::Raise => "raise",
            OnConflict::Drop => "drop",
            OnConflict::Log => "log",
            OnConflict::Reject => "reject",
            OnConflict::Replace => "replace",
        }
    }
}

impl fmt::Display for OnConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnConflict {
    type Err = LockError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "raise" => Ok(OnConflict::Raise),
            "drop" => Ok(OnConflict::Drop),
            "log" => Ok(OnConflict::Log),
            "reject" => Ok(OnConflict::Reject),
            "replace" => Ok(OnConflict::Replace),
            other => Err(LockError::InvalidConfig(format!("unknown conflict strategy '{other}'"))),
        }
    }
}

/// A job that could not acquire its lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub digest: String,
    pub job_id: String,
    pub strategy: LockStrategy,
}

impl Conflict {
    pub fn new(digest: impl Into<String>, job_id: impl Into<String>, strategy: LockStrategy) -> Self {
        Self {
            digest: digest.into(),
            job_id: job_id.into(),
            strategy,
        }
    }
}

/// What the caller does with the duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// Forget the job.
    Drop,
    /// Move the job to the dead set.
    Reject,
    /// Purge the existing lock and try once more.
    Replace,
}

/// Decide the fate of `conflict` under `policy`.
///
/// # Errors
///
/// [`LockError::Conflict`] under [`OnConflict::Raise`].
pub fn resolve(policy: OnConflict, conflict: &Conflict) -> Result<ConflictAction> {
    match policy {
        OnConflict::Raise => Err(LockError::Conflict {
            digest: conflict.digest.clone(),
            job_id: conflict.job_id.clone(),
            strategy: conflict.strategy,
        }),
        OnConflict::Drop => Ok(ConflictAction::Drop),
        OnConflict::Log => {
            info!(
                digest = %conflict.digest,
                job_id = %conflict.job_id,
                strategy = %conflict.strategy,
                "Skipping duplicate job"
            );
            Ok(ConflictAction::Drop)
        }
        OnConflict::Reject => Ok(ConflictAction::Reject),
        OnConflict::Replace => Ok(ConflictAction::Replace),
    }
}
