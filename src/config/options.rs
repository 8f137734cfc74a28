//! Per-job lock options.

use crate::conflict::OnConflict;
use crate::constants::{DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS, DEFAULT_RETRY_JITTER_MS};
use crate::core::{LockError, Result};
use crate::lock::LockStrategy;
use crate::locksmith::{LockKind, LockRequest, LockTimeout};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const fn default_limit() -> u32 {
    1
}

const fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

const fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

const fn default_retry_jitter() -> u64 {
    DEFAULT_RETRY_JITTER_MS
}

const fn default_server_conflict() -> OnConflict {
    OnConflict::Raise
}

/// Lock settings of a job, as found in the `[defaults]` table.
///
/// Every field has a default, so partial tables are valid:
///
/// ```toml
/// [defaults]
/// lock_ttl = 3600
/// lock_limit = 2
/// on_conflict = "log"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    /// Seconds before the lock state expires; 0 keeps it until released.
    pub lock_ttl: u64,

    /// Seconds to wait for a permit; 0 waits forever, negative never waits,
    /// absent waits 100ms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_timeout: Option<f64>,

    /// Holders allowed at once.
    #[serde(default = "default_limit")]
    pub lock_limit: u32,

    /// Retries of the admission step after the first attempt.
    #[serde(default = "default_retry_count")]
    pub lock_retry_count: u32,

    /// Milliseconds between admission attempts.
    #[serde(default = "default_retry_delay")]
    pub lock_retry_delay: u64,

    /// Milliseconds of random delay added to each retry.
    #[serde(default = "default_retry_jitter")]
    pub lock_retry_jitter: u64,

    /// Renew an existing lock instead of retrying.
    pub lock_extend: bool,

    /// Policy for duplicates detected at enqueue.
    pub on_conflict: OnConflict,

    /// Policy for duplicates detected at execution; `replace` is refused.
    #[serde(default = "default_server_conflict")]
    pub on_server_conflict: OnConflict,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lock_ttl: 0,
            lock_timeout: None,
            lock_limit: default_limit(),
            lock_retry_count: default_retry_count(),
            lock_retry_delay: default_retry_delay(),
            lock_retry_jitter: default_retry_jitter(),
            lock_extend: false,
            on_conflict: OnConflict::Drop,
            on_server_conflict: default_server_conflict(),
        }
    }
}

impl LockOptions {
    /// Build the locksmith request for `job_id` on `digest`.
    pub fn request(&self, digest: &str, job_id: &str, kind: LockKind) -> LockRequest {
        LockRequest::new(digest, job_id)
            .with_ttl(Duration::from_secs(self.lock_ttl))
            .with_kind(kind)
            .with_limit(self.lock_limit)
            .with_timeout(LockTimeout::from_seconds(self.lock_timeout))
            .with_retry_count(self.lock_retry_count)
            .with_retry_delay(Duration::from_millis(self.lock_retry_delay))
            .with_retry_jitter(Duration::from_millis(self.lock_retry_jitter))
            .with_extend(self.lock_extend)
    }

    /// Lock kind of the primary (enqueue-time) lock.
    pub fn primary_kind(&self) -> LockKind {
        if self.lock_limit > 1 {
            LockKind::Semaphore
        } else {
            LockKind::Mutex
        }
    }

    /// Reject options that cannot work for `strategy`.
    pub fn validate(&self, strategy: LockStrategy) -> Result<()> {
        if self.lock_limit == 0 {
            return Err(LockError::InvalidConfig("lock_limit must be at least 1".to_string()));
        }
        if self.lock_timeout.is_some_and(f64::is_nan) {
            return Err(LockError::InvalidConfig("lock_timeout must be a number".to_string()));
        }
        if self.on_server_conflict == OnConflict::Replace {
            return Err(LockError::InvalidConfig(
                "on_server_conflict cannot be replace, it would purge the lock of a running job".to_string(),
            ));
        }
        if strategy == LockStrategy::UntilExpired && self.lock_ttl == 0 {
            return Err(LockError::InvalidConfig(
                "until_expired needs a lock_ttl, the lock would never be released".to_string(),
            ));
        }
        Ok(())
    }
}
