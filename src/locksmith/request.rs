//! Lock requests and their timing knobs.

use crate::constants::{
    CLOCK_DRIFT_FACTOR, CLOCK_DRIFT_MIN_MS, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS,
    DEFAULT_RETRY_JITTER_MS, default_pop_timeout,
};
use crate::store::PopWait;
use std::fmt;
use std::time::Duration;

/// The flavor of lock being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// One holder at a time.
    Mutex,
    /// Up to `limit` holders at a time.
    Semaphore,
    /// Execution-time lock on the fingerprint's run-lock keys.
    RunLock,
}

impl LockKind {
    /// Name passed to the atomic operations.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockKind::Mutex => "mutex",
            LockKind::Semaphore => "semaphore",
            LockKind::RunLock => "run_lock",
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long `obtain` waits for a permit to come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeout {
    /// Block for at most the duration; `Duration::ZERO` blocks indefinitely.
    Wait(Duration),
    /// Try once without blocking.
    NoWait,
}

impl LockTimeout {
    /// Map a configured timeout in seconds.
    ///
    /// `None` waits the default 100ms, `0` waits forever, a positive value waits
    /// that many seconds and a negative value never waits.
    pub fn from_seconds(seconds: Option<f64>) -> Self {
        match seconds {
            None => LockTimeout::Wait(default_pop_timeout()),
            Some(seconds) if seconds < 0.0 => LockTimeout::NoWait,
            Some(seconds) if seconds == 0.0 => LockTimeout::Wait(Duration::ZERO),
            Some(seconds) => Duration::try_from_secs_f64(seconds)
                .map_or(LockTimeout::Wait(Duration::ZERO), LockTimeout::Wait),
        }
    }

    /// The pop mode implementing this timeout.
    pub fn pop_wait(self) -> PopWait {
        match self {
            LockTimeout::Wait(duration) => PopWait::Blocking(duration),
            LockTimeout::NoWait => PopWait::NonBlocking,
        }
    }
}

impl Default for LockTimeout {
    fn default() -> Self {
        LockTimeout::Wait(default_pop_timeout())
    }
}

/// Everything the locksmith needs to acquire one lock.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use unique_locks::locksmith::{LockKind, LockRequest};
///
/// let request = LockRequest::new("uniquejobs:digest", "jid-1")
///     .with_ttl(Duration::from_secs(30))
///     .with_kind(LockKind::Semaphore)
///     .with_limit(2)
///     .with_retry_count(0);
///
/// assert_eq!(request.effective_limit(), 2);
/// assert_eq!(request.attempts(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LockRequest {
    /// Fingerprint of the work being locked.
    pub digest: String,
    /// Identifier of the requester.
    pub job_id: String,
    /// Time to live of the lock state; zero means no expiry.
    pub ttl: Duration,
    /// Lock flavor.
    pub kind: LockKind,
    /// Concurrency limit; ignored for [`LockKind::Mutex`].
    pub limit: u32,
    /// Permit wait.
    pub timeout: LockTimeout,
    /// Retries of `prepare` after the first attempt.
    pub retry_count: u32,
    /// Base delay between `prepare` attempts.
    pub retry_delay: Duration,
    /// Exclusive bound of the random delay added to `retry_delay`.
    pub retry_jitter: Duration,
    /// Renew an existing lock instead of retrying.
    pub extend: bool,
}

impl LockRequest {
    /// A mutex request for `job_id` on `digest` with default timing.
    pub fn new(digest: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            digest: digest.into(),
            job_id: job_id.into(),
            ttl: Duration::ZERO,
            kind: LockKind::Mutex,
            limit: 1,
            timeout: LockTimeout::default(),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            retry_jitter: Duration::from_millis(DEFAULT_RETRY_JITTER_MS),
            extend: false,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_kind(mut self, kind: LockKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_timeout(mut self, timeout: LockTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_retry_jitter(mut self, retry_jitter: Duration) -> Self {
        self.retry_jitter = retry_jitter;
        self
    }

    pub fn with_extend(mut self, extend: bool) -> Self {
        self.extend = extend;
        self
    }

    /// Concurrency limit enforced by the store: mutexes always allow one holder.
    pub fn effective_limit(&self) -> u32 {
        match self.kind {
            LockKind::Mutex => 1,
            LockKind::Semaphore | LockKind::RunLock => self.limit.max(1),
        }
    }

    /// Total number of `prepare` attempts; extending makes exactly one.
    pub fn attempts(&self) -> u32 {
        if self.extend { 1 } else { self.retry_count.saturating_add(1) }
    }

    /// TTL in milliseconds, as passed to the store.
    pub fn ttl_millis(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX)
    }

    /// Safety margin subtracted from the TTL when validating a grant.
    pub fn drift_millis(&self) -> u64 {
        (self.ttl_millis() as f64 * CLOCK_DRIFT_FACTOR) as u64 + CLOCK_DRIFT_MIN_MS
    }

    /// Whether a grant that took `elapsed` is still safely inside the TTL.
    pub fn is_valid_after(&self, elapsed: Duration) -> bool {
        if self.ttl.is_zero() {
            return true;
        }
        let elapsed = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let validity = self.ttl_millis() as i128 - elapsed as i128 - self.drift_millis() as i128;
        validity >= 0
    }
}
