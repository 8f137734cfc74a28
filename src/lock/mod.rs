//! Lock strategies.
//!
//! A strategy decides at which points of a job's lifecycle the fingerprint is
//! locked and released. The dispatcher calls [`Lock::lock`] before enqueueing a
//! job and [`Lock::execute`] around running it, then acts on the returned
//! [`Outcome`].
//!
//! | Strategy                    | Acquire at                                  | Release at                           |
//! |-----------------------------|---------------------------------------------|--------------------------------------|
//! | `until_executed`            | enqueue, re-confirmed before execution      | after execution (success or panic)   |
//! | `until_executing`           | enqueue                                     | when execution begins                |
//! | `until_expired`             | enqueue                                     | TTL expiry                           |
//! | `while_executing`           | execution start, on the run lock            | execution end                        |
//! | `while_executing_reject`    | same, without waiting or retrying           | same; duplicates are rejected        |
//! | `until_and_while_executing` | enqueue, then the run lock at execution     | enqueue lock when execution begins, run lock at its end |
//!
//! Failing to acquire never panics or errors by itself: the strategy hands the
//! duplicate to the configured [`OnConflict`](crate::conflict::OnConflict)
//! policy, `on_conflict` at enqueue and `on_server_conflict` at execution.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unique_locks::config::LockOptions;
//! use unique_locks::lock::{LifecycleLock, Lock, LockContext, LockStrategy, Outcome, UniqueJob};
//! use unique_locks::script::ScriptEngine;
//! use unique_locks::store::MemoryStore;
//!
//! # async fn example() -> unique_locks::core::Result<()> {
//! let engine = ScriptEngine::new(Arc::new(MemoryStore::new()));
//! let job = UniqueJob::new("uniquejobs:digest", "jid-1", LockOptions::default());
//! let lock = Lock::new(LockStrategy::UntilExecuted, LockContext::new(job, engine))?;
//!
//! if let Outcome::Proceed(_) = lock.lock().await? {
//!     // enqueue, later on a worker:
//!     lock.execute(|| async { /* perform the job */ }).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod until_and_while_executing;
mod until_executed;
mod until_executing;
mod until_expired;
mod while_executing;

pub use until_and_while_executing::UntilAndWhileExecuting;
pub use until_executed::UntilExecuted;
pub use until_executing::UntilExecuting;
pub use until_expired::UntilExpired;
pub use while_executing::{WhileExecuting, WhileExecutingReject};

use crate::clock::{Clock, SystemClock};
use crate::config::LockOptions;
use crate::conflict::{self, Conflict, ConflictAction, OnConflict};
use crate::core::{LockError, Result};
use crate::locksmith::{LockKind, LockRequest, Locksmith};
use crate::script::ScriptEngine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// When a fingerprint is locked and released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStrategy {
    #[default]
    UntilExecuted,
    UntilExecuting,
    UntilExpired,
    WhileExecuting,
    WhileExecutingReject,
    UntilAndWhileExecuting,
}

impl LockStrategy {
    pub const ALL: [LockStrategy; 6] = [
        LockStrategy::UntilExecuted,
        LockStrategy::UntilExecuting,
        LockStrategy::UntilExpired,
        LockStrategy::WhileExecuting,
        LockStrategy::WhileExecutingReject,
        LockStrategy::UntilAndWhileExecuting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LockStrategy::UntilExecuted => "until_executed",
            LockStrategy::UntilExecuting => "until_executing",
            LockStrategy::UntilExpired => "until_expired",
            LockStrategy::WhileExecuting => "while_executing",
            LockStrategy::WhileExecutingReject => "while_executing_reject",
            LockStrategy::UntilAndWhileExecuting => "until_and_while_executing",
        }
    }
}

impl fmt::Display for LockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockStrategy {
    type Err = LockError;

    fn from_str(value: &str) -> Result<Self> {
        LockStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == value)
            .ok_or_else(|| LockError::InvalidConfig(format!("unknown lock strategy '{value}'")))
    }
}

/// What the dispatcher does with a job after a lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Go ahead; carries the call's result.
    Proceed(T),
    /// Forget the job.
    Dropped,
    /// Move the job to the dead set.
    Rejected,
}

impl<T> Outcome<T> {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Outcome::Proceed(_))
    }

    /// The carried value, if the job proceeds.
    pub fn proceeded(self) -> Option<T> {
        match self {
            Outcome::Proceed(value) => Some(value),
            Outcome::Dropped | Outcome::Rejected => None,
        }
    }
}

/// Identity and options of the job being locked.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueJob {
    /// Fingerprint computed by the caller.
    pub digest: String,
    pub job_id: String,
    pub options: LockOptions,
}

impl UniqueJob {
    pub fn new(digest: impl Into<String>, job_id: impl Into<String>, options: LockOptions) -> Self {
        Self {
            digest: digest.into(),
            job_id: job_id.into(),
            options,
        }
    }
}

/// Collaborators shared by every strategy.
#[derive(Debug, Clone)]
pub struct LockContext {
    pub job: UniqueJob,
    pub engine: ScriptEngine,
    pub clock: Arc<dyn Clock>,
}

impl LockContext {
    pub fn new(job: UniqueJob, engine: ScriptEngine) -> Self {
        Self {
            job,
            engine,
            clock: SystemClock::shared(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn locksmith(&self, request: LockRequest) -> Locksmith {
        Locksmith::new(self.engine.clone(), request).with_clock(Arc::clone(&self.clock))
    }

    /// Locksmith of the enqueue-time lock on the fingerprint itself.
    fn primary(&self) -> Locksmith {
        let options = &self.job.options;
        self.locksmith(options.request(&self.job.digest, &self.job.job_id, options.primary_kind()))
    }

    /// Request of the execution-time lock on the run-lock fingerprint.
    fn runtime_request(&self) -> LockRequest {
        self.job
            .options
            .request(&self.job.digest, &self.job.job_id, LockKind::RunLock)
    }

    fn runtime(&self) -> Locksmith {
        self.locksmith(self.runtime_request())
    }
}

/// The two lifecycle hooks every strategy implements.
#[allow(async_fn_in_trait)]
pub trait LifecycleLock {
    fn strategy(&self) -> LockStrategy;

    /// Called before the job is enqueued. Yields the holder id when a lock was
    /// taken, `None` when the strategy takes no enqueue-time lock.
    async fn lock(&self) -> Result<Outcome<Option<String>>>;

    /// Called around the job's execution.
    async fn execute<F, Fut, T>(&self, body: F) -> Result<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>;
}

/// A strategy selected at runtime.
#[derive(Debug, Clone)]
pub enum Lock {
    UntilExecuted(UntilExecuted),
    UntilExecuting(UntilExecuting),
    UntilExpired(UntilExpired),
    WhileExecuting(WhileExecuting),
    WhileExecutingReject(WhileExecutingReject),
    UntilAndWhileExecuting(UntilAndWhileExecuting),
}

impl Lock {
    /// Build the implementation of `strategy`.
    ///
    /// # Errors
    ///
    /// [`LockError::InvalidConfig`] when the job's options cannot work for
    /// `strategy`.
    pub fn new(strategy: LockStrategy, context: LockContext) -> Result<Self> {
        context.job.options.validate(strategy)?;
        Ok(match strategy {
            LockStrategy::UntilExecuted => Lock::UntilExecuted(UntilExecuted::new(context)),
            LockStrategy::UntilExecuting => Lock::UntilExecuting(UntilExecuting::new(context)),
            LockStrategy::UntilExpired => Lock::UntilExpired(UntilExpired::new(context)),
            LockStrategy::WhileExecuting => Lock::WhileExecuting(WhileExecuting::new(context)),
            LockStrategy::WhileExecutingReject => {
                Lock::WhileExecutingReject(WhileExecutingReject::new(context))
            }
            LockStrategy::UntilAndWhileExecuting => {
                Lock::UntilAndWhileExecuting(UntilAndWhileExecuting::new(context))
            }
        })
    }
}

impl LifecycleLock for Lock {
    fn strategy(&self) -> LockStrategy {
        match self {
            Lock::UntilExecuted(lock) => lock.strategy(),
            Lock::UntilExecuting(lock) => lock.strategy(),
            Lock::UntilExpired(lock) => lock.strategy(),
            Lock::WhileExecuting(lock) => lock.strategy(),
            Lock::WhileExecutingReject(lock) => lock.strategy(),
            Lock::UntilAndWhileExecuting(lock) => lock.strategy(),
        }
    }

    async fn lock(&self) -> Result<Outcome<Option<String>>> {
        match self {
            Lock::UntilExecuted(lock) => lock.lock().await,
            Lock::UntilExecuting(lock) => lock.lock().await,
            Lock::UntilExpired(lock) => lock.lock().await,
            Lock::WhileExecuting(lock) => lock.lock().await,
            Lock::WhileExecutingReject(lock) => lock.lock().await,
            Lock::UntilAndWhileExecuting(lock) => lock.lock().await,
        }
    }

    async fn execute<F, Fut, T>(&self, body: F) -> Result<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self {
            Lock::UntilExecuted(lock) => lock.execute(body).await,
            Lock::UntilExecuting(lock) => lock.execute(body).await,
            Lock::UntilExpired(lock) => lock.execute(body).await,
            Lock::WhileExecuting(lock) => lock.execute(body).await,
            Lock::WhileExecutingReject(lock) => lock.execute(body).await,
            Lock::UntilAndWhileExecuting(lock) => lock.execute(body).await,
        }
    }
}

/// Take the enqueue-time lock, resolving a duplicate with `policy`.
async fn lock_or_resolve(
    locksmith: &Locksmith,
    strategy: LockStrategy,
    policy: OnConflict,
) -> Result<Outcome<Option<String>>> {
    if let Some(id) = locksmith.lock().await? {
        return Ok(Outcome::Proceed(Some(id)));
    }

    match resolve(locksmith, strategy, policy).await? {
        Resolution::Retry => match locksmith.lock().await? {
            Some(id) => Ok(Outcome::Proceed(Some(id))),
            None => Ok(Outcome::Rejected),
        },
        Resolution::Stop(outcome) => Ok(outcome),
    }
}

/// Run `body` under `locksmith`, resolving a duplicate with `policy`.
async fn execute_or_resolve<F, Fut, T>(
    locksmith: &Locksmith,
    strategy: LockStrategy,
    policy: OnConflict,
    body: F,
) -> Result<Outcome<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    // A running holder is never purged
    let policy = match policy {
        OnConflict::Replace => OnConflict::Reject,
        other => other,
    };

    let lease = match locksmith.acquire().await? {
        Some(lease) => lease,
        None => match resolve(locksmith, strategy, policy).await? {
            Resolution::Retry => match locksmith.acquire().await? {
                Some(lease) => lease,
                None => return Ok(Outcome::Rejected),
            },
            Resolution::Stop(outcome) => return Ok(outcome),
        },
    };

    let value = locksmith.run_leased(lease, |_| body()).await?;
    Ok(Outcome::Proceed(value))
}

enum Resolution<T> {
    Retry,
    Stop(Outcome<T>),
}

async fn resolve<T>(locksmith: &Locksmith, strategy: LockStrategy, policy: OnConflict) -> Result<Resolution<T>> {
    let request = locksmith.request();
    let conflict = Conflict::new(locksmith.keys().digest.as_str(), request.job_id.as_str(), strategy);

    match conflict::resolve(policy, &conflict)? {
        ConflictAction::Drop => Ok(Resolution::Stop(Outcome::Dropped)),
        ConflictAction::Reject => Ok(Resolution::Stop(Outcome::Rejected)),
        ConflictAction::Replace => {
            let removed = locksmith.force_delete().await?;
            debug!(
                digest = %conflict.digest,
                job_id = %conflict.job_id,
                removed,
                "Replaced existing lock"
            );
            Ok(Resolution::Retry)
        }
    }
}
