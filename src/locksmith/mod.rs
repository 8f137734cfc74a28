//! The lock state machine.
//!
//! A [`Locksmith`] drives one [`LockRequest`] through the lock protocol:
//!
//! ```text
//! UNLOCKED --prepare(admit)--> QUEUED --prime--> PRIMED --obtain(token)--> HELD
//! HELD --unlock / force_unlock--> UNLOCKED
//! HELD --ttl expiry (store-driven)--> UNLOCKED
//! any state --force_delete--> UNLOCKED (keys purged)
//! ```
//!
//! `prepare` is retried with a fixed delay plus random jitter. Once the
//! requester is primed, `obtain` moves one permit token from the free pool to the
//! checked-out pool (blocking up to the configured timeout) and registers the
//! requester as holder. A grant that arrives too late to be safe, given the TTL
//! and a clock drift margin, counts as a failed acquisition.
//!
//! Contention is never an error: every acquisition path returns `Ok(None)` when
//! the lock could not be taken, and cleans up the requester's waiting entries.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unique_locks::locksmith::{LockRequest, Locksmith};
//! use unique_locks::script::ScriptEngine;
//! use unique_locks::store::MemoryStore;
//!
//! # async fn run() -> unique_locks::core::Result<()> {
//! let engine = ScriptEngine::new(Arc::new(MemoryStore::new()));
//! let locksmith = Locksmith::new(engine, LockRequest::new("uniquejobs:digest", "jid-1"));
//!
//! let ran = locksmith.execute(|_lease| async { 42 }).await?;
//! assert_eq!(ran, Some(42));
//! # Ok(())
//! # }
//! ```

mod request;

pub use request::{LockKind, LockRequest, LockTimeout};

use crate::clock::{Clock, SystemClock};
use crate::core::{LockError, Result};
use crate::key::KeySet;
use crate::script::{ScriptEngine, ScriptName};
use crate::store::ScriptValue;
use futures::FutureExt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{FixedInterval, jitter};
use tracing::{debug, warn};

/// A granted lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// The holder.
    pub job_id: String,
    /// Permit token checked out for this grant; `None` when the requester
    /// already held the lock before asking.
    pub token: Option<String>,
}

/// Outcome of a single `prepare` attempt inside the retry loop.
#[derive(Debug)]
enum Attempt {
    Contended,
    Failed(LockError),
}

/// Acquires and releases one lock request.
#[derive(Debug, Clone)]
pub struct Locksmith {
    engine: ScriptEngine,
    request: LockRequest,
    keys: KeySet,
    clock: Arc<dyn Clock>,
}

impl Locksmith {
    /// Create a locksmith for `request`.
    ///
    /// Run-lock requests operate on the fingerprint's `:RUN` key family.
    pub fn new(engine: ScriptEngine, request: LockRequest) -> Self {
        let keys = match request.kind {
            LockKind::RunLock => KeySet::run(&request.digest),
            LockKind::Mutex | LockKind::Semaphore => KeySet::new(request.digest.as_str()),
        };
        Self {
            engine,
            request,
            keys,
            clock: SystemClock::shared(),
        }
    }

    /// Replace the clock used for acquisition timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn request(&self) -> &LockRequest {
        &self.request
    }

    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }

    fn job_id(&self) -> &str {
        &self.request.job_id
    }

    async fn call(&self, name: ScriptName, extra: Option<&str>) -> Result<ScriptValue> {
        let mut args = vec![
            self.request.job_id.clone(),
            self.request.ttl_millis().to_string(),
            self.request.kind.to_string(),
            self.request.effective_limit().to_string(),
            self.clock.now_millis().to_string(),
            self.keys.digest.clone(),
        ];
        args.extend(extra.map(str::to_string));
        self.engine.execute(name, &self.keys.to_vec(), &args).await
    }

    /// Run one `prepare` step.
    ///
    /// Returns the requester's id when it was admitted (or already holds) and
    /// the answer arrived within the TTL minus the drift margin.
    pub async fn prepare(&self) -> Result<Option<String>> {
        let start = Instant::now();
        let admitted = self.call(ScriptName::Prepare, None).await?.into_string();
        let elapsed = start.elapsed();

        match admitted {
            Some(id) if id == self.job_id() => {
                if self.request.is_valid_after(elapsed) {
                    debug!(digest = %self.keys.digest, job_id = %id, "Primed");
                    Ok(Some(id))
                } else {
                    debug!(
                        digest = %self.keys.digest,
                        job_id = %id,
                        elapsed_ms = elapsed.as_millis(),
                        "Admission arrived too late for the TTL"
                    );
                    Ok(None)
                }
            }
            _ => {
                debug!(digest = %self.keys.digest, job_id = %self.job_id(), "Queued");
                Ok(None)
            }
        }
    }

    /// Retry `prepare` with jittered backoff until admitted or out of attempts.
    async fn prepare_with_retry(&self) -> Result<Option<String>> {
        let delay = self.request.retry_delay;
        let spread = self.request.retry_jitter;
        let retries = self.request.attempts().saturating_sub(1) as usize;
        let strategy = FixedInterval::new(delay)
            .map(move |delay| delay + jitter(spread))
            .take(retries);

        let outcome = RetryIf::spawn(
            strategy,
            move || async move {
                match self.prepare().await {
                    Ok(Some(id)) => Ok(id),
                    Ok(None) => Err(Attempt::Contended),
                    Err(error) => Err(Attempt::Failed(error)),
                }
            },
            |attempt: &Attempt| matches!(attempt, Attempt::Contended),
        )
        .await;

        match outcome {
            Ok(id) => Ok(Some(id)),
            Err(Attempt::Contended) => Ok(None),
            Err(Attempt::Failed(error)) => Err(error),
        }
    }

    /// Check out a permit token and register as holder.
    pub async fn obtain(&self) -> Result<Option<String>> {
        let token = self
            .engine
            .store()
            .pop_push(
                &self.keys.permits,
                &self.keys.obtained,
                self.request.timeout.pop_wait(),
            )
            .await?;

        let Some(token) = token else {
            debug!(digest = %self.keys.digest, job_id = %self.job_id(), "No permit became available");
            return Ok(None);
        };

        // The token is checked out but nobody holds it until `lock` succeeds
        let mut guard = ReleaseGuard::new(self.clone(), Some(token.clone()));
        let error = match self.call(ScriptName::Lock, Some(&token)).await {
            Ok(ScriptValue::Str(id)) if id == self.job_id() => {
                guard.disarm();
                debug!(digest = %self.keys.digest, job_id = %id, token = %token, "Locked");
                return Ok(Some(token));
            }
            Ok(other) => LockError::UnexpectedReply {
                script: ScriptName::Lock,
                reply: other.to_string(),
            },
            Err(error) => error,
        };

        warn!(digest = %self.keys.digest, job_id = %self.job_id(), token = %token, error = %error, "Returning permit after failed lock");
        if let Err(cleanup) = self.release(Some(&token)).await {
            warn!(digest = %self.keys.digest, job_id = %self.job_id(), error = %cleanup, "Returning permit failed");
        }
        guard.disarm();
        Err(error)
    }

    /// Acquire the lock, reporting how it was granted.
    pub async fn acquire(&self) -> Result<Option<Lease>> {
        if self.is_locked().await? {
            if self.request.extend && !self.request.ttl.is_zero() {
                // prepare refreshes the TTL of a holder
                self.prepare().await?;
            }
            debug!(digest = %self.keys.digest, job_id = %self.job_id(), "Already holding");
            return Ok(Some(Lease {
                job_id: self.request.job_id.clone(),
                token: None,
            }));
        }

        let admitted = match self.prepare_with_retry().await {
            Ok(admitted) => admitted,
            Err(error) => {
                if let Err(cleanup) = self.abandon().await {
                    warn!(digest = %self.keys.digest, job_id = %self.job_id(), error = %cleanup, "Cleanup after failed prepare failed");
                }
                return Err(error);
            }
        };
        if admitted.is_none() {
            self.abandon().await?;
            return Ok(None);
        }

        match self.obtain().await? {
            Some(token) => Ok(Some(Lease {
                job_id: self.request.job_id.clone(),
                token: Some(token),
            })),
            None => {
                self.abandon().await?;
                Ok(None)
            }
        }
    }

    /// Acquire the lock, returning the holder id.
    pub async fn lock(&self) -> Result<Option<String>> {
        Ok(self.acquire().await?.map(|lease| lease.job_id))
    }

    /// Run `body` while holding the lock.
    ///
    /// Returns `Ok(None)` without calling `body` when the lock could not be
    /// acquired. Once acquired, the lock is released as in [`Self::run_leased`].
    pub async fn execute<F, Fut, T>(&self, body: F) -> Result<Option<T>>
    where
        F: FnOnce(Lease) -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(lease) = self.acquire().await? else {
            return Ok(None);
        };
        self.run_leased(lease, body).await.map(Some)
    }

    /// Run `body` under a lease granted by [`Self::acquire`], then release it.
    ///
    /// The lock is released when `body` completes, when it panics (the panic
    /// is resumed after releasing) and when the returned future is dropped
    /// mid-flight (release is spawned on the current runtime).
    pub async fn run_leased<F, Fut, T>(&self, lease: Lease, body: F) -> Result<T>
    where
        F: FnOnce(Lease) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut guard = ReleaseGuard::new(self.clone(), None);
        let outcome = AssertUnwindSafe(body(lease)).catch_unwind().await;
        let released = self.force_unlock().await;
        guard.disarm();
        match outcome {
            Ok(value) => {
                released?;
                Ok(value)
            }
            Err(panic) => {
                if let Err(error) = released {
                    warn!(digest = %self.keys.digest, job_id = %self.job_id(), error = %error, "Release after panic failed");
                }
                resume_unwind(panic)
            }
        }
    }

    /// Release the lock if this requester holds it.
    pub async fn unlock(&self) -> Result<Option<String>> {
        if !self.is_locked().await? {
            return Ok(None);
        }
        self.force_unlock().await
    }

    /// Release this requester's permit and waiting entries unconditionally.
    pub async fn force_unlock(&self) -> Result<Option<String>> {
        self.release(None).await
    }

    /// Run `unlock`, also returning `token` to the free pool when this
    /// requester checked it out without becoming holder.
    async fn release(&self, token: Option<&str>) -> Result<Option<String>> {
        let released = self.call(ScriptName::Unlock, token).await?.into_string();
        if released.is_some() {
            debug!(digest = %self.keys.digest, job_id = %self.job_id(), "Unlocked");
        }
        Ok(released)
    }

    /// Purge the lock state unless it expires by itself.
    pub async fn delete(&self) -> Result<Option<u64>> {
        if !self.request.ttl.is_zero() {
            return Ok(None);
        }
        self.force_delete().await.map(Some)
    }

    /// Purge every key of the fingerprint except the changelog.
    pub async fn force_delete(&self) -> Result<u64> {
        let value = self.call(ScriptName::Delete, None).await?;
        let removed = value
            .as_int()
            .and_then(|count| u64::try_from(count).ok())
            .ok_or_else(|| LockError::UnexpectedReply {
                script: ScriptName::Delete,
                reply: value.to_string(),
            })?;
        debug!(digest = %self.keys.digest, removed, "Deleted lock state");
        Ok(removed)
    }

    /// Whether this requester currently holds a permit.
    pub async fn is_locked(&self) -> Result<bool> {
        let value = self.call(ScriptName::Locked, None).await?;
        match value.as_int() {
            Some(flag) => Ok(flag == 1),
            None => Err(LockError::UnexpectedReply {
                script: ScriptName::Locked,
                reply: value.to_string(),
            }),
        }
    }

    /// Forget a failed acquisition so it does not block later requesters.
    async fn abandon(&self) -> Result<()> {
        debug!(digest = %self.keys.digest, job_id = %self.job_id(), "Lock not acquired");
        self.call(ScriptName::Unlock, None).await?;
        Ok(())
    }
}

/// Releases the lock when a scoped execution, or the window between popping a
/// permit and registering as its holder, is dropped before completing.
struct ReleaseGuard {
    locksmith: Option<Locksmith>,
    token: Option<String>,
}

impl ReleaseGuard {
    fn new(locksmith: Locksmith, token: Option<String>) -> Self {
        Self {
            locksmith: Some(locksmith),
            token,
        }
    }

    fn disarm(&mut self) {
        self.locksmith = None;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(locksmith) = self.locksmith.take() else {
            return;
        };

        let digest = locksmith.keys.digest.clone();
        let job_id = locksmith.request.job_id.clone();
        let token = self.token.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(digest = %digest, job_id = %job_id, "Execution cancelled, scheduling release");
                handle.spawn(async move {
                    if let Err(error) = locksmith.release(token.as_deref()).await {
                        warn!(digest = %digest, job_id = %job_id, error = %error, "Release after cancellation failed");
                    }
                });
            }
            Err(_) => {
                warn!(digest = %digest, job_id = %job_id, "Execution cancelled outside a runtime, lock left to expire");
            }
        }
    }
}
