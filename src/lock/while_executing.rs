use super::{LifecycleLock, LockContext, LockStrategy, Outcome, execute_or_resolve};
use crate::conflict::OnConflict;
use crate::core::Result;
use crate::locksmith::{LockTimeout, Locksmith};
use std::future::Future;

/// Locked on the run-lock keys for the duration of the execution only.
///
/// Duplicates are enqueued freely; a worker picking one up while another
/// runs waits (per the lock timeout) and otherwise applies
/// `on_server_conflict`.
#[derive(Debug, Clone)]
pub struct WhileExecuting {
    locksmith: Locksmith,
    on_server_conflict: OnConflict,
}

impl WhileExecuting {
    pub fn new(context: LockContext) -> Self {
        Self {
            locksmith: context.runtime(),
            on_server_conflict: context.job.options.on_server_conflict,
        }
    }

    pub fn locksmith(&self) -> &Locksmith {
        &self.locksmith
    }
}

impl LifecycleLock for WhileExecuting {
    fn strategy(&self) -> LockStrategy {
        LockStrategy::WhileExecuting
    }

    async fn lock(&self) -> Result<Outcome<Option<String>>> {
        Ok(Outcome::Proceed(None))
    }

    async fn execute<F, Fut, T>(&self, body: F) -> Result<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        execute_or_resolve(&self.locksmith, self.strategy(), self.on_server_conflict, body).await
    }
}

/// Like [`WhileExecuting`], but a duplicate is rejected at once instead of
/// waiting for the running job.
#[derive(Debug, Clone)]
pub struct WhileExecutingReject {
    locksmith: Locksmith,
}

impl WhileExecutingReject {
    pub fn new(context: LockContext) -> Self {
        let request = context
            .runtime_request()
            .with_timeout(LockTimeout::NoWait)
            .with_retry_count(0);
        Self {
            locksmith: context.locksmith(request),
        }
    }

    pub fn locksmith(&self) -> &Locksmith {
        &self.locksmith
    }
}

impl LifecycleLock for WhileExecutingReject {
    fn strategy(&self) -> LockStrategy {
        LockStrategy::WhileExecutingReject
    }

    async fn lock(&self) -> Result<Outcome<Option<String>>> {
        Ok(Outcome::Proceed(None))
    }

    async fn execute<F, Fut, T>(&self, body: F) -> Result<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        execute_or_resolve(&self.locksmith, self.strategy(), OnConflict::Reject, body).await
    }
}
