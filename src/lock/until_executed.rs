use super::{LifecycleLock, LockContext, LockStrategy, Outcome, execute_or_resolve, lock_or_resolve};
use crate::conflict::OnConflict;
use crate::core::Result;
use crate::locksmith::Locksmith;
use std::future::Future;

/// Locked from enqueue until execution finishes.
///
/// Execution re-confirms the lock (re-entrant for the same job id, a fresh
/// acquisition when it expired in between) and releases it however the job
/// ends.
#[derive(Debug, Clone)]
pub struct UntilExecuted {
    locksmith: Locksmith,
    on_conflict: OnConflict,
    on_server_conflict: OnConflict,
}

impl UntilExecuted {
    pub fn new(context: LockContext) -> Self {
        Self {
            locksmith: context.primary(),
            on_conflict: context.job.options.on_conflict,
            on_server_conflict: context.job.options.on_server_conflict,
        }
    }

    pub fn locksmith(&self) -> &Locksmith {
        &self.locksmith
    }
}

impl LifecycleLock for UntilExecuted {
    fn strategy(&self) -> LockStrategy {
        LockStrategy::UntilExecuted
    }

    async fn lock(&self) -> Result<Outcome<Option<String>>> {
        lock_or_resolve(&self.locksmith, self.strategy(), self.on_conflict).await
    }

    async fn execute<F, Fut, T>(&self, body: F) -> Result<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        execute_or_resolve(&self.locksmith, self.strategy(), self.on_server_conflict, body).await
    }
}
