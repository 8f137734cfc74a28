use super::{LifecycleLock, LockContext, LockStrategy, Outcome, lock_or_resolve};
use crate::conflict::OnConflict;
use crate::core::Result;
use crate::locksmith::Locksmith;
use std::future::Future;
use tracing::debug;

/// Locked from enqueue until execution begins.
#[derive(Debug, Clone)]
pub struct UntilExecuting {
    locksmith: Locksmith,
    on_conflict: OnConflict,
}

impl UntilExecuting {
    pub fn new(context: LockContext) -> Self {
        Self {
            locksmith: context.primary(),
            on_conflict: context.job.options.on_conflict,
        }
    }

    pub fn locksmith(&self) -> &Locksmith {
        &self.locksmith
    }
}

impl LifecycleLock for UntilExecuting {
    fn strategy(&self) -> LockStrategy {
        LockStrategy::UntilExecuting
    }

    async fn lock(&self) -> Result<Outcome<Option<String>>> {
        lock_or_resolve(&self.locksmith, self.strategy(), self.on_conflict).await
    }

    async fn execute<F, Fut, T>(&self, body: F) -> Result<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.locksmith.unlock().await?.is_none() {
            debug!(
                digest = %self.locksmith.keys().digest,
                job_id = %self.locksmith.request().job_id,
                "Lock already gone when execution began"
            );
        }
        Ok(Outcome::Proceed(body().await))
    }
}
