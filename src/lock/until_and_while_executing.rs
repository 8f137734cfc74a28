use super::{LifecycleLock, LockContext, LockStrategy, Outcome, execute_or_resolve, lock_or_resolve};
use crate::conflict::OnConflict;
use crate::core::Result;
use crate::locksmith::Locksmith;
use std::future::Future;
use tracing::debug;

/// Locked from enqueue until execution begins, then on the run lock until
/// execution ends.
///
/// A duplicate can be enqueued as soon as the first job starts running, but
/// cannot run alongside it.
#[derive(Debug, Clone)]
pub struct UntilAndWhileExecuting {
    primary: Locksmith,
    runtime: Locksmith,
    on_conflict: OnConflict,
    on_server_conflict: OnConflict,
}

impl UntilAndWhileExecuting {
    pub fn new(context: LockContext) -> Self {
        Self {
            primary: context.primary(),
            runtime: context.runtime(),
            on_conflict: context.job.options.on_conflict,
            on_server_conflict: context.job.options.on_server_conflict,
        }
    }

    pub fn primary(&self) -> &Locksmith {
        &self.primary
    }

    pub fn runtime(&self) -> &Locksmith {
        &self.runtime
    }
}

impl LifecycleLock for UntilAndWhileExecuting {
    fn strategy(&self) -> LockStrategy {
        LockStrategy::UntilAndWhileExecuting
    }

    async fn lock(&self) -> Result<Outcome<Option<String>>> {
        lock_or_resolve(&self.primary, self.strategy(), self.on_conflict).await
    }

    async fn execute<F, Fut, T>(&self, body: F) -> Result<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.primary.unlock().await?.is_none() {
            debug!(
                digest = %self.primary.keys().digest,
                job_id = %self.primary.request().job_id,
                "Enqueue lock already gone when execution began"
            );
        }
        execute_or_resolve(&self.runtime, self.strategy(), self.on_server_conflict, body).await
    }
}
