use super::{LifecycleLock, LockContext, LockStrategy, Outcome, lock_or_resolve};
use crate::conflict::OnConflict;
use crate::core::Result;
use crate::locksmith::Locksmith;
use std::future::Future;

/// Locked from enqueue until the TTL runs out; never released explicitly.
#[derive(Debug, Clone)]
pub struct UntilExpired {
    locksmith: Locksmith,
    on_conflict: OnConflict,
}

impl UntilExpired {
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

impl LifecycleLock for UntilExpired {
    fn strategy(&self) -> LockStrategy {
        LockStrategy::UntilExpired
    }

    async fn lock(&self) -> Result<Outcome<Option<String>>> {
        lock_or_resolve(&self.locksmith, self.strategy(), self.on_conflict).await
    }

    async fn execute<F, Fut, T>(&self, body: F) -> Result<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        Ok(Outcome::Proceed(body().await))
    }
}
