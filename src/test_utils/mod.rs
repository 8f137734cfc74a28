//! Test utilities for unique-locks
//!
//! Helpers shared by the unit tests and the `integration` and `stress` suites:
//! logging setup, an in-memory engine with its own handle cache, and quick
//! lock options that keep contended tests fast.
//!
//! # Example
//!
//! ```rust,no_run
//! use unique_locks::lock::{LifecycleLock, LockStrategy};
//! use unique_locks::test_utils::{init_test_logging, memory_engine, quick_options, strategy_lock};
//!
//! # async fn example() -> unique_locks::core::Result<()> {
//! init_test_logging(None);
//! let (store, engine) = memory_engine();
//! let lock = strategy_lock(LockStrategy::UntilExecuted, &engine, "digest", "jid", quick_options());
//! lock.lock().await?;
//! assert!(store.key_exists("digest:EXISTS"));
//! # Ok(())
//! # }
//! ```

use crate::config::LockOptions;
use crate::lock::{Lock, LockContext, LockStrategy, UniqueJob};
use crate::script::{ScriptCache, ScriptEngine};
use crate::store::MemoryStore;
use std::sync::{Arc, Once};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, else `RUST_LOG`; with neither, logging stays off.
///
/// ```bash
/// RUST_LOG=unique_locks=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// A fresh memory store and an engine over it with a private handle cache.
pub fn memory_engine() -> (Arc<MemoryStore>, ScriptEngine) {
    let store = Arc::new(MemoryStore::new());
    let engine = ScriptEngine::with_cache(store.clone(), Arc::new(ScriptCache::new()));
    (store, engine)
}

/// Options that give up at once: no retries and no permit wait.
pub fn quick_options() -> LockOptions {
    LockOptions {
        lock_timeout: Some(-1.0),
        lock_retry_count: 0,
        lock_retry_delay: 10,
        lock_retry_jitter: 0,
        ..LockOptions::default()
    }
}

/// Build the `strategy` lock of `job_id` on `digest`.
///
/// # Panics
///
/// When `options` are invalid for `strategy`.
pub fn strategy_lock(
    strategy: LockStrategy,
    engine: &ScriptEngine,
    digest: &str,
    job_id: &str,
    options: LockOptions,
) -> Lock {
    let context = LockContext::new(UniqueJob::new(digest, job_id, options), engine.clone());
    Lock::new(strategy, context).expect("valid lock options")
}
