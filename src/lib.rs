//! unique-locks - distributed uniqueness locks for background jobs
//!
//! Workers sharing one Redis server use these locks to keep duplicate jobs
//! (jobs with the same fingerprint, or *digest*) from being enqueued or run
//! concurrently. A lock is a small family of keys per digest, manipulated only by
//! atomic server-side scripts, combined with a blocking list pop that admits
//! waiting requesters in order.
//!
//! # Architecture Overview
//!
//! ```text
//! lock strategies  (until_executed, while_executing, ...)
//!        |
//!    Locksmith     prepare / obtain / unlock / delete on one KeySet
//!        |
//!  ScriptEngine    cached script handles, reload on NOSCRIPT
//!        |
//!     Store        RedisStore | MemoryStore
//! ```
//!
//! # Core Modules
//!
//! - [`lock`] - lifecycle strategies deciding when locks are taken and released
//! - [`locksmith`] - the acquire/release protocol for a single digest
//! - [`conflict`] - what to do with a job that lost the race
//! - [`script`] - the atomic operations and their handle cache
//! - [`store`] - the shared store abstraction and its implementations
//! - [`key`] - key derivation for a digest
//! - [`config`] - lock options and the settings file
//! - [`clock`] - wall-clock source used in lock bookkeeping
//! - [`core`] - error types
//! - [`cli`] - the `unique-locks` administration tool
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use unique_locks::config::LockOptions;
//! use unique_locks::lock::{LifecycleLock, Lock, LockContext, LockStrategy, Outcome, UniqueJob};
//! use unique_locks::script::ScriptEngine;
//! use unique_locks::store::RedisStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = RedisStore::connect("redis://127.0.0.1:6379").await?;
//! let engine = ScriptEngine::new(Arc::new(store));
//!
//! let job = UniqueJob::new("uniquejobs:5f1d8c", "8b2c1f", LockOptions::default());
//! let lock = Lock::new(LockStrategy::UntilExecuted, LockContext::new(job, engine))?;
//!
//! if let Outcome::Proceed(_) = lock.lock().await? {
//!     // enqueue the job
//! }
//!
//! // later, on the worker
//! let outcome = lock.execute(|| async { "done" }).await?;
//! assert!(outcome.is_proceed());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod constants;
pub mod core;
pub mod key;
pub mod lock;
pub mod locksmith;
pub mod script;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
