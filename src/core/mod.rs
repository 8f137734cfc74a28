//! Core types shared by every layer of unique-locks.
//!
//! ## `error` - Error Handling
//!
//! - [`StoreError`] - failures reported by the shared store
//! - [`ScriptError`] - an atomic operation that failed permanently
//! - [`LockError`] - errors surfaced by the lock protocol
//! - [`ErrorContext`] / [`user_friendly_error`] - CLI presentation with suggestions
//!
//! Contention is not part of the error taxonomy: failing to acquire a lock is an
//! ordinary `Ok(None)` result.

pub mod error;

pub use error::{ErrorContext, LockError, Result, ScriptError, StoreError, user_friendly_error};
