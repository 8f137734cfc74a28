//! Shared store abstraction.
//!
//! The lock protocol needs very little from the key-value store shared by all
//! workers:
//! - register a script and get back a content-addressed handle
//! - run a registered script atomically by handle
//! - move one element between two lists, optionally blocking until one arrives
//!
//! Everything that reads state and decides on it runs inside a script, so two
//! round trips never interleave with another worker's update.
//!
//! # Implementations
//!
//! - [`RedisStore`] - production store (`SCRIPT LOAD`, `EVALSHA`, `BRPOPLPUSH`)
//! - [`MemoryStore`] - in-process store emulating every script natively; used for
//!   single-process deployments and throughout the test suites

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::core::StoreError;
use crate::script::Script;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Value returned by an atomic operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptValue {
    /// No value (`nil`).
    Nil,
    /// Integer reply.
    Int(i64),
    /// String reply.
    Str(String),
}

impl ScriptValue {
    /// The reply as a string, `None` for nil.
    pub fn into_string(self) -> Option<String> {
        match self {
            ScriptValue::Nil => None,
            ScriptValue::Int(value) => Some(value.to_string()),
            ScriptValue::Str(value) => Some(value),
        }
    }

    /// The reply as an integer, `None` when it is not numeric.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptValue::Nil => None,
            ScriptValue::Int(value) => Some(*value),
            ScriptValue::Str(value) => value.parse().ok(),
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Nil => write!(f, "nil"),
            ScriptValue::Int(value) => write!(f, "{value}"),
            ScriptValue::Str(value) => write!(f, "{value:?}"),
        }
    }
}

/// How long a list pop may wait for an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopWait {
    /// Single attempt, never blocks.
    NonBlocking,
    /// Block up to the duration; `Duration::ZERO` blocks indefinitely.
    Blocking(Duration),
}

/// Operations the lock protocol needs from the shared store.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    /// Register `script` and return its handle. Loading twice is harmless.
    async fn load_script(&self, script: &Script) -> Result<String, StoreError>;

    /// Run the script registered under `handle` atomically.
    ///
    /// Returns [`StoreError::NoScript`] when the store does not know the handle.
    async fn eval_handle(
        &self,
        handle: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptValue, StoreError>;

    /// Pop the tail of `source` and push it onto the head of `destination`.
    ///
    /// Returns `None` when `source` stays empty for the whole wait.
    async fn pop_push(
        &self,
        source: &str,
        destination: &str,
        wait: PopWait,
    ) -> Result<Option<String>, StoreError>;
}
