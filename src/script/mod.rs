//! Atomic script engine.
//!
//! Every state transition of a lock runs as one named script inside the shared
//! store, so the read-decide-write sequence of one worker can never interleave
//! with another's. This module owns the catalog of scripts, the process-scoped
//! handle cache and the [`ScriptEngine`] that runs scripts by handle.
//!
//! # Handle Lifecycle
//!
//! 1. First use of a script loads its source and caches the returned handle
//! 2. Later calls run the cached handle directly
//! 3. When the store answers `NOSCRIPT` (it was restarted or flushed its script
//!    cache) the handle is invalidated, the source reloaded, and the call retried
//!    once; a second failure becomes a [`ScriptError`]
//!
//! Loading is idempotent, so concurrent first uses from several tasks are safe.
//!
//! # Scripts
//!
//! All scripts receive the full [`KeySet`](crate::key::KeySet) and the argument
//! vector `[job_id, pttl, kind, limit, now, digest, ...]`. Their Lua sources live
//! in `src/script/lua/`, each prefixed with the shared `common.lua` preamble.

mod cache;

pub use cache::ScriptCache;

use crate::core::{LockError, Result, ScriptError, StoreError};
use crate::store::{ScriptValue, Store};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// The atomic operations of the lock protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptName {
    /// Queue the requester and admit it when a slot is free.
    Prepare,
    /// Register the requester as holder of a popped permit.
    Lock,
    /// Release the requester's permit and waiting entries.
    Unlock,
    /// Report whether the requester holds a permit.
    Locked,
    /// Purge all state keys.
    Delete,
}

impl ScriptName {
    /// Every script, in catalog order.
    pub const ALL: [ScriptName; 5] = [
        ScriptName::Prepare,
        ScriptName::Lock,
        ScriptName::Unlock,
        ScriptName::Locked,
        ScriptName::Delete,
    ];

    /// The script's name as used in logs and changelog entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptName::Prepare => "prepare",
            ScriptName::Lock => "lock",
            ScriptName::Unlock => "unlock",
            ScriptName::Locked => "locked",
            ScriptName::Delete => "delete",
        }
    }

    /// The script definition.
    pub fn script(self) -> &'static Script {
        match self {
            ScriptName::Prepare => &PREPARE,
            ScriptName::Lock => &LOCK,
            ScriptName::Unlock => &UNLOCK,
            ScriptName::Locked => &LOCKED,
            ScriptName::Delete => &DELETE,
        }
    }
}

impl fmt::Display for ScriptName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named atomic operation and its source.
#[derive(Debug, PartialEq, Eq)]
pub struct Script {
    /// Name of the operation.
    pub name: ScriptName,
    /// Location of the source within the crate.
    pub path: &'static str,
    /// Lua source submitted to the store.
    pub source: &'static str,
}

macro_rules! lua_script {
    ($name:expr, $file:literal) => {
        Script {
            name: $name,
            path: concat!("src/script/lua/", $file),
            source: concat!(include_str!("lua/common.lua"), "\n", include_str!(concat!("lua/", $file))),
        }
    };
}

static PREPARE: Script = lua_script!(ScriptName::Prepare, "prepare.lua");
static LOCK: Script = lua_script!(ScriptName::Lock, "lock.lua");
static UNLOCK: Script = lua_script!(ScriptName::Unlock, "unlock.lua");
static LOCKED: Script = lua_script!(ScriptName::Locked, "locked.lua");
static DELETE: Script = lua_script!(ScriptName::Delete, "delete.lua");

/// Runs scripts against a store, caching their handles.
#[derive(Debug, Clone)]
pub struct ScriptEngine {
    store: Arc<dyn Store>,
    cache: Arc<ScriptCache>,
}

impl ScriptEngine {
    /// Create an engine over `store` using the process-wide handle cache.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_cache(store, ScriptCache::shared())
    }

    /// Create an engine with an explicit handle cache.
    pub fn with_cache(store: Arc<dyn Store>, cache: Arc<ScriptCache>) -> Self {
        Self { store, cache }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The handle cache.
    pub fn cache(&self) -> &Arc<ScriptCache> {
        &self.cache
    }

    /// Run `name` atomically with `keys` and `args`.
    ///
    /// # Errors
    ///
    /// - [`LockError::Script`] when the script fails, or when the store forgets
    ///   the handle again right after a reload
    /// - [`LockError::Store`] for connection and command failures
    pub async fn execute(
        &self,
        name: ScriptName,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptValue> {
        let script = name.script();
        let mut reloaded = false;

        loop {
            let handle = self.handle(script).await?;
            let start = Instant::now();

            match self.store.eval_handle(&handle, keys, args).await {
                Ok(value) => {
                    debug!(
                        script = %name,
                        elapsed_ms = start.elapsed().as_millis(),
                        "Executed script"
                    );
                    return Ok(value);
                }
                Err(StoreError::NoScript) if !reloaded => {
                    warn!(script = %name, "Store forgot script handle, reloading");
                    self.cache.invalidate(name);
                    reloaded = true;
                }
                Err(StoreError::NoScript) => {
                    return Err(script_error(script, StoreError::NoScript.to_string()));
                }
                Err(StoreError::Script(message)) => return Err(script_error(script, message)),
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Cached handle of `script`, loading it on first use.
    async fn handle(&self, script: &'static Script) -> Result<String> {
        if let Some(handle) = self.cache.get(script.name) {
            return Ok(handle);
        }

        let handle = self.store.load_script(script).await.map_err(|error| match error {
            StoreError::Script(message) => script_error(script, message),
            other => LockError::from(other),
        })?;
        debug!(script = %script.name, handle = %handle, "Loaded script");
        self.cache.insert(script.name, handle.clone());
        Ok(handle)
    }
}

fn script_error(script: &'static Script, message: String) -> LockError {
    ScriptError {
        name: script.name,
        path: script.path,
        script_source: script.source,
        message,
    }
    .into()
}
