//! Process-scoped cache of script handles.

use super::ScriptName;
use dashmap::DashMap;
use std::sync::{Arc, LazyLock};

static SHARED: LazyLock<Arc<ScriptCache>> = LazyLock::new(|| Arc::new(ScriptCache::new()));

/// Handles returned by the store for each loaded script.
///
/// Entries are filled lazily on first use and only removed when the store
/// reports that it forgot a handle. Engines created from the same cache share
/// the handles, so a script is loaded once per process.
#[derive(Debug, Default)]
pub struct ScriptCache {
    handles: DashMap<ScriptName, String>,
}

impl ScriptCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every engine in this process.
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Cached handle for `name`.
    pub fn get(&self, name: ScriptName) -> Option<String> {
        self.handles.get(&name).map(|handle| handle.value().clone())
    }

    /// Remember the handle for `name`.
    pub fn insert(&self, name: ScriptName, handle: String) {
        self.handles.insert(name, handle);
    }

    /// Forget the handle for `name`, returning it if one was cached.
    pub fn invalidate(&self, name: ScriptName) -> Option<String> {
        self.handles.remove(&name).map(|(_, handle)| handle)
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True when no handle is cached.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
