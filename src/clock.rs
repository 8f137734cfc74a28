//! Wall-clock source for lock timestamps.

use chrono::Utc;
use std::fmt::Debug;
use std::sync::Arc;

/// Supplies the current time in milliseconds since the Unix epoch.
///
/// Scripts record acquisition times with this value, so every worker sharing
/// a store should use a synchronized clock.
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Shared handle to the system clock.
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}
