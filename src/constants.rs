//! Global constants used throughout the unique-locks codebase.
//!
//! Retry defaults, timing margins and key-name fragments live here so the
//! lock protocol, the configuration layer and the CLI agree on them.

use std::time::Duration;

/// Number of retries after the first `prepare` attempt.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Base delay between `prepare` attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;

/// Upper bound (exclusive) of the random delay added to each retry, in milliseconds.
pub const DEFAULT_RETRY_JITTER_MS: u64 = 50;

/// Fraction of the TTL reserved for store expiry precision and scheduling jitter.
pub const CLOCK_DRIFT_FACTOR: f64 = 0.01;

/// Constant part of the drift margin: 1ms expiry precision plus 1ms minimum drift.
pub const CLOCK_DRIFT_MIN_MS: u64 = 2;

/// How long `obtain` blocks for a permit when no timeout is configured (100ms).
pub fn default_pop_timeout() -> Duration {
    Duration::from_millis(100)
}

/// Maximum number of entries kept in a fingerprint's changelog.
pub const MAX_CHANGELOG_ENTRIES: usize = 1000;

/// Suffix appended to a fingerprint to derive its run-lock fingerprint.
pub const RUN_SUFFIX: &str = ":RUN";

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "UNIQUE_LOCKS_CONFIG";

/// Environment variable overriding the Redis connection URL.
pub const REDIS_URL_ENV: &str = "UNIQUE_LOCKS_REDIS_URL";

/// Redis URL used when neither the configuration nor the environment names one.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
