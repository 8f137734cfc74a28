//! Configuration for unique-locks.
//!
//! Settings live in a single TOML file:
//!
//! ```toml
//! redis_url = "redis://127.0.0.1:6379"
//!
//! [defaults]
//! lock_ttl = 0            # seconds, 0 = no expiry
//! lock_timeout = 0.1      # seconds; 0 waits forever, negative never waits
//! lock_limit = 1
//! lock_retry_count = 3
//! lock_retry_delay = 200  # ms
//! lock_retry_jitter = 50  # ms
//! lock_extend = false
//! on_conflict = "drop"
//! on_server_conflict = "raise"
//! ```
//!
//! **Location**, first match wins:
//! 1. `--config <path>`
//! 2. `$UNIQUE_LOCKS_CONFIG`
//! 3. `~/.unique-locks/config.toml`
//!
//! A missing file is not an error. `$UNIQUE_LOCKS_REDIS_URL` overrides
//! `redis_url` after loading.
//!
//! # Examples
//!
//! ```rust,no_run
//! use unique_locks::config::Settings;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let settings = Settings::load(None).await?;
//! println!("Redis at {}", settings.redis_url);
//! # Ok(())
//! # }
//! ```

mod options;
mod settings;

pub use options::LockOptions;
pub use settings::Settings;
