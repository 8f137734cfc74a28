//! Command-line interface for unique-locks.
//!
//! The `unique-locks` binary is an administration tool for lock state kept in
//! Redis. It derives keys with the same [`KeySet`](crate::key::KeySet) the
//! library uses, so it inspects and repairs exactly what running workers see.
//!
//! # Available Commands
//!
//! - `keys` - print the keys derived from a fingerprint (no Redis needed)
//! - `status` - report whether a job holds a fingerprint's lock
//! - `unlock` - force-release a job's hold on a lock
//! - `delete` - purge every key of a lock except its changelog
//!
//! # Examples
//!
//! ```bash
//! unique-locks keys uniquejobs:5f1d8c --run
//! unique-locks status uniquejobs:5f1d8c --job-id 8b2c1f
//! unique-locks --redis-url redis://cache:6379 unlock uniquejobs:5f1d8c --job-id 8b2c1f
//! unique-locks --verbose delete uniquejobs:5f1d8c
//! ```

mod common;
mod delete;
mod keys;
mod status;
mod unlock;

use crate::config::Settings;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Runtime configuration derived from the global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter to install; `None` defers to `RUST_LOG`, then `info`.
    pub log_level: Option<String>,

    /// Settings file given with `--config`.
    pub config_path: Option<PathBuf>,

    /// Redis URL given with `--redis-url`.
    pub redis_url: Option<String>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the global `tracing` subscriber.
    pub fn init_logging(&self) {
        let filter = match &self.log_level {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// Load settings and apply `--redis-url`.
    pub async fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config_path.clone()).await?;
        if let Some(url) = &self.redis_url {
            settings.redis_url.clone_from(url);
        }
        Ok(settings)
    }
}

/// Administration tool for distributed unique-job locks.
#[derive(Parser)]
#[command(
    name = "unique-locks",
    about = "Inspect and repair distributed unique-job locks",
    version,
    long_about = "unique-locks manages the lock state that keeps duplicate background jobs from running concurrently across workers sharing one Redis server."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show debug output, including every script execution.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only show errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Settings file (default: $UNIQUE_LOCKS_CONFIG or ~/.unique-locks/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Redis server, overriding the settings file and $UNIQUE_LOCKS_REDIS_URL.
    #[arg(long, global = true)]
    redis_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the keys derived from a fingerprint.
    Keys(keys::KeysCommand),

    /// Report whether a job holds a lock.
    Status(status::StatusCommand),

    /// Force-release a job's hold on a lock.
    Unlock(unlock::UnlockCommand),

    /// Purge a lock's keys, keeping its changelog.
    Delete(delete::DeleteCommand),
}

impl Cli {
    /// Execute the parsed command.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translate the global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            Some("error".to_string())
        } else {
            None
        };

        CliConfig {
            log_level,
            config_path: self.config.clone(),
            redis_url: self.redis_url.clone(),
        }
    }

    /// Execute with an explicit configuration.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();

        match self.command {
            Commands::Keys(cmd) => cmd.execute(),
            Commands::Status(cmd) => cmd.execute(&config).await,
            Commands::Unlock(cmd) => cmd.execute(&config).await,
            Commands::Delete(cmd) => cmd.execute(&config).await,
        }
    }
}
