//! Settings file loading.

use super::LockOptions;
use crate::constants::{CONFIG_PATH_ENV, DEFAULT_REDIS_URL, REDIS_URL_ENV};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

fn default_redis_url() -> String {
    DEFAULT_REDIS_URL.to_string()
}

/// Contents of `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Redis server shared by every worker.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Lock options applied to jobs that do not override them.
    #[serde(default)]
    pub defaults: LockOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            defaults: LockOptions::default(),
        }
    }
}

impl Settings {
    /// Load settings, then apply environment overrides.
    ///
    /// The file is `path` when given, else `$UNIQUE_LOCKS_CONFIG`, else
    /// `~/.unique-locks/config.toml`. A missing file yields defaults.
    /// `$UNIQUE_LOCKS_REDIS_URL` replaces `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path),
            None => std::env::var_os(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .or_else(|| Self::default_path().ok()),
        };

        let mut settings = match path {
            Some(path) if path.exists() => Self::load_from(&path).await?,
            _ => Self::default(),
        };

        if let Some(url) = std::env::var(REDIS_URL_ENV).ok().filter(|url| !url.is_empty()) {
            debug!("Using Redis URL from {REDIS_URL_ENV}");
            settings.redis_url = url;
        }

        Ok(settings)
    }

    /// Load settings from `path` without environment overrides.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;

        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))?;
        debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// `~/.unique-locks/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?;
        Ok(home.join(".unique-locks").join("config.toml"))
    }
}
