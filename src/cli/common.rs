//! Helpers shared by the commands that talk to Redis.

use super::CliConfig;
use crate::config::Settings;
use crate::locksmith::{LockKind, Locksmith};
use crate::script::ScriptEngine;
use crate::store::RedisStore;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Connect to the configured Redis server.
pub(super) async fn connect(settings: &Settings) -> Result<ScriptEngine> {
    let store = RedisStore::connect(&settings.redis_url)
        .await
        .with_context(|| format!("Failed to connect to {}", settings.redis_url))?;
    Ok(ScriptEngine::new(Arc::new(store)))
}

/// Locksmith for `job_id` on `digest` (or its run lock), using the configured defaults.
pub(super) async fn locksmith(config: &CliConfig, digest: &str, job_id: &str, run: bool) -> Result<Locksmith> {
    let settings = config.settings().await?;
    let engine = connect(&settings).await?;
    let kind = if run {
        LockKind::RunLock
    } else {
        settings.defaults.primary_kind()
    };
    Ok(Locksmith::new(engine, settings.defaults.request(digest, job_id, kind)))
}
