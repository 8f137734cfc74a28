//! Redis-backed store.

use super::{PopWait, ScriptValue, Store};
use crate::core::StoreError;
use crate::script::Script;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, ErrorKind, FromRedisValue, RedisError, Value};
use tracing::debug;

/// Store shared through a Redis server (6.2 or newer).
///
/// Script calls and non-blocking pops go through a reconnecting
/// [`ConnectionManager`]. Blocking pops open their own connection so a long
/// `BRPOPLPUSH` never stalls other commands multiplexed on the shared one.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    manager: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the server at `url`, e.g. `redis://127.0.0.1:6379/0`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(classify)?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(classify)?;
        debug!(url = %url, "Connected to Redis");
        Ok(Self { client, manager })
    }
}

/// Map a client error to the store taxonomy.
fn classify(error: RedisError) -> StoreError {
    if error.kind() == ErrorKind::NoScriptError || error.code() == Some("NOSCRIPT") {
        return StoreError::NoScript;
    }
    if error.is_io_error()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || error.is_timeout()
    {
        return StoreError::Connection(error.to_string());
    }
    match error.kind() {
        ErrorKind::ResponseError | ErrorKind::ExtensionError => StoreError::Script(error.to_string()),
        _ => StoreError::Command(error.to_string()),
    }
}

fn script_value(value: Value) -> Result<ScriptValue, StoreError> {
    match value {
        Value::Nil => Ok(ScriptValue::Nil),
        Value::Int(value) => Ok(ScriptValue::Int(value)),
        other => String::from_redis_value(&other)
            .map(ScriptValue::Str)
            .map_err(|error| StoreError::Command(error.to_string())),
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn load_script(&self, script: &Script) -> Result<String, StoreError> {
        let mut conn = self.manager.clone();
        let handle: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(script.source)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(handle)
    }

    async fn eval_handle(
        &self,
        handle: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptValue, StoreError> {
        let mut conn = self.manager.clone();
        let value: Value = redis::cmd("EVALSHA")
            .arg(handle)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        script_value(value)
    }

    async fn pop_push(
        &self,
        source: &str,
        destination: &str,
        wait: PopWait,
    ) -> Result<Option<String>, StoreError> {
        match wait {
            PopWait::NonBlocking => {
                let mut conn = self.manager.clone();
                redis::cmd("RPOPLPUSH")
                    .arg(source)
                    .arg(destination)
                    .query_async(&mut conn)
                    .await
                    .map_err(classify)
            }
            PopWait::Blocking(timeout) => {
                let mut conn = self
                    .client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(classify)?;
                redis::cmd("BRPOPLPUSH")
                    .arg(source)
                    .arg(destination)
                    .arg(timeout.as_secs_f64())
                    .query_async(&mut conn)
                    .await
                    .map_err(classify)
            }
        }
    }
}
