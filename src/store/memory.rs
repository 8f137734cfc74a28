//! In-process store.
//!
//! [`MemoryStore`] keeps strings, lists and hashes in one mutex-guarded map and
//! runs each catalog script as native Rust against that map. The emulation
//! follows the Lua sources step by step, so locks behave the same as against
//! Redis as long as every participant lives in the same process.
//!
//! Expiry uses [`tokio::time::Instant`], which means paused-clock tests can
//! advance past a TTL without sleeping. Lists and hashes that become empty are
//! removed, as Redis does.

use super::{PopWait, ScriptValue, Store};
use crate::constants::MAX_CHANGELOG_ENTRIES;
use crate::core::StoreError;
use crate::script::{Script, ScriptName};
use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Script(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value ({key})"
    ))
}

/// Keyspace with Redis command semantics.
#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
}

impl State {
    fn evict_expired(&mut self, now: Instant) {
        self.entries
            .retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
    }

    /// Drop `key` when it holds an empty list or hash.
    fn tidy(&mut self, key: &str) {
        let empty = match self.entries.get(key).map(|entry| &entry.value) {
            Some(Value::List(list)) => list.is_empty(),
            Some(Value::Hash(hash)) => hash.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    fn list(&self, key: &str) -> StoreResult<Option<&VecDeque<String>>> {
        match self.entries.get(key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::List(list)) => Ok(Some(list)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn list_mut(&mut self, key: &str, create: bool) -> StoreResult<Option<&mut VecDeque<String>>> {
        if create && !self.entries.contains_key(key) {
            self.entries
                .insert(key.to_string(), Entry::new(Value::List(VecDeque::new())));
        }
        match self.entries.get_mut(key).map(|entry| &mut entry.value) {
            None => Ok(None),
            Some(Value::List(list)) => Ok(Some(list)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hash(&self, key: &str) -> StoreResult<Option<&BTreeMap<String, String>>> {
        match self.entries.get(key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Hash(hash)) => Ok(Some(hash)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hash_mut(&mut self, key: &str, create: bool) -> StoreResult<Option<&mut BTreeMap<String, String>>> {
        if create && !self.entries.contains_key(key) {
            self.entries
                .insert(key.to_string(), Entry::new(Value::Hash(BTreeMap::new())));
        }
        match self.entries.get_mut(key).map(|entry| &mut entry.value) {
            None => Ok(None),
            Some(Value::Hash(hash)) => Ok(Some(hash)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.entries.get(key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    /// `SET key value [PX ttl] [NX] [KEEPTTL]`; returns whether the value was written.
    fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>, nx: bool, keep_ttl: bool, now: Instant) -> bool {
        let existing = self.entries.get(key);
        if nx && existing.is_some() {
            return false;
        }
        let expires_at = match ttl {
            Some(ttl) => Some(now + ttl),
            None if keep_ttl => existing.and_then(|entry| entry.expires_at),
            None => None,
        };
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
        true
    }

    fn del(&mut self, keys: &[&str]) -> i64 {
        keys.iter()
            .filter(|key| self.entries.remove(**key).is_some())
            .count() as i64
    }

    fn pexpire(&mut self, key: &str, ttl: Duration, now: Instant) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
    }

    fn llen(&self, key: &str) -> StoreResult<i64> {
        Ok(self.list(key)?.map_or(0, |list| list.len() as i64))
    }

    fn lpush(&mut self, key: &str, value: &str) -> StoreResult<()> {
        if let Some(list) = self.list_mut(key, true)? {
            list.push_front(value.to_string());
        }
        Ok(())
    }

    fn rpush(&mut self, key: &str, value: String) -> StoreResult<()> {
        if let Some(list) = self.list_mut(key, true)? {
            list.push_back(value);
        }
        Ok(())
    }

    /// Keep only the newest `keep` elements.
    fn trim_to_last(&mut self, key: &str, keep: usize) -> StoreResult<()> {
        if let Some(list) = self.list_mut(key, false)? {
            let excess = list.len().saturating_sub(keep);
            for _ in 0..excess {
                list.pop_front();
            }
        }
        Ok(())
    }

    fn lpop(&mut self, key: &str) -> StoreResult<Option<String>> {
        let value = self.list_mut(key, false)?.and_then(VecDeque::pop_front);
        self.tidy(key);
        Ok(value)
    }

    fn rpop(&mut self, key: &str) -> StoreResult<Option<String>> {
        let value = self.list_mut(key, false)?.and_then(VecDeque::pop_back);
        self.tidy(key);
        Ok(value)
    }

    fn rpoplpush(&mut self, source: &str, destination: &str) -> StoreResult<Option<String>> {
        // Type-check the destination before mutating the source
        self.list(destination)?;
        let Some(value) = self.rpop(source)? else {
            return Ok(None);
        };
        self.lpush(destination, &value)?;
        Ok(Some(value))
    }

    fn lrem(&mut self, key: &str, value: &str) -> StoreResult<()> {
        if let Some(list) = self.list_mut(key, false)? {
            list.retain(|item| item != value);
        }
        self.tidy(key);
        Ok(())
    }

    /// Remove the first occurrence of `value`, reporting whether there was one.
    fn lrem_first(&mut self, key: &str, value: &str) -> StoreResult<bool> {
        let removed = match self.list_mut(key, false)? {
            Some(list) => match list.iter().position(|item| item == value) {
                Some(index) => list.remove(index).is_some(),
                None => false,
            },
            None => false,
        };
        self.tidy(key);
        Ok(removed)
    }

    fn lpos(&self, key: &str, value: &str) -> StoreResult<bool> {
        Ok(self
            .list(key)?
            .is_some_and(|list| list.iter().any(|item| item == value)))
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self.hash(key)?.and_then(|hash| hash.get(field).cloned()))
    }

    fn hset(&mut self, key: &str, field: &str, value: String) -> StoreResult<()> {
        if let Some(hash) = self.hash_mut(key, true)? {
            hash.insert(field.to_string(), value);
        }
        Ok(())
    }

    fn hdel(&mut self, key: &str, field: &str) -> StoreResult<bool> {
        let removed = self
            .hash_mut(key, false)?
            .is_some_and(|hash| hash.remove(field).is_some());
        self.tidy(key);
        Ok(removed)
    }

    fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
        Ok(self.hash(key)?.is_some_and(|hash| hash.contains_key(field)))
    }

    fn hlen(&self, key: &str) -> StoreResult<i64> {
        Ok(self.hash(key)?.map_or(0, |hash| hash.len() as i64))
    }

    fn hincrby(&mut self, key: &str, field: &str, by: i64) -> StoreResult<i64> {
        let current = match self.hget(key, field)? {
            Some(value) => value
                .parse::<i64>()
                .map_err(|_| StoreError::Script("ERR hash value is not an integer".to_string()))?,
            None => 0,
        };
        let next = current + by;
        self.hset(key, field, next.to_string())?;
        Ok(next)
    }

    fn first_field(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.hash(key)?.and_then(|hash| hash.keys().next().cloned()))
    }
}

/// Arguments shared by every script invocation.
#[derive(Clone, Copy)]
struct Invocation<'a> {
    exists: &'a str,
    holders: &'a str,
    queued: &'a str,
    primed: &'a str,
    permits: &'a str,
    obtained: &'a str,
    version: &'a str,
    changelog: &'a str,
    job_id: &'a str,
    pttl: i64,
    limit: i64,
    now: i64,
    digest: &'a str,
    token: Option<&'a str>,
}

impl<'a> Invocation<'a> {
    fn parse(keys: &'a [String], args: &'a [String]) -> StoreResult<Self> {
        let [exists, holders, queued, primed, permits, obtained, version, changelog] = keys else {
            return Err(StoreError::Script(format!(
                "ERR expected 8 keys, got {}",
                keys.len()
            )));
        };
        if args.len() < 6 {
            return Err(StoreError::Script(format!(
                "ERR expected at least 6 arguments, got {}",
                args.len()
            )));
        }
        let number = |index: usize| {
            args[index].parse::<i64>().map_err(|_| {
                StoreError::Script(format!("ERR argument {} is not a number: {}", index + 1, args[index]))
            })
        };

        Ok(Self {
            exists,
            holders,
            queued,
            primed,
            permits,
            obtained,
            version,
            changelog,
            job_id: &args[0],
            pttl: number(1)?,
            limit: number(3)?,
            now: number(4)?,
            digest: &args[5],
            token: args.get(6).map(String::as_str),
        })
    }

    fn ttl(&self) -> Option<Duration> {
        u64::try_from(self.pttl)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    fn state_keys(&self) -> [&'a str; 7] {
        [
            self.exists,
            self.holders,
            self.queued,
            self.primed,
            self.permits,
            self.obtained,
            self.version,
        ]
    }

    fn waiting_keys(&self) -> [&'a str; 4] {
        [self.queued, self.primed, self.permits, self.version]
    }
}

/// Runs one script against locked state.
struct Run<'s, 'a> {
    state: &'s mut State,
    call: Invocation<'a>,
    clock: Instant,
}

impl Run<'_, '_> {
    fn log_step(&mut self, script: ScriptName, message: String) -> StoreResult<()> {
        let entry = serde_json::json!({
            "digest": self.call.digest,
            "job_id": self.call.job_id,
            "script": script.as_str(),
            "message": message,
            "time": self.call.now,
        });
        self.state.rpush(self.call.changelog, entry.to_string())?;
        self.state.trim_to_last(self.call.changelog, MAX_CHANGELOG_ENTRIES)
    }

    fn expire(&mut self, keys: &[&str]) {
        if let Some(ttl) = self.call.ttl() {
            for key in keys {
                self.state.pexpire(key, ttl, self.clock);
            }
        }
    }

    fn expire_all(&mut self) {
        let keys = self.call.state_keys();
        self.expire(&keys);
    }

    fn expire_waiting(&mut self) {
        let keys = self.call.waiting_keys();
        self.expire(&keys);
    }

    fn purge(&mut self) -> i64 {
        let keys = self.call.state_keys();
        self.state.del(&keys)
    }

    fn prepare(&mut self) -> StoreResult<ScriptValue> {
        let call = self.call;
        let (job_id, limit) = (call.job_id, call.limit);

        if self.state.hexists(call.holders, job_id)? {
            self.expire_all();
            self.log_step(ScriptName::Prepare, "already holding".to_string())?;
            return Ok(ScriptValue::Str(job_id.to_string()));
        }

        let configured = self
            .state
            .hget(call.version, "limit")?
            .and_then(|value| value.parse::<i64>().ok());
        if configured != Some(limit) {
            self.state.hincrby(call.version, "counter", 1)?;
            self.state.hset(call.version, "limit", limit.to_string())?;

            let mut surplus =
                self.state.llen(call.permits)? + self.state.llen(call.obtained)? - limit;
            while surplus > 0 && self.state.rpop(call.permits)?.is_some() {
                surplus -= 1;
            }
        }

        let missing = limit - self.state.llen(call.permits)? - self.state.llen(call.obtained)?;
        for _ in 0..missing {
            let serial = self.state.hincrby(call.version, "minted", 1)?;
            self.state
                .lpush(call.permits, &format!("{}:permit:{serial}", call.digest))?;
        }

        if self.state.lpos(call.primed, job_id)? {
            self.expire_waiting();
            return Ok(ScriptValue::Str(job_id.to_string()));
        }

        self.state.lrem(call.queued, job_id)?;
        self.state.lpush(call.queued, job_id)?;

        if self.state.hlen(call.holders)? >= limit {
            self.expire_waiting();
            self.log_step(ScriptName::Prepare, format!("queued, limit of {limit} reached"))?;
            return Ok(ScriptValue::Nil);
        }

        let Some(admitted) = self.state.rpoplpush(call.queued, call.primed)? else {
            return Ok(ScriptValue::Nil);
        };
        if admitted == job_id {
            let (exists, ttl) = (call.exists, call.ttl());
            self.state.set(exists, job_id, ttl, true, false, self.clock);
        }

        self.expire_waiting();
        self.log_step(ScriptName::Prepare, format!("primed {admitted}"))?;
        Ok(ScriptValue::Str(admitted))
    }

    fn lock(&mut self) -> StoreResult<ScriptValue> {
        let call = self.call;
        let job_id = call.job_id;
        let token = call.token.unwrap_or_default().to_string();

        self.state.lrem(call.queued, job_id)?;
        self.state.lrem(call.primed, job_id)?;
        self.state.hset(call.holders, job_id, call.now.to_string())?;
        self.state.set(call.exists, job_id, None, false, false, self.clock);

        self.expire_all();
        self.log_step(ScriptName::Lock, format!("obtained {token}"))?;
        Ok(ScriptValue::Str(job_id.to_string()))
    }

    fn unlock(&mut self) -> StoreResult<ScriptValue> {
        let call = self.call;
        let (job_id, limit) = (call.job_id, call.limit);
        let (exists, holders, queued, primed) = (call.exists, call.holders, call.queued, call.primed);

        self.state.lrem(queued, job_id)?;
        self.state.lrem(primed, job_id)?;

        let released = self.state.hdel(holders, job_id)?;
        let returned = if released {
            self.state.rpoplpush(call.obtained, call.permits)?.is_some()
        } else if let Some(token) = call.token {
            // A popped token whose holder was never registered
            let found = self.state.lrem_first(call.obtained, token)?;
            if found {
                self.state.lpush(call.permits, token)?;
            }
            found
        } else {
            false
        };
        if returned && self.state.llen(call.permits)? + self.state.llen(call.obtained)? > limit {
            self.state.lpop(call.permits)?;
        }

        if self.state.hlen(holders)? == 0 {
            if self.state.llen(queued)? == 0 && self.state.llen(primed)? == 0 {
                self.purge();
            } else if self.state.get(exists)?.as_deref() == Some(job_id) {
                self.state.del(&[exists]);
            }
        } else if self.state.get(exists)?.as_deref() == Some(job_id) {
            if let Some(remaining) = self.state.first_field(holders)? {
                self.state.set(exists, &remaining, None, false, true, self.clock);
            }
        }

        if released {
            self.log_step(ScriptName::Unlock, "released".to_string())?;
            return Ok(ScriptValue::Str(job_id.to_string()));
        }
        if returned {
            let token = call.token.unwrap_or_default();
            self.log_step(ScriptName::Unlock, format!("returned {token}"))?;
            return Ok(ScriptValue::Nil);
        }

        self.log_step(ScriptName::Unlock, "not holding".to_string())?;
        Ok(ScriptValue::Nil)
    }

    fn locked(&mut self) -> StoreResult<ScriptValue> {
        let held = self.state.hexists(self.call.holders, self.call.job_id)?;
        Ok(ScriptValue::Int(i64::from(held)))
    }

    fn delete(&mut self) -> StoreResult<ScriptValue> {
        let removed = self.purge();
        self.log_step(ScriptName::Delete, format!("removed {removed} keys"))?;
        Ok(ScriptValue::Int(removed))
    }
}

/// Store living in the current process.
///
/// Cloning is not supported; share it behind an `Arc`. Script handles are the
/// SHA-256 of the script source, so two stores hand out the same handle for the
/// same script.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    scripts: DashMap<String, ScriptName>,
    executions: DashMap<ScriptName, usize>,
    loads: AtomicUsize,
    notify: Notify,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.evict_expired(Instant::now());
        f(&mut state)
    }

    /// Forget every loaded script, as `SCRIPT FLUSH` does.
    pub fn flush_scripts(&self) {
        self.scripts.clear();
    }

    /// Number of `load_script` calls served.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of times `name` ran.
    pub fn executions(&self, name: ScriptName) -> usize {
        self.executions.get(&name).map_or(0, |count| *count)
    }

    /// Whether `key` exists and has not expired.
    pub fn key_exists(&self, key: &str) -> bool {
        self.with_state(|state| state.entries.contains_key(key))
    }

    /// Every live key, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.with_state(|state| {
            let mut keys: Vec<String> = state.entries.keys().cloned().collect();
            keys.sort();
            keys
        })
    }

    /// String value of `key`.
    pub fn string(&self, key: &str) -> Option<String> {
        self.with_state(|state| state.get(key).ok().flatten())
    }

    /// Elements of the list at `key`, head first.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.with_state(|state| {
            state
                .list(key)
                .ok()
                .flatten()
                .map(|list| list.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Fields of the hash at `key`.
    pub fn hash(&self, key: &str) -> BTreeMap<String, String> {
        self.with_state(|state| state.hash(key).ok().flatten().cloned().unwrap_or_default())
    }

    /// Remaining time to live of `key`, `None` when it has none or does not exist.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.with_state(|state| {
            state
                .entries
                .get(key)
                .and_then(|entry| entry.expires_at)
                .map(|at| at.saturating_duration_since(now))
        })
    }

    fn run(&self, name: ScriptName, keys: &[String], args: &[String]) -> StoreResult<ScriptValue> {
        let call = Invocation::parse(keys, args)?;
        let result = self.with_state(|state| {
            let mut run = Run {
                state,
                call,
                clock: Instant::now(),
            };
            match name {
                ScriptName::Prepare => run.prepare(),
                ScriptName::Lock => run.lock(),
                ScriptName::Unlock => run.unlock(),
                ScriptName::Locked => run.locked(),
                ScriptName::Delete => run.delete(),
            }
        });
        *self.executions.entry(name).or_default() += 1;
        self.notify.notify_waiters();
        result
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_script(&self, script: &Script) -> StoreResult<String> {
        let handle = hex::encode(Sha256::digest(script.source.as_bytes()));
        self.scripts.insert(handle.clone(), script.name);
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn eval_handle(&self, handle: &str, keys: &[String], args: &[String]) -> StoreResult<ScriptValue> {
        let name = self
            .scripts
            .get(handle)
            .map(|entry| *entry.value())
            .ok_or(StoreError::NoScript)?;
        self.run(name, keys, args)
    }

    async fn pop_push(&self, source: &str, destination: &str, wait: PopWait) -> StoreResult<Option<String>> {
        let deadline = match wait {
            PopWait::Blocking(timeout) if !timeout.is_zero() => Some(Instant::now() + timeout),
            _ => None,
        };

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.with_state(|state| state.rpoplpush(source, destination))? {
                self.notify.notify_waiters();
                return Ok(Some(value));
            }

            match (wait, deadline) {
                (PopWait::NonBlocking, _) => return Ok(None),
                (_, Some(deadline)) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                (_, None) => notified.await,
            }
        }
    }
}
