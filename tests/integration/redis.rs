//! Scenarios against a live Redis server, skipped unless
//! `UNIQUE_LOCKS_REDIS_URL` is set.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use unique_locks::constants::REDIS_URL_ENV;
use unique_locks::key::KeySet;
use unique_locks::locksmith::{LockKind, LockRequest, LockTimeout, Locksmith};
use unique_locks::script::{ScriptCache, ScriptEngine};
use unique_locks::store::{MemoryStore, RedisStore};

async fn engine() -> Option<ScriptEngine> {
    let url = std::env::var(REDIS_URL_ENV).ok().filter(|url| !url.is_empty())?;
    let store = RedisStore::connect(&url).await.unwrap();
    Some(ScriptEngine::with_cache(Arc::new(store), Arc::new(ScriptCache::new())))
}

fn digest(name: &str) -> String {
    format!("uniquejobs:it:{name}:{}", std::process::id())
}

#[tokio::test]
async fn test_redis_lock_unlock_cycle() {
    let Some(engine) = engine().await else {
        return;
    };
    let digest = digest("cycle");
    let first = Locksmith::new(engine.clone(), LockRequest::new(&digest, "A"));
    let second = Locksmith::new(
        engine.clone(),
        LockRequest::new(&digest, "B").with_retry_count(0),
    );

    assert_eq!(first.lock().await.unwrap().as_deref(), Some("A"));
    assert_eq!(second.lock().await.unwrap(), None);
    assert_eq!(first.unlock().await.unwrap().as_deref(), Some("A"));
    assert_eq!(second.lock().await.unwrap().as_deref(), Some("B"));

    second.force_delete().await.unwrap();
}

#[tokio::test]
async fn test_redis_blocking_pop_receives_returned_permit() {
    let Some(engine) = engine().await else {
        return;
    };
    let digest = digest("blocking");
    let request = |job_id: &str| {
        LockRequest::new(&digest, job_id)
            .with_kind(LockKind::RunLock)
            .with_limit(2)
            .with_timeout(LockTimeout::Wait(Duration::from_secs(2)))
            .with_retry_count(20)
            .with_retry_delay(Duration::from_millis(50))
    };

    let a = Locksmith::new(engine.clone(), request("A"));
    let b = Locksmith::new(engine.clone(), request("B"));
    let c = Locksmith::new(engine.clone(), request("C"));

    a.lock().await.unwrap().unwrap();
    b.lock().await.unwrap().unwrap();

    let waiting = tokio::spawn(async move { c.lock().await.unwrap() });
    tokio::time::sleep(Duration::from_millis(100)).await;
    a.unlock().await.unwrap();

    assert_eq!(waiting.await.unwrap().as_deref(), Some("C"));
    b.force_delete().await.unwrap();
}

#[tokio::test]
async fn test_redis_ttl_expiry() {
    let Some(engine) = engine().await else {
        return;
    };
    let digest = digest("ttl");
    let request = |job_id: &str| {
        LockRequest::new(&digest, job_id)
            .with_ttl(Duration::from_millis(100))
            .with_retry_count(0)
    };
    let first = Locksmith::new(engine.clone(), request("A"));
    let second = Locksmith::new(engine.clone(), request("B"));

    first.lock().await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(second.lock().await.unwrap().as_deref(), Some("B"));

    second.force_delete().await.unwrap();
}

/// Lock state with timestamps left out.
#[derive(Debug, PartialEq)]
struct Snapshot {
    exists: Option<String>,
    holders: Vec<String>,
    queued: Vec<String>,
    primed: Vec<String>,
    permits: Vec<String>,
    obtained: Vec<String>,
    version: BTreeMap<String, String>,
    changelog: Vec<(String, String)>,
}

fn changelog_steps(entries: Vec<String>) -> Vec<(String, String)> {
    entries
        .iter()
        .map(|entry| {
            let value: serde_json::Value = serde_json::from_str(entry).unwrap();
            (value["script"].as_str().unwrap().to_string(), value["message"].as_str().unwrap().to_string())
        })
        .collect()
}

fn memory_snapshot(store: &MemoryStore, keys: &KeySet) -> Snapshot {
    Snapshot {
        exists: store.string(&keys.exists),
        holders: store.hash(&keys.holders).into_keys().collect(),
        queued: store.list(&keys.queued),
        primed: store.list(&keys.primed),
        permits: store.list(&keys.permits),
        obtained: store.list(&keys.obtained),
        version: store.hash(&keys.version),
        changelog: changelog_steps(store.list(&keys.changelog)),
    }
}

async fn redis_snapshot(conn: &mut redis::aio::MultiplexedConnection, keys: &KeySet) -> Snapshot {
    async fn list(conn: &mut redis::aio::MultiplexedConnection, key: &str) -> Vec<String> {
        redis::cmd("LRANGE").arg(key).arg(0).arg(-1).query_async(conn).await.unwrap()
    }
    async fn hash(conn: &mut redis::aio::MultiplexedConnection, key: &str) -> BTreeMap<String, String> {
        redis::cmd("HGETALL").arg(key).query_async(conn).await.unwrap()
    }

    Snapshot {
        exists: redis::cmd("GET").arg(&keys.exists).query_async(conn).await.unwrap(),
        holders: hash(conn, &keys.holders).await.into_keys().collect(),
        queued: list(conn, &keys.queued).await,
        primed: list(conn, &keys.primed).await,
        permits: list(conn, &keys.permits).await,
        obtained: list(conn, &keys.obtained).await,
        version: hash(conn, &keys.version).await,
        changelog: changelog_steps(list(conn, &keys.changelog).await),
    }
}

/// The Lua scripts and the in-memory emulation leave identical state
#[tokio::test]
async fn test_redis_and_memory_stores_agree() {
    let Some(url) = std::env::var(REDIS_URL_ENV).ok().filter(|url| !url.is_empty()) else {
        return;
    };
    let redis_engine = engine().await.unwrap();
    let memory = Arc::new(MemoryStore::new());
    let memory_engine = ScriptEngine::with_cache(memory.clone(), Arc::new(ScriptCache::new()));
    let mut conn = redis::Client::open(url.as_str())
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap();

    let digest = digest("parity");
    let keys = KeySet::new(digest.as_str());
    let request = |job_id: &str, limit: u32| {
        LockRequest::new(&digest, job_id)
            .with_kind(LockKind::Semaphore)
            .with_limit(limit)
            .with_timeout(LockTimeout::NoWait)
            .with_retry_count(0)
    };
    let steps: Vec<(&str, u32, &str)> = vec![
        ("A", 2, "lock"),
        ("B", 2, "lock"),
        ("C", 2, "lock"),
        ("A", 2, "unlock"),
        ("C", 3, "lock"),
        ("B", 3, "unlock"),
        ("C", 1, "unlock"),
        ("D", 1, "lock"),
        ("D", 1, "delete"),
    ];

    for (job_id, limit, action) in steps {
        for engine in [&redis_engine, &memory_engine] {
            let smith = Locksmith::new(engine.clone(), request(job_id, limit));
            match action {
                "lock" => {
                    smith.lock().await.unwrap();
                }
                "unlock" => {
                    smith.unlock().await.unwrap();
                }
                _ => {
                    smith.force_delete().await.unwrap();
                }
            }
        }

        assert_eq!(
            redis_snapshot(&mut conn, &keys).await,
            memory_snapshot(&memory, &keys),
            "after {job_id} {action} (limit {limit})"
        );
    }

    let _: () = redis::cmd("DEL").arg(&keys.changelog).query_async(&mut conn).await.unwrap();
}
