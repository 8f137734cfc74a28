use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use unique_locks::locksmith::{LockKind, LockRequest, LockTimeout, Locksmith};
use unique_locks::script::{ScriptEngine, ScriptName};
use unique_locks::test_utils::{init_test_logging, memory_engine};

const DIGEST: &str = "uniquejobs:digest";

fn locksmith(engine: &ScriptEngine, request: LockRequest) -> Locksmith {
    Locksmith::new(engine.clone(), request)
}

/// A second requester without retries is refused while the first holds the lock
#[tokio::test]
async fn test_second_requester_fails_immediately() {
    init_test_logging(None);
    let (_store, engine) = memory_engine();

    let first = locksmith(&engine, LockRequest::new(DIGEST, "A"));
    let second = locksmith(
        &engine,
        LockRequest::new(DIGEST, "B")
            .with_retry_count(0)
            .with_timeout(LockTimeout::NoWait),
    );

    assert_eq!(first.lock().await.unwrap().as_deref(), Some("A"));
    assert!(first.is_locked().await.unwrap());

    assert_eq!(second.lock().await.unwrap(), None);
    assert!(!second.is_locked().await.unwrap());
    assert!(first.is_locked().await.unwrap());
}

/// Retries against a held lock make retry_count + 1 attempts with jittered sleeps
#[tokio::test(start_paused = true)]
async fn test_retry_schedule_against_held_lock() {
    let (store, engine) = memory_engine();

    let holder = locksmith(&engine, LockRequest::new(DIGEST, "A"));
    holder.lock().await.unwrap().unwrap();
    let before = store.executions(ScriptName::Prepare);

    let contender = locksmith(
        &engine,
        LockRequest::new(DIGEST, "B")
            .with_retry_count(3)
            .with_retry_delay(Duration::from_millis(200))
            .with_retry_jitter(Duration::from_millis(50)),
    );

    let start = Instant::now();
    assert_eq!(contender.lock().await.unwrap(), None);
    let elapsed = start.elapsed();

    assert_eq!(store.executions(ScriptName::Prepare) - before, 4);
    assert!(elapsed >= Duration::from_millis(600), "slept {elapsed:?}");
    assert!(elapsed < Duration::from_millis(750), "slept {elapsed:?}");
}

/// Locking and unlocking leaves only the changelog behind
#[tokio::test]
async fn test_unlock_leaves_only_changelog() {
    let (store, engine) = memory_engine();
    let smith = locksmith(&engine, LockRequest::new(DIGEST, "A"));

    smith.lock().await.unwrap().unwrap();
    assert_eq!(smith.unlock().await.unwrap().as_deref(), Some("A"));
    assert_eq!(smith.unlock().await.unwrap(), None);

    assert_eq!(store.keys(), vec![format!("{DIGEST}:CHANGELOG")]);
}

/// `delete` only purges locks that never expire
#[tokio::test]
async fn test_delete_depends_on_ttl() {
    let (store, engine) = memory_engine();

    let expiring = locksmith(
        &engine,
        LockRequest::new(DIGEST, "A").with_ttl(Duration::from_secs(60)),
    );
    expiring.lock().await.unwrap().unwrap();
    assert_eq!(expiring.delete().await.unwrap(), None);
    assert!(expiring.is_locked().await.unwrap());
    expiring.force_delete().await.unwrap();

    let permanent = locksmith(&engine, LockRequest::new(DIGEST, "B"));
    permanent.lock().await.unwrap().unwrap();
    let removed = permanent.delete().await.unwrap();
    assert!(removed.is_some_and(|count| count > 0));
    assert!(!permanent.is_locked().await.unwrap());
    assert_eq!(store.keys(), vec![format!("{DIGEST}:CHANGELOG")]);
}

/// An expired lock is taken over without any cleanup
#[tokio::test(start_paused = true)]
async fn test_expired_lock_is_taken_over() {
    let (_store, engine) = memory_engine();

    let first = locksmith(
        &engine,
        LockRequest::new(DIGEST, "A").with_ttl(Duration::from_millis(100)),
    );
    let second = locksmith(
        &engine,
        LockRequest::new(DIGEST, "B")
            .with_ttl(Duration::from_millis(100))
            .with_retry_count(0),
    );

    first.lock().await.unwrap().unwrap();
    assert_eq!(second.lock().await.unwrap(), None);

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(!first.is_locked().await.unwrap());
    assert_eq!(second.lock().await.unwrap().as_deref(), Some("B"));
}

/// A limit of two admits two holders; the third gets a returned permit
#[tokio::test(start_paused = true)]
async fn test_run_lock_with_limit_two() {
    let (_store, engine) = memory_engine();
    let request = |job_id: &str| {
        LockRequest::new(DIGEST, job_id)
            .with_kind(LockKind::RunLock)
            .with_limit(2)
            .with_timeout(LockTimeout::Wait(Duration::from_secs(1)))
            .with_retry_count(20)
            .with_retry_delay(Duration::from_millis(50))
            .with_retry_jitter(Duration::ZERO)
    };

    let a = locksmith(&engine, request("A"));
    let b = locksmith(&engine, request("B"));
    let c = locksmith(&engine, request("C"));
    assert_eq!(a.keys().digest, format!("{DIGEST}:RUN"));

    a.lock().await.unwrap().unwrap();
    b.lock().await.unwrap().unwrap();

    let waiting = tokio::spawn(async move {
        let lease = c.lock().await.unwrap();
        (lease, c)
    });

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!waiting.is_finished());
    assert!(a.is_locked().await.unwrap());
    assert!(b.is_locked().await.unwrap());

    a.unlock().await.unwrap().unwrap();

    let (lease, c) = waiting.await.unwrap();
    assert_eq!(lease.as_deref(), Some("C"));
    assert!(c.is_locked().await.unwrap());
    assert!(b.is_locked().await.unwrap());
    assert!(!a.is_locked().await.unwrap());
}

/// Raising the limit lets more holders in without touching the existing ones
#[tokio::test]
async fn test_limit_increase_mints_permits() {
    let (store, engine) = memory_engine();
    let request = |job_id: &str, limit: u32| {
        LockRequest::new(DIGEST, job_id)
            .with_kind(LockKind::Semaphore)
            .with_limit(limit)
            .with_retry_count(0)
            .with_timeout(LockTimeout::NoWait)
    };

    locksmith(&engine, request("A", 1)).lock().await.unwrap().unwrap();
    assert_eq!(locksmith(&engine, request("B", 1)).lock().await.unwrap(), None);

    assert_eq!(locksmith(&engine, request("B", 2)).lock().await.unwrap().as_deref(), Some("B"));
    assert_eq!(store.hash(&format!("{DIGEST}:LOCKED")).len(), 2);
    assert_eq!(store.hash(&format!("{DIGEST}:VERSION")).get("limit").map(String::as_str), Some("2"));
}

/// Scoped execution hands the lock to the next requester once the body ends
#[tokio::test]
async fn test_execute_hands_over() {
    let (_store, engine) = memory_engine();
    let first = locksmith(&engine, LockRequest::new(DIGEST, "A"));
    let second = locksmith(&engine, LockRequest::new(DIGEST, "B").with_retry_count(0));

    let inner = second.clone();
    let during = first
        .execute(|lease| async move {
            assert_eq!(lease.job_id, "A");
            inner.lock().await.unwrap()
        })
        .await
        .unwrap();
    assert_eq!(during, Some(None));

    assert_eq!(second.lock().await.unwrap().as_deref(), Some("B"));
}

/// Handles cached by one engine survive a script flush on the store
#[tokio::test]
async fn test_engines_share_cache_and_recover_from_flush() {
    let (store, engine) = memory_engine();
    let other = ScriptEngine::with_cache(store.clone(), Arc::clone(engine.cache()));

    let first = locksmith(&engine, LockRequest::new(DIGEST, "A"));
    first.lock().await.unwrap().unwrap();
    let loads = store.loads();

    store.flush_scripts();
    let second = locksmith(&other, LockRequest::new(DIGEST, "A"));
    assert!(second.is_locked().await.unwrap());
    assert_eq!(store.loads(), loads + 1);
}

/// Every step is recorded in the changelog
#[tokio::test]
async fn test_changelog_records_steps() {
    let (store, engine) = memory_engine();
    let smith = locksmith(&engine, LockRequest::new(DIGEST, "A"));

    smith.lock().await.unwrap().unwrap();
    smith.unlock().await.unwrap().unwrap();

    let entries: Vec<serde_json::Value> = store
        .list(&format!("{DIGEST}:CHANGELOG"))
        .iter()
        .map(|entry| serde_json::from_str(entry).unwrap())
        .collect();
    let scripts: Vec<&str> = entries.iter().map(|entry| entry["script"].as_str().unwrap()).collect();
    assert_eq!(scripts, vec!["prepare", "lock", "unlock"]);
    assert!(entries.iter().all(|entry| entry["job_id"] == "A"));
}
