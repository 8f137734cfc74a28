use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use unique_locks::config::LockOptions;
use unique_locks::lock::{LifecycleLock, LockStrategy};
use unique_locks::locksmith::{LockKind, LockRequest, LockTimeout, Locksmith};
use unique_locks::test_utils::{init_test_logging, memory_engine, strategy_lock};

/// Tracks how many bodies run at once
#[derive(Default)]
struct Occupancy {
    current: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl Occupancy {
    async fn occupy(&self, hold: Duration) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(hold).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

async fn race(limit: u32, requesters: usize) -> Arc<Occupancy> {
    let (_store, engine) = memory_engine();
    let occupancy = Arc::new(Occupancy::default());

    let tasks = (0..requesters).map(|i| {
        let request = LockRequest::new("uniquejobs:stress", format!("job-{i}"))
            .with_kind(LockKind::RunLock)
            .with_limit(limit)
            .with_timeout(LockTimeout::Wait(Duration::from_millis(200)))
            .with_retry_count(400)
            .with_retry_delay(Duration::from_millis(5))
            .with_retry_jitter(Duration::from_millis(5));
        let locksmith = Locksmith::new(engine.clone(), request);
        let occupancy = Arc::clone(&occupancy);
        tokio::spawn(async move {
            locksmith
                .execute(|_lease| async move { occupancy.occupy(Duration::from_millis(2)).await })
                .await
                .unwrap()
        })
    });

    for result in join_all(tasks).await {
        result.unwrap();
    }
    occupancy
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_mutex_never_has_two_holders() {
    init_test_logging(None);
    let start = Instant::now();
    let occupancy = race(1, 32).await;

    println!(
        "mutex: {} of 32 ran, peak {}, {:?}",
        occupancy.completed.load(Ordering::SeqCst),
        occupancy.peak.load(Ordering::SeqCst),
        start.elapsed()
    );
    assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
    assert!(occupancy.completed.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_semaphore_respects_limit() {
    init_test_logging(None);
    let start = Instant::now();
    let occupancy = race(3, 64).await;

    println!(
        "semaphore(3): {} of 64 ran, peak {}, {:?}",
        occupancy.completed.load(Ordering::SeqCst),
        occupancy.peak.load(Ordering::SeqCst),
        start.elapsed()
    );
    assert!(occupancy.peak.load(Ordering::SeqCst) <= 3);
    assert!(occupancy.completed.load(Ordering::SeqCst) >= 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_duplicates_are_dropped_at_enqueue() {
    let (_store, engine) = memory_engine();
    let options = LockOptions {
        lock_timeout: Some(-1.0),
        lock_retry_count: 0,
        ..LockOptions::default()
    };

    let tasks = (0..50).map(|i| {
        let lock = strategy_lock(
            LockStrategy::UntilExecuted,
            &engine,
            "uniquejobs:enqueue",
            &format!("job-{i}"),
            options.clone(),
        );
        tokio::spawn(async move { lock.lock().await.unwrap().is_proceed() })
    });

    let admitted = join_all(tasks)
        .await
        .into_iter()
        .filter(|result| matches!(result, Ok(true)))
        .count();
    assert_eq!(admitted, 1);
}
