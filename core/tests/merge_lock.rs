use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use conductor_core::error::LockError;
use conductor_core::lock::{LivenessProbe, LockHolder, LockOptions, MergeLock, ProcessLiveness};

fn options() -> LockOptions {
    LockOptions {
        poll_interval: Duration::from_millis(1),
        max_poll_interval: Duration::from_millis(8),
        stale_after: Duration::from_secs(30),
        allow_reclaim: true,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquirers_hold_the_lock_one_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let lock = MergeLock::new(dir.path().join("merge.lock"), options());
    let holders = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for i in 0..12 {
        let lock = lock.clone();
        let holders = holders.clone();
        let peak = peak.clone();
        let completed = completed.clone();
        tasks.push(tokio::spawn(async move {
            let purpose = format!("worker-{i}");
            let guard = lock
                .acquire_guard(Duration::from_secs(10), Some(purpose.as_str()))
                .await
                .unwrap();
            let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(3)).await;
            holders.fetch_sub(1, Ordering::SeqCst);
            guard.release().unwrap();
            completed.fetch_add(1, Ordering::SeqCst);
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(completed.load(Ordering::SeqCst), 12);
    assert!(lock.inspect().unwrap().is_none());
}

#[tokio::test]
async fn contention_past_timeout_is_busy() {
    let dir = tempfile::tempdir().unwrap();
    let lock = MergeLock::new(dir.path().join("merge.lock"), options());
    let held = lock.try_acquire(Some("long merge")).unwrap();

    let err = lock
        .acquire(Duration::from_millis(25), None)
        .await
        .unwrap_err();
    match err {
        LockError::Busy { holder } => assert!(holder.contains("long merge")),
        other => panic!("expected Busy, got {other:?}"),
    }

    lock.release(&held).unwrap();
    assert!(lock.acquire(Duration::ZERO, None).await.is_ok());
}

#[derive(Debug)]
struct DeadHolders;

impl LivenessProbe for DeadHolders {
    fn is_alive(&self, _holder: &LockHolder) -> bool {
        false
    }
}

#[tokio::test]
async fn dead_and_old_holder_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("merge.lock");

    let mut crashed = LockHolder::for_current_process(Some("crashed merge".into()));
    crashed.acquired_at = Utc::now() - chrono::Duration::minutes(30);
    std::fs::write(&path, serde_json::to_vec(&crashed).unwrap()).unwrap();

    let lock = MergeLock::new(&path, options()).with_probe(Arc::new(DeadHolders));
    let handle = lock.acquire(Duration::from_secs(1), None).await.unwrap();

    let current = lock.inspect().unwrap().unwrap();
    assert_eq!(current.holder_id, handle.holder_id());
    assert_ne!(current.holder_id, crashed.holder_id);
}

#[tokio::test]
async fn live_holder_is_never_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("merge.lock");

    // Our own pid, so the default probe sees a live process.
    let mut old_but_alive = LockHolder::for_current_process(None);
    old_but_alive.acquired_at = Utc::now() - chrono::Duration::hours(2);
    assert!(ProcessLiveness::new().is_alive(&old_but_alive));
    std::fs::write(&path, serde_json::to_vec(&old_but_alive).unwrap()).unwrap();

    let lock = MergeLock::new(&path, options());
    let err = lock
        .acquire(Duration::from_millis(20), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::Busy { .. }));
    assert_eq!(
        lock.inspect().unwrap().unwrap().holder_id,
        old_but_alive.holder_id
    );
}

#[test]
fn release_by_non_holder_leaves_lock_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let lock = MergeLock::new(dir.path().join("merge.lock"), options());

    let stale_handle = lock.try_acquire(None).unwrap();
    lock.release(&stale_handle).unwrap();
    let owner = lock.try_acquire(None).unwrap();

    assert!(matches!(
        lock.release(&stale_handle),
        Err(LockError::NotHolder { .. })
    ));
    assert_eq!(
        lock.inspect().unwrap().unwrap().holder_id,
        owner.holder_id()
    );
    lock.release(&owner).unwrap();
}
