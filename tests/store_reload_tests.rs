//! Integration tests for the hot-reloading store.
//!
//! Tests verify:
//! - File changes are picked up by the watcher and swapped in
//! - A failed reload keeps serving the previous snapshot
//! - Explicit and scheduled reloads
//! - Close is idempotent and leaves an empty view
//! - Waiting for a mount point, with cancellation

mod common;

use common::Fixture;
use gatestore::{Error, GateList, Store, StoreConfig};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

const DEADLINE: Duration = Duration::from_secs(10);

fn config() -> StoreConfig {
    StoreConfig {
        debounce_ms: 50,
        ..StoreConfig::default()
    }
}

fn names(list: &GateList) -> Vec<&str> {
    list.iter().map(|g| &**g).collect()
}

fn scenario() -> Fixture {
    let db = Fixture::new();
    db.collection("standard", "1", "workspaces", &["id-1"]);
    db.collection("standard", "2", "workspaces", &["id-2", "id-3"]);
    db.record("standard", "1", "family-A", "gate-1", "workspaces", "1234", 1.0);
    db.record("standard", "1", "family-A", "gate-2", "workspaces", "5678", 1.0);
    db
}

/// Polls `condition` until it holds or the deadline passes.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    condition()
}

// ============================================================================
// OPEN AND CLOSE
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_serves_initial_snapshot() {
    let db = scenario();
    let store = Store::open(db.path(), config()).await.unwrap();

    assert!(store.gate_open("family-A", "gate-1", "workspaces", "id-1"));
    assert!(!store.gate_open("family-A", "gate-1", "workspaces", "id-2"));
    let gates = store.lookup_gates("family-A", "workspaces", "id-1");
    assert_eq!(names(&gates), vec!["gate-1", "gate-2"]);

    let stats = store.stats();
    assert_eq!(stats.snapshot.tiers, 2);
    assert_eq!(stats.reloads.reloads, 0);
    assert_eq!(stats.lookups.capacity, 4096);

    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_malformed_database_fails() {
    let db = scenario();
    db.record("standard", "1", "family-A", "gate-3", "workspaces", "1", 2.0);

    let err = Store::open(db.path(), config()).await.unwrap_err();
    assert!(matches!(err, Error::Malformed { .. }), "got {}", err);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_is_idempotent() {
    let db = scenario();
    let store = Store::open(db.path(), config()).await.unwrap();

    store.close().await.unwrap();
    store.close().await.unwrap();

    assert!(store.is_closed());
    assert!(!store.gate_open("family-A", "gate-1", "workspaces", "id-1"));
    assert!(store.lookup_gates("family-A", "workspaces", "id-1").is_empty());
    assert!(matches!(store.reload().await, Err(Error::Cancelled)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_during_reload_stays_closed() {
    let db = Fixture::new();
    for tier in 0..200 {
        let tier = format!("{:03}", tier);
        db.collection("standard", &tier, "workspaces", &["id-1"]);
        db.record("standard", &tier, "family-A", "gate-1", "workspaces", "1", 1.0);
    }
    let config = StoreConfig {
        debounce_ms: 60_000,
        ..StoreConfig::default()
    };

    for delay_ms in [0, 2, 5, 20] {
        let store = Store::open(db.path(), config.clone()).await.unwrap();
        assert!(store.gate_open("family-A", "gate-1", "workspaces", "id-1"));

        let (reloaded, closed) = tokio::join!(store.reload(), async {
            sleep(Duration::from_millis(delay_ms)).await;
            store.close().await
        });
        closed.unwrap();
        match reloaded {
            Ok(_) | Err(Error::Cancelled) => {}
            Err(e) => panic!("reload failed: {}", e),
        }

        assert!(store.is_closed());
        assert!(!store.gate_open("family-A", "gate-1", "workspaces", "id-1"));
        assert!(store.lookup_gates("family-A", "workspaces", "id-1").is_empty());
        assert!(store.tiers().is_empty());
        assert_eq!(store.stats().snapshot.mapped_bytes, 0);
        assert!(matches!(store.reload().await, Err(Error::Cancelled)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_closed_store_ignores_changes() {
    let db = scenario();
    let store = Store::open(db.path(), config()).await.unwrap();
    store.close().await.unwrap();

    db.record("standard", "1", "family-A", "gate-3", "workspaces", "1", 1.0);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(store.generation(), 0);
}

// ============================================================================
// RELOADS
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_change_is_picked_up() {
    let db = scenario();
    let store = Store::open(db.path(), config()).await.unwrap();

    db.record("standard", "1", "family-A", "gate-3", "workspaces", "42", 1.0);
    db.collection("standard", "1", "workspaces", &["id-1", "id-4"]);

    assert!(
        eventually(|| {
            store.gate_open("family-A", "gate-3", "workspaces", "id-1")
                && store.gate_open("family-A", "gate-3", "workspaces", "id-4")
        })
        .await,
        "change was not reloaded"
    );
    let gates = store.lookup_gates("family-A", "workspaces", "id-4");
    assert_eq!(names(&gates), vec!["gate-1", "gate-2", "gate-3"]);

    let stats = store.stats();
    assert!(stats.reloads.reloads >= 1);
    assert!(stats.reloads.generation >= 1);
    assert!(stats.reloads.last_reload_at > 0);

    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_reload_keeps_previous_snapshot() {
    let db = scenario();
    let store = Store::open(db.path(), config()).await.unwrap();

    let bad = db.raw_record("standard", "1", "family-A", "gate-3", "workspaces", "volume\tlots\n");
    assert!(
        eventually(|| store.stats().reloads.failures >= 1).await,
        "bad record did not trigger a reload"
    );

    assert!(store.stats().reloads.last_error.is_some());
    let gates = store.lookup_gates("family-A", "workspaces", "id-1");
    assert_eq!(names(&gates), vec!["gate-1", "gate-2"]);

    // Removing the record recovers on the next change.
    let generation = store.generation();
    std::fs::remove_file(bad).unwrap();
    assert!(eventually(|| store.stats().reloads.last_error.is_none()).await);
    assert!(store.generation() > generation);

    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_explicit_reload() {
    let db = scenario();
    let config = StoreConfig {
        // Long enough that the watcher cannot beat the explicit reload.
        debounce_ms: 60_000,
        ..StoreConfig::default()
    };
    let store = Store::open(db.path(), config).await.unwrap();

    db.record("standard", "2", "family-A", "gate-9", "workspaces", "7", 1.0);
    let stats = store.reload().await.unwrap();
    assert_eq!(stats.gate_records, 3);

    assert_eq!(store.generation(), 1);
    assert!(store.gate_open("family-A", "gate-9", "workspaces", "id-3"));

    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_explicit_reload_failure_is_returned() {
    let db = scenario();
    let config = StoreConfig {
        debounce_ms: 60_000,
        ..StoreConfig::default()
    };
    let store = Store::open(db.path(), config).await.unwrap();

    db.raw_record("standard", "2", "family-A", "gate-9", "workspaces", "volume\t1\n");
    let err = store.reload().await.unwrap_err();
    assert!(matches!(err, Error::Malformed { .. }), "got {}", err);
    assert!(store.gate_open("family-A", "gate-1", "workspaces", "id-1"));

    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduled_resync() {
    let db = scenario();
    let config = StoreConfig {
        debounce_ms: 60_000,
        resync_interval_secs: 1,
        ..StoreConfig::default()
    };
    let store = Store::open(db.path(), config).await.unwrap();

    assert!(eventually(|| store.generation() >= 2).await);
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lookup_cache_cleared_on_reload() {
    let db = scenario();
    let store = Store::open(db.path(), config()).await.unwrap();

    assert!(store.lookup_gates("family-A", "workspaces", "id-2").is_empty());
    assert_eq!(store.stats().lookups.entries, 1);

    db.record("standard", "2", "family-A", "gate-5", "workspaces", "5", 1.0);
    assert!(
        eventually(|| {
            let gates = store.lookup_gates("family-A", "workspaces", "id-2");
            names(&gates) == ["gate-5"]
        })
        .await
    );

    store.close().await.unwrap();
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_symlink_flip_is_followed() {
    let blue = scenario();
    let green = Fixture::new();
    green.collection("standard", "1", "workspaces", &["id-1"]);
    green.record("standard", "1", "family-A", "green", "workspaces", "1", 1.0);

    let links = tempfile::tempdir().unwrap();
    let current = links.path().join("current");
    std::os::unix::fs::symlink(blue.path(), &current).unwrap();

    let store = Store::open(&current, config()).await.unwrap();
    let gates = store.lookup_gates("family-A", "workspaces", "id-1");
    assert_eq!(names(&gates), vec!["gate-1", "gate-2"]);

    let next = links.path().join(".current-next");
    std::os::unix::fs::symlink(green.path(), &next).unwrap();
    std::fs::rename(&next, &current).unwrap();

    assert!(
        eventually(|| {
            let gates = store.lookup_gates("family-A", "workspaces", "id-1");
            names(&gates) == ["green"]
        })
        .await,
        "symlink flip was not followed"
    );

    store.close().await.unwrap();
}

// ============================================================================
// WAIT
// ============================================================================

#[tokio::test]
async fn test_wait_returns_when_mount_appears() {
    let root = tempfile::tempdir().unwrap();
    let mount = root.path().join("features");

    let creator = {
        let mount = mount.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            std::fs::create_dir(&mount).unwrap();
        })
    };

    let cancel = CancellationToken::new();
    timeout(DEADLINE, gatestore::wait(&mount, &cancel))
        .await
        .unwrap()
        .unwrap();
    creator.await.unwrap();
}

#[tokio::test]
async fn test_wait_existing_mount_returns_immediately() {
    let root = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    gatestore::wait(root.path(), &cancel).await.unwrap();
}

#[tokio::test]
async fn test_wait_cancelled() {
    let root = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        })
    };

    let err = timeout(DEADLINE, gatestore::wait(root.path().join("never"), &cancel))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    canceller.await.unwrap();
}
