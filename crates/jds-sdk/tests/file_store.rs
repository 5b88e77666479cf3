//! Stores over real JSON files: persistence, the lock file and the change
//! watcher.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use jds_sdk::{
    LockConfig, Notice, Origin, Store, StoreConfig, StoreError, StoreRegistry, WatchConfig,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .try_init();
}

fn unwatched(path: &Path) -> StoreConfig {
    StoreConfig {
        watch: WatchConfig {
            enabled: false,
            ..WatchConfig::default()
        },
        ..StoreConfig::new(path)
    }
}

fn polled(path: &Path) -> StoreConfig {
    StoreConfig {
        watch: WatchConfig {
            force_polling: true,
            poll_interval_ms: 20,
            ..WatchConfig::default()
        },
        ..StoreConfig::new(path)
    }
}

/// Replace the file the way another well-behaved process would.
fn external_write_text(path: &Path, text: &str) {
    let mut tmp = tempfile::NamedTempFile::new_in(path.parent().unwrap()).unwrap();
    tmp.write_all(text.as_bytes()).unwrap();
    tmp.persist(path).unwrap();
}

fn external_write(path: &Path, doc: &Value) {
    external_write_text(path, &serde_json::to_string(doc).unwrap());
}

fn lock_file(path: &Path) -> PathBuf {
    path.with_file_name("doc.json.lock")
}

async fn next_change(rx: &mut broadcast::Receiver<Notice>) -> jds_sdk::ChangeNotice {
    loop {
        let notice = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no notice in time")
            .unwrap();
        if let Notice::Changed(change) = notice {
            return change;
        }
    }
}

#[tokio::test]
async fn documents_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");

    let store = Store::open(unwatched(&path)).await.unwrap();
    store.write(json!({"user": {"name": "ada"}})).await.unwrap();
    store.close().await.unwrap();

    let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(on_disk, json!({"user": {"name": "ada"}}));

    let reopened = Store::open(unwatched(&path)).await.unwrap();
    assert_eq!(reopened.document(), json!({"user": {"name": "ada"}}));
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn corrupt_file_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    std::fs::write(&path, "{ broken").unwrap();
    let err = Store::open(unwatched(&path)).await.unwrap_err();
    assert!(matches!(err, StoreError::Backend(_)));
    assert!(!lock_file(&path).exists());
}

#[tokio::test]
async fn lock_file_only_exists_during_io() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    let store = Store::open(unwatched(&path)).await.unwrap();

    store.write(json!({"a": 1})).await.unwrap();
    assert!(!lock_file(&path).exists());
    assert!(!store.is_locked());

    assert!(store.lock(false).await.unwrap());
    assert!(lock_file(&path).exists());
    // The next operation's release drops a non-permanent lock.
    store.read().await.unwrap();
    assert!(!lock_file(&path).exists());
    store.close().await.unwrap();
}

#[tokio::test]
async fn permanent_lock_survives_operations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    let store = Store::open(unwatched(&path)).await.unwrap();

    assert!(store.lock(true).await.unwrap());
    store.write(json!({"a": 1})).await.unwrap();
    assert!(lock_file(&path).exists());

    store.unlock(false).await.unwrap();
    assert!(lock_file(&path).exists());

    store.unlock(true).await.unwrap();
    assert!(!lock_file(&path).exists());
    store.close().await.unwrap();
}

#[tokio::test]
async fn close_releases_a_permanent_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    let store = Store::open(unwatched(&path)).await.unwrap();
    store.lock(true).await.unwrap();
    store.close().await.unwrap();
    assert!(!lock_file(&path).exists());
}

#[tokio::test]
async fn stale_marker_is_taken_over_without_waiting() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    let config = StoreConfig {
        lock: LockConfig {
            timeout_ms: 60_000,
            ..LockConfig::default()
        },
        ..unwatched(&path)
    };
    let store = Store::open(config).await.unwrap();

    std::fs::write(
        lock_file(&path),
        r#"{"holder":"crashed","pid":1,"acquired_at":"2000-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let started = Instant::now();
    store.write(json!({"a": 1})).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!lock_file(&path).exists());
    store.close().await.unwrap();
}

#[tokio::test]
async fn held_marker_times_out_and_chain_recovers() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    let config = StoreConfig {
        lock: LockConfig {
            timeout_ms: 100,
            retry_delay_ms: 10,
            stale_after_ms: 60_000,
        },
        ..unwatched(&path)
    };
    let store = Store::open(config).await.unwrap();
    let mut notices = store.subscribe();

    // Unparseable but fresh: staleness falls back to the mtime.
    std::fs::write(lock_file(&path), "busy").unwrap();
    let err = store.write(json!({"a": 1})).await.unwrap_err();
    assert!(err.is_lock_timeout());
    assert!(matches!(notices.recv().await.unwrap(), Notice::Error(n) if n.operation == "write"));
    assert_eq!(std::fs::read_to_string(lock_file(&path)).unwrap(), "busy");
    assert!(!path.exists());

    std::fs::remove_file(lock_file(&path)).unwrap();
    store.write(json!({"a": 2})).await.unwrap();
    assert_eq!(store.document(), json!({"a": 2}));
    store.close().await.unwrap();
}

#[tokio::test]
async fn polled_external_changes_notify_once() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    external_write(&path, &json!({"a": 1}));

    let store = Store::open(polled(&path)).await.unwrap();
    let mut notices = store.subscribe();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Same value, different bytes: no notice.
    external_write_text(&path, "{\n  \"a\": 1\n}\n");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(notices.try_recv().is_err());

    external_write(&path, &json!({"a": 2, "b": true}));
    let change = next_change(&mut notices).await;
    assert_eq!(change.origin, Origin::External);
    assert_eq!(change.operation, "watch");
    assert_eq!(change.changes.get("a").unwrap().new, Some(json!(2)));
    assert!(change.changes.get("b").unwrap().is_added());
    assert_eq!(store.document(), json!({"a": 2, "b": true}));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(notices.try_recv().is_err());
    store.close().await.unwrap();
}

#[tokio::test]
async fn unparseable_external_write_reports_and_keeps_watching() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    external_write(&path, &json!({"a": 1}));

    let store = Store::open(polled(&path)).await.unwrap();
    let mut notices = store.subscribe();
    tokio::time::sleep(Duration::from_millis(100)).await;

    external_write_text(&path, "{ half written");
    let notice = tokio::time::timeout(Duration::from_secs(10), notices.recv())
        .await
        .expect("no notice in time")
        .unwrap();
    match notice {
        Notice::Error(n) => assert_eq!(n.operation, "watch"),
        other => panic!("expected an error notice, got {other:?}"),
    }
    assert_eq!(store.document(), json!({"a": 1}));

    external_write(&path, &json!({"a": 3}));
    let change = next_change(&mut notices).await;
    assert_eq!(change.origin, Origin::External);
    assert_eq!(store.document(), json!({"a": 3}));
    store.close().await.unwrap();
}

#[tokio::test]
async fn own_writes_are_not_reported_as_external() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    let store = Store::open(polled(&path)).await.unwrap();
    let mut notices = store.subscribe();

    store.write(json!({"mine": true})).await.unwrap();
    assert_eq!(next_change(&mut notices).await.origin, Origin::Internal);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(notices.try_recv().is_err());
    store.close().await.unwrap();
}

#[tokio::test]
async fn native_watcher_sees_external_changes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    let config = StoreConfig {
        watch: WatchConfig {
            debounce_ms: 20,
            poll_interval_ms: 20,
            ..WatchConfig::default()
        },
        ..StoreConfig::new(&path)
    };
    let store = Store::open(config).await.unwrap();
    let mut notices = store.subscribe();
    tokio::time::sleep(Duration::from_millis(100)).await;

    external_write(&path, &json!({"from": "elsewhere"}));
    let change = next_change(&mut notices).await;
    assert_eq!(change.origin, Origin::External);
    assert_eq!(store.document(), json!({"from": "elsewhere"}));
    store.close().await.unwrap();
}

#[tokio::test]
async fn two_stores_share_one_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    let writer = Store::open(unwatched(&path)).await.unwrap();
    let reader = Store::open(polled(&path)).await.unwrap();
    let mut notices = reader.subscribe();
    tokio::time::sleep(Duration::from_millis(100)).await;

    writer.write(json!({"shared": 1})).await.unwrap();
    let change = next_change(&mut notices).await;
    assert_eq!(change.origin, Origin::External);
    assert_eq!(reader.document(), json!({"shared": 1}));

    writer.close().await.unwrap();
    reader.close().await.unwrap();
}

#[tokio::test]
async fn registry_closes_open_stores() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new();
    let a_path = dir.path().join("a.json");
    let b_path = dir.path().join("b.json");
    let a = Store::open_in(unwatched(&a_path), &registry).await.unwrap();
    let b = Store::open_in(unwatched(&b_path), &registry).await.unwrap();
    a.lock(true).await.unwrap();
    b.lock(true).await.unwrap();
    assert_eq!(registry.len(), 2);

    b.close().await.unwrap();
    assert!(!registry.contains(b.id()));

    a.write(json!({"pending": true})).await.unwrap();
    registry.close_all().await.unwrap();
    assert!(registry.is_empty());
    assert!(a.is_closed());
    assert!(!dir.path().join("a.json.lock").exists());
    assert!(!dir.path().join("b.json.lock").exists());
}
