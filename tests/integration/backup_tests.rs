use super::support::{seed_profile, FlakyStore, GatedStore, StallingStore};
use sessionvault::archive::{PackOptions, SessionCodec};
use sessionvault::session::{
    BackupController, BackupError, BackupOutcome, BackupPhase, BackupSchedule, SessionId,
};
use sessionvault::store::{BoundedStore, MemoryStore, RemoteStore, StoreError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn controller(root: &std::path::Path, store: Arc<dyn RemoteStore>, timeout: Duration) -> BackupController {
    BackupController::new(
        SessionId::new("main").unwrap(),
        root,
        SessionCodec::default(),
        BoundedStore::new(store, timeout),
    )
}

#[test]
fn test_overlapping_triggers_produce_one_save() {
    let dir = tempdir().unwrap();
    seed_profile(dir.path());
    let store = Arc::new(GatedStore::default());
    let controller = Arc::new(controller(
        dir.path(),
        store.clone(),
        Duration::from_secs(10),
    ));

    let first = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || controller.trigger_now())
    };
    store.wait_for_calls(1);
    assert_eq!(controller.phase(), BackupPhase::Saving);

    assert!(matches!(controller.trigger_now(), BackupOutcome::Skipped));
    assert!(matches!(controller.trigger_now(), BackupOutcome::Skipped));

    store.release();
    assert!(first.join().unwrap().is_saved());
    assert_eq!(store.save_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.completed_saves.load(Ordering::SeqCst), 1);
    assert_eq!(controller.phase(), BackupPhase::Idle);
}

#[test]
fn test_flush_waits_for_in_flight_cycle() {
    let dir = tempdir().unwrap();
    seed_profile(dir.path());
    let store = Arc::new(GatedStore::default());
    let controller = Arc::new(controller(
        dir.path(),
        store.clone(),
        Duration::from_secs(10),
    ));

    let first = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || controller.trigger_now())
    };
    store.wait_for_calls(1);

    let releaser = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            store.release();
        })
    };

    // Unlike trigger_now, flush is not dropped; it runs after the first cycle.
    assert!(controller.flush().is_saved());
    assert!(first.join().unwrap().is_saved());
    releaser.join().unwrap();
    assert_eq!(store.completed_saves.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failed_ticks_do_not_stop_the_timer() {
    let dir = tempdir().unwrap();
    seed_profile(dir.path());
    let store = Arc::new(FlakyStore::new(2));
    let mut controller = controller(dir.path(), store.clone(), Duration::from_secs(5));

    controller
        .start(BackupSchedule::new(Duration::from_millis(30)).unwrap())
        .unwrap();
    for _ in 0..100 {
        if store.session_exists("main").unwrap() {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    controller.stop();

    assert!(store.attempts.load(Ordering::SeqCst) >= 3);
    assert!(store.session_exists("main").unwrap());
    assert!(controller.schedule().unwrap().last_run_at.is_some());
}

#[test]
fn test_store_timeout_fails_the_cycle() {
    let dir = tempdir().unwrap();
    seed_profile(dir.path());
    let store = Arc::new(StallingStore {
        delay: Duration::from_secs(2),
    });
    let controller = controller(dir.path(), store, Duration::from_millis(100));

    let started = std::time::Instant::now();
    let outcome = controller.trigger_now();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(matches!(
        outcome,
        BackupOutcome::Failed(BackupError::Store(StoreError::Timeout {
            operation: "save",
            ..
        }))
    ));
    assert_eq!(controller.phase(), BackupPhase::Idle);
}

#[test]
fn test_backup_prunes_cache_directories() {
    let dir = tempdir().unwrap();
    seed_profile(dir.path());
    let store = Arc::new(MemoryStore::new());
    let controller = controller(dir.path(), store.clone(), Duration::from_secs(5));

    assert!(controller.trigger_now().is_saved());

    let archive = SessionCodec::default()
        .decode(&store.fetch("main").unwrap())
        .unwrap();
    assert!(archive.get("Default/Cookies").is_some());
    assert!(archive.get("Default/Preferences").is_some());
    assert!(archive.get("Default/IndexedDB").unwrap().is_dir);
    assert!(archive.get("Default/Cache").is_none());
    assert!(archive.get("Default/Cache/Cache_Data/data_0").is_none());
}

#[test]
fn test_backup_with_custom_excludes() {
    let dir = tempdir().unwrap();
    seed_profile(dir.path());
    let store = Arc::new(MemoryStore::new());
    let controller = BackupController::new(
        SessionId::new("main").unwrap(),
        dir.path(),
        SessionCodec::new(PackOptions::include_all().with_excludes(["Default/Local Storage"])),
        BoundedStore::new(store.clone(), Duration::from_secs(5)),
    );

    assert!(controller.trigger_now().is_saved());
    let archive = SessionCodec::default()
        .decode(&store.fetch("main").unwrap())
        .unwrap();
    assert!(archive.get("Default/Cache/Cache_Data/data_0").is_some());
    assert!(archive.get("Default/Local Storage/leveldb/000003.log").is_none());
}

#[test]
fn test_stop_without_start_is_noop() {
    let dir = tempdir().unwrap();
    let mut controller = controller(
        dir.path(),
        Arc::new(MemoryStore::new()),
        Duration::from_secs(5),
    );
    controller.stop();
    assert!(!controller.is_running());
    assert!(controller.schedule().is_none());
}

#[cfg(unix)]
#[test]
fn test_unrestorable_names_do_not_block_backup() {
    let dir = tempdir().unwrap();
    seed_profile(dir.path());
    std::fs::write(dir.path().join("%2e%2e"), b"odd").unwrap();
    std::fs::write(dir.path().join("c:notes"), b"odd").unwrap();
    std::fs::write(dir.path().join("line\nbreak"), b"odd").unwrap();
    let store = Arc::new(MemoryStore::new());
    let controller = controller(dir.path(), store.clone(), Duration::from_secs(5));

    assert!(controller.trigger_now().is_saved());
    assert!(controller.trigger_now().is_saved());

    let archive = SessionCodec::default()
        .decode(&store.fetch("main").unwrap())
        .unwrap();
    assert!(archive.get("Default/Cookies").is_some());
    assert!(archive.get("%2e%2e").is_none());
    assert!(archive.get("c:notes").is_none());
    assert!(archive.get("line\nbreak").is_none());
}
