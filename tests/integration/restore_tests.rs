use super::support::{
    dir_names, raw_blob, root_in, seed_profile, tree_listing, BrokenFetchStore, StallingStore,
};
use sessionvault::archive::{ArchiveError, PackOptions, RejectReason, SessionCodec};
use sessionvault::session::{BackupController, RestoreController, RestoreError, RestoreOutcome, SessionId};
use sessionvault::store::{BoundedStore, MemoryStore, RemoteStore, StoreError};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tar::EntryType;
use tempfile::tempdir;

fn id() -> SessionId {
    SessionId::new("main").unwrap()
}

fn restorer(store: Arc<dyn RemoteStore>) -> RestoreController {
    RestoreController::new(
        SessionCodec::default(),
        BoundedStore::new(store, Duration::from_secs(5)),
    )
}

/// Root with known content that must survive a failed restore.
fn existing_root(dir: &std::path::Path) -> std::path::PathBuf {
    let root = root_in(dir);
    fs::create_dir(&root).unwrap();
    fs::write(root.join("Cookies"), b"previous").unwrap();
    root
}

fn assert_untouched(dir: &std::path::Path, root: &std::path::Path) {
    assert_eq!(fs::read(root.join("Cookies")).unwrap(), b"previous");
    assert_eq!(tree_listing(root), vec!["Cookies"]);
    // No staging or holding directories left next to the root.
    assert_eq!(dir_names(dir), vec!["session"]);
}

#[test]
fn test_backup_then_restore_reproduces_tree() {
    let source = tempdir().unwrap();
    seed_profile(source.path());
    let store = Arc::new(MemoryStore::new());

    let backup = BackupController::new(
        id(),
        source.path(),
        SessionCodec::new(PackOptions::include_all()),
        BoundedStore::new(store.clone(), Duration::from_secs(5)),
    );
    assert!(backup.trigger_now().is_saved());

    let target = tempdir().unwrap();
    let root = root_in(target.path());
    let outcome = restorer(store).restore(&id(), &root).unwrap();

    let RestoreOutcome::Restored(summary) = outcome else {
        panic!("expected restore, got {outcome:?}");
    };
    assert_eq!(summary.files, 5);
    assert_eq!(tree_listing(&root), tree_listing(source.path()));
    assert_eq!(fs::read(root.join("Default/Preferences")).unwrap(), b"");
    assert_eq!(
        fs::read(root.join("Default/Local Storage/leveldb/000003.log")).unwrap(),
        vec![7u8; 300]
    );
}

#[test]
fn test_restore_replaces_previous_root_entirely() {
    let dir = tempdir().unwrap();
    let root = existing_root(dir.path());
    fs::write(root.join("stale"), b"left over").unwrap();

    let store = Arc::new(MemoryStore::new());
    store
        .save(
            "main",
            &raw_blob(&[(b"Cookies", EntryType::Regular, b"fresh")]),
        )
        .unwrap();

    restorer(store).restore(&id(), &root).unwrap();
    assert_eq!(fs::read(root.join("Cookies")).unwrap(), b"fresh");
    assert!(!root.join("stale").exists());
    assert_eq!(dir_names(dir.path()), vec!["session"]);
}

#[test]
fn test_traversal_entry_aborts_whole_restore() {
    let dir = tempdir().unwrap();
    let root = existing_root(dir.path());
    let store = Arc::new(MemoryStore::new());
    store
        .save(
            "main",
            &raw_blob(&[
                (b"good.txt", EntryType::Regular, b"fine"),
                (b"../evil.txt", EntryType::Regular, b"pwned"),
            ]),
        )
        .unwrap();

    let err = restorer(store).restore(&id(), &root).unwrap_err();
    assert!(matches!(
        err,
        RestoreError::ExtractionFailed(ArchiveError::UnsafeEntry {
            reason: RejectReason::Traversal,
            ..
        })
    ));
    assert!(!dir.path().join("evil.txt").exists());
    assert!(!root.join("good.txt").exists());
    assert_untouched(dir.path(), &root);
}

#[test]
fn test_absolute_entry_is_rejected() {
    let dir = tempdir().unwrap();
    let root = existing_root(dir.path());
    let store = Arc::new(MemoryStore::new());
    store
        .save(
            "main",
            &raw_blob(&[(b"/tmp/sessionvault-absolute", EntryType::Regular, b"x")]),
        )
        .unwrap();

    let err = restorer(store).restore(&id(), &root).unwrap_err();
    assert!(matches!(
        err,
        RestoreError::ExtractionFailed(ArchiveError::UnsafeEntry {
            reason: RejectReason::Absolute,
            ..
        })
    ));
    assert_untouched(dir.path(), &root);
}

#[test]
fn test_disguised_traversal_is_rejected() {
    let dir = tempdir().unwrap();
    let root = existing_root(dir.path());
    let store = Arc::new(MemoryStore::new());
    store
        .save(
            "main",
            &raw_blob(&[(b"Default/./../../x", EntryType::Regular, b"x")]),
        )
        .unwrap();

    assert!(matches!(
        restorer(store).restore(&id(), &root),
        Err(RestoreError::ExtractionFailed(_))
    ));
    assert_untouched(dir.path(), &root);
}

#[test]
fn test_symlink_entry_is_rejected() {
    let dir = tempdir().unwrap();
    let root = existing_root(dir.path());
    let store = Arc::new(MemoryStore::new());
    store
        .save("main", &raw_blob(&[(b"link", EntryType::Symlink, b"")]))
        .unwrap();

    let err = restorer(store).restore(&id(), &root).unwrap_err();
    assert!(matches!(
        err,
        RestoreError::ExtractionFailed(ArchiveError::UnsafeEntry {
            reason: RejectReason::Link,
            ..
        })
    ));
    assert_untouched(dir.path(), &root);
}

#[test]
fn test_missing_session_touches_nothing() {
    let dir = tempdir().unwrap();
    let root = root_in(dir.path());

    let outcome = restorer(Arc::new(MemoryStore::new()))
        .restore(&id(), &root)
        .unwrap();
    assert_eq!(outcome, RestoreOutcome::NotFound);
    assert!(dir_names(dir.path()).is_empty());
}

#[test]
fn test_checksum_mismatch_is_corrupt() {
    let dir = tempdir().unwrap();
    let root = existing_root(dir.path());
    let mut blob = raw_blob(&[(b"Cookies", EntryType::Regular, b"fresh")]);
    let last = blob.len() - 1;
    blob[last] ^= 0xff;

    let store = Arc::new(MemoryStore::new());
    store.save("main", &blob).unwrap();

    assert!(matches!(
        restorer(store).restore(&id(), &root),
        Err(RestoreError::CorruptArchive(ArchiveError::Corrupt(_)))
    ));
    assert_untouched(dir.path(), &root);
}

#[test]
fn test_fetch_failure_is_store_unavailable() {
    let dir = tempdir().unwrap();
    let root = existing_root(dir.path());

    let err = restorer(Arc::new(BrokenFetchStore))
        .restore(&id(), &root)
        .unwrap_err();
    assert!(matches!(
        err,
        RestoreError::StoreUnavailable(StoreError::Unavailable(_))
    ));
    assert_untouched(dir.path(), &root);
}

#[test]
fn test_stalled_store_times_out() {
    let dir = tempdir().unwrap();
    let root = root_in(dir.path());
    let controller = RestoreController::new(
        SessionCodec::default(),
        BoundedStore::new(
            Arc::new(StallingStore {
                delay: Duration::from_secs(2),
            }),
            Duration::from_millis(100),
        ),
    );

    let err = controller.restore(&id(), &root).unwrap_err();
    assert!(matches!(
        err,
        RestoreError::StoreUnavailable(StoreError::Timeout {
            operation: "exists",
            ..
        })
    ));
    assert!(!root.exists());
}

#[cfg(target_os = "linux")]
#[test]
fn test_unicode_names_restore_byte_for_byte() {
    let source = tempdir().unwrap();
    let decomposed = "cafe\u{0301}.txt";
    let composed = "caf\u{e9}.txt";
    fs::write(source.path().join(decomposed), b"nfd").unwrap();
    fs::write(source.path().join(composed), b"nfc").unwrap();

    let store = Arc::new(MemoryStore::new());
    let backup = BackupController::new(
        id(),
        source.path(),
        SessionCodec::new(PackOptions::include_all()),
        BoundedStore::new(store.clone(), Duration::from_secs(5)),
    );
    assert!(backup.trigger_now().is_saved());

    let target = tempdir().unwrap();
    let root = root_in(target.path());
    let outcome = restorer(store).restore(&id(), &root).unwrap();
    assert!(matches!(outcome, RestoreOutcome::Restored(s) if s.files == 2));

    let mut names: Vec<Vec<u8>> = fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_encoded_bytes())
        .collect();
    names.sort();
    let mut expected = vec![decomposed.as_bytes().to_vec(), composed.as_bytes().to_vec()];
    expected.sort();
    assert_eq!(names, expected);
    assert_eq!(fs::read(root.join(decomposed)).unwrap(), b"nfd");
    assert_eq!(fs::read(root.join(composed)).unwrap(), b"nfc");
}

#[test]
fn test_entries_aliasing_one_path_abort_restore() {
    let dir = tempdir().unwrap();
    let root = existing_root(dir.path());
    let store = Arc::new(MemoryStore::new());
    store
        .save(
            "main",
            &raw_blob(&[
                (&b"Cookies"[..], EntryType::Regular, &b"first"[..]),
                (&b"./Cookies"[..], EntryType::Regular, &b"second"[..]),
            ]),
        )
        .unwrap();

    let err = restorer(store).restore(&id(), &root).unwrap_err();
    assert!(matches!(
        err,
        RestoreError::ExtractionFailed(ArchiveError::DuplicateEntry(ref path)) if path == "./Cookies"
    ));
    assert_untouched(dir.path(), &root);
}
