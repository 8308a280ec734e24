use sessionvault::store::{
    BoundedStore, DirectoryStore, MemoryStore, RemoteStore, SqliteStore, StoreError,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Behaviour every backend must share.
fn exercise_contract(store: &dyn RemoteStore) {
    assert!(!store.session_exists("alpha").unwrap());
    assert!(store.fetch("alpha").unwrap_err().is_not_found());

    store.save("alpha", b"v1").unwrap();
    store.save("beta", &[]).unwrap();
    assert!(store.session_exists("alpha").unwrap());
    assert_eq!(store.fetch("alpha").unwrap(), b"v1");
    assert_eq!(store.fetch("beta").unwrap(), Vec::<u8>::new());

    // Last save wins; retries are harmless.
    store.save("alpha", b"v2").unwrap();
    store.save("alpha", b"v2").unwrap();
    assert_eq!(store.fetch("alpha").unwrap(), b"v2");

    store.delete("alpha").unwrap();
    store.delete("alpha").unwrap();
    assert!(!store.session_exists("alpha").unwrap());
    assert!(store.session_exists("beta").unwrap());
}

#[test]
fn test_memory_store_contract() {
    exercise_contract(&MemoryStore::new());
}

#[test]
fn test_directory_store_contract() {
    let dir = tempdir().unwrap();
    exercise_contract(&DirectoryStore::new(dir.path().join("blobs")));
}

#[test]
fn test_sqlite_store_contract() {
    let dir = tempdir().unwrap();
    exercise_contract(&SqliteStore::open(&dir.path().join("sessions.sqlite")).unwrap());
}

#[test]
fn test_bounded_store_contract() {
    let bounded = BoundedStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(5));
    exercise_contract(&bounded);
}

#[test]
fn test_file_backends_reject_path_keys() {
    let dir = tempdir().unwrap();
    let directory = DirectoryStore::new(dir.path());
    let sqlite = SqliteStore::in_memory().unwrap();

    for key in ["../up", "a/b", "", "dot.ted"] {
        assert!(matches!(
            directory.save(key, b"x"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(sqlite.save(key, b"x"), Err(StoreError::InvalidKey(_))));
    }
}
