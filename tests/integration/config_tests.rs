use super::support::{clear_env, ENV_MUTEX};
use sessionvault::config::{Config, ConfigError, StoreKind, MIN_BACKUP_INTERVAL_MS};
use sessionvault::store::RemoteStore;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_missing_file_uses_defaults() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempdir().unwrap();

    let config = Config::load_from_path(Some(dir.path().join("nope.toml").as_path())).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_load_from_toml() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
session_id = "work"
session_root = "/srv/profiles/work"
backup_sync_interval_ms = 300000
strict_restore = true
exclude = ["Crashpad", "*.log"]

[store]
kind = "sqlite"
path = "/srv/sessions.sqlite"
"#,
    )
    .unwrap();

    let config = Config::load_from_path(Some(path.as_path())).unwrap();
    assert_eq!(config.session_id, "work");
    assert_eq!(config.session_root, Some(PathBuf::from("/srv/profiles/work")));
    assert_eq!(config.backup_sync_interval_ms, 300_000);
    assert!(config.strict_restore);
    assert_eq!(config.exclude, vec!["Crashpad", "*.log"]);
    assert_eq!(config.store.kind, StoreKind::Sqlite);
    assert_eq!(config.store.describe(), "sqlite:/srv/sessions.sqlite");

    let options = config.session_options().unwrap();
    assert_eq!(options.backup_interval, Duration::from_secs(300));
    assert!(options.strict_restore);
    assert!(options.pack.exclude.iter().any(|p| p == "Crashpad"));
    assert!(options.pack.exclude.iter().any(|p| p == "Default/Cache"));
}

#[test]
fn test_env_overrides_file() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "session_id = \"from-file\"\nbackup_sync_interval_ms = 90000\n").unwrap();

    std::env::set_var("SESSIONVAULT_SESSION_ID", "from_env");
    std::env::set_var("SESSIONVAULT_STORE__KIND", "memory");
    let config = Config::load_from_path(Some(path.as_path()));
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.session_id, "from_env");
    assert_eq!(config.backup_sync_interval_ms, 90_000);
    assert_eq!(config.store.kind, StoreKind::Memory);
}

#[test]
fn test_invalid_toml_is_an_error() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "invalid = toml").unwrap();

    assert!(matches!(
        Config::load_from_path(Some(path.as_path())),
        Err(ConfigError::Load(_))
    ));
}

#[test]
fn test_short_interval_rejected_after_load() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "backup_sync_interval_ms = 1000\n").unwrap();

    let config = Config::load_from_path(Some(path.as_path())).unwrap();
    assert!(matches!(
        config.session_options(),
        Err(ConfigError::IntervalTooShort {
            value: 1000,
            min: MIN_BACKUP_INTERVAL_MS
        })
    ));
}

#[test]
fn test_save_and_reload() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested/config.toml");

    let mut config = Config::default();
    config.session_id = "saved".to_string();
    config.store.path = Some(dir.path().join("store"));
    config.exclude.push("Crashpad".to_string());
    config.save_to_path(&path).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("session_id = \"saved\""));
    assert!(content.contains("kind = \"directory\""));

    assert_eq!(Config::load_from_path(Some(path.as_path())).unwrap(), config);
}

#[test]
fn test_open_configured_stores() {
    let dir = tempdir().unwrap();
    let mut config = Config::default();

    config.store.path = Some(dir.path().join("blobs"));
    let store = config.open_store().unwrap();
    store.save("main", b"x").unwrap();
    assert!(dir.path().join("blobs/main.session").is_file());

    config.store.kind = StoreKind::Sqlite;
    config.store.path = Some(dir.path().join("db/sessions.sqlite"));
    let store = config.open_store().unwrap();
    assert!(!store.session_exists("main").unwrap());
    assert!(dir.path().join("db/sessions.sqlite").is_file());
}
