use super::support::{clear_env, seed_profile, tree_listing, ENV_MUTEX};
use clap::Parser;
use sessionvault::cli::Cli;
use sessionvault::error::ExitCode;
use sessionvault::run_app;
use sessionvault::signal::install_handler;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

/// Run the CLI against `workspace/store` with an empty config file.
fn run(workspace: &Path, args: &[&str]) -> anyhow::Result<ExitCode> {
    let config = workspace.join("config.toml");
    let store = workspace.join("store");
    let mut argv = vec![
        "sessionvault".to_string(),
        "-q".to_string(),
        "--config".to_string(),
        config.display().to_string(),
    ];
    argv.extend(args.iter().map(|a| (*a).to_string()));
    argv.push("--store-dir".to_string());
    argv.push(store.display().to_string());
    run_app(Cli::try_parse_from(argv).unwrap())
}

#[test]
fn test_backup_then_restore_elsewhere() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let workspace = tempdir().unwrap();
    let source = workspace.path().join("source");
    let target = workspace.path().join("target");
    seed_profile(&source);

    let code = run(
        workspace.path(),
        &["backup", "--session-id", "cli", "--root", source.to_str().unwrap()],
    )
    .unwrap();
    assert_eq!(code, ExitCode::Success);
    assert!(workspace.path().join("store/cli.session").is_file());

    let code = run(
        workspace.path(),
        &["restore", "--session-id", "cli", "--root", target.to_str().unwrap()],
    )
    .unwrap();
    assert_eq!(code, ExitCode::Success);
    assert_eq!(fs::read(target.join("Default/Cookies")).unwrap(), b"cookie-jar");
    // Default excludes drop the cache directory.
    assert!(!target.join("Default/Cache").exists());
    assert!(tree_listing(&target).len() < tree_listing(&source).len());
}

#[test]
fn test_restore_without_stored_session_exits_not_found() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let workspace = tempdir().unwrap();
    let root = workspace.path().join("root");

    let code = run(
        workspace.path(),
        &["restore", "--session-id", "ghost", "--root", root.to_str().unwrap()],
    )
    .unwrap();
    assert_eq!(code, ExitCode::NotFound);
    assert!(!root.exists());
}

#[test]
fn test_status_and_delete() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let workspace = tempdir().unwrap();
    let root = workspace.path().join("root");
    seed_profile(&root);
    let root_arg = root.to_str().unwrap();

    run(workspace.path(), &["backup", "--session-id", "s1", "--root", root_arg]).unwrap();
    let code = run(
        workspace.path(),
        &["status", "--session-id", "s1", "--root", root_arg, "--output", "json"],
    )
    .unwrap();
    assert_eq!(code, ExitCode::Success);

    let code = run(workspace.path(), &["delete", "--session-id", "s1", "--root", root_arg]).unwrap();
    assert_eq!(code, ExitCode::Success);
    assert!(!workspace.path().join("store/s1.session").exists());
    // Local files are not touched by delete.
    assert!(root.join("Default/Cookies").is_file());
}

#[test]
fn test_backup_of_missing_root_fails() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let workspace = tempdir().unwrap();
    let missing = workspace.path().join("missing");

    let err = run(
        workspace.path(),
        &["backup", "--session-id", "s1", "--root", missing.to_str().unwrap()],
    )
    .unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    assert!(format!("{err:#}").contains("not a directory"));
}

#[test]
fn test_invalid_session_id_is_rejected() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let workspace = tempdir().unwrap();

    let err = run(workspace.path(), &["status", "--session-id", "../etc"]).unwrap_err();
    assert!(format!("{err:#}").contains("invalid session id"));
}

#[test]
fn test_run_restores_backs_up_and_stops_on_shutdown() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let workspace = tempdir().unwrap();
    let root = workspace.path().join("root");

    let handler = install_handler().unwrap();
    let stopper = {
        let handler = handler.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(500));
            handler.request_shutdown();
        })
    };

    let code = run(
        workspace.path(),
        &[
            "run",
            "--session-id",
            "live",
            "--root",
            root.to_str().unwrap(),
            "--flush-on-exit",
        ],
    )
    .unwrap();
    stopper.join().unwrap();

    assert_eq!(code, ExitCode::Success);
    assert!(root.is_dir());
    assert!(workspace.path().join("store/live.session").is_file());
}
