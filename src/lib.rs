//! sessionvault - secure session backup and restore
//!
//! Periodically snapshots a local authentication-session directory into a
//! single checksummed archive, keeps it in a pluggable store, and restores
//! it on startup while refusing hostile archives (path traversal, absolute
//! paths, links that escape the session root).
//!
//! # Architecture
//!
//! * [`archive`]: Path admission ([`archive::PathGuard`]), directory
//!   snapshots, the archive container and staged all-or-nothing extraction.
//! * [`store`]: The [`store::RemoteStore`] capability trait, directory,
//!   SQLite and in-memory backends, and deadline-bounded calls.
//! * [`session`]: Restore and backup controllers and the
//!   [`session::SessionHost`] lifecycle that sequences them.
//! * [`config`], [`cli`], [`logging`], [`signal`], [`error`], [`output`]:
//!   the command-line application around the library.

pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod session;
pub mod signal;
pub mod store;

use std::io;

use anyhow::{bail, Context, Result};

use crate::archive::SessionCodec;
use crate::cli::{Cli, Commands, OutputFormat, RunArgs, SessionArgs, StatusArgs};
use crate::config::Config;
use crate::error::ExitCode;
use crate::output::StatusReport;
use crate::session::{BackupOutcome, RestoreOutcome, SessionHost, StartupState};
use crate::store::RemoteStore;

/// Run the application for parsed CLI arguments.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the store cannot be
/// reached, or the requested operation fails.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let config =
        Config::load_from_path(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Backup(args) => run_backup(config, &args),
        Commands::Restore(args) => run_restore(config, &args),
        Commands::Run(args) => run_session(config, &args),
        Commands::Delete(args) => run_delete(config, &args),
        Commands::Status(args) => run_status(config, &args),
    }
}

fn open_host(config: &Config) -> Result<SessionHost> {
    let options = config
        .session_options()
        .context("invalid configuration")?;
    let store = config
        .open_store()
        .context("failed to open session store")?;
    log::debug!(
        "Session '{}' at {} using store {}",
        options.session_id,
        options.session_root.display(),
        config.store.describe()
    );
    Ok(SessionHost::new(options, store))
}

fn run_backup(mut config: Config, args: &SessionArgs) -> Result<ExitCode> {
    config.apply_overrides(args);
    let host = open_host(&config)?;

    match host.flush() {
        BackupOutcome::Saved { bytes } => {
            println!(
                "Saved session '{}' ({})",
                host.session_id(),
                bytesize::ByteSize::b(bytes)
            );
            Ok(ExitCode::Success)
        }
        BackupOutcome::Failed(e) => Err(anyhow::Error::new(e))
            .with_context(|| format!("backup of session '{}' failed", host.session_id())),
        BackupOutcome::Skipped => bail!("backup of session '{}' was skipped", host.session_id()),
    }
}

fn run_restore(mut config: Config, args: &SessionArgs) -> Result<ExitCode> {
    config.apply_overrides(args);
    let host = open_host(&config)?;

    let outcome = host
        .restore()
        .with_context(|| format!("restore of session '{}' failed", host.session_id()))?;
    match outcome {
        RestoreOutcome::Restored(summary) => {
            println!(
                "Restored session '{}' into {} ({} files, {})",
                host.session_id(),
                host.session_root().display(),
                summary.files,
                bytesize::ByteSize::b(summary.bytes)
            );
            Ok(ExitCode::Success)
        }
        RestoreOutcome::NotFound => {
            println!("No stored session '{}'", host.session_id());
            Ok(ExitCode::NotFound)
        }
    }
}

fn run_session(mut config: Config, args: &RunArgs) -> Result<ExitCode> {
    config.apply_overrides(&args.session);
    if let Some(interval) = args.interval {
        config.backup_sync_interval_ms = interval;
    }
    let mut host = open_host(&config)?;
    let shutdown = signal::install_handler()?;

    match host.prepare().context("failed to prepare session")? {
        StartupState::Restored(summary) => log::info!(
            "Session '{}' restored ({} files)",
            host.session_id(),
            summary.files
        ),
        StartupState::Fresh => log::info!("Session '{}' starts fresh", host.session_id()),
        StartupState::Recovered(_) => {}
    }
    shutdown.check()?;

    host.authenticated()
        .context("failed to start backup schedule")?;
    log::info!(
        "Backing up session '{}' every {:?}; press Ctrl+C to stop",
        host.session_id(),
        host.options().backup_interval
    );

    shutdown.wait_for_shutdown();

    if args.flush_on_exit {
        if let BackupOutcome::Failed(e) = host.flush() {
            host.shutdown();
            return Err(anyhow::Error::new(e)).context("final backup failed");
        }
    }
    host.shutdown();
    Ok(ExitCode::Success)
}

fn run_delete(mut config: Config, args: &SessionArgs) -> Result<ExitCode> {
    config.apply_overrides(args);
    let host = open_host(&config)?;

    host.store()
        .delete(host.session_id().as_str())
        .with_context(|| format!("failed to delete session '{}'", host.session_id()))?;
    println!("Deleted stored session '{}'", host.session_id());
    Ok(ExitCode::Success)
}

fn run_status(mut config: Config, args: &StatusArgs) -> Result<ExitCode> {
    config.apply_overrides(&args.session);
    let host = open_host(&config)?;
    let key = host.session_id().as_str();

    let stored = host
        .store()
        .session_exists(key)
        .with_context(|| format!("failed to query session '{}'", host.session_id()))?;

    let mut report = StatusReport {
        session_id: key.to_string(),
        session_root: host.session_root().display().to_string(),
        store: config.store.describe(),
        stored,
        size: None,
        entries: None,
        error: None,
        local_root_exists: host.session_root().is_dir(),
    };

    if stored {
        match host.store().fetch(key) {
            Ok(blob) => {
                report.size = Some(blob.len() as u64);
                match SessionCodec::new(host.options().pack.clone()).decode(&blob) {
                    Ok(archive) => report.entries = Some(archive.len()),
                    Err(e) => report.error = Some(e.to_string()),
                }
            }
            Err(e) => report.error = Some(e.to_string()),
        }
    }

    match args.output {
        OutputFormat::Json => println!("{}", report.to_json_pretty()?),
        OutputFormat::Text => report.write_text(&mut io::stdout().lock())?,
    }
    Ok(ExitCode::Success)
}
