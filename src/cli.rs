//! Command-line interface definitions for sessionvault.
//!
//! # Example
//!
//! ```bash
//! # Restore the stored session into its root (exit code 2 if none is stored)
//! sessionvault restore --session-id main --root ~/.local/share/app/main
//!
//! # Restore, then back up every 5 minutes until Ctrl+C
//! sessionvault run --session-id main --interval 5m --flush-on-exit
//!
//! # Is anything stored?
//! sessionvault status --output json
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Back up and restore authenticated session directories.
///
/// Snapshots a session directory into a single checksummed archive, keeps
/// it in a pluggable store, and restores it safely on startup.
#[derive(Debug, Parser)]
#[command(name = "sessionvault")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (TOML)
    ///
    /// Defaults to the platform config directory.
    #[arg(long, value_name = "FILE", global = true, env = "SESSIONVAULT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Pack the session directory and save it to the store once
    Backup(SessionArgs),
    /// Restore the stored session into the session directory
    Restore(SessionArgs),
    /// Restore, back up periodically, and stop on Ctrl+C
    Run(RunArgs),
    /// Delete the stored session
    Delete(SessionArgs),
    /// Show whether a session is stored
    Status(StatusArgs),
}

/// Options shared by every subcommand. Each overrides the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct SessionArgs {
    /// Session identifier (letters, digits, '-' and '_')
    #[arg(long, value_name = "ID")]
    pub session_id: Option<String>,

    /// Session directory to back up or restore into
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Keep stored sessions as files in this directory
    #[arg(long, value_name = "DIR", conflicts_with = "store_db")]
    pub store_dir: Option<PathBuf>,

    /// Keep stored sessions in this SQLite database
    #[arg(long, value_name = "FILE")]
    pub store_db: Option<PathBuf>,

    /// Fail instead of starting fresh when restore fails
    #[arg(long)]
    pub strict: bool,

    /// Extra gitignore-style patterns to leave out of backups (repeatable)
    #[arg(short, long = "exclude", value_name = "PATTERN")]
    pub exclude: Vec<String>,
}

/// Arguments for the run subcommand.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Backup interval (e.g. 90s, 5m, 1h; plain numbers are milliseconds)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub interval: Option<u64>,

    /// Take a final backup before exiting
    #[arg(long)]
    pub flush_on_exit: bool,
}

/// Arguments for the status subcommand.
#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Output format for status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON for scripting
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Parse a human-readable duration into milliseconds.
///
/// Supports suffixes: ms, s, m, h. Case-insensitive. Numbers without a
/// suffix are milliseconds.
///
/// # Examples
///
/// ```
/// use sessionvault::cli::parse_duration;
///
/// assert_eq!(parse_duration("1500").unwrap(), 1500);
/// assert_eq!(parse_duration("90s").unwrap(), 90_000);
/// assert_eq!(parse_duration("5m").unwrap(), 300_000);
/// assert_eq!(parse_duration("1.5h").unwrap(), 5_400_000);
/// ```
///
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number, or
/// an unknown suffix.
pub fn parse_duration(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_lowercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "ms" => 1,
        "s" | "sec" => 1_000,
        "m" | "min" => 60_000,
        "h" => 3_600_000,
        _ => return Err(format!("Unknown duration suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}
