//! Application configuration management.
//!
//! Settings are layered with `figment`, later layers winning:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. TOML file (`--config`, or `config.toml` in the platform config dir)
//! 3. `SESSIONVAULT_*` environment variables (`__` separates nested keys,
//!    e.g. `SESSIONVAULT_STORE__KIND=sqlite`)
//! 4. CLI flags ([`Config::apply_overrides`])
//!
//! ```toml
//! session_id = "main"
//! session_root = "/var/lib/app/profiles/main"
//! backup_sync_interval_ms = 300000
//! strict_restore = false
//! exclude = ["Default/Media Cache"]
//!
//! [store]
//! kind = "sqlite"
//! path = "/var/lib/app/sessions.sqlite"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::PackOptions;
use crate::cli::SessionArgs;
use crate::session::{InvalidSessionId, SessionId, SessionOptions};
use crate::store::{DirectoryStore, MemoryStore, RemoteStore, SqliteStore, StoreError};

/// Shortest allowed periodic backup interval.
pub const MIN_BACKUP_INTERVAL_MS: u64 = 60_000;

/// Prefix of environment variables read by [`Config::load_from_path`].
pub const ENV_PREFIX: &str = "SESSIONVAULT_";

/// Error type for loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be parsed.
    #[error("failed to load configuration: {0}")]
    Load(#[source] Box<figment::Error>),

    #[error(transparent)]
    InvalidSessionId(#[from] InvalidSessionId),

    #[error("backup_sync_interval_ms must be at least {min} (got {value})")]
    IntervalTooShort { value: u64, min: u64 },

    #[error("store_timeout_ms must be greater than zero")]
    ZeroTimeout,

    /// No explicit path was given and the platform has no default location.
    #[error("cannot determine a default {0}; set it explicitly")]
    NoDefaultPath(&'static str),

    /// The configured store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write configuration to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// One file per session in a directory.
    #[default]
    Directory,
    /// A single SQLite database.
    Sqlite,
    /// In-process only; nothing survives the process.
    Memory,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Directory => write!(f, "directory"),
            StoreKind::Sqlite => write!(f, "sqlite"),
            StoreKind::Memory => write!(f, "memory"),
        }
    }
}

/// `[store]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Directory or database file. Defaults to the platform data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Short description for status output, e.g. `sqlite:/var/lib/s.sqlite`.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.path {
            Some(path) => format!("{}:{}", self.kind, path.display()),
            None => self.kind.to_string(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session identifier, also the store key.
    pub session_id: String,
    /// Session directory. Defaults to `<data dir>/profiles/<session_id>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_root: Option<PathBuf>,
    /// Time between periodic backups.
    pub backup_sync_interval_ms: u64,
    /// Abort startup when restore fails instead of starting fresh.
    pub strict_restore: bool,
    /// Deadline for a single store call.
    pub store_timeout_ms: u64,
    /// Gitignore-style patterns left out of backups, on top of the defaults.
    pub exclude: Vec<String>,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_id: "default".to_string(),
            session_root: None,
            backup_sync_interval_ms: MIN_BACKUP_INTERVAL_MS,
            strict_restore: false,
            store_timeout_ms: 30_000,
            exclude: Vec::new(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path` (or the default location) and the environment.
    ///
    /// A missing file is not an error; defaults are used.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file or environment is malformed.
    pub fn load_from_path(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        match path.map(Path::to_path_buf).or_else(Self::config_path) {
            Some(file) => {
                log::debug!("Reading configuration from {}", file.display());
                figment = figment.merge(Toml::file(file));
            }
            None => log::debug!("No configuration file location available"),
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Write the configuration as TOML to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] or [`ConfigError::Write`].
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, content).map_err(write_err)
    }

    /// Platform-specific default config file path.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Apply CLI flags on top of the loaded configuration.
    pub fn apply_overrides(&mut self, args: &SessionArgs) {
        if let Some(id) = &args.session_id {
            self.session_id.clone_from(id);
        }
        if let Some(root) = &args.root {
            self.session_root = Some(root.clone());
        }
        if let Some(dir) = &args.store_dir {
            self.store = StoreConfig {
                kind: StoreKind::Directory,
                path: Some(dir.clone()),
            };
        }
        if let Some(db) = &args.store_db {
            self.store = StoreConfig {
                kind: StoreKind::Sqlite,
                path: Some(db.clone()),
            };
        }
        if args.strict {
            self.strict_restore = true;
        }
        self.exclude.extend(args.exclude.iter().cloned());
    }

    /// Check every field without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        SessionId::new(self.session_id.as_str())?;
        if self.backup_sync_interval_ms < MIN_BACKUP_INTERVAL_MS {
            return Err(ConfigError::IntervalTooShort {
                value: self.backup_sync_interval_ms,
                min: MIN_BACKUP_INTERVAL_MS,
            });
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Validated options for a [`SessionHost`](crate::session::SessionHost).
    ///
    /// # Errors
    ///
    /// Any [`Self::validate`] error, or [`ConfigError::NoDefaultPath`] if no
    /// session root is configured and the platform has no data dir.
    pub fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        self.validate()?;
        let session_id = SessionId::new(self.session_id.as_str())?;
        let session_root = match &self.session_root {
            Some(root) => root.clone(),
            None => default_data_dir("session root")?
                .join("profiles")
                .join(session_id.as_str()),
        };

        Ok(SessionOptions::new(session_id, session_root)
            .with_backup_interval(Duration::from_millis(self.backup_sync_interval_ms))
            .with_strict_restore(self.strict_restore)
            .with_store_timeout(Duration::from_millis(self.store_timeout_ms))
            .with_pack_options(PackOptions::default().and_excludes(&self.exclude)))
    }

    /// Open the configured store backend.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Store`] if the backend cannot be opened, or
    /// [`ConfigError::NoDefaultPath`] if no path is configured and the
    /// platform has no data dir.
    pub fn open_store(&self) -> Result<Arc<dyn RemoteStore>, ConfigError> {
        let store: Arc<dyn RemoteStore> = match self.store.kind {
            StoreKind::Directory => {
                let dir = match &self.store.path {
                    Some(dir) => dir.clone(),
                    None => default_data_dir("store directory")?.join("store"),
                };
                Arc::new(DirectoryStore::new(dir))
            }
            StoreKind::Sqlite => {
                let db = match &self.store.path {
                    Some(db) => db.clone(),
                    None => default_data_dir("store database")?.join("sessions.sqlite"),
                };
                Arc::new(SqliteStore::open(&db)?)
            }
            StoreKind::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "sessionvault", "sessionvault")
}

fn default_data_dir(what: &'static str) -> Result<PathBuf, ConfigError> {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoDefaultPath(what))
}
