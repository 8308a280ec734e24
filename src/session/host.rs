//! Session lifecycle: restore on startup, back up while authenticated,
//! clean up on logout.
//!
//! [`SessionHost`] is what an embedding application talks to. It owns one
//! [`RestoreController`] and one [`BackupController`] for a single session
//! and sequences them so that restore always finishes before the backup
//! timer can start.
//!
//! ```text
//! prepare() ──► authenticated() ──► [timer ticks, flush()] ──► shutdown() | logout()
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::backup::{BackupController, BackupError, BackupObserver, BackupOutcome};
use super::restore::{RestoreController, RestoreError, RestoreOutcome};
use super::schedule::BackupSchedule;
use super::SessionId;
use crate::archive::{PackOptions, SessionCodec, UnpackSummary};
use crate::store::{BoundedStore, RemoteStore, StoreError, DEFAULT_STORE_TIMEOUT};

/// Default time between periodic backups.
pub const DEFAULT_BACKUP_INTERVAL: Duration = Duration::from_secs(60);

/// Error type for lifecycle operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// Restore failed and strict restore is enabled.
    #[error(transparent)]
    Restore(#[from] RestoreError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    /// Deleting the stored session failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The local session root could not be created or removed.
    #[error("session root I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How [`SessionHost::prepare`] left the session root.
#[derive(Debug)]
pub enum StartupState {
    /// The stored session was restored.
    Restored(UnpackSummary),
    /// Nothing was stored; the root is a fresh session.
    Fresh,
    /// Restore failed and was downgraded to a fresh session. The root is
    /// whatever was there before, or a new empty directory.
    Recovered(RestoreError),
}

/// Settings for one [`SessionHost`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub session_id: SessionId,
    pub session_root: PathBuf,
    pub backup_interval: Duration,
    /// Fail [`SessionHost::prepare`] instead of falling back to a fresh session.
    pub strict_restore: bool,
    /// Deadline for each store call.
    pub store_timeout: Duration,
    pub pack: PackOptions,
}

impl SessionOptions {
    /// Options with default interval, timeout and exclusions.
    #[must_use]
    pub fn new(session_id: SessionId, session_root: impl Into<PathBuf>) -> Self {
        Self {
            session_id,
            session_root: session_root.into(),
            backup_interval: DEFAULT_BACKUP_INTERVAL,
            strict_restore: false,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            pack: PackOptions::default(),
        }
    }

    #[must_use]
    pub fn with_backup_interval(mut self, interval: Duration) -> Self {
        self.backup_interval = interval;
        self
    }

    #[must_use]
    pub fn with_strict_restore(mut self, strict: bool) -> Self {
        self.strict_restore = strict;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_pack_options(mut self, pack: PackOptions) -> Self {
        self.pack = pack;
        self
    }
}

/// Backup and restore for one session, driven by lifecycle events.
#[derive(Debug)]
pub struct SessionHost {
    options: SessionOptions,
    store: BoundedStore,
    restore: RestoreController,
    backup: BackupController,
}

impl SessionHost {
    /// Wire controllers for `options` against `store`.
    #[must_use]
    pub fn new(options: SessionOptions, store: Arc<dyn RemoteStore>) -> Self {
        let store = BoundedStore::new(store, options.store_timeout);
        let codec = SessionCodec::new(options.pack.clone());
        let restore = RestoreController::new(codec.clone(), store.clone());
        let backup = BackupController::new(
            options.session_id.clone(),
            options.session_root.clone(),
            codec,
            store.clone(),
        );
        Self {
            options,
            store,
            restore,
            backup,
        }
    }

    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.options.session_id
    }

    #[must_use]
    pub fn session_root(&self) -> &Path {
        &self.options.session_root
    }

    /// The deadline-bounded store shared by both controllers.
    #[must_use]
    pub fn store(&self) -> &BoundedStore {
        &self.store
    }

    /// The backup controller, for schedule inspection.
    #[must_use]
    pub fn backup(&self) -> &BackupController {
        &self.backup
    }

    /// Install an observer for backup events.
    pub fn set_observer(&self, observer: Arc<dyn BackupObserver>) {
        self.backup.set_observer(observer);
    }

    /// Run restore alone, without creating a fresh root on `NotFound` or
    /// applying the strict-restore policy.
    ///
    /// # Errors
    ///
    /// See [`RestoreController::restore`].
    pub fn restore(&self) -> Result<RestoreOutcome, RestoreError> {
        self.restore
            .restore(&self.options.session_id, &self.options.session_root)
    }

    /// Restore the stored session before anything else uses the root.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Restore`] when restore fails and
    /// `strict_restore` is set, or [`HostError::Io`] if a fresh root cannot
    /// be created.
    pub fn prepare(&self) -> Result<StartupState, HostError> {
        match self.restore() {
            Ok(RestoreOutcome::Restored(summary)) => Ok(StartupState::Restored(summary)),
            Ok(RestoreOutcome::NotFound) => {
                self.ensure_root()?;
                Ok(StartupState::Fresh)
            }
            Err(e) if self.options.strict_restore => {
                log::error!(
                    "Restore of session '{}' failed: {}",
                    self.options.session_id,
                    e
                );
                Err(e.into())
            }
            Err(e) => {
                log::warn!(
                    "Restore of session '{}' failed, continuing with a fresh session: {}",
                    self.options.session_id,
                    e
                );
                self.ensure_root()?;
                Ok(StartupState::Recovered(e))
            }
        }
    }

    /// Back up right away and start the periodic schedule.
    ///
    /// Calling this again while the schedule runs only performs the
    /// immediate backup.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Backup`] if the schedule cannot be started. A
    /// failed immediate backup is returned as [`BackupOutcome::Failed`].
    pub fn authenticated(&mut self) -> Result<BackupOutcome, HostError> {
        let outcome = self.backup.trigger_now();
        if !self.backup.is_running() {
            self.backup
                .start(BackupSchedule::new(self.options.backup_interval)?)?;
        }
        Ok(outcome)
    }

    /// Back up now, waiting for any in-flight cycle first.
    pub fn flush(&self) -> BackupOutcome {
        self.backup.flush()
    }

    /// Stop the periodic schedule. No final backup is taken.
    pub fn shutdown(&mut self) {
        self.backup.stop();
    }

    /// End the session: stop backups, delete the stored blob and remove the
    /// local session root.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Store`] if the blob cannot be deleted (the local
    /// root is then kept), or [`HostError::Io`] if the root cannot be removed.
    pub fn logout(&mut self) -> Result<(), HostError> {
        self.backup.stop();
        self.store.delete(self.options.session_id.as_str())?;

        let root = &self.options.session_root;
        match fs::remove_dir_all(root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(HostError::Io {
                    path: root.clone(),
                    source,
                })
            }
        }
        log::info!("Logged out session '{}'", self.options.session_id);
        Ok(())
    }

    fn ensure_root(&self) -> Result<(), HostError> {
        let root = &self.options.session_root;
        fs::create_dir_all(root).map_err(|source| HostError::Io {
            path: root.clone(),
            source,
        })
    }
}
