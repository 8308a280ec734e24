//! Session backup and restore.
//!
//! # Architecture
//!
//! * [`id`]: Validated session identifiers used as store keys.
//! * [`restore`]: One-shot startup restore ([`RestoreController`]).
//! * [`backup`]: Timer-driven and manual backups ([`BackupController`]).
//! * [`schedule`]: Backup interval and run state.
//! * [`host`]: Lifecycle glue ([`SessionHost`]): restore before the session
//!   starts, back up while it is authenticated, clean up on logout.
//!
//! Restore and backup never run against the same root at the same time:
//! the host only starts the backup timer after `prepare` has returned.

pub mod backup;
pub mod host;
pub mod id;
pub mod restore;
pub mod schedule;

pub use backup::{BackupController, BackupError, BackupObserver, BackupOutcome, BackupPhase};
pub use host::{HostError, SessionHost, SessionOptions, StartupState, DEFAULT_BACKUP_INTERVAL};
pub use id::{InvalidSessionId, SessionId};
pub use restore::{RestoreController, RestoreError, RestoreOutcome};
pub use schedule::BackupSchedule;
