//! Periodic and on-demand session backups.
//!
//! # Overview
//!
//! A [`BackupController`] owns the backup timer for one session. Each cycle
//! packs the session directory into an archive blob and saves it to the
//! store:
//!
//! ```text
//! Idle -> Packing -> Saving -> Idle
//! ```
//!
//! Only one cycle runs at a time. A trigger that arrives while a cycle is in
//! flight is dropped (reported as [`BackupOutcome::Skipped`]) rather than
//! queued; the next tick picks up whatever the directory looks like by then.
//! Every completed cycle, manual or timed, restarts the interval, so a
//! manual trigger shortly before a tick absorbs that tick instead of running
//! twice back to back.
//!
//! Failures never stop the timer. They are logged, passed to the optional
//! [`BackupObserver`], and retried implicitly by the next tick.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sessionvault::archive::SessionCodec;
//! use sessionvault::session::{BackupController, BackupSchedule, SessionId};
//! use sessionvault::store::{BoundedStore, DirectoryStore};
//!
//! let store = BoundedStore::new(Arc::new(DirectoryStore::new("/srv/sessions")), Duration::from_secs(30));
//! let mut controller = BackupController::new(
//!     SessionId::new("main").unwrap(),
//!     "/var/lib/app/session-main",
//!     SessionCodec::default(),
//!     store,
//! );
//! controller.trigger_now();
//! controller.start(BackupSchedule::from_millis(60_000).unwrap()).unwrap();
//! // ...
//! controller.stop();
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::schedule::BackupSchedule;
use super::SessionId;
use crate::archive::{ArchiveError, SessionCodec};
use crate::store::{BoundedStore, RemoteStore, StoreError};

/// Error type for backup cycles and timer management.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The session directory could not be packed.
    #[error("failed to pack session directory: {0}")]
    Pack(#[source] ArchiveError),

    /// The store rejected or did not complete the save.
    #[error("failed to save session to store: {0}")]
    Store(#[from] StoreError),

    /// A schedule needs a non-zero interval.
    #[error("backup interval must be greater than zero")]
    InvalidInterval,

    /// `start` was called while the timer is already running.
    #[error("backup schedule is already running")]
    AlreadyRunning,

    /// The timer thread could not be spawned.
    #[error("failed to start backup timer: {0}")]
    Timer(#[source] io::Error),
}

/// Result of one backup attempt.
#[derive(Debug)]
pub enum BackupOutcome {
    /// The archive was saved; `bytes` is the blob size.
    Saved { bytes: u64 },
    /// Another cycle was already in flight, so this one was dropped.
    Skipped,
    /// Packing or saving failed.
    Failed(BackupError),
}

impl BackupOutcome {
    /// Whether the archive reached the store.
    #[must_use]
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }
}

/// Where a backup cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPhase {
    Idle,
    Packing,
    Saving,
}

impl BackupPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Packing,
            2 => Self::Saving,
            _ => Self::Idle,
        }
    }
}

/// Receives backup events, e.g. to announce that the remote session was saved.
///
/// Called on whichever thread ran the cycle (the timer thread or the caller
/// of [`BackupController::trigger_now`]).
pub trait BackupObserver: Send + Sync {
    /// A cycle saved `bytes` bytes to the store.
    fn on_saved(&self, session: &SessionId, bytes: u64);

    /// A cycle failed. The schedule continues.
    fn on_failed(&self, _session: &SessionId, _error: &BackupError) {}

    /// A trigger was dropped because a cycle was already in flight.
    fn on_skipped(&self, _session: &SessionId) {}
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Timer,
    Manual,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Manual => "manual",
        }
    }
}

struct Clock {
    interval: Option<Duration>,
    /// Start of the current interval.
    anchor: Instant,
    last_run_at: Option<DateTime<Utc>>,
    stopping: bool,
}

struct Shared {
    session_id: SessionId,
    session_root: PathBuf,
    codec: SessionCodec,
    store: BoundedStore,
    phase: AtomicU8,
    observer: Mutex<Option<Arc<dyn BackupObserver>>>,
    clock: Mutex<Clock>,
    wake: Condvar,
}

/// Resets the phase to idle when the cycle ends, however it ends.
struct PhaseGuard<'a>(&'a AtomicU8);

impl PhaseGuard<'_> {
    fn advance(&self, phase: BackupPhase) {
        self.0.store(phase as u8, Ordering::SeqCst);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.store(BackupPhase::Idle as u8, Ordering::SeqCst);
    }
}

impl Shared {
    fn lock_clock(&self) -> MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observer(&self) -> Option<Arc<dyn BackupObserver>> {
        self.observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn run_cycle(&self, trigger: Trigger) -> BackupOutcome {
        let claimed = self.phase.compare_exchange(
            BackupPhase::Idle as u8,
            BackupPhase::Packing as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if claimed.is_err() {
            log::debug!(
                "Skipping {} backup of session '{}': a cycle is already in flight",
                trigger.as_str(),
                self.session_id
            );
            if let Some(observer) = self.observer() {
                observer.on_skipped(&self.session_id);
            }
            return BackupOutcome::Skipped;
        }

        let guard = PhaseGuard(&self.phase);
        let result = self.pack_and_save(&guard);
        drop(guard);
        self.record_run();

        let observer = self.observer();
        match result {
            Ok(bytes) => {
                log::info!(
                    "Saved session '{}' to store ({}, {} trigger)",
                    self.session_id,
                    bytesize::ByteSize::b(bytes),
                    trigger.as_str()
                );
                if let Some(observer) = observer {
                    observer.on_saved(&self.session_id, bytes);
                }
                BackupOutcome::Saved { bytes }
            }
            Err(e) => {
                log::warn!(
                    "Backup of session '{}' failed ({} trigger): {}",
                    self.session_id,
                    trigger.as_str(),
                    e
                );
                if let Some(observer) = observer {
                    observer.on_failed(&self.session_id, &e);
                }
                BackupOutcome::Failed(e)
            }
        }
    }

    fn pack_and_save(&self, phase: &PhaseGuard<'_>) -> Result<u64, BackupError> {
        let blob = self
            .codec
            .snapshot(&self.session_root)
            .map_err(BackupError::Pack)?;
        phase.advance(BackupPhase::Saving);
        self.store.save(self.session_id.as_str(), &blob)?;
        Ok(blob.len() as u64)
    }

    fn record_run(&self) {
        let mut clock = self.lock_clock();
        clock.anchor = Instant::now();
        clock.last_run_at = Some(Utc::now());
        drop(clock);
        self.wake.notify_all();
    }
}

fn timer_loop(shared: Arc<Shared>) {
    let mut clock = shared.lock_clock();
    loop {
        if clock.stopping {
            break;
        }
        let Some(interval) = clock.interval else {
            break;
        };

        let due = clock.anchor + interval;
        let now = Instant::now();
        if now < due {
            clock = shared
                .wake
                .wait_timeout(clock, due - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        // Restart the interval even if the tick ends up skipped.
        clock.anchor = now;
        drop(clock);
        shared.run_cycle(Trigger::Timer);
        clock = shared.lock_clock();
    }
    log::debug!("Backup timer for session '{}' exited", shared.session_id);
}

/// Owns the backup timer for one session.
pub struct BackupController {
    shared: Arc<Shared>,
    timer: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for BackupController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupController")
            .field("session_id", &self.shared.session_id)
            .field("session_root", &self.shared.session_root)
            .field("phase", &self.phase())
            .field("running", &self.is_running())
            .finish()
    }
}

impl BackupController {
    /// Create an idle controller. Nothing runs until [`Self::start`] or
    /// [`Self::trigger_now`] is called.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        session_root: impl Into<PathBuf>,
        codec: SessionCodec,
        store: BoundedStore,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                session_id,
                session_root: session_root.into(),
                codec,
                store,
                phase: AtomicU8::new(BackupPhase::Idle as u8),
                observer: Mutex::new(None),
                clock: Mutex::new(Clock {
                    interval: None,
                    anchor: Instant::now(),
                    last_run_at: None,
                    stopping: false,
                }),
                wake: Condvar::new(),
            }),
            timer: None,
        }
    }

    /// Install (or replace) the event observer.
    pub fn set_observer(&self, observer: Arc<dyn BackupObserver>) {
        *self
            .shared
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    /// Session this controller backs up.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.shared.session_id
    }

    /// Directory this controller backs up.
    #[must_use]
    pub fn session_root(&self) -> &Path {
        &self.shared.session_root
    }

    /// Current cycle phase.
    #[must_use]
    pub fn phase(&self) -> BackupPhase {
        BackupPhase::from_u8(self.shared.phase.load(Ordering::SeqCst))
    }

    /// Whether the periodic timer is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Snapshot of the schedule, or `None` if the timer was never started.
    #[must_use]
    pub fn schedule(&self) -> Option<BackupSchedule> {
        let clock = self.shared.lock_clock();
        let interval = clock.interval?;
        Some(BackupSchedule {
            interval,
            last_run_at: clock.last_run_at,
            in_flight: self.phase() != BackupPhase::Idle,
        })
    }

    /// Start the periodic timer. The first tick fires one interval from now.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::AlreadyRunning`] if the timer is running, or
    /// [`BackupError::Timer`] if its thread cannot be spawned.
    pub fn start(&mut self, schedule: BackupSchedule) -> Result<(), BackupError> {
        if self.timer.is_some() {
            return Err(BackupError::AlreadyRunning);
        }

        {
            let mut clock = self.shared.lock_clock();
            clock.interval = Some(schedule.interval());
            clock.anchor = Instant::now();
            clock.stopping = false;
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("backup-{}", self.shared.session_id))
            .spawn(move || timer_loop(shared))
            .map_err(BackupError::Timer)?;
        self.timer = Some(handle);

        log::info!(
            "Started backup schedule for session '{}' every {:?}",
            self.shared.session_id,
            schedule.interval()
        );
        Ok(())
    }

    /// Run one cycle now, on the calling thread.
    ///
    /// Returns [`BackupOutcome::Skipped`] immediately if a cycle is already
    /// in flight.
    pub fn trigger_now(&self) -> BackupOutcome {
        self.shared.run_cycle(Trigger::Manual)
    }

    /// Run one cycle now, first waiting for any in-flight cycle to finish.
    ///
    /// Use this for a guaranteed final backup before [`Self::stop`].
    pub fn flush(&self) -> BackupOutcome {
        loop {
            match self.shared.run_cycle(Trigger::Manual) {
                BackupOutcome::Skipped => {
                    let clock = self.shared.lock_clock();
                    if self.phase() != BackupPhase::Idle {
                        drop(
                            self.shared
                                .wake
                                .wait_timeout(clock, Duration::from_millis(50))
                                .unwrap_or_else(PoisonError::into_inner),
                        );
                    }
                }
                outcome => return outcome,
            }
        }
    }

    /// Stop the periodic timer and wait for its thread to exit.
    ///
    /// Does not run a final backup; call [`Self::flush`] first if one is
    /// required. A cycle already running on the timer thread is allowed to
    /// finish.
    pub fn stop(&mut self) {
        let Some(handle) = self.timer.take() else {
            return;
        };

        self.shared.lock_clock().stopping = true;
        self.shared.wake.notify_all();
        if handle.join().is_err() {
            log::error!(
                "Backup timer for session '{}' panicked",
                self.shared.session_id
            );
        }
        log::info!(
            "Stopped backup schedule for session '{}'",
            self.shared.session_id
        );
    }
}

impl Drop for BackupController {
    fn drop(&mut self) {
        self.stop();
    }
}
