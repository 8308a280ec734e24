//! Signal handling for graceful shutdown.
//!
//! Ctrl+C sets a shared `AtomicBool`. The `run` command parks on
//! [`ShutdownHandler::wait_for_shutdown`] and, once the flag is set, stops
//! the backup schedule (optionally taking a final backup) before exiting.
//!
//! ```rust,no_run
//! use sessionvault::signal::install_handler;
//!
//! let handler = install_handler().expect("Failed to install signal handler");
//! // ... start backups ...
//! handler.wait_for_shutdown();
//! // ... stop backups ...
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared shutdown flag, set by Ctrl+C or [`Self::request_shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandler {
    /// Create a handler with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Manually request a shutdown.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Get a clone of the shutdown flag for passing to other threads.
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Reset the shutdown flag to `false`.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Block the calling thread until shutdown is requested.
    pub fn wait_for_shutdown(&self) {
        while !self.is_shutdown_requested() {
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Like [`Self::wait_for_shutdown`] but gives up after `timeout`.
    ///
    /// Returns `true` if shutdown was requested.
    pub fn wait_for_shutdown_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while !self.is_shutdown_requested() {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
        true
    }

    /// Fail with [`SignalError::Interrupted`] if shutdown was requested.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Interrupted`] after Ctrl+C.
    pub fn check(&self) -> Result<(), SignalError> {
        if self.is_shutdown_requested() {
            Err(SignalError::Interrupted)
        } else {
            Ok(())
        }
    }
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for signal handling.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Failed to install the Ctrl+C handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),

    /// The operation was interrupted by Ctrl+C.
    #[error("Interrupted")]
    Interrupted,
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install a Ctrl+C handler that sets the shutdown flag on interrupt.
///
/// Calling this more than once in a process returns the already installed
/// handler with its flag reset, so repeated `run_app` calls (as in tests)
/// keep working.
///
/// # Errors
///
/// This function does not currently fail: if the ctrlc hook was registered
/// by someone else, an unhooked handler is returned instead.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let flag = handler.get_flag();

    match ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);

        let _ = writeln!(std::io::stderr(), "\nInterrupted. Stopping backups...");
        let _ = std::io::stderr().flush();

        log::info!("Shutdown signal received");
    }) {
        Ok(()) => {
            let _ = GLOBAL_HANDLER.set(handler.clone());
            Ok(GLOBAL_HANDLER.get().cloned().unwrap_or(handler))
        }
        Err(e) => {
            if let Some(handler) = GLOBAL_HANDLER.get() {
                handler.reset();
                Ok(handler.clone())
            } else {
                log::debug!("Ctrl+C handler already registered ({}), using unhooked handler", e);
                let fallback = ShutdownHandler::new();
                let _ = GLOBAL_HANDLER.set(fallback.clone());
                Ok(GLOBAL_HANDLER.get().cloned().unwrap_or(fallback))
            }
        }
    }
}
