//! Pluggable remote storage for session archives.
//!
//! The backup and restore controllers depend only on the [`RemoteStore`]
//! capability trait: existence check, save, fetch and delete of one opaque
//! blob per session key. The store is treated as eventually consistent and
//! idempotent under retry; nothing stronger than "last successful save wins"
//! is assumed.
//!
//! # Backends
//!
//! * [`DirectoryStore`]: one file per session in a directory (atomic replace).
//! * [`SqliteStore`]: a single SQLite table.
//! * [`MemoryStore`]: an in-process map for embedding and tests.
//!
//! [`BoundedStore`] wraps any backend and puts a deadline on every call.

pub mod directory;
pub mod memory;
pub mod sqlite;

use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Default deadline for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No blob is stored under this key.
    #[error("session not found in store: {0}")]
    NotFound(String),

    /// The key cannot be used by this backend.
    #[error("invalid session key '{0}': only letters, digits, '-' and '_' are allowed")]
    InvalidKey(String),

    /// The call did not complete before its deadline.
    #[error("store {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The backend cannot currently serve requests.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Filesystem failure in a file-backed store.
    #[error("store I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// SQLite failure.
    #[error("store database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    /// Whether the error means the blob is absent rather than unreachable.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Capability interface for a session blob store.
///
/// Implementations must be safe to call from several threads. Calls may
/// block; callers that need a deadline wrap the store in [`BoundedStore`].
pub trait RemoteStore: Send + Sync {
    /// Whether a blob exists for `session`.
    fn session_exists(&self, session: &str) -> Result<bool, StoreError>;

    /// Store `payload` for `session`, replacing any previous blob.
    fn save(&self, session: &str, payload: &[u8]) -> Result<(), StoreError>;

    /// Retrieve the blob for `session`.
    ///
    /// Fails with [`StoreError::NotFound`] if there is none.
    fn fetch(&self, session: &str) -> Result<Vec<u8>, StoreError>;

    /// Remove the blob for `session`. Deleting a missing blob succeeds.
    fn delete(&self, session: &str) -> Result<(), StoreError>;
}

/// Check that `key` is safe to use as a file name or table key.
pub(crate) fn check_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// A [`RemoteStore`] whose calls are abandoned after a fixed deadline.
///
/// Each call runs on a short-lived helper thread. If the deadline passes the
/// caller gets [`StoreError::Timeout`] immediately; the helper thread is left
/// to finish (or hang) on its own and its result is discarded.
#[derive(Clone)]
pub struct BoundedStore {
    inner: Arc<dyn RemoteStore>,
    timeout: Duration,
}

impl std::fmt::Debug for BoundedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl BoundedStore {
    /// Wrap `inner` with the given per-call deadline.
    #[must_use]
    pub fn new(inner: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout: timeout.max(Duration::from_millis(1)),
        }
    }

    /// Per-call deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn call<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RemoteStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.inner);
        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name(format!("store-{operation}"))
            .spawn(move || {
                // The receiver is gone if the caller already timed out.
                let _ = tx.send(f(store.as_ref()));
            })
            .map_err(|e| StoreError::Unavailable(format!("failed to spawn store worker: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Store {} timed out after {:?}", operation, self.timeout);
                Err(StoreError::Timeout {
                    operation,
                    timeout: self.timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::Unavailable(format!(
                "store worker for {operation} exited without a result"
            ))),
        }
    }
}

impl RemoteStore for BoundedStore {
    fn session_exists(&self, session: &str) -> Result<bool, StoreError> {
        let session = session.to_string();
        self.call("exists", move |store| store.session_exists(&session))
    }

    fn save(&self, session: &str, payload: &[u8]) -> Result<(), StoreError> {
        let session = session.to_string();
        let payload = payload.to_vec();
        self.call("save", move |store| store.save(&session, &payload))
    }

    fn fetch(&self, session: &str) -> Result<Vec<u8>, StoreError> {
        let session = session.to_string();
        self.call("fetch", move |store| store.fetch(&session))
    }

    fn delete(&self, session: &str) -> Result<(), StoreError> {
        let session = session.to_string();
        self.call("delete", move |store| store.delete(&session))
    }
}
