//! One-shot restore of a session directory from the store.
//!
//! Restore runs once during startup, before anything else touches the
//! session root and before the backup timer starts. The sequence is:
//!
//! 1. existence check (absent → [`RestoreOutcome::NotFound`], filesystem untouched)
//! 2. fetch
//! 3. decode
//! 4. staged, all-or-nothing extraction
//!
//! Whatever step fails, the live session root is either the complete
//! restored tree or exactly what it was before the call.

use std::path::Path;

use thiserror::Error;

use super::SessionId;
use crate::archive::{ArchiveError, SessionCodec, UnpackSummary};
use crate::store::{BoundedStore, RemoteStore, StoreError};

/// Error type for restore.
#[derive(Debug, Error)]
pub enum RestoreError {
    /// The store could not be queried or the blob could not be fetched.
    #[error("session store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// The fetched blob is not a valid session archive.
    #[error("stored session archive is corrupt: {0}")]
    CorruptArchive(#[source] ArchiveError),

    /// An entry was unsafe or could not be written. Nothing was extracted.
    #[error("session extraction failed: {0}")]
    ExtractionFailed(#[source] ArchiveError),
}

/// Successful result of [`RestoreController::restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The stored session was extracted into the session root.
    Restored(UnpackSummary),
    /// The store holds no session under this id; start a fresh one.
    NotFound,
}

/// Restores session directories from a store.
#[derive(Debug, Clone)]
pub struct RestoreController {
    codec: SessionCodec,
    store: BoundedStore,
}

impl RestoreController {
    #[must_use]
    pub fn new(codec: SessionCodec, store: BoundedStore) -> Self {
        Self { codec, store }
    }

    /// Restore `session_id` into `session_root`.
    ///
    /// # Errors
    ///
    /// See [`RestoreError`]. On error the session root is left as it was.
    pub fn restore(
        &self,
        session_id: &SessionId,
        session_root: &Path,
    ) -> Result<RestoreOutcome, RestoreError> {
        let key = session_id.as_str();

        let exists = self
            .store
            .session_exists(key)
            .map_err(RestoreError::StoreUnavailable)?;
        if !exists {
            log::info!("No stored session '{}'; starting fresh", session_id);
            return Ok(RestoreOutcome::NotFound);
        }

        let blob = self
            .store
            .fetch(key)
            .map_err(RestoreError::StoreUnavailable)?;
        log::debug!(
            "Fetched session '{}' ({})",
            session_id,
            bytesize::ByteSize::b(blob.len() as u64)
        );

        let archive = self.codec.decode(&blob).map_err(|e| match e {
            ArchiveError::UnsafeEntry { .. } => RestoreError::ExtractionFailed(e),
            other => RestoreError::CorruptArchive(other),
        })?;

        let summary = self
            .codec
            .unpack(&archive, session_root)
            .map_err(RestoreError::ExtractionFailed)?;

        log::info!(
            "Restored session '{}' into {} ({} files, {} directories, {})",
            session_id,
            session_root.display(),
            summary.files,
            summary.directories,
            bytesize::ByteSize::b(summary.bytes)
        );
        Ok(RestoreOutcome::Restored(summary))
    }
}
