//! In-process session store.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{RemoteStore, StoreError};

/// A [`RemoteStore`] backed by a `HashMap`.
///
/// Useful when embedding the controllers in a process that handles
/// persistence itself, and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RemoteStore for MemoryStore {
    fn session_exists(&self, session: &str) -> Result<bool, StoreError> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.contains_key(session))
    }

    fn save(&self, session: &str, payload: &[u8]) -> Result<(), StoreError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.insert(session.to_string(), payload.to_vec());
        Ok(())
    }

    fn fetch(&self, session: &str) -> Result<Vec<u8>, StoreError> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs
            .get(session)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session.to_string()))
    }

    fn delete(&self, session: &str) -> Result<(), StoreError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.remove(session);
        Ok(())
    }
}
