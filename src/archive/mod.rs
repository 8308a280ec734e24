//! Session archives: snapshotting a directory tree into one portable blob
//! and extracting it back, safely.
//!
//! # Architecture
//!
//! * [`guard`]: Pure admission checks for entry paths ([`PathGuard`]).
//! * [`tree`]: Walks a session directory into a [`SessionArchive`] and
//!   performs staged, all-or-nothing extraction.
//! * [`targz`]: The on-the-wire container ([`TarGzFormat`]): a checksummed
//!   envelope around a gzip-compressed tar stream.
//!
//! The container format sits behind the [`ArchiveFormat`] trait so that the
//! byte layout and the path validation are independent of each other.
//! [`SessionCodec`] bundles a format with the pack options used by the
//! backup and restore controllers.

pub mod guard;
pub mod targz;
pub mod tree;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

pub use guard::{normalize_entry_path, PathGuard, RejectReason};
pub use targz::TarGzFormat;
pub use tree::{PackOptions, UnpackSummary, DEFAULT_EXCLUDES};

/// Error type for packing, encoding, decoding and extraction.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// An entry failed path validation. Extraction is aborted as a whole.
    #[error("unsafe archive entry '{path}': {reason}")]
    UnsafeEntry { path: String, reason: RejectReason },

    /// Two entries share the same relative path.
    #[error("duplicate archive entry: {0}")]
    DuplicateEntry(String),

    /// The blob is not a well-formed session archive.
    #[error("corrupt archive: {0}")]
    Corrupt(String),

    /// The session root to pack is missing or not a directory.
    #[error("session root is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Writing the container failed.
    #[error("failed to encode archive: {0}")]
    Encode(#[source] io::Error),

    /// Local filesystem failure while reading or writing entries.
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Directory traversal failed while packing.
    #[error("failed to walk session directory: {0}")]
    Walk(#[from] walkdir::Error),
}

impl ArchiveError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// One file or directory inside a [`SessionArchive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path relative to the session root, `/`-separated.
    pub relative_path: String,
    /// Whether this entry is a directory marker.
    pub is_dir: bool,
    /// File content; always empty for directories.
    pub content: Vec<u8>,
}

impl ArchiveEntry {
    /// A regular file entry.
    #[must_use]
    pub fn file(relative_path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            relative_path: relative_path.into(),
            is_dir: false,
            content: content.into(),
        }
    }

    /// A directory entry.
    #[must_use]
    pub fn directory(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            is_dir: true,
            content: Vec::new(),
        }
    }

    /// Size of the content in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// An ordered set of entries with unique relative paths.
///
/// Paths are *not* validated on insertion; that is the job of extraction,
/// which must see hostile paths in order to refuse them.
#[derive(Debug, Clone, Default)]
pub struct SessionArchive {
    entries: Vec<ArchiveEntry>,
    paths: HashSet<String>,
}

impl SessionArchive {
    /// Create an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an archive from a list of entries.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::DuplicateEntry`] if two entries share a path.
    pub fn from_entries(entries: impl IntoIterator<Item = ArchiveEntry>) -> Result<Self, ArchiveError> {
        let mut archive = Self::new();
        for entry in entries {
            archive.push(entry)?;
        }
        Ok(archive)
    }

    /// Append an entry.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::DuplicateEntry`] if the path is already present.
    pub fn push(&mut self, entry: ArchiveEntry) -> Result<(), ArchiveError> {
        if !self.paths.insert(entry.relative_path.clone()) {
            return Err(ArchiveError::DuplicateEntry(entry.relative_path));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Look up an entry by its exact relative path.
    #[must_use]
    pub fn get(&self, relative_path: &str) -> Option<&ArchiveEntry> {
        if !self.paths.contains(relative_path) {
            return None;
        }
        self.entries.iter().find(|e| e.relative_path == relative_path)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all file sizes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(ArchiveEntry::size).sum()
    }
}

impl PartialEq for SessionArchive {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for SessionArchive {}

/// A byte-level container for [`SessionArchive`]s.
pub trait ArchiveFormat: Send + Sync {
    /// Short name used in log output.
    fn name(&self) -> &'static str;

    /// Serialize an archive into a blob.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::UnsafeEntry`] for paths that could never be
    /// extracted, or [`ArchiveError::Encode`] if the container cannot be written.
    fn encode(&self, archive: &SessionArchive) -> Result<Vec<u8>, ArchiveError>;

    /// Parse a blob back into an archive.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Corrupt`] for malformed blobs and
    /// [`ArchiveError::UnsafeEntry`] for link or device entries.
    fn decode(&self, blob: &[u8]) -> Result<SessionArchive, ArchiveError>;
}

/// A container format together with the options used when packing.
#[derive(Clone)]
pub struct SessionCodec {
    format: Arc<dyn ArchiveFormat>,
    options: PackOptions,
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec")
            .field("format", &self.format.name())
            .field("options", &self.options)
            .finish()
    }
}

impl Default for SessionCodec {
    fn default() -> Self {
        Self::new(PackOptions::default())
    }
}

impl SessionCodec {
    /// Codec using the default [`TarGzFormat`].
    #[must_use]
    pub fn new(options: PackOptions) -> Self {
        Self::with_format(Arc::new(TarGzFormat::default()), options)
    }

    /// Codec using a custom container format.
    #[must_use]
    pub fn with_format(format: Arc<dyn ArchiveFormat>, options: PackOptions) -> Self {
        Self { format, options }
    }

    /// Pack options in effect.
    #[must_use]
    pub fn options(&self) -> &PackOptions {
        &self.options
    }

    /// Walk `session_root` into an archive.
    ///
    /// # Errors
    ///
    /// See [`tree::pack`].
    pub fn pack(&self, session_root: &Path) -> Result<SessionArchive, ArchiveError> {
        tree::pack(session_root, &self.options)
    }

    /// Extract `archive` into `session_root`, all or nothing.
    ///
    /// # Errors
    ///
    /// See [`tree::unpack`].
    pub fn unpack(
        &self,
        archive: &SessionArchive,
        session_root: &Path,
    ) -> Result<UnpackSummary, ArchiveError> {
        tree::unpack(archive, session_root)
    }

    /// Serialize with the configured format.
    ///
    /// # Errors
    ///
    /// See [`ArchiveFormat::encode`].
    pub fn encode(&self, archive: &SessionArchive) -> Result<Vec<u8>, ArchiveError> {
        self.format.encode(archive)
    }

    /// Parse with the configured format.
    ///
    /// # Errors
    ///
    /// See [`ArchiveFormat::decode`].
    pub fn decode(&self, blob: &[u8]) -> Result<SessionArchive, ArchiveError> {
        self.format.decode(blob)
    }

    /// Pack and encode in one step.
    ///
    /// # Errors
    ///
    /// Any error from [`Self::pack`] or [`Self::encode`].
    pub fn snapshot(&self, session_root: &Path) -> Result<Vec<u8>, ArchiveError> {
        let archive = self.pack(session_root)?;
        let blob = self.encode(&archive)?;
        log::debug!(
            "Packed {} entries ({}) from {} into a {} {} blob",
            archive.len(),
            bytesize::ByteSize::b(archive.total_bytes()),
            session_root.display(),
            bytesize::ByteSize::b(blob.len() as u64),
            self.format.name()
        );
        Ok(blob)
    }
}
