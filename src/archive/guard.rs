//! Admission checks for archive entry paths.
//!
//! Every entry that is about to be written to disk passes through a
//! [`PathGuard`] first. The guard works in two stages:
//!
//! 1. [`normalize_entry_path`] is purely syntactic. It rejects empty and
//!    absolute paths, control characters and any parent-directory segment,
//!    and produces a forward-slash path with `.` segments removed.
//! 2. [`PathGuard::validate`] joins the normalized path to the guarded root,
//!    canonicalizes the deepest part of it that already exists and checks
//!    that the result is still strictly inside the canonical root. This is
//!    what catches symlinked parents and platform prefixes that a string
//!    comparison cannot see.
//!
//! # Example
//!
//! ```
//! use sessionvault::archive::guard::{normalize_entry_path, RejectReason};
//!
//! assert_eq!(normalize_entry_path("good/./file.txt").unwrap(), "good/file.txt");
//! assert_eq!(normalize_entry_path("../evil.txt"), Err(RejectReason::Traversal));
//! assert_eq!(normalize_entry_path("/evil.txt"), Err(RejectReason::Absolute));
//! ```

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Why an entry path was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// The path is empty or names the root itself.
    #[error("entry path is empty")]
    Empty,

    /// The path starts with a separator, a drive letter or another prefix.
    #[error("entry path is absolute")]
    Absolute,

    /// The path contains a NUL byte or another control character.
    #[error("entry path contains a control character")]
    ControlCharacter,

    /// A segment resolves to the parent-directory marker.
    #[error("entry path contains a parent-directory segment")]
    Traversal,

    /// The joined path resolves somewhere other than strictly inside the root.
    #[error("entry path resolves outside the session root")]
    OutsideRoot,

    /// The entry is a symlink, hardlink or device node.
    #[error("entry is a link or special file")]
    Link,
}

/// Normalize a raw entry path without touching the filesystem.
///
/// Both `/` and `\` are treated as separators so that archives written on
/// any platform are judged the same way. Empty and `.` segments are dropped
/// and the remaining segments are joined with `/` byte-for-byte; Unicode
/// folding is only used to recognize disguised parent markers.
///
/// # Errors
///
/// Returns the first [`RejectReason`] that applies, checked in this order:
/// empty, absolute, control characters, parent-directory segments.
pub fn normalize_entry_path(raw: &str) -> Result<String, RejectReason> {
    if raw.is_empty() {
        return Err(RejectReason::Empty);
    }
    if raw.starts_with('/') || raw.starts_with('\\') || has_drive_prefix(raw) {
        return Err(RejectReason::Absolute);
    }
    if raw.chars().any(char::is_control) {
        return Err(RejectReason::ControlCharacter);
    }

    let mut segments = Vec::new();
    for segment in raw.split(['/', '\\']) {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if is_parent_marker(segment) {
            return Err(RejectReason::Traversal);
        }
        // A segment the platform parses as anything but a plain name
        // (e.g. `C:` on Windows) would re-anchor the join.
        let mut components = Path::new(segment).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(RejectReason::Absolute);
        }
        segments.push(segment);
    }

    if segments.is_empty() {
        return Err(RejectReason::Empty);
    }
    Ok(segments.join("/"))
}

/// `..`, including percent-encoded and compatibility-folded spellings.
fn is_parent_marker(segment: &str) -> bool {
    if segment == ".." {
        return true;
    }
    let folded: String = segment.nfkc().collect();
    folded.to_ascii_lowercase().replace("%2e", ".") == ".."
}

fn has_drive_prefix(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Confines entry paths to a single root directory.
#[derive(Debug, Clone)]
pub struct PathGuard {
    /// Canonical form of the guarded root.
    root: PathBuf,
}

impl PathGuard {
    /// Create a guard for `root`, which must already exist.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from canonicalizing `root`.
    pub fn new(root: &Path) -> io::Result<Self> {
        Ok(Self {
            root: fs::canonicalize(root)?,
        })
    }

    /// The canonical root this guard confines paths to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Decide whether `relative` may be written below the root.
    ///
    /// On success, returns the absolute target path (the canonical root
    /// joined with the normalized entry path).
    ///
    /// # Errors
    ///
    /// Returns the [`RejectReason`] for any path that is not admitted.
    pub fn validate(&self, relative: &str) -> Result<PathBuf, RejectReason> {
        let normalized = normalize_entry_path(relative)?;
        let target = normalized
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment));
        self.confine(&target)?;
        Ok(target)
    }

    /// Canonicalize the deepest existing ancestor of `target` (or `target`
    /// itself) and require it to stay inside the root.
    fn confine(&self, target: &Path) -> Result<(), RejectReason> {
        let mut probe = target;
        while fs::symlink_metadata(probe).is_err() {
            probe = probe.parent().ok_or(RejectReason::OutsideRoot)?;
        }

        let resolved = fs::canonicalize(probe).map_err(|_| RejectReason::OutsideRoot)?;
        if !resolved.starts_with(&self.root) {
            return Err(RejectReason::OutsideRoot);
        }
        // The entry itself must not alias the root.
        if probe == target && resolved == self.root {
            return Err(RejectReason::OutsideRoot);
        }
        Ok(())
    }
}
