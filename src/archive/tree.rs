//! Directory tree snapshots and staged extraction.
//!
//! # Packing
//!
//! [`pack`] walks the session root in sorted order without following
//! symlinks. Paths are recorded relative to the root with `/` separators on
//! every platform. Symlinks, sockets and other special files are skipped, and
//! anything matched by the gitignore-style [`PackOptions::exclude`] patterns
//! (browser caches, lock files) is left out without being descended into.
//! Names that extraction would refuse or rename (a literal `%2e%2e`, a
//! backslash, a control character) are logged and skipped so that one odd
//! file cannot fail every backup.
//!
//! # Extraction
//!
//! [`unpack`] never writes into the live session root. It creates a private
//! staging directory next to the root, validates *every* entry with a
//! [`PathGuard`] before the first byte is written, writes the tree into the
//! staging directory and finally swaps it into place with renames. Any
//! failure drops the staging directory and leaves the previous root exactly
//! as it was.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use walkdir::WalkDir;

use super::guard::{normalize_entry_path, PathGuard};
use super::{ArchiveEntry, ArchiveError, SessionArchive};

/// Volatile browser-profile paths that are pruned from backups by default.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "Default/Cache",
    "Default/Code Cache",
    "Default/GPUCache",
    "Default/Service Worker/CacheStorage",
    "Default/Service Worker/ScriptCache",
    "GrShaderCache",
    "ShaderCache",
    "*.tmp",
    "Singleton*",
    "lockfile",
];

/// Options controlling what [`pack`] records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackOptions {
    /// Gitignore-style patterns, matched against `/`-separated relative paths.
    pub exclude: Vec<String>,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            exclude: DEFAULT_EXCLUDES.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl PackOptions {
    /// Options that record everything.
    #[must_use]
    pub fn include_all() -> Self {
        Self {
            exclude: Vec::new(),
        }
    }

    /// Replace the exclude patterns.
    #[must_use]
    pub fn with_excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Add exclude patterns to the current ones.
    #[must_use]
    pub fn and_excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }

    fn matcher(&self, root: &Path) -> Option<Gitignore> {
        if self.exclude.is_empty() {
            return None;
        }
        let mut builder = GitignoreBuilder::new(root);
        for pattern in &self.exclude {
            if let Err(e) = builder.add_line(None, pattern) {
                log::warn!("Invalid exclude pattern '{}': {}", pattern, e);
            }
        }
        match builder.build() {
            Ok(gitignore) if !gitignore.is_empty() => Some(gitignore),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Failed to build exclude patterns: {}", e);
                None
            }
        }
    }
}

/// Counts reported by a successful [`unpack`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    /// Regular files written.
    pub files: usize,
    /// Directories created from directory entries.
    pub directories: usize,
    /// Total file bytes written.
    pub bytes: u64,
}

/// Snapshot `session_root` into a [`SessionArchive`].
///
/// # Errors
///
/// Returns [`ArchiveError::NotADirectory`] if the root is missing,
/// [`ArchiveError::Walk`] or [`ArchiveError::Io`] if reading fails. Entries
/// that vanish mid-walk (the browser deleting a temp file) are skipped.
pub fn pack(session_root: &Path, options: &PackOptions) -> Result<SessionArchive, ArchiveError> {
    if !session_root.is_dir() {
        return Err(ArchiveError::NotADirectory(session_root.to_path_buf()));
    }

    let matcher = options.matcher(session_root);
    let mut archive = SessionArchive::new();
    let mut walker = WalkDir::new(session_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_vanished(&e) => {
                log::debug!("Skipping entry that disappeared during walk: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if entry.depth() == 0 {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(session_root) else {
            continue;
        };
        let Some(relative) = portable_path(relative) else {
            log::warn!(
                "Skipping non-UTF-8 path in session directory: {}",
                entry.path().display()
            );
            continue;
        };

        let file_type = entry.file_type();
        if !is_portable_entry(&relative) {
            log::warn!(
                "Skipping name that cannot be restored safely: {:?}",
                relative
            );
            if file_type.is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }
        if let Some(gi) = &matcher {
            if gi.matched(&relative, file_type.is_dir()).is_ignore() {
                log::trace!("Excluded from backup: {}", relative);
                if file_type.is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }
        }

        if file_type.is_dir() {
            archive.push(ArchiveEntry::directory(relative))?;
        } else if file_type.is_file() {
            let content = match fs::read(entry.path()) {
                Ok(content) => content,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::debug!("File disappeared before it was read: {}", relative);
                    continue;
                }
                Err(e) => return Err(ArchiveError::io(entry.path())(e)),
            };
            archive.push(ArchiveEntry::file(relative, content))?;
        } else {
            log::debug!("Skipping symlink or special file: {}", relative);
        }
    }

    Ok(archive)
}

fn is_vanished(error: &walkdir::Error) -> bool {
    error
        .io_error()
        .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}

/// Relative path with `/` separators, or `None` if it is not valid UTF-8.
fn portable_path(relative: &Path) -> Option<String> {
    let segments: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    segments.map(|s| s.join("/"))
}

/// Whether extraction would recreate `relative` under the same name.
fn is_portable_entry(relative: &str) -> bool {
    normalize_entry_path(relative).is_ok_and(|normalized| normalized == relative)
}

/// Extract `archive` into `session_root`, replacing whatever was there.
///
/// The parent of `session_root` is created if needed; staging happens in a
/// hidden sibling directory so that the final rename never crosses a
/// filesystem boundary.
///
/// # Errors
///
/// Returns [`ArchiveError::UnsafeEntry`] if any entry is rejected by the
/// [`PathGuard`] (nothing is written in that case), or [`ArchiveError::Io`]
/// if staging, writing or promotion fails. In every error case the previous
/// contents of `session_root` are left in place.
pub fn unpack(archive: &SessionArchive, session_root: &Path) -> Result<UnpackSummary, ArchiveError> {
    let parent = parent_dir(session_root);
    fs::create_dir_all(&parent).map_err(ArchiveError::io(&parent))?;

    let staging = tempfile::Builder::new()
        .prefix(&hidden_sibling_prefix(session_root, "restore"))
        .tempdir_in(&parent)
        .map_err(ArchiveError::io(&parent))?;
    let guard = PathGuard::new(staging.path()).map_err(ArchiveError::io(staging.path()))?;

    let mut planned = Vec::with_capacity(archive.len());
    let mut targets = HashSet::with_capacity(archive.len());
    for entry in archive.entries() {
        let target = guard.validate(&entry.relative_path).map_err(|reason| {
            log::warn!(
                "Rejected archive entry '{}': {}",
                entry.relative_path,
                reason
            );
            ArchiveError::UnsafeEntry {
                path: entry.relative_path.clone(),
                reason,
            }
        })?;
        // `a//b` and `a/b` land on the same file.
        if !targets.insert(target.clone()) {
            log::warn!("Archive entry '{}' repeats an earlier path", entry.relative_path);
            return Err(ArchiveError::DuplicateEntry(entry.relative_path.clone()));
        }
        planned.push((entry, target));
    }

    let mut summary = UnpackSummary::default();
    for (entry, target) in planned {
        write_entry(&guard, entry, &target)?;
        if entry.is_dir {
            summary.directories += 1;
        } else {
            summary.files += 1;
            summary.bytes += entry.size();
        }
    }

    promote(staging, session_root, &parent)?;
    log::debug!(
        "Extracted {} files and {} directories into {}",
        summary.files,
        summary.directories,
        session_root.display()
    );
    Ok(summary)
}

fn write_entry(guard: &PathGuard, entry: &ArchiveEntry, target: &Path) -> Result<(), ArchiveError> {
    if entry.is_dir {
        return fs::create_dir_all(target).map_err(ArchiveError::io(target));
    }

    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir).map_err(ArchiveError::io(dir))?;
    }
    // Parents now exist, so the guard resolves them for real.
    guard
        .validate(&entry.relative_path)
        .map_err(|reason| ArchiveError::UnsafeEntry {
            path: entry.relative_path.clone(),
            reason,
        })?;

    let mut file = File::create(target).map_err(ArchiveError::io(target))?;
    file.write_all(&entry.content)
        .and_then(|()| file.sync_all())
        .map_err(ArchiveError::io(target))
}

/// Swap the staged tree into `session_root`.
fn promote(staging: tempfile::TempDir, session_root: &Path, parent: &Path) -> Result<(), ArchiveError> {
    if fs::symlink_metadata(session_root).is_err() {
        return fs::rename(staging.path(), session_root).map_err(ArchiveError::io(session_root));
    }

    let holding = tempfile::Builder::new()
        .prefix(&hidden_sibling_prefix(session_root, "previous"))
        .tempdir_in(parent)
        .map_err(ArchiveError::io(parent))?;
    let displaced = holding.path().join("session");

    fs::rename(session_root, &displaced).map_err(ArchiveError::io(session_root))?;
    if let Err(e) = fs::rename(staging.path(), session_root) {
        if let Err(rollback) = fs::rename(&displaced, session_root) {
            log::error!(
                "Failed to put previous session back at {}: {} (kept at {})",
                session_root.display(),
                rollback,
                holding.into_path().display()
            );
        }
        return Err(ArchiveError::io(session_root)(e));
    }
    Ok(())
}

fn parent_dir(session_root: &Path) -> PathBuf {
    match session_root.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn hidden_sibling_prefix(session_root: &Path, purpose: &str) -> String {
    let name = session_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());
    format!(".{name}.{purpose}-")
}
