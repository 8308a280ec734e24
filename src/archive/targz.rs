//! Checksummed gzip/tar container for session archives.
//!
//! Layout of an encoded blob:
//!
//! ```text
//! +----------------+----------------------+---------------------------+
//! | magic (8 bytes)| SHA-256 of body (32) | body: gzip(tar stream)    |
//! +----------------+----------------------+---------------------------+
//! ```
//!
//! Tar headers are normalized (mode 0644/0755, mtime 0, uid/gid 0) so that
//! packing the same tree twice yields the same bytes. Only regular files and
//! directories are ever written; on decode, link and device entries are
//! refused outright.

use std::io::{self, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tar::{EntryType, Header};

use super::guard::{normalize_entry_path, RejectReason};
use super::{ArchiveEntry, ArchiveError, ArchiveFormat, SessionArchive};

/// Magic bytes identifying a session archive blob.
pub const MAGIC: &[u8; 8] = b"SVARCH01";

const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + DIGEST_LEN;

/// Gzip-compressed tar inside a SHA-256 envelope.
#[derive(Debug, Clone, Copy)]
pub struct TarGzFormat {
    compression: Compression,
}

impl Default for TarGzFormat {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
        }
    }
}

/// Wrap an already-compressed body in the checksummed envelope.
#[must_use]
pub fn seal(body: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(body);
    let mut blob = Vec::with_capacity(HEADER_LEN + body.len());
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&digest);
    blob.extend_from_slice(body);
    blob
}

/// Verify the envelope and return the compressed body.
fn open(blob: &[u8]) -> Result<&[u8], ArchiveError> {
    if blob.len() < HEADER_LEN || &blob[..MAGIC.len()] != MAGIC {
        return Err(ArchiveError::Corrupt(
            "missing session archive header".to_string(),
        ));
    }
    let (digest, body) = blob[MAGIC.len()..].split_at(DIGEST_LEN);
    if Sha256::digest(body).as_slice() != digest {
        return Err(ArchiveError::Corrupt(
            "checksum mismatch; the blob was truncated or modified".to_string(),
        ));
    }
    Ok(body)
}

fn normalized_header(is_dir: bool, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    if is_dir {
        header.set_entry_type(EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
    } else {
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(size);
    }
    header
}

impl ArchiveFormat for TarGzFormat {
    fn name(&self) -> &'static str {
        "tar.gz"
    }

    fn encode(&self, archive: &SessionArchive) -> Result<Vec<u8>, ArchiveError> {
        let encoder = GzEncoder::new(Vec::new(), self.compression);
        let mut builder = tar::Builder::new(encoder);

        for entry in archive.entries() {
            let path = normalize_entry_path(&entry.relative_path).map_err(|reason| {
                ArchiveError::UnsafeEntry {
                    path: entry.relative_path.clone(),
                    reason,
                }
            })?;
            let mut header = normalized_header(entry.is_dir, entry.size());
            let data: &[u8] = if entry.is_dir { &[] } else { &entry.content };
            builder
                .append_data(&mut header, Path::new(&path), data)
                .map_err(ArchiveError::Encode)?;
        }

        let encoder = builder.into_inner().map_err(ArchiveError::Encode)?;
        let body = encoder.finish().map_err(ArchiveError::Encode)?;
        Ok(seal(&body))
    }

    fn decode(&self, blob: &[u8]) -> Result<SessionArchive, ArchiveError> {
        let body = open(blob)?;
        let mut tar = tar::Archive::new(GzDecoder::new(body));
        let entries = tar.entries().map_err(corrupt)?;

        let mut archive = SessionArchive::new();
        for entry in entries {
            let mut entry = entry.map_err(corrupt)?;
            let raw = String::from_utf8(entry.path_bytes().into_owned())
                .map_err(|_| ArchiveError::Corrupt("entry path is not valid UTF-8".to_string()))?;

            let decoded = match entry.header().entry_type() {
                EntryType::Directory => {
                    let path = match raw.strip_suffix('/') {
                        Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
                        _ => raw,
                    };
                    ArchiveEntry::directory(path)
                }
                EntryType::Regular | EntryType::Continuous => {
                    let mut content = Vec::with_capacity(entry.size().min(1 << 20) as usize);
                    entry.read_to_end(&mut content).map_err(corrupt)?;
                    ArchiveEntry::file(raw, content)
                }
                other => {
                    log::warn!("Refusing archive entry '{}' of type {:?}", raw, other);
                    return Err(ArchiveError::UnsafeEntry {
                        path: raw,
                        reason: RejectReason::Link,
                    });
                }
            };

            archive.push(decoded).map_err(|e| match e {
                ArchiveError::DuplicateEntry(path) => {
                    ArchiveError::Corrupt(format!("duplicate entry '{path}'"))
                }
                other => other,
            })?;
        }

        Ok(archive)
    }
}

fn corrupt(e: io::Error) -> ArchiveError {
    ArchiveError::Corrupt(e.to_string())
}
