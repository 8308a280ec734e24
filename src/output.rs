//! Status report formatting for the `status` command.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "session_id": "main",
//!   "session_root": "/var/lib/app/profiles/main",
//!   "store": "directory:/var/lib/app/store",
//!   "stored": true,
//!   "size": 48213,
//!   "entries": 37,
//!   "error": null,
//!   "local_root_exists": true
//! }
//! ```

use std::io::{self, Write};

use serde::Serialize;

/// What the store and the local filesystem hold for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub session_id: String,
    pub session_root: String,
    /// Store backend and location.
    pub store: String,
    /// Whether the store holds a blob for this session.
    pub stored: bool,
    /// Blob size in bytes.
    pub size: Option<u64>,
    /// Number of archive entries, if the blob decodes.
    pub entries: Option<usize>,
    /// Why the blob could not be fetched or decoded.
    pub error: Option<String>,
    pub local_root_exists: bool,
}

impl StatusReport {
    /// Serialize to compact JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write a human-readable summary.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_text<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "Session:     {}", self.session_id)?;
        writeln!(
            writer,
            "Local root:  {}{}",
            self.session_root,
            if self.local_root_exists { "" } else { " (missing)" }
        )?;
        writeln!(writer, "Store:       {}", self.store)?;
        if !self.stored {
            return writeln!(writer, "Stored:      no");
        }

        match self.size {
            Some(size) => writeln!(
                writer,
                "Stored:      yes ({})",
                bytesize::ByteSize::b(size)
            )?,
            None => writeln!(writer, "Stored:      yes")?,
        }
        if let Some(entries) = self.entries {
            writeln!(writer, "Entries:     {}", entries)?;
        }
        if let Some(error) = &self.error {
            writeln!(writer, "Error:       {}", error)?;
        }
        Ok(())
    }
}
