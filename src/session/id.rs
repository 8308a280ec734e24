//! Validated session identifiers.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static SESSION_ID_PATTERN: OnceLock<Regex> = OnceLock::new();

fn pattern() -> &'static Regex {
    SESSION_ID_PATTERN
        .get_or_init(|| Regex::new(r"^[-_A-Za-z0-9]+$").expect("session id pattern is valid"))
}

/// Returned when a string is not a usable session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid session id '{0}': only letters, digits, '-' and '_' are allowed")]
pub struct InvalidSessionId(pub String);

/// Identifier of one authenticated session.
///
/// Used verbatim as the key in the remote store, so it is restricted to
/// ASCII letters, digits, `-` and `_`.
///
/// ```
/// use sessionvault::session::SessionId;
///
/// assert!(SessionId::new("client-01").is_ok());
/// assert!(SessionId::new("../escape").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap `id`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSessionId`] if `id` is empty or contains other characters.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidSessionId> {
        let id = id.into();
        if pattern().is_match(&id) {
            Ok(Self(id))
        } else {
            Err(InvalidSessionId(id))
        }
    }

    /// The identifier as a store key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = InvalidSessionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = InvalidSessionId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}
