//! Anonymous session identifier.

use core::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors that can occur when parsing a [`SessionId`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionIdError {
    /// The input string is empty.
    #[error("session id cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("session id must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input contains whitespace or control characters.
    #[error("session id contains invalid characters")]
    InvalidCharacters,
}

/// Opaque identifier addressing an anonymous shopping cart.
///
/// Generated once per client installation from a random (v4) UUID and never
/// mutated afterwards. Values read back from storage or typed by a user go
/// through [`SessionId::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Maximum accepted length of a stored identifier.
    pub const MAX_LENGTH: usize = 128;

    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse a previously issued identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, too long, or contains
    /// whitespace/control characters.
    pub fn parse(s: &str) -> Result<Self, SessionIdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SessionIdError::Empty);
        }
        if s.len() > Self::MAX_LENGTH {
            return Err(SessionIdError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(SessionIdError::InvalidCharacters);
        }
        Ok(Self(s.to_owned()))
    }

    /// Returns the identifier as a string slice.
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

impl std::str::FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}
