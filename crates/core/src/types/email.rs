//! Address given when registering an account.

use core::fmt;

/// Why a sign-up address was refused before it reached the backend.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EmailError {
    #[error("an email address is required to sign up")]
    Missing,
    #[error("email address is longer than {max} characters")]
    TooLong { max: usize },
    #[error("email address may not contain spaces")]
    ContainsWhitespace,
    /// Zero or several `@`, or nothing on one side of it.
    #[error("expected an address of the form name@domain")]
    NotAnAddress,
    /// Mailbox names over 64 characters are refused by most mail servers.
    #[error("the part before '@' is longer than {max} characters")]
    MailboxTooLong { max: usize },
    /// Catches typos such as `sam@gmail` before the round trip.
    #[error("domain '{0}' is not a full host name")]
    IncompleteDomain(String),
}

/// A sign-up email address that passed the local checks.
///
/// The backend has the final word; these checks only stop addresses that
/// could never be registered. The domain is lowercased, the mailbox is kept
/// as typed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Email(String);

impl Email {
    pub const MAX_LENGTH: usize = 254;
    pub const MAX_MAILBOX_LENGTH: usize = 64;

    /// Check a sign-up address, ignoring surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns the first [`EmailError`] that applies.
    pub fn parse(input: &str) -> Result<Self, EmailError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EmailError::Missing);
        }
        if input.chars().count() > Self::MAX_LENGTH {
            return Err(EmailError::TooLong { max: Self::MAX_LENGTH });
        }
        if input.chars().any(char::is_whitespace) {
            return Err(EmailError::ContainsWhitespace);
        }

        let (mailbox, domain) = match input.split_once('@') {
            Some((m, d)) if !m.is_empty() && !d.is_empty() && !d.contains('@') => (m, d),
            _ => return Err(EmailError::NotAnAddress),
        };
        if mailbox.chars().count() > Self::MAX_MAILBOX_LENGTH {
            return Err(EmailError::MailboxTooLong {
                max: Self::MAX_MAILBOX_LENGTH,
            });
        }
        if domain.split('.').count() < 2 || domain.split('.').any(str::is_empty) {
            return Err(EmailError::IncompleteDomain(domain.to_owned()));
        }

        Ok(Self(format!("{mailbox}@{}", domain.to_ascii_lowercase())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
