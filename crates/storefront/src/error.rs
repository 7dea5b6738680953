//! Unified error handling with Sentry integration.
//!
//! Each concern has its own error type; [`ClientError`] gathers them for
//! callers (the CLI) that drive several concerns at once. Cart and projector
//! code recovers from remote failures locally and never raises them this far.

use thiserror::Error;

use crate::auth::AuthError;
use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::remote::RemoteError;
use crate::storage::StorageError;

/// Client-level error type for the storefront.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Durable client storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Backend request failed.
    #[error("Backend error: {0}")]
    Remote(#[from] RemoteError),

    /// Authentication operation failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Catalog lookup failed.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ClientError {
    /// Whether this error points at a defect or broken environment rather
    /// than an expected condition (bad input, backend down).
    #[must_use]
    pub const fn is_unexpected(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Storage(_)
                | Self::Http(_)
                | Self::Remote(RemoteError::Malformed(_))
                | Self::Auth(AuthError::Storage(_) | AuthError::Remote(RemoteError::Malformed(_)))
                | Self::Catalog(CatalogError::Remote(RemoteError::Malformed(_)))
        )
    }

    /// Log the error and, if it is unexpected, send it to Sentry.
    pub fn report(&self) {
        if self.is_unexpected() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Command error"
            );
        } else {
            tracing::error!(error = %self, "Command failed");
        }
    }
}

/// Result type alias for `ClientError`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of cart and
/// auth actions leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Adjusting cart quantity", Some(&[("product_id", "7")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_display() {
        let err = ClientError::from(RemoteError::Rejected(502));
        assert_eq!(
            err.to_string(),
            "Backend error: backend rejected request with status 502"
        );

        let err = ClientError::from(CatalogError::EmptyQuery);
        assert_eq!(err.to_string(), "Catalog error: search query is empty");
    }

    #[test]
    fn test_expected_errors_are_not_captured() {
        assert!(!ClientError::from(RemoteError::Unreachable).is_unexpected());
        assert!(!ClientError::from(AuthError::InvalidCredentials).is_unexpected());
        assert!(!ClientError::from(CatalogError::EmptyQuery).is_unexpected());

        assert!(ClientError::from(RemoteError::Malformed("bad".to_string())).is_unexpected());
        assert!(
            ClientError::from(StorageError::InvalidKey("a/b".to_string())).is_unexpected()
        );
    }

    #[test]
    fn test_breadcrumb_without_client_is_harmless() {
        add_breadcrumb("cart", "Adjusting cart quantity", Some(&[("product_id", "7")]));
        clear_sentry_user();
    }
}
