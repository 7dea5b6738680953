//! Clients for the storefront backend.
//!
//! # Architecture
//!
//! - The backend is the source of truth for carts - the client never decides
//!   what a cart contains, it only sends deltas and reads results back
//! - [`ApiClient`] speaks HTTP/JSON with `reqwest`
//! - [`CartRemote`] is the seam the cart synchronization code depends on, so
//!   the mutation client can run against the HTTP client or an in-memory store
//!
//! # Endpoints
//!
//! ## Cart
//! - `GET /cart?sessionId={id}` - authoritative line items
//! - `POST /cart/add` - relative quantity change `{ productId, quantity, sessionId }`
//!
//! ## Catalog
//! - `GET /products`, `GET /products/search?q=`, `GET /products/{id}`
//!
//! ## Auth
//! - `POST /auth/signin`, `POST /auth/signup`

mod http;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod wire;

pub use http::ApiClient;

use async_trait::async_trait;
use cartwheel_core::{Cart, ProductId, SessionId};
use thiserror::Error;

/// Failure talking to the backend.
///
/// Every remote failure falls in one of three buckets; callers recover from
/// all of them locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// No response was received (connect failure, reset, timeout).
    #[error("backend unreachable")]
    Unreachable,

    /// The backend answered with a non-success status.
    #[error("backend rejected request with status {0}")]
    Rejected(u16),

    /// The response body does not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Classify a transport error.
    pub(crate) fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Rejected(status.as_u16())
        } else {
            Self::Unreachable
        }
    }
}

/// The authoritative cart store.
#[async_trait]
pub trait CartRemote: Send + Sync {
    /// Read the cart addressed by `session` (or by the signed-in user, which
    /// the backend resolves from the bearer credential).
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the backend cannot be reached, rejects the
    /// request, or returns data that violates the cart invariants.
    async fn fetch_cart(&self, session: &SessionId) -> Result<Cart, RemoteError>;

    /// Apply a relative quantity change to one product's line.
    ///
    /// The backend decides the resulting quantity: it removes the line when
    /// the result is zero or less and may clamp at a stock limit.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the backend cannot be reached or rejects
    /// the change.
    async fn add_or_adjust(
        &self,
        session: &SessionId,
        product_id: ProductId,
        delta: i32,
    ) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        assert_eq!(RemoteError::Unreachable.to_string(), "backend unreachable");
        assert_eq!(
            RemoteError::Rejected(503).to_string(),
            "backend rejected request with status 503"
        );
        assert_eq!(
            RemoteError::Malformed("missing field `id`".to_string()).to_string(),
            "malformed response: missing field `id`"
        );
    }
}
