//! HTTP client for the storefront backend.
//!
//! Uses `reqwest` 0.13 with JSON bodies. Response bodies are read as text
//! first so parse failures can be logged with the offending payload.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use cartwheel_core::{Cart, Product, ProductId, SessionId};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use super::wire::{
    AddToCartBody, JwtResponse, SignInBody, SignUpBody, WireCartItem, WireProduct,
    convert_cart, convert_product,
};
use super::{CartRemote, RemoteError};

/// Longest body excerpt included in log lines.
const LOG_BODY_LIMIT: usize = 500;

// =============================================================================
// ApiClient
// =============================================================================

/// Client for the storefront backend's REST API.
///
/// Cheap to clone; clones share the connection pool and the bearer
/// credential, so signing in through one handle authenticates all of them.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    base_url: Url,
    bearer: RwLock<Option<SecretString>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

impl ApiClient {
    /// Create a client rooted at `base_url` (e.g. `http://localhost:8080/api`).
    ///
    /// `timeout` bounds each whole request; `None` keeps the network-layer
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(base_url: &Url, timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        // Url::join drops the last path segment unless it ends with '/'.
        let mut base_url = base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            inner: Arc::new(ApiClientInner {
                client: builder.build()?,
                base_url,
                bearer: RwLock::new(None),
            }),
        })
    }

    /// Base URL every endpoint is resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Attach (or with `None`, stop attaching) a bearer credential.
    pub fn set_bearer_token(&self, token: Option<SecretString>) {
        let mut bearer = self
            .inner
            .bearer
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *bearer = token;
    }

    /// Whether requests currently carry a bearer credential.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner
            .bearer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.inner
            .base_url
            .join(path)
            .map_err(|e| RemoteError::Malformed(format!("invalid endpoint {path}: {e}")))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let bearer = self
            .inner
            .bearer
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match bearer.as_ref() {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Send a request and return the body of a success response.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, RemoteError> {
        let response = self.authorize(request).send().await.map_err(|e| {
            warn!(error = %e, "backend request failed");
            RemoteError::from_transport(&e)
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            warn!(error = %e, "failed to read backend response body");
            RemoteError::from_transport(&e)
        })?;

        if !status.is_success() {
            warn!(
                status = %status,
                body = %excerpt(&body),
                "backend returned non-success status"
            );
            return Err(RemoteError::Rejected(status.as_u16()));
        }

        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        let body = self.send(self.inner.client.get(url)).await?;
        parse_json(&body)
    }

    async fn post_json<B: Serialize + Sync>(&self, url: Url, body: &B) -> Result<String, RemoteError> {
        self.send(self.inner.client.post(url).json(body)).await
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// List every product.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the request fails or the response is invalid.
    #[instrument(skip(self))]
    pub async fn list_products(&self) -> Result<Vec<Product>, RemoteError> {
        let url = self.endpoint("products")?;
        let products: Vec<WireProduct> = self.get_json(url).await?;
        products.into_iter().map(convert_product).collect()
    }

    /// Search products by name.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the request fails or the response is invalid.
    #[instrument(skip(self), fields(query = %query))]
    pub async fn search_products(&self, query: &str) -> Result<Vec<Product>, RemoteError> {
        let mut url = self.endpoint("products/search")?;
        url.query_pairs_mut().append_pair("q", query);
        let products: Vec<WireProduct> = self.get_json(url).await?;
        products.into_iter().map(convert_product).collect()
    }

    /// Fetch one product.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Rejected`] with 404 if the product does not
    /// exist, or another [`RemoteError`] if the request fails.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn get_product(&self, id: ProductId) -> Result<Product, RemoteError> {
        let url = self.endpoint(&format!("products/{id}"))?;
        let product: WireProduct = self.get_json(url).await?;
        convert_product(product)
    }

    // =========================================================================
    // Auth
    // =========================================================================

    /// Exchange a username and password for a bearer credential.
    ///
    /// Does not attach the credential; the caller decides whether to keep it.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Rejected`] if the credentials are refused.
    #[instrument(skip(self, password), fields(username = %username))]
    pub async fn sign_in(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<JwtResponse, RemoteError> {
        let url = self.endpoint("auth/signin")?;
        let body = SignInBody {
            username: username.to_string(),
            password: password.expose_secret().to_string(),
        };
        let response = self.post_json(url, &body).await?;
        parse_json(&response)
    }

    /// Register a new account.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Rejected`] if the backend refuses the
    /// registration (for example, a taken username).
    #[instrument(skip(self, password), fields(username = %username))]
    pub async fn sign_up(
        &self,
        username: &str,
        email: &str,
        password: &SecretString,
    ) -> Result<(), RemoteError> {
        let url = self.endpoint("auth/signup")?;
        let body = SignUpBody {
            username: username.to_string(),
            email: email.to_string(),
            password: password.expose_secret().to_string(),
            role: None,
        };
        self.post_json(url, &body).await.map(|_| ())
    }
}

#[async_trait]
impl CartRemote for ApiClient {
    #[instrument(skip(self), fields(session_id = %session))]
    async fn fetch_cart(&self, session: &SessionId) -> Result<Cart, RemoteError> {
        let mut url = self.endpoint("cart")?;
        url.query_pairs_mut().append_pair("sessionId", session.as_str());

        let items: Vec<WireCartItem> = self.get_json(url).await?;
        debug!(lines = items.len(), "fetched cart");
        convert_cart(items)
    }

    #[instrument(skip(self), fields(session_id = %session, product_id = %product_id, delta))]
    async fn add_or_adjust(
        &self,
        session: &SessionId,
        product_id: ProductId,
        delta: i32,
    ) -> Result<(), RemoteError> {
        let url = self.endpoint("cart/add")?;
        let body = AddToCartBody::new(session, product_id, delta);
        self.post_json(url, &body).await.map(|_| ())
    }
}

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, RemoteError> {
    serde_json::from_str(body).map_err(|e| {
        warn!(
            error = %e,
            body = %excerpt(body),
            "failed to parse backend response"
        );
        RemoteError::Malformed(e.to_string())
    })
}

fn excerpt(body: &str) -> String {
    body.chars().take(LOG_BODY_LIMIT).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(&Url::parse(base).unwrap(), None).unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let api = client("http://localhost:8080/api");
        assert_eq!(
            api.endpoint("cart/add").unwrap().as_str(),
            "http://localhost:8080/api/cart/add"
        );

        let api = client("http://localhost:8080/api/");
        assert_eq!(
            api.endpoint("products/7").unwrap().as_str(),
            "http://localhost:8080/api/products/7"
        );
    }

    #[test]
    fn test_bearer_token_toggle() {
        let api = client("http://localhost:8080/api");
        assert!(!api.is_authenticated());

        api.set_bearer_token(Some(SecretString::from("t0k")));
        assert!(api.clone().is_authenticated());

        api.set_bearer_token(None);
        assert!(!api.is_authenticated());
    }

    #[test]
    fn test_debug_hides_token() {
        let api = client("http://localhost:8080/api");
        api.set_bearer_token(Some(SecretString::from("super_secret_token")));
        let debug = format!("{api:?}");
        assert!(debug.contains("authenticated: true"));
        assert!(!debug.contains("super_secret_token"));
    }

    #[test]
    fn test_parse_json_maps_to_malformed() {
        let result: Result<Vec<WireCartItem>, _> = parse_json("{\"not\": \"a list\"}");
        assert!(matches!(result, Err(RemoteError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        // Port 9 (discard) on localhost is closed in test environments.
        let api = client("http://127.0.0.1:9/api");
        let session = SessionId::parse("abc").unwrap();
        let result = api.fetch_cart(&session).await;
        assert_eq!(result.unwrap_err(), RemoteError::Unreachable);
    }
}
