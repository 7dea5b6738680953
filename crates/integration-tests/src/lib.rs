//! End-to-end tests for the Cartwheel storefront client.
//!
//! The tests drive the real HTTP client against [`ReferenceBackend`], an
//! in-process `axum` server that follows the backend's cart semantics:
//!
//! - `POST /api/cart/add` applies a relative change; a line whose quantity
//!   drops to zero or below is removed, an absent line is only created by a
//!   positive change
//! - `GET /api/cart` resolves the cart from the bearer credential when one is
//!   attached, otherwise from the `sessionId` query parameter
//!
//! Failure injection (stalls, forced statuses, a stock limit) lets tests
//! exercise the client's recovery paths.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cartwheel-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cartwheel_storefront::remote::wire::{
    AddToCartBody, JwtResponse, SignInBody, SignUpBody, WireCartItem, WireProduct,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::task::JoinHandle;
use url::Url;

/// Build a catalog product. `price` is a decimal string such as `"24.50"`.
///
/// # Panics
///
/// Panics if `price` is not a decimal number.
#[must_use]
#[allow(clippy::expect_used)]
pub fn product(id: i64, name: &str, price: &str) -> WireProduct {
    WireProduct {
        id,
        name: name.to_string(),
        price: Decimal::from_str(price).expect("test prices are valid decimals"),
        image_url: Some(format!("/images/{id}.jpg")),
        category: Some("home".to_string()),
    }
}

/// Who a cart belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CartOwner {
    Session(String),
    User(i64),
}

struct Account {
    id: i64,
    email: String,
    password: String,
}

#[derive(Default)]
struct BackendState {
    products: Vec<WireProduct>,
    carts: HashMap<CartOwner, Vec<WireCartItem>>,
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, i64>,
    next_line_id: i64,
    next_user_id: i64,
    stock_limit: Option<i64>,
    stall: Option<Duration>,
    forced_statuses: VecDeque<StatusCode>,
    last_authorization: Option<String>,
    requests: usize,
}

impl BackendState {
    fn owner(&self, headers: &HeaderMap, session_id: Option<&str>) -> Option<CartOwner> {
        let user = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .and_then(|token| self.tokens.get(token));
        match (user, session_id) {
            (Some(&id), _) => Some(CartOwner::User(id)),
            (None, Some(session)) => Some(CartOwner::Session(session.to_string())),
            (None, None) => None,
        }
    }

    fn apply(&mut self, owner: CartOwner, product: WireProduct, delta: i64) {
        let limit = self.stock_limit;
        let clamp = |quantity: i64| limit.map_or(quantity, |limit| quantity.min(limit));
        let lines = self.carts.entry(owner).or_default();

        if let Some(index) = lines.iter().position(|line| line.product.id == product.id) {
            let quantity = lines.get(index).map_or(0, |line| line.quantity) + delta;
            if quantity <= 0 {
                lines.remove(index);
            } else if let Some(line) = lines.get_mut(index) {
                line.quantity = clamp(quantity);
            }
        } else if delta > 0 {
            self.next_line_id += 1;
            lines.push(WireCartItem {
                id: self.next_line_id,
                product,
                quantity: clamp(delta),
            });
        }
    }
}

type Shared = Arc<Mutex<BackendState>>;

fn lock(state: &Shared) -> MutexGuard<'_, BackendState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process storefront backend bound to an ephemeral local port.
///
/// The server stops when the value is dropped.
pub struct ReferenceBackend {
    addr: SocketAddr,
    state: Shared,
    server: JoinHandle<()>,
}

impl ReferenceBackend {
    /// Start a backend serving `products`.
    ///
    /// # Errors
    ///
    /// Returns an error if no local port can be bound.
    pub async fn start(products: Vec<WireProduct>) -> std::io::Result<Self> {
        let state: Shared = Arc::new(Mutex::new(BackendState {
            products,
            ..BackendState::default()
        }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = router(Arc::clone(&state));
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            addr,
            state,
            server,
        })
    }

    /// API root for [`StorefrontConfig`](cartwheel_storefront::config::StorefrontConfig).
    ///
    /// # Panics
    ///
    /// Never in practice: the address is a bound socket.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn api_url(&self) -> Url {
        Url::parse(&format!("http://{}/api", self.addr)).expect("socket address forms a valid URL")
    }

    /// Create an account directly, bypassing sign-up validation.
    pub fn register(&self, username: &str, email: &str, password: &str) -> i64 {
        let mut state = lock(&self.state);
        state.next_user_id += 1;
        let id = state.next_user_id;
        state.accounts.insert(
            username.to_string(),
            Account {
                id,
                email: email.to_string(),
                password: password.to_string(),
            },
        );
        id
    }

    /// Quantity of `product_id` in an anonymous session's cart.
    #[must_use]
    pub fn session_quantity(&self, session_id: &str, product_id: i64) -> i64 {
        self.quantity(&CartOwner::Session(session_id.to_string()), product_id)
    }

    /// Quantity of `product_id` in a user's cart.
    #[must_use]
    pub fn user_quantity(&self, user_id: i64, product_id: i64) -> i64 {
        self.quantity(&CartOwner::User(user_id), product_id)
    }

    fn quantity(&self, owner: &CartOwner, product_id: i64) -> i64 {
        lock(&self.state)
            .carts
            .get(owner)
            .and_then(|lines| lines.iter().find(|line| line.product.id == product_id))
            .map_or(0, |line| line.quantity)
    }

    /// Empty an anonymous session's cart behind the client's back, as a
    /// change from another tab or an expired cart would.
    pub fn clear_session_cart(&self, session_id: &str) {
        lock(&self.state)
            .carts
            .remove(&CartOwner::Session(session_id.to_string()));
    }

    /// Cap every line's quantity, as a backend with limited stock would.
    pub fn set_stock_limit(&self, limit: Option<i64>) {
        lock(&self.state).stock_limit = limit;
    }

    /// Hold every request for `stall`, then answer 503 without handling it.
    /// Pair with a shorter client request timeout to simulate an unreachable
    /// backend.
    pub fn set_stall(&self, stall: Option<Duration>) {
        lock(&self.state).stall = stall;
    }

    /// Answer the next request with `status` instead of handling it.
    pub fn fail_next(&self, status: StatusCode) {
        lock(&self.state).forced_statuses.push_back(status);
    }

    /// The `Authorization` header of the most recent request.
    #[must_use]
    pub fn last_authorization(&self) -> Option<String> {
        lock(&self.state).last_authorization.clone()
    }

    /// Requests received so far, including failed ones.
    #[must_use]
    pub fn request_count(&self) -> usize {
        lock(&self.state).requests
    }
}

impl Drop for ReferenceBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn router(state: Shared) -> Router {
    let api = Router::new()
        .route("/products", get(list_products))
        .route("/products/search", get(search_products))
        .route("/products/{id}", get(get_product))
        .route("/cart", get(get_cart))
        .route("/cart/add", post(add_to_cart))
        .route("/auth/signin", post(sign_in))
        .route("/auth/signup", post(sign_up));

    Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(Arc::clone(&state), faults))
        .with_state(state)
}

/// Record the request and apply any injected stall or forced status.
async fn faults(State(state): State<Shared>, request: Request, next: Next) -> Response {
    let (stall, forced) = {
        let mut state = lock(&state);
        state.requests += 1;
        state.last_authorization = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        (state.stall, state.forced_statuses.pop_front())
    };

    if let Some(stall) = stall {
        tokio::time::sleep(stall).await;
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if let Some(status) = forced {
        return status.into_response();
    }
    next.run(request).await
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

async fn list_products(State(state): State<Shared>) -> Json<Vec<WireProduct>> {
    Json(lock(&state).products.clone())
}

async fn search_products(
    State(state): State<Shared>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<WireProduct>> {
    let needle = params.q.to_lowercase();
    let matches = lock(&state)
        .products
        .iter()
        .filter(|product| product.name.to_lowercase().contains(&needle))
        .cloned()
        .collect();
    Json(matches)
}

async fn get_product(State(state): State<Shared>, Path(id): Path<i64>) -> Response {
    lock(&state)
        .products
        .iter()
        .find(|product| product.id == id)
        .map_or_else(
            || StatusCode::NOT_FOUND.into_response(),
            |product| Json(product.clone()).into_response(),
        )
}

// =============================================================================
// Cart
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CartParams {
    session_id: Option<String>,
}

async fn get_cart(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<CartParams>,
) -> Response {
    let state = lock(&state);
    let Some(owner) = state.owner(&headers, params.session_id.as_deref()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    Json(state.carts.get(&owner).cloned().unwrap_or_default()).into_response()
}

async fn add_to_cart(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<AddToCartBody>,
) -> StatusCode {
    let mut state = lock(&state);
    let Some(product) = state
        .products
        .iter()
        .find(|product| product.id == body.product_id)
        .cloned()
    else {
        return StatusCode::NOT_FOUND;
    };
    let Some(owner) = state.owner(&headers, Some(&body.session_id)) else {
        return StatusCode::BAD_REQUEST;
    };

    state.apply(owner, product, i64::from(body.quantity));
    StatusCode::OK
}

// =============================================================================
// Auth
// =============================================================================

async fn sign_in(State(state): State<Shared>, Json(body): Json<SignInBody>) -> Response {
    let mut state = lock(&state);
    let Some((id, email)) = state
        .accounts
        .get(&body.username)
        .filter(|account| account.password == body.password)
        .map(|account| (account.id, account.email.clone()))
    else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let token = format!("token-{id}-{}", state.tokens.len() + 1);
    state.tokens.insert(token.clone(), id);
    Json(JwtResponse {
        access_token: token,
        token_type: "Bearer".to_string(),
        id,
        username: body.username,
        email: Some(email),
        roles: vec!["ROLE_USER".to_string()],
    })
    .into_response()
}

async fn sign_up(State(state): State<Shared>, Json(body): Json<SignUpBody>) -> Response {
    let mut state = lock(&state);
    if state.accounts.contains_key(&body.username) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"message": "Error: Username is already taken!"})),
        )
            .into_response();
    }

    state.next_user_id += 1;
    let id = state.next_user_id;
    state.accounts.insert(
        body.username,
        Account {
            id,
            email: body.email,
            password: body.password,
        },
    );
    Json(serde_json::json!({"message": "User registered successfully!"})).into_response()
}
