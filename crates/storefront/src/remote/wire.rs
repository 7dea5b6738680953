//! JSON shapes exchanged with the backend, and their conversion to domain
//! types.
//!
//! Wire types mirror the backend's field names exactly (camelCase). Nothing
//! outside `remote` handles them; conversions validate the cart invariants and
//! turn violations into [`RemoteError::Malformed`].

use cartwheel_core::{
    Cart, CartLineItem, LineId, Price, Product, ProductId, SessionId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::RemoteError;

// =============================================================================
// Catalog
// =============================================================================

/// Product as returned by `/products` and embedded in cart items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireProduct {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

// =============================================================================
// Cart
// =============================================================================

/// One element of the `GET /cart` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCartItem {
    pub id: i64,
    pub product: WireProduct,
    pub quantity: i64,
}

/// Body of `POST /cart/add`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartBody {
    pub product_id: i64,
    /// Relative change, not the resulting quantity.
    pub quantity: i32,
    pub session_id: String,
}

impl AddToCartBody {
    #[must_use]
    pub fn new(session: &SessionId, product_id: ProductId, delta: i32) -> Self {
        Self {
            product_id: product_id.as_i64(),
            quantity: delta,
            session_id: session.as_str().to_string(),
        }
    }
}

// =============================================================================
// Auth
// =============================================================================

/// Body of `POST /auth/signin`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInBody {
    pub username: String,
    pub password: String,
}

/// Body of `POST /auth/signup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpBody {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Vec<String>>,
}

/// Successful sign-in response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtResponse {
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default = "default_token_type", alias = "type")]
    pub token_type: String,
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl JwtResponse {
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        UserId::new(self.id)
    }
}

// =============================================================================
// Conversions
// =============================================================================

/// Convert a catalog product.
///
/// # Errors
///
/// Returns [`RemoteError::Malformed`] if the price is negative.
pub fn convert_product(product: WireProduct) -> Result<Product, RemoteError> {
    let price = Price::usd(product.price)
        .map_err(|e| RemoteError::Malformed(format!("product {}: {e}", product.id)))?;

    Ok(Product {
        id: ProductId::new(product.id),
        name: product.name,
        price,
        category: product.category,
        image_ref: product.image_url,
    })
}

/// Convert one cart entry.
///
/// # Errors
///
/// Returns [`RemoteError::Malformed`] if the quantity is negative or out of
/// range, or the embedded product is invalid.
pub fn convert_cart_item(item: WireCartItem) -> Result<CartLineItem, RemoteError> {
    let quantity = u32::try_from(item.quantity).map_err(|_| {
        RemoteError::Malformed(format!(
            "cart line {} has invalid quantity {}",
            item.id, item.quantity
        ))
    })?;
    let product = convert_product(item.product)?;

    Ok(CartLineItem {
        line_id: LineId::new(item.id),
        product_id: product.id,
        product_name: product.name,
        unit_price: product.price,
        quantity,
        image_ref: product.image_ref,
        category: product.category,
    })
}

/// Convert a whole `GET /cart` response.
///
/// Zero-quantity lines are dropped; two lines for one product are rejected.
///
/// # Errors
///
/// Returns [`RemoteError::Malformed`] if any line is invalid.
pub fn convert_cart(items: Vec<WireCartItem>) -> Result<Cart, RemoteError> {
    let lines = items
        .into_iter()
        .map(convert_cart_item)
        .collect::<Result<Vec<_>, _>>()?;
    Cart::from_lines(lines).map_err(|e| RemoteError::Malformed(e.to_string()))
}
