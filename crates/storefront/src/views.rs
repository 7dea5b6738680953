//! Display models for the cart page and header badge.
//!
//! The cart page always shows the authoritative cart: it reads the remote
//! store on load and after every action instead of trusting the local cache.

use std::fmt;

use cartwheel_core::{Cart, CartLineItem, ProductId, SessionId};
use tracing::{debug, instrument, warn};

use crate::mutation::{CartMutationClient, MutationError};
use crate::projector::CartDisplay;
use crate::remote::RemoteError;

// =============================================================================
// Cart view
// =============================================================================

/// One cart line, formatted for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItemView {
    pub line_id: String,
    pub product_id: ProductId,
    pub title: String,
    pub category: Option<String>,
    pub quantity: u32,
    pub price: String,
    pub line_price: String,
    pub image: Option<String>,
    /// The "-" control is disabled at quantity 1; use delete instead.
    pub can_decrement: bool,
}

impl From<&CartLineItem> for CartItemView {
    fn from(line: &CartLineItem) -> Self {
        Self {
            line_id: line.line_id.to_string(),
            product_id: line.product_id,
            title: line.product_name.clone(),
            category: line.category.clone(),
            quantity: line.quantity,
            price: line.unit_price.display(),
            line_price: line.line_total().display(),
            image: line.image_ref.clone(),
            can_decrement: line.quantity > 1,
        }
    }
}

/// The whole cart, formatted for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartView {
    pub items: Vec<CartItemView>,
    pub subtotal: String,
    pub item_count: u64,
}

impl CartView {
    /// An empty cart.
    #[must_use]
    pub fn empty() -> Self {
        Self::from(&Cart::empty())
    }

    /// The item for a product, if present.
    #[must_use]
    pub fn item(&self, product_id: ProductId) -> Option<&CartItemView> {
        self.items.iter().find(|i| i.product_id == product_id)
    }
}

impl From<&Cart> for CartView {
    fn from(cart: &Cart) -> Self {
        let summary = cart.summary();
        Self {
            items: cart.lines().iter().map(CartItemView::from).collect(),
            subtotal: summary.subtotal.display(),
            item_count: summary.item_count,
        }
    }
}

// =============================================================================
// Badge
// =============================================================================

/// Header cart badge: `Cart (3)`, or `Cart (?)` while the count is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadgeView {
    pub count: Option<u64>,
}

impl From<CartDisplay> for BadgeView {
    fn from(display: CartDisplay) -> Self {
        Self {
            count: display.item_count(),
        }
    }
}

impl fmt::Display for BadgeView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.count {
            Some(count) => write!(f, "Cart ({count})"),
            None => f.write_str("Cart (?)"),
        }
    }
}

// =============================================================================
// Cart page
// =============================================================================

/// What a page action did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The change was confirmed and the page reloaded.
    Applied,
    /// The control is disabled for this line (decrement at quantity 1).
    Disabled,
    /// The product is not in the displayed cart.
    NotInCart,
}

/// State behind the cart page.
pub struct CartPage {
    client: CartMutationClient,
    session: SessionId,
    view: Option<CartView>,
    last_error: Option<RemoteError>,
    retry: Option<(ProductId, i32)>,
}

impl CartPage {
    #[must_use]
    pub const fn new(client: CartMutationClient, session: SessionId) -> Self {
        Self {
            client,
            session,
            view: None,
            last_error: None,
            retry: None,
        }
    }

    /// Last successfully loaded view, if any.
    #[must_use]
    pub const fn view(&self) -> Option<&CartView> {
        self.view.as_ref()
    }

    /// Error from the most recent load or action, cleared on success.
    #[must_use]
    pub const fn last_error(&self) -> Option<&RemoteError> {
        self.last_error.as_ref()
    }

    /// Whether a failed action can be retried.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.retry.is_some()
    }

    /// Read the authoritative cart.
    ///
    /// On failure the previously loaded view stays in place.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the read fails.
    #[instrument(skip(self), fields(session_id = %self.session))]
    pub async fn load(&mut self) -> Result<&CartView, RemoteError> {
        match self.client.refresh(&self.session).await {
            Ok(refreshed) => {
                self.last_error = None;
                Ok(&*self.view.insert(CartView::from(&refreshed.cart)))
            }
            Err(e) => {
                warn!(error = %e, "cart page load failed");
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Add one unit.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] if the change is not confirmed.
    pub async fn increment(&mut self, product_id: ProductId) -> Result<ActionOutcome, MutationError> {
        if self.current_quantity(product_id).is_none() {
            return Ok(ActionOutcome::NotInCart);
        }
        self.submit(product_id, 1).await
    }

    /// Remove one unit. Disabled at quantity 1.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] if the change is not confirmed.
    pub async fn decrement(&mut self, product_id: ProductId) -> Result<ActionOutcome, MutationError> {
        match self.current_quantity(product_id) {
            None => Ok(ActionOutcome::NotInCart),
            Some(quantity) if quantity <= 1 => Ok(ActionOutcome::Disabled),
            Some(_) => self.submit(product_id, -1).await,
        }
    }

    /// Remove the whole line.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] if the change is not confirmed.
    pub async fn delete(&mut self, product_id: ProductId) -> Result<ActionOutcome, MutationError> {
        let Some(quantity) = self.current_quantity(product_id) else {
            return Ok(ActionOutcome::NotInCart);
        };
        let delta = -i32::try_from(quantity).unwrap_or(i32::MAX);
        self.submit(product_id, delta).await
    }

    /// Repeat the last failed action. Returns `None` if there is nothing to
    /// retry.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] if the change is not confirmed.
    pub async fn retry(&mut self) -> Option<Result<ActionOutcome, MutationError>> {
        let (product_id, delta) = self.retry?;
        Some(self.submit(product_id, delta).await)
    }

    fn current_quantity(&self, product_id: ProductId) -> Option<u32> {
        self.view
            .as_ref()
            .and_then(|view| view.item(product_id))
            .map(|item| item.quantity)
    }

    async fn submit(&mut self, product_id: ProductId, delta: i32) -> Result<ActionOutcome, MutationError> {
        let confirmed = match self.client.add_or_adjust(product_id, delta, &self.session).await {
            Ok(confirmed) => confirmed,
            Err(e) => {
                self.last_error = Some(e.clone());
                self.retry = Some((product_id, delta));
                return Err(e);
            }
        };
        self.retry = None;

        match confirmed {
            Some(cart) => {
                self.last_error = None;
                self.view = Some(CartView::from(&cart));
            }
            // No read came back with the change; a failed reload leaves the old view.
            None => {
                if let Err(e) = self.load().await {
                    debug!(error = %e, "reload after confirmed change failed");
                }
            }
        }
        Ok(ActionOutcome::Applied)
    }
}
