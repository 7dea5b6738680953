//! Cart line items, carts, and derived summaries.
//!
//! A [`Cart`] holds at most one line per product and never stores a line with
//! quantity zero: a line whose quantity reaches zero is deleted. The
//! [`CartSummary`] is always recomputed from the lines it describes.

use serde::{Deserialize, Serialize};

use super::id::{LineId, ProductId};
use super::price::{CurrencyCode, Price};

/// Errors raised when cart data violates the cart invariants.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CartError {
    /// Two lines reference the same product.
    #[error("cart contains more than one line for product {0}")]
    DuplicateProduct(ProductId),
}

/// One entry of a cart.
///
/// Owned by the remote cart store; clients hold denormalized, possibly stale
/// copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineItem {
    /// Server-assigned identifier, stable for the lifetime of the entry.
    pub line_id: LineId,
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Price,
    pub quantity: u32,
    pub image_ref: Option<String>,
    pub category: Option<String>,
}

impl CartLineItem {
    /// Unit price times quantity.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.unit_price.times(self.quantity)
    }
}

/// Outcome of applying a quantity delta to a cart locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// The line now has this quantity.
    Updated(u32),
    /// The line reached zero and was deleted.
    Removed,
    /// No line exists and the delta did not add one (zero or negative).
    Unchanged,
    /// No line exists and the delta is positive; product details are needed
    /// to create it, so only the remote store can produce the line.
    MissingLine,
}

/// A set of line items, unique by product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLineItem>,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub const fn empty() -> Self {
        Self { lines: Vec::new() }
    }

    /// Build a cart from line items, dropping zero-quantity lines.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::DuplicateProduct`] if two lines share a product.
    pub fn from_lines(lines: Vec<CartLineItem>) -> Result<Self, CartError> {
        let mut kept: Vec<CartLineItem> = Vec::with_capacity(lines.len());
        for line in lines {
            if line.quantity == 0 {
                continue;
            }
            if kept.iter().any(|l| l.product_id == line.product_id) {
                return Err(CartError::DuplicateProduct(line.product_id));
            }
            kept.push(line);
        }
        Ok(Self { lines: kept })
    }

    /// Line items in the order the store returned them.
    #[must_use]
    pub fn lines(&self) -> &[CartLineItem] {
        &self.lines
    }

    /// Consume the cart, returning its line items.
    #[must_use]
    pub fn into_lines(self) -> Vec<CartLineItem> {
        self.lines
    }

    /// Whether the cart holds no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The line for a product, if present.
    #[must_use]
    pub fn line(&self, product_id: ProductId) -> Option<&CartLineItem> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    /// Quantity held for a product (zero when absent).
    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.line(product_id).map_or(0, |l| l.quantity)
    }

    /// Apply a relative quantity change to an existing line.
    ///
    /// Quantities saturate at zero and a line reaching zero is removed.
    pub fn apply_delta(&mut self, product_id: ProductId, delta: i32) -> DeltaOutcome {
        let Some(pos) = self.lines.iter().position(|l| l.product_id == product_id) else {
            return if delta > 0 {
                DeltaOutcome::MissingLine
            } else {
                DeltaOutcome::Unchanged
            };
        };

        let current = i64::from(self.lines.get(pos).map_or(0, |l| l.quantity));
        let next = (current + i64::from(delta)).max(0);
        if next == 0 {
            self.lines.remove(pos);
            return DeltaOutcome::Removed;
        }

        let next = u32::try_from(next).unwrap_or(u32::MAX);
        if let Some(line) = self.lines.get_mut(pos) {
            line.quantity = next;
        }
        DeltaOutcome::Updated(next)
    }

    /// Derive the item count and subtotal from the current lines.
    #[must_use]
    pub fn summary(&self) -> CartSummary {
        CartSummary::of(&self.lines)
    }
}

/// Derived totals for a set of line items.
///
/// Never stored on its own; compute it from the lines every time it is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSummary {
    pub item_count: u64,
    pub subtotal: Price,
}

impl CartSummary {
    /// Sum quantities and line totals.
    #[must_use]
    pub fn of(lines: &[CartLineItem]) -> Self {
        let currency = lines
            .first()
            .map_or(CurrencyCode::default(), |l| l.unit_price.currency_code());

        lines.iter().fold(
            Self {
                item_count: 0,
                subtotal: Price::zero(currency),
            },
            |acc, line| Self {
                item_count: acc.item_count + u64::from(line.quantity),
                subtotal: acc.subtotal.plus(line.line_total()),
            },
        )
    }
}

/// Signal that the authoritative cart for the current session may have
/// changed.
///
/// Carries no payload: receivers re-derive their state instead of trusting
/// values attached to the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeEvent;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn line(product: i64, quantity: u32, cents: i64) -> CartLineItem {
        CartLineItem {
            line_id: LineId::new(product * 10),
            product_id: ProductId::new(product),
            product_name: format!("Product {product}"),
            unit_price: Price::usd(Decimal::new(cents, 2)).unwrap(),
            quantity,
            image_ref: None,
            category: Some("books".to_string()),
        }
    }

    #[test]
    fn test_from_lines_drops_zero_quantity() {
        let cart = Cart::from_lines(vec![line(1, 0, 100), line(2, 3, 100)]).unwrap();
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.quantity_of(ProductId::new(1)), 0);
        assert_eq!(cart.quantity_of(ProductId::new(2)), 3);
    }

    #[test]
    fn test_from_lines_rejects_duplicate_products() {
        let result = Cart::from_lines(vec![line(1, 1, 100), line(1, 2, 100)]);
        assert_eq!(result, Err(CartError::DuplicateProduct(ProductId::new(1))));
    }

    #[test]
    fn test_summary_sums_quantity_and_subtotal() {
        let cart = Cart::from_lines(vec![line(1, 2, 1999), line(2, 1, 500)]).unwrap();
        let summary = cart.summary();
        assert_eq!(summary.item_count, 3);
        assert_eq!(summary.subtotal.display(), "$44.98");
    }

    #[test]
    fn test_summary_of_empty_cart() {
        let summary = Cart::empty().summary();
        assert_eq!(summary.item_count, 0);
        assert_eq!(summary.subtotal.display(), "$0.00");
    }

    #[test]
    fn test_apply_delta_adjusts_and_removes() {
        let mut cart = Cart::from_lines(vec![line(7, 2, 100)]).unwrap();
        assert_eq!(
            cart.apply_delta(ProductId::new(7), 1),
            DeltaOutcome::Updated(3)
        );
        assert_eq!(cart.apply_delta(ProductId::new(7), -3), DeltaOutcome::Removed);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_apply_delta_saturates_at_zero() {
        let mut cart = Cart::from_lines(vec![line(7, 2, 100)]).unwrap();
        assert_eq!(
            cart.apply_delta(ProductId::new(7), -10),
            DeltaOutcome::Removed
        );
    }

    #[test]
    fn test_apply_delta_on_absent_line() {
        let mut cart = Cart::empty();
        assert_eq!(
            cart.apply_delta(ProductId::new(7), 2),
            DeltaOutcome::MissingLine
        );
        assert_eq!(
            cart.apply_delta(ProductId::new(7), -1),
            DeltaOutcome::Unchanged
        );
        assert!(cart.is_empty());
    }
}
