//! Catalog product.

use serde::{Deserialize, Serialize};

use super::id::ProductId;
use super::price::Price;

/// A product as listed by the catalog service.
///
/// The cart references products by [`ProductId`] only; line items carry a
/// denormalized copy of the fields they display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Price,
    pub category: Option<String>,
    /// Image URL as given by the backend; rendering it is not our concern.
    pub image_ref: Option<String>,
}
