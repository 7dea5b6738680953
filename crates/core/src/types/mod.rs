//! Core types for Cartwheel.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod cart;
pub mod email;
pub mod id;
pub mod price;
pub mod product;
pub mod session;

pub use cart::{Cart, CartError, CartLineItem, CartSummary, ChangeEvent, DeltaOutcome};
pub use email::{Email, EmailError};
pub use id::*;
pub use price::{CurrencyCode, Price, PriceError};
pub use product::Product;
pub use session::{SessionId, SessionIdError};
