//! Cartwheel storefront client library.
//!
//! Keeps a shopping cart consistent across independent UI regions of one
//! client process. The remote backend owns the cart; this crate issues
//! relative quantity changes against it, keeps an advisory local copy for the
//! header badge, and tells every region when the cart may have changed.
//!
//! # Layout
//!
//! - [`state::CartContext`] - one per process, handed to every component
//! - [`session`] - the persisted anonymous session id
//! - [`remote`] - HTTP client for the cart, catalog and auth endpoints
//! - [`mutation`] - the only writer of the local cache
//! - [`cache`] - the local cart copy and its update policy
//! - [`bus`] - process-local "cart changed" broadcast
//! - [`projector`] - a region's live cart count
//! - [`views`] - cart page and badge display models

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod auth;
pub mod bus;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod mutation;
pub mod projector;
pub mod remote;
pub mod sequence;
pub mod session;
pub mod state;
pub mod storage;
pub mod views;

pub use error::{ClientError, Result};
pub use state::CartContext;
