//! Cartwheel Core - Shared types library.
//!
//! This crate provides the types shared by every Cartwheel component:
//! - `storefront` - Cart/session synchronization client library
//! - `cli` - Command-line storefront shell
//! - `integration-tests` - Reference backend and end-to-end tests
//!
//! # Architecture
//!
//! The core crate contains only types and pure derivations - no I/O, no HTTP
//! clients, no storage. Anything that touches the network or the disk lives in
//! `cartwheel-storefront`.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, prices, emails, session identifiers, products
//!   and cart line items

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
