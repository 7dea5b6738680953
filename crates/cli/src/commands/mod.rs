//! Command implementations.
//!
//! Each command writes its result to the given writer and returns errors to
//! `main`, which reports them and exits with status 1.

pub mod auth;
pub mod cart;
pub mod products;
pub mod session;

use cartwheel_storefront::ClientError;
use cartwheel_storefront::auth::AuthError;
use cartwheel_storefront::catalog::CatalogError;
use cartwheel_storefront::remote::RemoteError;
use cartwheel_storefront::storage::StorageError;
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Writing command output failed.
    #[error("Output error: {0}")]
    Output(#[from] std::io::Error),
}

impl CliError {
    /// Log the error; unexpected client errors also go to Sentry.
    pub fn report(&self) {
        match self {
            Self::Client(e) => e.report(),
            Self::Output(e) => tracing::error!(error = %e, "Command failed"),
        }
    }
}

macro_rules! client_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for CliError {
                fn from(err: $ty) -> Self {
                    Self::Client(ClientError::from(err))
                }
            }
        )*
    };
}

client_error_from!(RemoteError, StorageError, AuthError, CatalogError);
