//! Client context shared by every UI region.
//!
//! One [`CartContext`] is created at startup and handed to each component.
//! It owns the single local cart cache, update bus and session provider for
//! the process; nothing in this crate keeps global state.

use std::sync::Arc;

use cartwheel_core::{ProductId, SessionId};
use tracing::{info, warn};

use crate::auth::AuthClient;
use crate::bus::UpdateBus;
use crate::cache::LocalCartCache;
use crate::catalog::ProductCatalog;
use crate::config::StorefrontConfig;
use crate::error::Result;
use crate::mutation::CartMutationClient;
use crate::projector::CartViewProjector;
use crate::remote::{ApiClient, CartRemote};
use crate::sequence::RequestSequencer;
use crate::session::SessionIdentityProvider;
use crate::storage::{FileStore, KeyValueStore, StorageError};
use crate::views::CartPage;

/// Shared client state.
///
/// This struct is cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct CartContext {
    inner: Arc<CartContextInner>,
}

struct CartContextInner {
    config: StorefrontConfig,
    store: Arc<dyn KeyValueStore>,
    sessions: SessionIdentityProvider,
    api: ApiClient,
    catalog: ProductCatalog,
    auth: AuthClient,
    cart: CartMutationClient,
}

impl CartContext {
    /// Create the context from configuration: file storage under
    /// `config.data_dir` and the HTTP backend at `config.api_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created or the HTTP
    /// client cannot be built.
    pub fn new(config: StorefrontConfig) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.data_dir)?);
        let api = ApiClient::new(&config.api_url, config.request_timeout)?;
        let remote: Arc<dyn CartRemote> = Arc::new(api.clone());
        Ok(Self::from_parts(config, store, api, remote))
    }

    /// Assemble the context from explicit collaborators.
    ///
    /// `remote` serves cart reads and mutations; `api` serves the catalog and
    /// auth. Restores the cart snapshot and stored credential, if present.
    #[must_use]
    pub fn from_parts(
        config: StorefrontConfig,
        store: Arc<dyn KeyValueStore>,
        api: ApiClient,
        remote: Arc<dyn CartRemote>,
    ) -> Self {
        let sequencer = Arc::new(RequestSequencer::new());
        let cache = LocalCartCache::new(config.cache_policy, Arc::clone(&sequencer), Arc::clone(&store));
        cache.restore();

        let bus = UpdateBus::new();
        let cart = CartMutationClient::new(remote, cache.clone(), bus.clone(), sequencer);
        let catalog = ProductCatalog::new(api.clone(), config.catalog_cache_ttl);
        let auth = AuthClient::new(api.clone(), Arc::clone(&store), bus, cache);
        match auth.restore() {
            Ok(Some(user)) => info!(user_id = %user.id, "restored signed-in user"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to restore stored credential"),
        }

        Self {
            inner: Arc::new(CartContextInner {
                sessions: SessionIdentityProvider::new(Arc::clone(&store)),
                config,
                store,
                api,
                catalog,
                auth,
                cart,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Durable client storage.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionIdentityProvider {
        &self.inner.sessions
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    #[must_use]
    pub fn catalog(&self) -> &ProductCatalog {
        &self.inner.catalog
    }

    #[must_use]
    pub fn auth(&self) -> &AuthClient {
        &self.inner.auth
    }

    /// The cart mutation client (and through it, the cache and bus).
    #[must_use]
    pub fn cart(&self) -> &CartMutationClient {
        &self.inner.cart
    }

    #[must_use]
    pub fn cache(&self) -> &LocalCartCache {
        self.inner.cart.cache()
    }

    #[must_use]
    pub fn bus(&self) -> &UpdateBus {
        self.inner.cart.bus()
    }

    /// The persisted session id, created on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if client storage fails.
    pub fn session_id(&self) -> std::result::Result<SessionId, StorageError> {
        self.inner.sessions.get_or_create_session_id()
    }

    /// Change a product's quantity in the current session's cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the session id cannot be loaded or the mutation
    /// is not confirmed.
    pub async fn add_or_adjust(&self, product_id: ProductId, delta: i32) -> Result<()> {
        let session = self.session_id()?;
        self.inner.cart.add_or_adjust(product_id, delta, &session).await?;
        Ok(())
    }

    /// Mount a header badge projector for the current session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session id cannot be loaded.
    pub async fn mount_badge(&self) -> std::result::Result<CartViewProjector, StorageError> {
        let session = self.session_id()?;
        Ok(CartViewProjector::mount(self.inner.cart.clone(), session).await)
    }

    /// A cart page for the current session. Call [`CartPage::load`] to fill
    /// it.
    ///
    /// # Errors
    ///
    /// Returns an error if the session id cannot be loaded.
    pub fn cart_page(&self) -> std::result::Result<CartPage, StorageError> {
        let session = self.session_id()?;
        Ok(CartPage::new(self.inner.cart.clone(), session))
    }
}
