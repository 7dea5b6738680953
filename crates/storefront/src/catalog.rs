//! Read-only product catalog.
//!
//! Wraps the catalog endpoints of [`ApiClient`] with a `moka` cache. Product
//! lists and single products are cached for the configured TTL; search
//! results are not cached.

use std::time::Duration;

use cartwheel_core::{Product, ProductId};
use moka::future::Cache;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::remote::{ApiClient, RemoteError};

/// Catalog lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Search was called with a blank query.
    #[error("search query is empty")]
    EmptyQuery,

    #[error("product not found: {0}")]
    NotFound(ProductId),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Cache key for catalog responses.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum CacheKey {
    Product(ProductId),
    AllProducts,
}

/// Cached value types.
#[derive(Debug, Clone)]
enum CacheValue {
    Product(Box<Product>),
    Products(Vec<Product>),
}

/// Product catalog with a response cache.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct ProductCatalog {
    api: ApiClient,
    cache: Cache<CacheKey, CacheValue>,
}

impl ProductCatalog {
    #[must_use]
    pub fn new(api: ApiClient, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(ttl)
            .build();
        Self { api, cache }
    }

    /// Every product.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Remote`] if the request fails.
    #[instrument(skip(self))]
    pub async fn list_products(&self) -> Result<Vec<Product>, CatalogError> {
        if let Some(CacheValue::Products(products)) = self.cache.get(&CacheKey::AllProducts).await {
            debug!("Cache hit for product list");
            return Ok(products);
        }

        let products = self.api.list_products().await?;
        self.cache
            .insert(CacheKey::AllProducts, CacheValue::Products(products.clone()))
            .await;
        Ok(products)
    }

    /// Products whose name matches `query`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::EmptyQuery`] for a blank query, or
    /// [`CatalogError::Remote`] if the request fails.
    #[instrument(skip(self))]
    pub async fn search_products(&self, query: &str) -> Result<Vec<Product>, CatalogError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CatalogError::EmptyQuery);
        }
        Ok(self.api.search_products(query).await?)
    }

    /// One product.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotFound`] if the backend answers 404, or
    /// [`CatalogError::Remote`] for other failures.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn get_product(&self, id: ProductId) -> Result<Product, CatalogError> {
        let key = CacheKey::Product(id);
        if let Some(CacheValue::Product(product)) = self.cache.get(&key).await {
            debug!("Cache hit for product");
            return Ok(*product);
        }

        let product = match self.api.get_product(id).await {
            Ok(product) => product,
            Err(RemoteError::Rejected(404)) => return Err(CatalogError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };
        self.cache
            .insert(key, CacheValue::Product(Box::new(product.clone())))
            .await;
        Ok(product)
    }

    /// Drop every cached response.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }
}
