//! In-memory cart store with the backend's semantics.
//!
//! Used by unit and integration tests in place of the HTTP backend. Deltas are
//! applied the way the backend applies them: an existing line moves by the
//! delta and is deleted at zero or below; a missing line is created only for a
//! positive delta. An optional stock limit clamps quantities, and failures can
//! be injected per call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use cartwheel_core::{Cart, CartLineItem, LineId, Product, ProductId, SessionId};

use super::{CartRemote, RemoteError};

/// In-memory stand-in for the cart backend.
#[derive(Default)]
pub struct InMemoryCartRemote {
    state: Mutex<MemoryState>,
    fetches: AtomicUsize,
    mutations: AtomicUsize,
}

#[derive(Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    carts: HashMap<SessionId, Vec<CartLineItem>>,
    next_line_id: i64,
    stock_limit: Option<u32>,
    offline: bool,
    fail_mutations: VecDeque<RemoteError>,
    fail_fetches: VecDeque<RemoteError>,
}

impl InMemoryCartRemote {
    /// A store that knows the given products.
    #[must_use]
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let remote = Self::default();
        {
            let mut state = remote.lock();
            state.products = products.into_iter().map(|p| (p.id, p)).collect();
        }
        remote
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clamp every line at `limit` units.
    pub fn set_stock_limit(&self, limit: Option<u32>) {
        self.lock().stock_limit = limit;
    }

    /// Make every call fail with [`RemoteError::Unreachable`] while `true`.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Fail the next mutation with `err`.
    pub fn fail_next_mutation(&self, err: RemoteError) {
        self.lock().fail_mutations.push_back(err);
    }

    /// Fail the next fetch with `err`.
    pub fn fail_next_fetch(&self, err: RemoteError) {
        self.lock().fail_fetches.push_back(err);
    }

    /// Authoritative quantity for a product in a session's cart.
    #[must_use]
    pub fn quantity(&self, session: &SessionId, product_id: ProductId) -> u32 {
        self.lock()
            .carts
            .get(session)
            .and_then(|lines| lines.iter().find(|l| l.product_id == product_id))
            .map_or(0, |l| l.quantity)
    }

    /// Number of stored lines for a session, zero-quantity rows included.
    #[must_use]
    pub fn stored_lines(&self, session: &SessionId) -> usize {
        self.lock().carts.get(session).map_or(0, Vec::len)
    }

    /// Fetches served so far (failed ones included).
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Mutations received so far (failed ones included).
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CartRemote for InMemoryCartRemote {
    async fn fetch_cart(&self, session: &SessionId) -> Result<Cart, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.offline {
            return Err(RemoteError::Unreachable);
        }
        if let Some(err) = state.fail_fetches.pop_front() {
            return Err(err);
        }

        let lines = state.carts.get(session).cloned().unwrap_or_default();
        Cart::from_lines(lines).map_err(|e| RemoteError::Malformed(e.to_string()))
    }

    async fn add_or_adjust(
        &self,
        session: &SessionId,
        product_id: ProductId,
        delta: i32,
    ) -> Result<(), RemoteError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.offline {
            return Err(RemoteError::Unreachable);
        }
        if let Some(err) = state.fail_mutations.pop_front() {
            return Err(err);
        }

        let Some(product) = state.products.get(&product_id).cloned() else {
            return Err(RemoteError::Rejected(404));
        };
        let limit = state.stock_limit.map_or(i64::from(u32::MAX), i64::from);
        let line_id = LineId::new(state.next_line_id + 1);

        let lines = state.carts.entry(session.clone()).or_default();
        match lines.iter().position(|l| l.product_id == product_id) {
            Some(pos) => {
                let current = lines.get(pos).map_or(0, |l| i64::from(l.quantity));
                let next = (current + i64::from(delta)).min(limit);
                if next <= 0 {
                    lines.remove(pos);
                } else if let Some(line) = lines.get_mut(pos) {
                    line.quantity = u32::try_from(next).unwrap_or(u32::MAX);
                }
            }
            None if delta > 0 => {
                let quantity = i64::from(delta).min(limit);
                if quantity > 0 {
                    lines.push(CartLineItem {
                        line_id,
                        product_id,
                        product_name: product.name,
                        unit_price: product.price,
                        quantity: u32::try_from(quantity).unwrap_or(u32::MAX),
                        image_ref: product.image_ref,
                        category: product.category,
                    });
                    state.next_line_id += 1;
                }
            }
            None => {}
        }
        Ok(())
    }
}
