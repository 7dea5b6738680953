//! Cart mutations and reconciliation.
//!
//! [`CartMutationClient`] is the only writer of the [`LocalCartCache`]. It
//! sends relative quantity changes to the remote store, reconciles the cache
//! after a confirmed change, and announces the change on the
//! [`UpdateBus`].
//!
//! A failed mutation changes nothing locally: the cache keeps its contents
//! and no event is published.

use std::sync::Arc;

use cartwheel_core::{Cart, ChangeEvent, DeltaOutcome, ProductId, SessionId};
use tracing::{debug, info, instrument, warn};

use crate::bus::UpdateBus;
use crate::cache::{CachePolicy, CacheWrite, LocalCartCache, OptimisticWrite};
use crate::error::add_breadcrumb;
use crate::remote::{CartRemote, RemoteError};
use crate::sequence::{RequestSequencer, Ticket};

/// Failure of a cart mutation. Same taxonomy as the remote store.
pub type MutationError = RemoteError;

/// Under [`CachePolicy::OptimisticLocal`], a full read follows every this
/// many deltas applied locally.
const FULL_READ_EVERY: u32 = 10;

/// Result of an authoritative cart read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refreshed {
    /// The cart exactly as the remote store returned it.
    pub cart: Cart,
    /// Whether the read replaced the cache; `false` if a newer read had
    /// already been applied.
    pub applied: bool,
}

/// Sends cart deltas and keeps the local cache reconciled.
///
/// Cheap to clone; clones share the remote client, cache and bus.
#[derive(Clone)]
pub struct CartMutationClient {
    inner: Arc<MutationInner>,
}

struct MutationInner {
    remote: Arc<dyn CartRemote>,
    cache: LocalCartCache,
    bus: UpdateBus,
    sequencer: Arc<RequestSequencer>,
}

impl CartMutationClient {
    /// Create a client. `sequencer` must be the one the cache was built with.
    #[must_use]
    pub fn new(
        remote: Arc<dyn CartRemote>,
        cache: LocalCartCache,
        bus: UpdateBus,
        sequencer: Arc<RequestSequencer>,
    ) -> Self {
        Self {
            inner: Arc::new(MutationInner {
                remote,
                cache,
                bus,
                sequencer,
            }),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &LocalCartCache {
        &self.inner.cache
    }

    #[must_use]
    pub fn bus(&self) -> &UpdateBus {
        &self.inner.bus
    }

    /// Change a product's quantity by `delta`.
    ///
    /// `-1` decrements, `-current_quantity` removes the line. The remote store
    /// decides the resulting quantity. A zero delta is a no-op: nothing is
    /// sent and no event is published.
    ///
    /// On success the cache is reconciled according to its policy and a
    /// [`ChangeEvent`] is published. If the follow-up read fails the mutation
    /// still counts as done; the next read reconciles the cache.
    ///
    /// Returns the cart read after the change, or `None` if no read was
    /// made (zero delta, delta applied locally) or the read failed.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] if the remote store is unreachable, rejects
    /// the change, or answers with an invalid body. The cache is untouched.
    #[instrument(skip(self, session), fields(session_id = %session))]
    pub async fn add_or_adjust(
        &self,
        product_id: ProductId,
        delta: i32,
        session: &SessionId,
    ) -> Result<Option<Cart>, MutationError> {
        if delta == 0 {
            debug!("zero delta, nothing to send");
            return Ok(None);
        }

        let ticket = self.inner.sequencer.issue();
        let product = product_id.to_string();
        let delta_str = delta.to_string();
        add_breadcrumb(
            "cart",
            "Adjusting cart quantity",
            Some(&[("product_id", product.as_str()), ("delta", delta_str.as_str())]),
        );

        if let Err(e) = self
            .inner
            .remote
            .add_or_adjust(session, product_id, delta)
            .await
        {
            warn!(seq = %ticket, error = %e, "cart mutation failed");
            add_breadcrumb(
                "cart",
                "Cart mutation failed",
                Some(&[("product_id", product.as_str()), ("error", e.to_string().as_str())]),
            );
            return Err(e);
        }
        info!(seq = %ticket, "cart mutation confirmed");

        let confirmed = self.reconcile(product_id, delta, ticket, session).await;
        self.inner.bus.publish(ChangeEvent);
        Ok(confirmed)
    }

    /// Read the authoritative cart and replace the cache with it.
    ///
    /// Does not publish a [`ChangeEvent`]: a read does not change the cart.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the read fails; the cache is untouched.
    #[instrument(skip(self, session), fields(session_id = %session))]
    pub async fn refresh(&self, session: &SessionId) -> Result<Refreshed, RemoteError> {
        let ticket = self.inner.sequencer.issue();
        let cart = self.inner.remote.fetch_cart(session).await.inspect_err(|e| {
            warn!(seq = %ticket, error = %e, "cart read failed");
        })?;

        let applied = self.inner.cache.replace_all(cart.clone(), ticket) == CacheWrite::Applied;
        debug!(seq = %ticket, applied, lines = cart.lines().len(), "cart read completed");
        Ok(Refreshed { cart, applied })
    }

    async fn reconcile(
        &self,
        product_id: ProductId,
        delta: i32,
        ticket: Ticket,
        session: &SessionId,
    ) -> Option<Cart> {
        let cache = &self.inner.cache;
        if cache.policy() == CachePolicy::OptimisticLocal {
            match cache.apply_optimistic(product_id, delta, ticket) {
                OptimisticWrite::Applied(
                    DeltaOutcome::Updated(_) | DeltaOutcome::Removed | DeltaOutcome::Unchanged,
                ) if cache.optimistic_writes() < FULL_READ_EVERY => return None,
                OptimisticWrite::Applied(DeltaOutcome::MissingLine) => {}
                OptimisticWrite::Applied(_) => {
                    debug!(seq = %ticket, "periodic full read after local deltas");
                }
                OptimisticWrite::NotLive
                | OptimisticWrite::Stale
                | OptimisticWrite::Disabled => {}
            }
        }

        match self.refresh(session).await {
            Ok(refreshed) => Some(refreshed.cart),
            Err(e) => {
                warn!(error = %e, "cart read after mutation failed, cache left as is");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use cartwheel_core::{Price, Product};
    use rust_decimal::Decimal;
    use tokio::sync::oneshot;

    use super::*;
    use crate::projector::CartViewProjector;
    use crate::remote::memory::InMemoryCartRemote;
    use crate::storage::MemoryStore;

    const LAMP: ProductId = ProductId::new(7);

    fn lamp() -> Product {
        Product {
            id: LAMP,
            name: "Desk Lamp".to_string(),
            price: Price::usd(Decimal::new(2450, 2)).unwrap(),
            category: None,
            image_ref: None,
        }
    }

    fn client_with(
        remote: Arc<dyn CartRemote>,
        policy: CachePolicy,
    ) -> (CartMutationClient, Arc<AtomicUsize>) {
        let sequencer = Arc::new(RequestSequencer::new());
        let cache = LocalCartCache::new(policy, Arc::clone(&sequencer), Arc::new(MemoryStore::new()));
        let bus = UpdateBus::new();
        let events = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&events);
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (CartMutationClient::new(remote, cache, bus, sequencer), events)
    }

    fn session() -> SessionId {
        SessionId::parse("abc").unwrap()
    }

    #[tokio::test]
    async fn test_add_then_remove() {
        let remote = Arc::new(InMemoryCartRemote::with_products([lamp()]));
        let (client, events) = client_with(remote.clone(), CachePolicy::ServerConfirmed);

        client.add_or_adjust(LAMP, 2, &session()).await.unwrap();
        assert_eq!(remote.quantity(&session(), LAMP), 2);
        assert_eq!(client.cache().summary().unwrap().item_count, 2);

        client.add_or_adjust(LAMP, -2, &session()).await.unwrap();
        assert_eq!(remote.stored_lines(&session()), 0);
        assert_eq!(client.cache().summary().unwrap().item_count, 0);
        assert_eq!(events.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_cache_and_publishes_nothing() {
        let remote = Arc::new(InMemoryCartRemote::with_products([lamp()]));
        let (client, events) = client_with(remote.clone(), CachePolicy::ServerConfirmed);
        client.add_or_adjust(LAMP, 1, &session()).await.unwrap();

        remote.set_offline(true);
        let err = client.add_or_adjust(LAMP, 1, &session()).await.unwrap_err();
        assert_eq!(err, RemoteError::Unreachable);
        assert_eq!(client.cache().quantity_of(LAMP), 1);

        remote.set_offline(false);
        remote.fail_next_mutation(RemoteError::Rejected(500));
        let err = client.add_or_adjust(LAMP, 1, &session()).await.unwrap_err();
        assert_eq!(err, RemoteError::Rejected(500));
        assert_eq!(client.cache().quantity_of(LAMP), 1);
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_delta_is_a_no_op() {
        let remote = Arc::new(InMemoryCartRemote::with_products([lamp()]));
        let (client, events) = client_with(remote.clone(), CachePolicy::ServerConfirmed);

        client.add_or_adjust(LAMP, 0, &session()).await.unwrap();
        assert_eq!(remote.mutation_count(), 0);
        assert_eq!(events.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deltas_converge_to_clamped_total() {
        let remote = Arc::new(InMemoryCartRemote::with_products([lamp()]));
        let (client, _) = client_with(remote.clone(), CachePolicy::ServerConfirmed);

        for delta in [3, -1, 2, -10, 4] {
            client.add_or_adjust(LAMP, delta, &session()).await.unwrap();
        }
        // 3 -> 2 -> 4 -> removed -> 4
        assert_eq!(remote.quantity(&session(), LAMP), 4);
        assert_eq!(client.cache().quantity_of(LAMP), 4);

        remote.set_stock_limit(Some(5));
        client.add_or_adjust(LAMP, 10, &session()).await.unwrap();
        assert_eq!(client.cache().quantity_of(LAMP), 5);
    }

    #[tokio::test]
    async fn test_refresh_twice_does_not_double_count() {
        let remote = Arc::new(InMemoryCartRemote::with_products([lamp()]));
        let (client, events) = client_with(remote.clone(), CachePolicy::ServerConfirmed);
        client.add_or_adjust(LAMP, 2, &session()).await.unwrap();

        client.refresh(&session()).await.unwrap();
        client.refresh(&session()).await.unwrap();
        assert_eq!(client.cache().summary().unwrap().item_count, 2);
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_optimistic_policy_skips_read_for_known_line() {
        let remote = Arc::new(InMemoryCartRemote::with_products([lamp()]));
        let (client, _) = client_with(remote.clone(), CachePolicy::OptimisticLocal);

        // No cached line yet: falls back to a read.
        client.add_or_adjust(LAMP, 1, &session()).await.unwrap();
        assert_eq!(remote.fetch_count(), 1);

        client.add_or_adjust(LAMP, 2, &session()).await.unwrap();
        assert_eq!(remote.fetch_count(), 1);
        assert_eq!(client.cache().quantity_of(LAMP), 3);
    }

    #[tokio::test]
    async fn test_optimistic_policy_reads_after_every_tenth_local_delta() {
        let remote = Arc::new(InMemoryCartRemote::with_products([lamp()]));
        let (client, _) = client_with(remote.clone(), CachePolicy::OptimisticLocal);
        client.add_or_adjust(LAMP, 1, &session()).await.unwrap();
        assert_eq!(remote.fetch_count(), 1);

        for _ in 1..FULL_READ_EVERY {
            let read = client.add_or_adjust(LAMP, 1, &session()).await.unwrap();
            assert!(read.is_none());
        }
        assert_eq!(remote.fetch_count(), 1);

        let read = client.add_or_adjust(LAMP, 1, &session()).await.unwrap();
        assert_eq!(remote.fetch_count(), 2);
        assert_eq!(read.unwrap().quantity_of(LAMP), 11);
        assert_eq!(client.cache().optimistic_writes(), 0);
        assert_eq!(client.cache().quantity_of(LAMP), 11);
    }

    #[tokio::test]
    async fn test_confirmed_change_returns_the_cart_it_read() {
        let remote = Arc::new(InMemoryCartRemote::with_products([lamp()]));
        let (client, _) = client_with(remote.clone(), CachePolicy::ServerConfirmed);

        let read = client.add_or_adjust(LAMP, 2, &session()).await.unwrap();
        assert_eq!(read.unwrap().quantity_of(LAMP), 2);
        assert_eq!(remote.fetch_count(), 1);
        assert_eq!(client.add_or_adjust(LAMP, 0, &session()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_failure_after_mutation_still_succeeds() {
        let remote = Arc::new(InMemoryCartRemote::with_products([lamp()]));
        let (client, events) = client_with(remote.clone(), CachePolicy::ServerConfirmed);

        remote.fail_next_fetch(RemoteError::Malformed("truncated".to_string()));
        client.add_or_adjust(LAMP, 1, &session()).await.unwrap();
        assert_eq!(client.cache().summary(), None);
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    /// Remote whose calls block until released, so tests can choose the
    /// order in which responses complete. Calls with no gate queued pass
    /// straight through.
    struct GatedRemote {
        inner: InMemoryCartRemote,
        fetch_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
        mutation_gates: Mutex<HashMap<i32, oneshot::Receiver<()>>>,
        /// Carts seen by gated reads, in arrival order.
        snapshots: Mutex<Vec<Cart>>,
        /// Deltas of gated mutations, in arrival order.
        arrived: Mutex<Vec<i32>>,
    }

    impl GatedRemote {
        fn new() -> Self {
            Self {
                inner: InMemoryCartRemote::with_products([lamp()]),
                fetch_gates: Mutex::new(VecDeque::new()),
                mutation_gates: Mutex::new(HashMap::new()),
                snapshots: Mutex::new(Vec::new()),
                arrived: Mutex::new(Vec::new()),
            }
        }

        fn gate_fetch(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.fetch_gates.lock().unwrap().push_back(rx);
            tx
        }

        fn gate_mutation(&self, delta: i32) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.mutation_gates.lock().unwrap().insert(delta, rx);
            tx
        }

        async fn wait_for_snapshots(&self, n: usize) {
            while self.snapshots.lock().unwrap().len() < n {
                tokio::task::yield_now().await;
            }
        }

        async fn wait_for_arrivals(&self, n: usize) {
            while self.arrived.lock().unwrap().len() < n {
                tokio::task::yield_now().await;
            }
        }
    }

    #[async_trait]
    impl CartRemote for GatedRemote {
        async fn fetch_cart(&self, session: &SessionId) -> Result<Cart, RemoteError> {
            let cart = self.inner.fetch_cart(session).await?;
            let gate = self.fetch_gates.lock().unwrap().pop_front();
            if let Some(gate) = gate {
                self.snapshots.lock().unwrap().push(cart.clone());
                let _ = gate.await;
            }
            Ok(cart)
        }

        async fn add_or_adjust(
            &self,
            session: &SessionId,
            product_id: ProductId,
            delta: i32,
        ) -> Result<(), RemoteError> {
            let gate = self.mutation_gates.lock().unwrap().remove(&delta);
            if let Some(gate) = gate {
                self.arrived.lock().unwrap().push(delta);
                let _ = gate.await;
            }
            self.inner.add_or_adjust(session, product_id, delta).await
        }
    }

    #[tokio::test]
    async fn test_stale_read_completing_last_is_discarded() {
        let remote = Arc::new(GatedRemote::new());
        let old_tx = remote.gate_fetch();
        let new_tx = remote.gate_fetch();
        let (client, _) = client_with(remote.clone(), CachePolicy::ServerConfirmed);
        let s = session();

        // Issued first, sees the empty cart.
        let older = tokio::spawn({
            let client = client.clone();
            let s = s.clone();
            async move { client.refresh(&s).await }
        });
        remote.wait_for_snapshots(1).await;

        remote.inner.add_or_adjust(&s, LAMP, 2).await.unwrap();

        // Issued second, sees quantity 2, completes first.
        let newer = tokio::spawn({
            let client = client.clone();
            let s = s.clone();
            async move { client.refresh(&s).await }
        });
        remote.wait_for_snapshots(2).await;
        new_tx.send(()).unwrap();
        assert!(newer.await.unwrap().unwrap().applied);

        old_tx.send(()).unwrap();
        let stale = older.await.unwrap().unwrap();
        assert!(!stale.applied);
        assert!(stale.cart.is_empty());
        assert_eq!(client.cache().quantity_of(LAMP), 2);
    }

    #[tokio::test]
    async fn test_reversed_responses_to_opposite_deltas_converge() {
        let remote = Arc::new(GatedRemote::new());
        let (client, events) = client_with(remote.clone(), CachePolicy::ServerConfirmed);
        let s = session();
        remote.inner.add_or_adjust(&s, LAMP, 1).await.unwrap();
        let mut badge = CartViewProjector::mount(client.clone(), s.clone()).await;
        assert_eq!(badge.display().item_count(), Some(1));
        let reads_before = remote.inner.fetch_count();

        let plus_tx = remote.gate_mutation(1);
        let minus_tx = remote.gate_mutation(-1);
        let minus_read_tx = remote.gate_fetch();
        let plus_read_tx = remote.gate_fetch();

        let plus = tokio::spawn({
            let client = client.clone();
            let s = s.clone();
            async move { client.add_or_adjust(LAMP, 1, &s).await }
        });
        remote.wait_for_arrivals(1).await;
        let minus = tokio::spawn({
            let client = client.clone();
            let s = s.clone();
            async move { client.add_or_adjust(LAMP, -1, &s).await }
        });
        remote.wait_for_arrivals(2).await;

        // The later -1 lands first and empties the line; its read sees that.
        minus_tx.send(()).unwrap();
        remote.wait_for_snapshots(1).await;
        plus_tx.send(()).unwrap();
        remote.wait_for_snapshots(2).await;
        {
            let snapshots = remote.snapshots.lock().unwrap();
            assert!(snapshots.first().unwrap().is_empty());
            assert_eq!(snapshots.get(1).unwrap().quantity_of(LAMP), 1);
        }

        // The newer read completes first; the older one must not undo it.
        plus_read_tx.send(()).unwrap();
        assert_eq!(plus.await.unwrap().unwrap().unwrap().quantity_of(LAMP), 1);
        minus_read_tx.send(()).unwrap();
        minus.await.unwrap().unwrap();

        assert_eq!(client.cache().quantity_of(LAMP), 1);
        assert_eq!(remote.inner.quantity(&s, LAMP), 1);
        assert_eq!(remote.inner.fetch_count(), reads_before + 2);
        assert_eq!(events.load(Ordering::SeqCst), 2);

        assert_eq!(badge.process_events().await, 2);
        assert_eq!(badge.display().item_count(), Some(1));
    }
}
