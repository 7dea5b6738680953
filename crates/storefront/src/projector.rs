//! Live cart count for one UI region.
//!
//! A [`CartViewProjector`] is mounted by a component that displays cart
//! totals (the header badge, a drawer). It performs one authoritative read on
//! mount, then re-derives its display every time a [`ChangeEvent`] arrives.
//!
//! Events reach the projector through an unbounded channel fed by its bus
//! handler, so publishing never waits on a network read. Drive the projector
//! with [`process_events`](CartViewProjector::process_events) from a UI tick,
//! or spawn [`run`](CartViewProjector::run) and observe it through a
//! [`ProjectorHandle`].
//!
//! A failed read keeps the previous display. Before the first successful
//! read the display is [`CartDisplay::Unknown`], never zero. After
//! [`unmount`](ProjectorHandle::unmount) no late response is applied.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use cartwheel_core::{CartSummary, ChangeEvent, SessionId};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::bus::{SubscriptionToken, UpdateBus};
use crate::cache::{CachePolicy, Freshness};
use crate::mutation::CartMutationClient;

/// What a projector currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartDisplay {
    /// No authoritative read has succeeded yet.
    Unknown,
    Known(CartSummary),
}

impl CartDisplay {
    /// Item count, if known.
    #[must_use]
    pub const fn item_count(&self) -> Option<u64> {
        match self {
            Self::Unknown => None,
            Self::Known(summary) => Some(summary.item_count),
        }
    }
}

struct Shared {
    displayed: RwLock<CartDisplay>,
    mounted: AtomicBool,
    events_seen: AtomicUsize,
    bus: UpdateBus,
    token: SubscriptionToken,
}

impl Shared {
    fn display(&self) -> CartDisplay {
        *self
            .displayed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn show(&self, display: CartDisplay) -> bool {
        let mut displayed = self
            .displayed
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock so unmount and a late render cannot interleave.
        if !self.mounted.load(Ordering::SeqCst) {
            return false;
        }
        *displayed = display;
        true
    }

    fn unmount(&self) {
        let _displayed = self
            .displayed
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.mounted.swap(false, Ordering::SeqCst) {
            self.bus.unsubscribe(self.token);
        }
    }
}

/// Read-only view of a projector plus the ability to unmount it.
#[derive(Clone)]
pub struct ProjectorHandle {
    shared: Arc<Shared>,
}

impl ProjectorHandle {
    #[must_use]
    pub fn display(&self) -> CartDisplay {
        self.shared.display()
    }

    /// Events received since mount.
    #[must_use]
    pub fn events_seen(&self) -> usize {
        self.shared.events_seen.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.shared.mounted.load(Ordering::SeqCst)
    }

    /// Stop listening. Reads still in flight are not applied. Idempotent.
    pub fn unmount(&self) {
        self.shared.unmount();
    }
}

/// Keeps one region's cart display in step with the authoritative cart.
pub struct CartViewProjector {
    client: CartMutationClient,
    session: SessionId,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    shared: Arc<Shared>,
}

impl CartViewProjector {
    /// Subscribe to cart changes and perform the initial read.
    #[instrument(skip(client, session), fields(session_id = %session))]
    pub async fn mount(client: CartMutationClient, session: SessionId) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let bus = client.bus().clone();
        let token = bus.subscribe(move |event| {
            // Receiver gone means the projector was dropped; nothing to do.
            let _ = tx.send(event);
        });

        let projector = Self {
            client,
            session,
            events,
            shared: Arc::new(Shared {
                displayed: RwLock::new(CartDisplay::Unknown),
                mounted: AtomicBool::new(true),
                events_seen: AtomicUsize::new(0),
                bus,
                token,
            }),
        };
        projector.fetch_and_show().await;
        projector
    }

    #[must_use]
    pub fn handle(&self) -> ProjectorHandle {
        ProjectorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    #[must_use]
    pub fn display(&self) -> CartDisplay {
        self.shared.display()
    }

    /// Handle every event received so far, without waiting for more.
    ///
    /// Several queued events are answered with a single re-derivation.
    /// Returns the number of events consumed.
    pub async fn process_events(&mut self) -> usize {
        let mut received = 0;
        while let Ok(_event) = self.events.try_recv() {
            received += 1;
        }
        if received > 0 {
            self.on_change(received).await;
        }
        received
    }

    /// Handle events until unmounted.
    pub async fn run(mut self) {
        while let Some(_event) = self.events.recv().await {
            let mut received = 1;
            while let Ok(_event) = self.events.try_recv() {
                received += 1;
            }
            if !self.shared.mounted.load(Ordering::SeqCst) {
                break;
            }
            self.on_change(received).await;
        }
        debug!("projector stopped");
    }

    /// Stop listening. Reads still in flight are not applied.
    pub fn unmount(&self) {
        self.shared.unmount();
    }

    async fn on_change(&self, received: usize) {
        self.shared.events_seen.fetch_add(received, Ordering::SeqCst);
        if !self.shared.mounted.load(Ordering::SeqCst) {
            return;
        }

        // Under optimistic-local the cache already holds the confirmed change.
        let cache = self.client.cache();
        if cache.policy() == CachePolicy::OptimisticLocal
            && cache.freshness() == Freshness::Live
            && let Some(summary) = cache.summary()
        {
            self.shared.show(CartDisplay::Known(summary));
            return;
        }

        self.fetch_and_show().await;
    }

    async fn fetch_and_show(&self) {
        match self.client.refresh(&self.session).await {
            Ok(refreshed) => {
                // A newer read may have landed first; the cache holds the
                // newest accepted one.
                let summary = self
                    .client
                    .cache()
                    .summary()
                    .unwrap_or_else(|| refreshed.cart.summary());
                if !self.shared.show(CartDisplay::Known(summary)) {
                    debug!("discarding read that completed after unmount");
                }
            }
            Err(e) => {
                warn!(error = %e, "cart read failed, keeping previous display");
            }
        }
    }
}

impl Drop for CartViewProjector {
    fn drop(&mut self) {
        self.shared.unmount();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartwheel_core::{Price, Product, ProductId};
    use rust_decimal::Decimal;

    use super::*;
    use crate::cache::LocalCartCache;
    use crate::remote::RemoteError;
    use crate::remote::memory::InMemoryCartRemote;
    use crate::sequence::RequestSequencer;
    use crate::storage::MemoryStore;

    const LAMP: ProductId = ProductId::new(7);

    fn setup(policy: CachePolicy) -> (Arc<InMemoryCartRemote>, CartMutationClient, SessionId) {
        let remote = Arc::new(InMemoryCartRemote::with_products([Product {
            id: LAMP,
            name: "Desk Lamp".to_string(),
            price: Price::usd(Decimal::new(2450, 2)).unwrap(),
            category: None,
            image_ref: None,
        }]));
        let sequencer = Arc::new(RequestSequencer::new());
        let cache = LocalCartCache::new(policy, Arc::clone(&sequencer), Arc::new(MemoryStore::new()));
        let client = CartMutationClient::new(remote.clone(), cache, UpdateBus::new(), sequencer);
        (remote, client, SessionId::parse("abc").unwrap())
    }

    #[tokio::test]
    async fn test_initial_read_and_update() {
        let (_, client, session) = setup(CachePolicy::ServerConfirmed);
        let mut badge = CartViewProjector::mount(client.clone(), session.clone()).await;
        assert_eq!(badge.display().item_count(), Some(0));

        client.add_or_adjust(LAMP, 2, &session).await.unwrap();
        assert_eq!(badge.process_events().await, 1);
        assert_eq!(badge.display().item_count(), Some(2));
        assert_eq!(badge.handle().events_seen(), 1);
    }

    #[tokio::test]
    async fn test_failed_initial_read_is_unknown_not_zero() {
        let (remote, client, session) = setup(CachePolicy::ServerConfirmed);
        remote.set_offline(true);

        let badge = CartViewProjector::mount(client, session).await;
        assert_eq!(badge.display(), CartDisplay::Unknown);
    }

    #[tokio::test]
    async fn test_failed_read_keeps_previous_value_and_retries_on_next_event() {
        let (remote, client, session) = setup(CachePolicy::ServerConfirmed);
        client.add_or_adjust(LAMP, 3, &session).await.unwrap();
        let mut badge = CartViewProjector::mount(client.clone(), session.clone()).await;
        assert_eq!(badge.display().item_count(), Some(3));

        remote.fail_next_fetch(RemoteError::Rejected(503));
        client.add_or_adjust(LAMP, 1, &session).await.unwrap();
        // The mutation's own read consumed the failure; fail the projector's.
        remote.fail_next_fetch(RemoteError::Unreachable);
        badge.process_events().await;
        assert_eq!(badge.display().item_count(), Some(3));

        client.add_or_adjust(LAMP, 1, &session).await.unwrap();
        badge.process_events().await;
        assert_eq!(badge.display().item_count(), Some(5));
    }

    #[tokio::test]
    async fn test_unmounted_projector_ignores_events() {
        let (_, client, session) = setup(CachePolicy::ServerConfirmed);
        let mut badge = CartViewProjector::mount(client.clone(), session.clone()).await;
        let handle = badge.handle();

        handle.unmount();
        assert!(!handle.is_mounted());
        assert_eq!(client.bus().subscriber_count(), 0);

        client.add_or_adjust(LAMP, 1, &session).await.unwrap();
        assert_eq!(badge.process_events().await, 0);
        assert_eq!(badge.display().item_count(), Some(0));
    }

    #[tokio::test]
    async fn test_optimistic_policy_renders_from_cache() {
        let (remote, client, session) = setup(CachePolicy::OptimisticLocal);
        client.add_or_adjust(LAMP, 1, &session).await.unwrap();
        let mut badge = CartViewProjector::mount(client.clone(), session.clone()).await;
        let reads = remote.fetch_count();

        client.add_or_adjust(LAMP, 1, &session).await.unwrap();
        badge.process_events().await;
        assert_eq!(badge.display().item_count(), Some(2));
        assert_eq!(remote.fetch_count(), reads);
    }

    #[tokio::test]
    async fn test_run_loop_stops_after_unmount() {
        let (_, client, session) = setup(CachePolicy::ServerConfirmed);
        let badge = CartViewProjector::mount(client.clone(), session.clone()).await;
        let handle = badge.handle();
        let task = tokio::spawn(badge.run());

        client.add_or_adjust(LAMP, 2, &session).await.unwrap();
        while handle.display().item_count() != Some(2) {
            tokio::task::yield_now().await;
        }

        handle.unmount();
        task.await.unwrap();
        assert_eq!(handle.events_seen(), 1);
    }
}
