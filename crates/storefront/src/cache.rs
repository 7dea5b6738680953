//! Local shadow copy of the cart.
//!
//! The cache exists so the header badge can render without a network round
//! trip. It is advisory: anything that needs the real cart (the cart page)
//! reads the remote store instead. Exactly one [`CachePolicy`] is chosen per
//! process:
//!
//! - [`CachePolicy::ServerConfirmed`] (default): contents are only ever
//!   replaced wholesale with a fresh authoritative read.
//! - [`CachePolicy::OptimisticLocal`]: a confirmed delta is also applied
//!   locally so the badge moves before the next full read reconciles it.
//!
//! Writes carry the [`Ticket`] of the request that produced them; a write
//! older than the last accepted one is discarded. Only the mutation client
//! writes, so the write methods are crate-private.
//!
//! Every accepted write is mirrored to the `cart_items` storage key as a
//! best-effort snapshot that can be restored on the next launch.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use cartwheel_core::{Cart, CartLineItem, CartSummary, DeltaOutcome, ProductId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::sequence::{RequestSequencer, Ticket};
use crate::storage::{KeyValueStore, keys};

// =============================================================================
// Policy
// =============================================================================

/// How the local cache is kept up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Replace the cache only from fresh authoritative reads.
    #[default]
    ServerConfirmed,
    /// Also apply confirmed deltas locally, reconciling on the next read.
    OptimisticLocal,
}

impl CachePolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServerConfirmed => "server-confirmed",
            Self::OptimisticLocal => "optimistic-local",
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized cache policy name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown cache policy '{0}' (expected server-confirmed or optimistic-local)")]
pub struct UnknownCachePolicy(pub String);

impl FromStr for CachePolicy {
    type Err = UnknownCachePolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server-confirmed" | "b" => Ok(Self::ServerConfirmed),
            "optimistic-local" | "a" => Ok(Self::OptimisticLocal),
            other => Err(UnknownCachePolicy(other.to_string())),
        }
    }
}

// =============================================================================
// Write outcomes
// =============================================================================

/// Result of a wholesale replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWrite {
    Applied,
    /// A newer response was already applied; this one was discarded.
    Stale,
}

/// Result of an optimistic delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimisticWrite {
    Applied(DeltaOutcome),
    Stale,
    /// The process runs [`CachePolicy::ServerConfirmed`].
    Disabled,
    /// The contents did not come from a read in this process, so a delta
    /// on top of them would not match the remote store.
    NotLive,
}

// =============================================================================
// Snapshot
// =============================================================================

/// Persisted form of the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    saved_at: DateTime<Utc>,
    items: Vec<CartLineItem>,
}

/// Where the cached contents came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing loaded yet.
    Empty,
    /// Restored from a snapshot written by an earlier run.
    Snapshot { saved_at: DateTime<Utc> },
    /// Written in this process from an authoritative read or a confirmed
    /// mutation.
    Live,
    /// Was live, but the remote store may now resolve a different cart
    /// (the signed-in user changed). The next read replaces it.
    Invalidated,
}

// =============================================================================
// LocalCartCache
// =============================================================================

/// Shared, possibly stale copy of the current session's cart.
///
/// Cheap to clone; clones share the same contents.
#[derive(Clone)]
pub struct LocalCartCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    policy: CachePolicy,
    sequencer: Arc<RequestSequencer>,
    store: Arc<dyn KeyValueStore>,
    state: RwLock<CacheState>,
}

struct CacheState {
    cart: Cart,
    freshness: Freshness,
    /// Deltas applied locally since the last authoritative read.
    optimistic_writes: u32,
}

impl LocalCartCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(
        policy: CachePolicy,
        sequencer: Arc<RequestSequencer>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                policy,
                sequencer,
                store,
                state: RwLock::new(CacheState {
                    cart: Cart::empty(),
                    freshness: Freshness::Empty,
                    optimistic_writes: 0,
                }),
            }),
        }
    }

    /// The update policy this cache was created with.
    #[must_use]
    pub fn policy(&self) -> CachePolicy {
        self.inner.policy
    }

    /// Current line items, in the order the store returned them.
    #[must_use]
    pub fn get(&self) -> Vec<CartLineItem> {
        self.read(|state| state.cart.lines().to_vec())
    }

    /// Quantity held for one product.
    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.read(|state| state.cart.quantity_of(product_id))
    }

    /// Totals derived from the current lines, or `None` if nothing has been
    /// loaded.
    #[must_use]
    pub fn summary(&self) -> Option<CartSummary> {
        self.read(|state| match state.freshness {
            Freshness::Empty => None,
            _ => Some(state.cart.summary()),
        })
    }

    #[must_use]
    pub fn freshness(&self) -> Freshness {
        self.read(|state| state.freshness)
    }

    /// Load the persisted snapshot, if any, into an empty cache.
    ///
    /// A missing or unreadable snapshot leaves the cache empty. Returns
    /// whether a snapshot was loaded.
    pub fn restore(&self) -> bool {
        let raw = match self.inner.store.get(keys::CART_SNAPSHOT) {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "failed to read cart snapshot");
                return false;
            }
        };

        let snapshot: Snapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "discarding unreadable cart snapshot");
                return false;
            }
        };
        let Ok(cart) = Cart::from_lines(snapshot.items) else {
            warn!("discarding cart snapshot with duplicate lines");
            return false;
        };

        let mut state = self.write();
        if state.freshness != Freshness::Empty {
            return false;
        }
        state.cart = cart;
        state.freshness = Freshness::Snapshot {
            saved_at: snapshot.saved_at,
        };
        debug!(saved_at = %snapshot.saved_at, "restored cart snapshot");
        true
    }

    /// Replace the contents with an authoritative read.
    ///
    /// Discarded if a response with a newer ticket was already applied.
    pub(crate) fn replace_all(&self, cart: Cart, ticket: Ticket) -> CacheWrite {
        let mut state = self.write();
        if !self.inner.sequencer.accept(ticket) {
            debug!(seq = %ticket, "discarding stale cart read");
            return CacheWrite::Stale;
        }

        state.cart = cart;
        state.freshness = Freshness::Live;
        state.optimistic_writes = 0;
        self.persist(&state.cart);
        CacheWrite::Applied
    }

    /// Apply a delta the remote store has confirmed.
    ///
    /// Only used under [`CachePolicy::OptimisticLocal`]. A positive delta for
    /// a product with no cached line yields
    /// `Applied(DeltaOutcome::MissingLine)` and leaves the cache unchanged;
    /// the caller must fetch the line from the remote store. Contents that
    /// are not [`Freshness::Live`] yield [`OptimisticWrite::NotLive`] and
    /// are left for a full read to replace.
    pub(crate) fn apply_optimistic(
        &self,
        product_id: ProductId,
        delta: i32,
        ticket: Ticket,
    ) -> OptimisticWrite {
        if self.inner.policy == CachePolicy::ServerConfirmed {
            return OptimisticWrite::Disabled;
        }

        let mut state = self.write();
        // Checked before the ticket is accepted so the fallback read still wins.
        if state.freshness != Freshness::Live {
            debug!(seq = %ticket, freshness = ?state.freshness, "cache not live, skipping optimistic delta");
            return OptimisticWrite::NotLive;
        }
        if !self.inner.sequencer.accept(ticket) {
            debug!(seq = %ticket, "discarding stale optimistic delta");
            return OptimisticWrite::Stale;
        }

        let outcome = state.cart.apply_delta(product_id, delta);
        if matches!(outcome, DeltaOutcome::Updated(_) | DeltaOutcome::Removed) {
            state.optimistic_writes += 1;
            self.persist(&state.cart);
        }
        OptimisticWrite::Applied(outcome)
    }

    /// Deltas applied locally since the last authoritative read.
    pub(crate) fn optimistic_writes(&self) -> u32 {
        self.read(|state| state.optimistic_writes)
    }

    /// Mark live contents as no longer matching the remote store.
    ///
    /// Called when the signed-in user changes. The contents stay readable
    /// until the next read replaces them; under
    /// [`CachePolicy::OptimisticLocal`] no delta is applied on top of them.
    pub(crate) fn invalidate(&self) {
        let mut state = self.write();
        if state.freshness == Freshness::Live {
            state.freshness = Freshness::Invalidated;
            debug!("cart cache invalidated");
        }
    }

    /// Mirror the contents to durable storage. Failures are logged only.
    fn persist(&self, cart: &Cart) {
        let snapshot = Snapshot {
            saved_at: Utc::now(),
            items: cart.lines().to_vec(),
        };
        let result = serde_json::to_string(&snapshot)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                self.inner
                    .store
                    .set(keys::CART_SNAPSHOT, &json)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            warn!(error = %e, "failed to persist cart snapshot");
        }
    }

    fn read<T>(&self, f: impl FnOnce(&CacheState) -> T) -> T {
        let state = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CacheState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for LocalCartCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCartCache")
            .field("policy", &self.inner.policy)
            .field("freshness", &self.freshness())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartwheel_core::{LineId, Price};
    use rust_decimal::Decimal;

    use super::*;
    use crate::storage::MemoryStore;

    fn line(product: i64, quantity: u32) -> CartLineItem {
        CartLineItem {
            line_id: LineId::new(product + 100),
            product_id: ProductId::new(product),
            product_name: format!("Product {product}"),
            unit_price: Price::usd(Decimal::new(500, 2)).unwrap(),
            quantity,
            image_ref: None,
            category: None,
        }
    }

    fn cart(lines: Vec<CartLineItem>) -> Cart {
        Cart::from_lines(lines).unwrap()
    }

    fn cache(policy: CachePolicy) -> (LocalCartCache, Arc<RequestSequencer>, Arc<MemoryStore>) {
        let seq = Arc::new(RequestSequencer::new());
        let store = Arc::new(MemoryStore::new());
        let cache = LocalCartCache::new(policy, Arc::clone(&seq), store.clone());
        (cache, seq, store)
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            "server-confirmed".parse::<CachePolicy>().unwrap(),
            CachePolicy::ServerConfirmed
        );
        assert_eq!(
            " Optimistic-Local ".parse::<CachePolicy>().unwrap(),
            CachePolicy::OptimisticLocal
        );
        assert!("eventual".parse::<CachePolicy>().is_err());
        assert_eq!(CachePolicy::default(), CachePolicy::ServerConfirmed);
    }

    #[test]
    fn test_summary_unknown_until_loaded() {
        let (cache, seq, _) = cache(CachePolicy::ServerConfirmed);
        assert_eq!(cache.summary(), None);

        cache.replace_all(Cart::empty(), seq.issue());
        assert_eq!(cache.summary().unwrap().item_count, 0);
    }

    #[test]
    fn test_replace_all_replaces_rather_than_accumulates() {
        let (cache, seq, _) = cache(CachePolicy::ServerConfirmed);
        let authoritative = cart(vec![line(7, 2)]);

        cache.replace_all(authoritative.clone(), seq.issue());
        cache.replace_all(authoritative, seq.issue());
        assert_eq!(cache.summary().unwrap().item_count, 2);
        assert_eq!(cache.get().len(), 1);
    }

    #[test]
    fn test_stale_read_is_discarded() {
        let (cache, seq, _) = cache(CachePolicy::ServerConfirmed);
        let older = seq.issue();
        let newer = seq.issue();

        assert_eq!(cache.replace_all(cart(vec![line(7, 1)]), newer), CacheWrite::Applied);
        assert_eq!(cache.replace_all(cart(vec![line(7, 5)]), older), CacheWrite::Stale);
        assert_eq!(cache.quantity_of(ProductId::new(7)), 1);
    }

    #[test]
    fn test_optimistic_disabled_under_server_confirmed() {
        let (cache, seq, _) = cache(CachePolicy::ServerConfirmed);
        cache.replace_all(cart(vec![line(7, 1)]), seq.issue());

        let write = cache.apply_optimistic(ProductId::new(7), 1, seq.issue());
        assert_eq!(write, OptimisticWrite::Disabled);
        assert_eq!(cache.quantity_of(ProductId::new(7)), 1);
    }

    #[test]
    fn test_optimistic_delta_applies_and_removes() {
        let (cache, seq, _) = cache(CachePolicy::OptimisticLocal);
        cache.replace_all(cart(vec![line(7, 2)]), seq.issue());

        assert_eq!(
            cache.apply_optimistic(ProductId::new(7), 1, seq.issue()),
            OptimisticWrite::Applied(DeltaOutcome::Updated(3))
        );
        assert_eq!(
            cache.apply_optimistic(ProductId::new(7), -3, seq.issue()),
            OptimisticWrite::Applied(DeltaOutcome::Removed)
        );
        assert!(cache.get().is_empty());
        assert_eq!(
            cache.apply_optimistic(ProductId::new(8), 1, seq.issue()),
            OptimisticWrite::Applied(DeltaOutcome::MissingLine)
        );
    }

    #[test]
    fn test_snapshot_roundtrip_through_store() {
        let (cache, seq, store) = cache(CachePolicy::ServerConfirmed);
        cache.replace_all(cart(vec![line(7, 2), line(8, 1)]), seq.issue());
        assert!(store.get(keys::CART_SNAPSHOT).unwrap().is_some());

        let restored = LocalCartCache::new(
            CachePolicy::ServerConfirmed,
            Arc::new(RequestSequencer::new()),
            store,
        );
        assert!(restored.restore());
        assert!(matches!(restored.freshness(), Freshness::Snapshot { .. }));
        assert_eq!(restored.summary().unwrap().item_count, 3);
    }

    #[test]
    fn test_corrupt_snapshot_is_ignored() {
        let (cache, _, store) = cache(CachePolicy::ServerConfirmed);
        store.set(keys::CART_SNAPSHOT, "not json").unwrap();
        assert!(!cache.restore());
        assert_eq!(cache.summary(), None);
    }

    #[test]
    fn test_optimistic_delta_not_applied_to_restored_snapshot() {
        let (cache, seq, store) = cache(CachePolicy::OptimisticLocal);
        cache.replace_all(cart(vec![line(7, 5)]), seq.issue());

        let seq = Arc::new(RequestSequencer::new());
        let restored = LocalCartCache::new(CachePolicy::OptimisticLocal, Arc::clone(&seq), store);
        assert!(restored.restore());

        let ticket = seq.issue();
        assert_eq!(
            restored.apply_optimistic(ProductId::new(7), 1, ticket),
            OptimisticWrite::NotLive
        );
        assert_eq!(restored.quantity_of(ProductId::new(7)), 5);
        assert!(matches!(restored.freshness(), Freshness::Snapshot { .. }));

        // The ticket was not consumed, so the fallback read still applies.
        assert_eq!(seq.last_accepted(), None);
        assert_eq!(
            restored.replace_all(cart(vec![line(7, 1)]), seq.issue()),
            CacheWrite::Applied
        );
        assert_eq!(restored.freshness(), Freshness::Live);
    }

    #[test]
    fn test_invalidate_blocks_deltas_until_next_read() {
        let (cache, seq, _) = cache(CachePolicy::OptimisticLocal);
        cache.invalidate();
        assert_eq!(cache.freshness(), Freshness::Empty);

        cache.replace_all(cart(vec![line(7, 2)]), seq.issue());
        cache.invalidate();
        assert_eq!(cache.freshness(), Freshness::Invalidated);
        assert_eq!(cache.summary().unwrap().item_count, 2);
        assert_eq!(
            cache.apply_optimistic(ProductId::new(7), 1, seq.issue()),
            OptimisticWrite::NotLive
        );

        cache.replace_all(Cart::empty(), seq.issue());
        assert_eq!(cache.freshness(), Freshness::Live);
    }

    #[test]
    fn test_optimistic_writes_reset_by_read() {
        let (cache, seq, _) = cache(CachePolicy::OptimisticLocal);
        cache.replace_all(cart(vec![line(7, 1)]), seq.issue());

        cache.apply_optimistic(ProductId::new(7), 1, seq.issue());
        cache.apply_optimistic(ProductId::new(7), 1, seq.issue());
        cache.apply_optimistic(ProductId::new(8), 1, seq.issue());
        assert_eq!(cache.optimistic_writes(), 2);

        cache.replace_all(cart(vec![line(7, 3)]), seq.issue());
        assert_eq!(cache.optimistic_writes(), 0);
    }
}
