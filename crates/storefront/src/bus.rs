//! Process-local "cart changed" broadcast.
//!
//! Components that mutate the cart publish a [`ChangeEvent`]; components that
//! display cart state subscribe to it. Neither side knows about the other.
//!
//! Dispatch is synchronous and runs in subscription order. The subscriber
//! list is snapshotted at the start of each publish and the lock is released
//! before any handler runs, so handlers may subscribe or unsubscribe (even
//! themselves) while a publish is in progress. A handler removed during
//! dispatch is not called afterwards; a handler added during dispatch first
//! sees the next event.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use cartwheel_core::ChangeEvent;
use tracing::trace;

/// Callback invoked for every published event.
pub type Handler = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Identifies one subscription; pass it to [`UpdateBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Broadcast channel for [`ChangeEvent`]s.
///
/// Cheap to clone; clones share subscribers.
#[derive(Clone, Default)]
pub struct UpdateBus {
    inner: Arc<Mutex<Subscribers>>,
}

#[derive(Default)]
struct Subscribers {
    next_token: u64,
    entries: Vec<(SubscriptionToken, Handler)>,
}

impl UpdateBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. It runs after every handler registered earlier.
    pub fn subscribe(&self, handler: impl Fn(ChangeEvent) + Send + Sync + 'static) -> SubscriptionToken {
        let mut subs = self.lock();
        subs.next_token += 1;
        let token = SubscriptionToken(subs.next_token);
        subs.entries.push((token, Arc::new(handler)));
        token
    }

    /// Remove a handler. Returns `false` if the token was already removed.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subs = self.lock();
        let before = subs.entries.len();
        subs.entries.retain(|(t, _)| *t != token);
        subs.entries.len() != before
    }

    /// Deliver `event` to every current subscriber. Returns how many handlers
    /// ran.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let snapshot: Vec<(SubscriptionToken, Handler)> = self.lock().entries.clone();

        let mut delivered = 0;
        for (token, handler) in snapshot {
            if !self.is_subscribed(token) {
                continue;
            }
            handler(event);
            delivered += 1;
        }
        trace!(delivered, "published cart change");
        delivered
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn is_subscribed(&self, token: SubscriptionToken) -> bool {
        self.lock().entries.iter().any(|(t, _)| *t == token)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for UpdateBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
