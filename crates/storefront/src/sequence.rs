//! Request sequencing.
//!
//! Every outbound cart fetch and mutation takes a [`Ticket`] from the shared
//! [`RequestSequencer`]. Tickets are strictly increasing in issue order. When
//! responses complete out of order, only a response whose ticket is newer
//! than the last accepted one may be applied; older responses are stale.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sequence number attached to one outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    /// The raw sequence number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues tickets and remembers the newest one accepted.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    issued: AtomicU64,
    accepted: AtomicU64,
}

impl RequestSequencer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next ticket. The first ticket is 1.
    pub fn issue(&self) -> Ticket {
        Ticket(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Accept `ticket` if it is newer than every ticket accepted so far.
    ///
    /// Returns `false` for a stale ticket; its response must be discarded.
    pub fn accept(&self, ticket: Ticket) -> bool {
        self.accepted.fetch_max(ticket.0, Ordering::SeqCst) < ticket.0
    }

    /// Newest accepted ticket, if any.
    #[must_use]
    pub fn last_accepted(&self) -> Option<Ticket> {
        match self.accepted.load(Ordering::SeqCst) {
            0 => None,
            n => Some(Ticket(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tickets_increase() {
        let seq = RequestSequencer::new();
        let a = seq.issue();
        let b = seq.issue();
        assert!(b > a);
        assert_eq!(a.as_u64(), 1);
    }

    #[test]
    fn test_stale_tickets_are_refused() {
        let seq = RequestSequencer::new();
        let first = seq.issue();
        let second = seq.issue();

        assert!(seq.accept(second));
        assert!(!seq.accept(first));
        assert!(!seq.accept(second));
        assert_eq!(seq.last_accepted(), Some(second));
    }

    #[test]
    fn test_nothing_accepted_initially() {
        assert_eq!(RequestSequencer::new().last_accepted(), None);
    }
}
