//! Anonymous session identity.
//!
//! The session identifier addresses the remote cart for a client that has not
//! signed in (and keeps addressing it afterwards; signing in does not change
//! the cart protocol). It is created lazily, once per client storage, and is
//! never mutated.

use std::sync::{Arc, Mutex, PoisonError};

use cartwheel_core::SessionId;
use tracing::{info, warn};

use crate::storage::{KeyValueStore, StorageError, keys};

/// Issues and persists the client's stable anonymous session identifier.
///
/// Cheap to clone; clones share the same in-process memo, so independent UI
/// components calling [`get_or_create_session_id`](Self::get_or_create_session_id)
/// concurrently always observe one identifier.
#[derive(Clone)]
pub struct SessionIdentityProvider {
    store: Arc<dyn KeyValueStore>,
    current: Arc<Mutex<Option<SessionId>>>,
}

impl SessionIdentityProvider {
    /// Create a provider over durable client storage.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Return the persisted session identifier, creating it on first use.
    ///
    /// Creation goes through [`KeyValueStore::set_if_absent`], so two
    /// processes racing on first launch still converge on a single value.
    /// A stored value that no longer parses is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if client storage cannot be read or written.
    pub fn get_or_create_session_id(&self) -> Result<SessionId, StorageError> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = current.as_ref() {
            return Ok(id.clone());
        }

        let id = match self.store.get(keys::SESSION_ID)? {
            Some(raw) => match SessionId::parse(&raw) {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "stored session id is invalid, issuing a new one");
                    let id = SessionId::generate();
                    self.store.set(keys::SESSION_ID, id.as_str())?;
                    id
                }
            },
            None => self.create()?,
        };

        *current = Some(id.clone());
        Ok(id)
    }

    fn create(&self) -> Result<SessionId, StorageError> {
        let candidate = SessionId::generate();
        let stored = self
            .store
            .set_if_absent(keys::SESSION_ID, candidate.as_str())?;

        let id = SessionId::parse(&stored).map_err(|e| StorageError::Corrupt {
            key: keys::SESSION_ID.to_string(),
            reason: e.to_string(),
        })?;

        if id == candidate {
            info!(session_id = %id, "created anonymous session");
        }
        Ok(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};

    #[test]
    fn test_first_call_creates_and_persists() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let provider = SessionIdentityProvider::new(Arc::clone(&store));

        let id = provider.get_or_create_session_id().unwrap();
        assert_eq!(store.get(keys::SESSION_ID).unwrap().as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_idempotent_across_calls_and_providers() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let first = SessionIdentityProvider::new(Arc::clone(&store));
        let second = SessionIdentityProvider::new(Arc::clone(&store));

        let a = first.get_or_create_session_id().unwrap();
        let b = first.get_or_create_session_id().unwrap();
        let c = second.get_or_create_session_id().unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_existing_value_is_reused() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.set(keys::SESSION_ID, "abc").unwrap();

        let provider = SessionIdentityProvider::new(store);
        assert_eq!(provider.get_or_create_session_id().unwrap().as_str(), "abc");
    }

    #[test]
    fn test_invalid_stored_value_is_replaced() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.set(keys::SESSION_ID, "not valid").unwrap();

        let provider = SessionIdentityProvider::new(Arc::clone(&store));
        let id = provider.get_or_create_session_id().unwrap();
        assert_ne!(id.as_str(), "not valid");
        assert_eq!(store.get(keys::SESSION_ID).unwrap().as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_concurrent_first_use_yields_one_id() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());

        // Separate providers model separate processes sharing one data dir.
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = SessionIdentityProvider::new(Arc::clone(&store));
                std::thread::spawn(move || provider.get_or_create_session_id().unwrap())
            })
            .collect();

        let ids: Vec<SessionId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let first = ids.first().unwrap();
        assert!(ids.iter().all(|id| id == first));
    }
}
