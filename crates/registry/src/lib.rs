//! # Overview
//!
//! `registry` owns the per-client state the session server tracks across its
//! lifetime: the [`ConnectionRegistry`] maps a client id to its
//! [`ClientSession`], and [`heartbeat`] sweeps that registry for sessions
//! that have gone silent.
//!
//! # Design
//!
//! The registry is a concurrent map (`dashmap`) of atomically-updated
//! sessions rather than a single lock guarding a `HashMap`: readers and
//! writers on different client ids never contend, and counter updates never
//! hold a lock across I/O. This mirrors the teacher workspace's preference
//! for fine-grained concurrent maps over coarse mutexes around shared
//! mutable registries (§9 of the design: "model as concurrent maps with
//! atomic counters; never a lock held across I/O").
//!
//! # Invariants
//!
//! - Counters are monotonically non-decreasing.
//! - `last_activity` only increases, even if updated concurrently from
//!   several tasks.
//! - `unique_id` may be set at most once per session.

mod error;
mod heartbeat;
mod session;

pub use error::RegistryError;
pub use heartbeat::{run_heartbeat_sweep, HeartbeatConfig};
pub use session::{now_millis, ClientSession, Transport};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Concurrent `clientId -> ClientSession` map plus a `uniqueId -> clientId`
/// lookup index (§9's consolidation of the two routing-key variants: the
/// registry is keyed by `clientId`, wire-level routing by `uniqueId`).
pub struct ConnectionRegistry {
    sessions: DashMap<u32, Arc<ClientSession>>,
    unique_index: DashMap<String, u32>,
    next_id: AtomicU32,
    root_dir: PathBuf,
}

impl ConnectionRegistry {
    /// Creates an empty registry that resolves per-client file paths under
    /// `root_dir`.
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        ConnectionRegistry {
            sessions: DashMap::new(),
            unique_index: DashMap::new(),
            next_id: AtomicU32::new(1),
            root_dir: root_dir.into(),
        }
    }

    /// Assigns the next monotonically increasing client id, creates its
    /// session (with default per-client directory `Client<id>`), and
    /// registers it.
    #[must_use]
    pub fn register(&self, transport: Transport) -> Arc<ClientSession> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let file_path = self.root_dir.join(format!("Client{id}"));
        let session = Arc::new(ClientSession::new(id, transport, file_path));
        self.sessions.insert(id, Arc::clone(&session));
        tracing::debug!(client_id = id, "client registered");
        session
    }

    /// Looks up a session by client id.
    #[must_use]
    pub fn lookup(&self, client_id: u32) -> Option<Arc<ClientSession>> {
        self.sessions.get(&client_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Looks up a session by the peer-supplied `uniqueId`.
    #[must_use]
    pub fn lookup_by_unique_id(&self, unique_id: &str) -> Option<Arc<ClientSession>> {
        let client_id = *self.unique_index.get(unique_id)?;
        self.lookup(client_id)
    }

    /// Records `unique_id` for `client_id`, populating the routing index.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownClient`] if `client_id` is not
    /// registered, or [`RegistryError::UniqueIdAlreadySet`] if the session
    /// already has a `uniqueId` (set-once guard, §4.2).
    pub fn set_unique_id(&self, client_id: u32, unique_id: String) -> Result<(), RegistryError> {
        let session = self
            .lookup(client_id)
            .ok_or(RegistryError::UnknownClient(client_id))?;
        if !session.set_unique_id(unique_id.clone()) {
            return Err(RegistryError::UniqueIdAlreadySet(client_id));
        }
        self.unique_index.insert(unique_id, client_id);
        Ok(())
    }

    /// Removes a session from the registry, returning it if present.
    pub fn unregister(&self, client_id: u32) -> Option<Arc<ClientSession>> {
        let (_, session) = self.sessions.remove(&client_id)?;
        if let Some(unique_id) = session.unique_id() {
            self.unique_index.remove(unique_id);
        }
        tracing::debug!(client_id, "client unregistered");
        Some(session)
    }

    /// Returns a point-in-time snapshot of all registered sessions.
    ///
    /// As documented in §4.2, readers observe a consistent value per field
    /// but not a consistent cross-field snapshot across the whole registry;
    /// this method only guarantees that the *set* of sessions existed at
    /// some instant during the call.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Number of currently registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_monotonically_increasing_ids() {
        let registry = ConnectionRegistry::new("/tmp/relay-test-root");
        let a = registry.register(Transport::Plain);
        let b = registry.register(Transport::Plain);
        assert!(b.id > a.id);
    }

    #[test]
    fn set_unique_id_is_set_once() {
        let registry = ConnectionRegistry::new("/tmp/relay-test-root");
        let session = registry.register(Transport::Plain);
        registry.set_unique_id(session.id, "peer-1".to_string()).unwrap();
        let err = registry
            .set_unique_id(session.id, "peer-2".to_string())
            .unwrap_err();
        assert!(matches!(err, RegistryError::UniqueIdAlreadySet(_)));
    }

    #[test]
    fn lookup_by_unique_id_resolves_to_registered_client() {
        let registry = ConnectionRegistry::new("/tmp/relay-test-root");
        let session = registry.register(Transport::Plain);
        registry.set_unique_id(session.id, "peer-42".to_string()).unwrap();
        let found = registry.lookup_by_unique_id("peer-42").unwrap();
        assert_eq!(found.id, session.id);
    }

    #[test]
    fn unregister_clears_the_unique_id_index() {
        let registry = ConnectionRegistry::new("/tmp/relay-test-root");
        let session = registry.register(Transport::Plain);
        registry.set_unique_id(session.id, "peer-7".to_string()).unwrap();
        registry.unregister(session.id);
        assert!(registry.lookup_by_unique_id("peer-7").is_none());
        assert!(registry.lookup(session.id).is_none());
    }

    #[test]
    fn default_file_path_uses_client_id() {
        let registry = ConnectionRegistry::new("/tmp/relay-test-root");
        let session = registry.register(Transport::Plain);
        assert_eq!(
            session.file_path,
            PathBuf::from(format!("/tmp/relay-test-root/Client{}", session.id))
        );
    }
}
