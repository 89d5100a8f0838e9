//! Live-connection registry.
//!
//! The registry is the authoritative mapping from connection id to the
//! joined client. It is shared by the accept loop and every session as an
//! `Arc<Registry>`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  add / remove   ┌─────────────────────────────┐
//! │ SessionHandler  │────────────────▶│          Registry           │
//! │  (per client)   │                 │ Mutex<HashMap<Id, Peer>>    │
//! └────────┬────────┘                 └──────────────┬──────────────┘
//!          │ broadcast                               │ snapshot (lock released)
//!          ▼                                         ▼
//! ┌─────────────────┐  write / evict  ┌─────────────────────────────┐
//! │     Fanout      │────────────────▶│  Outbound (per-peer lock)   │
//! └─────────────────┘                 └─────────────────────────────┘
//! ```
//!
//! Every operation holds the lock only for the map access itself. No
//! network I/O ever happens under it, so a stalled peer cannot block
//! registration of new clients.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Duplicate registration is reported as `RegistryError::AlreadyRegistered`

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use relay_protocol::DisplayName;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

mod peer;

pub use peer::{ConnectionId, Outbound, Peer, SendError};

/// Concurrency-safe map of joined connections.
#[derive(Debug, Default)]
pub struct Registry {
    peers: Mutex<HashMap<ConnectionId, Peer>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a joined connection.
    ///
    /// # Errors
    ///
    /// - `RegistryError::AlreadyRegistered` if the id is already present
    pub async fn add(&self, id: ConnectionId, peer: Peer) -> Result<(), RegistryError> {
        let mut peers = self.peers.lock().await;
        match peers.entry(id) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered { id }),
            Entry::Vacant(slot) => {
                debug!(conn = %id, name = %peer.name, "Registered peer");
                slot.insert(peer);
                Ok(())
            }
        }
    }

    /// Removes a connection, returning its entry if it was present.
    ///
    /// Removing an absent id is a no-op that returns `None`: a session's own
    /// cleanup and fanout eviction may both try to remove the same id.
    pub async fn remove(&self, id: ConnectionId) -> Option<Peer> {
        let removed = self.peers.lock().await.remove(&id);
        if removed.is_some() {
            debug!(conn = %id, "Unregistered peer");
        }
        removed
    }

    /// Returns a point-in-time copy of all entries, ordered by connection id.
    ///
    /// The copy stays valid while other tasks mutate the registry.
    pub async fn snapshot(&self) -> Vec<(ConnectionId, Peer)> {
        let mut entries: Vec<_> = {
            let peers = self.peers.lock().await;
            peers.iter().map(|(id, peer)| (*id, peer.clone())).collect()
        };
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    /// Returns true if the id is registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.peers.lock().await.contains_key(&id)
    }

    /// Returns the names of all registered peers, ordered by connection id.
    pub async fn names(&self) -> Vec<DisplayName> {
        self.snapshot()
            .await
            .into_iter()
            .map(|(_, peer)| peer.name)
            .collect()
    }

    /// Returns the number of registered peers.
    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Returns true if no peers are registered.
    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }
}

/// Errors that can occur in registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Connection already registered: {id}")]
    AlreadyRegistered { id: ConnectionId },
}
