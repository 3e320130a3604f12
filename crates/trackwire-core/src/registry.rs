//! Connection registry.
//!
//! Maps each authenticated user identity to the set of live connections it
//! owns. One person tracking a package from a phone and a laptop holds two
//! entries under the same identity. Mutated only on connect/disconnect.

use crate::auth::UserId;
use crate::handle::{ConnectionHandle, ConnectionId};
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

/// Identity-to-connections mapping.
///
/// Backed by a sharded map; every mutation is a single entry-scoped
/// critical section, never held across a send.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, HashSet<ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live connection for an identity.
    ///
    /// Creates the identity entry on its first connection. Registering the
    /// same connection id again replaces the stored handle.
    pub fn register(&self, identity: &str, handle: ConnectionHandle) {
        let mut entry = self.connections.entry(identity.to_string()).or_default();
        entry.replace(handle);
        debug!(
            identity = %identity,
            connections = entry.len(),
            "Connection registered"
        );
    }

    /// Remove a connection for an identity.
    ///
    /// Removing the last connection removes the identity entry entirely.
    /// Unknown identities and connection ids are a no-op.
    pub fn unregister(&self, identity: &str, id: &ConnectionId) {
        let now_empty = match self.connections.get_mut(identity) {
            Some(mut entry) => {
                entry.retain(|h| h.id() != id);
                entry.is_empty()
            }
            None => return,
        };

        if now_empty {
            // Re-checked under the entry lock so a concurrent register wins.
            self.connections.remove_if(identity, |_, set| set.is_empty());
        }

        debug!(identity = %identity, connection = %id, "Connection unregistered");
    }

    /// Snapshot of the live connections for an identity.
    #[must_use]
    pub fn connections_for(&self, identity: &str) -> Vec<ConnectionHandle> {
        self.connections
            .get(identity)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every live connection across all identities.
    #[must_use]
    pub fn all_handles(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .flat_map(|entry| entry.value().iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Whether an identity currently owns any connection.
    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.connections.contains_key(identity)
    }

    /// Number of identities with at least one live connection.
    #[must_use]
    pub fn total_users(&self) -> usize {
        self.connections.len()
    }

    /// Number of live connections across all identities.
    #[must_use]
    pub fn total_connections(&self) -> usize {
        self.connections.iter().map(|entry| entry.len()).sum()
    }
}
