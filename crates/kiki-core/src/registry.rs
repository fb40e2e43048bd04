//! Live clients of the direct-relay variant, keyed by identity.
//!
//! Duplicate identities follow replace-and-close-prior: the newest connection
//! wins and the displaced one is told to close, so an identity maps to at most
//! one connection at any time.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::connection::ClientConnection;
use crate::ids::ClientId;

/// Registry of connected clients.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, Arc<ClientConnection>>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client, replacing any prior connection with the same identity.
    ///
    /// Returns the displaced connection, which has already been closed.
    pub fn register(&self, connection: Arc<ClientConnection>) -> Option<Arc<ClientConnection>> {
        let id = connection.connection_id();
        let identity = connection.identity().clone();
        let prior = self.clients.write().insert(identity.clone(), connection);

        match prior {
            Some(prior) if prior.connection_id() != id => {
                prior.close();
                info!(
                    client_id = %identity,
                    replaced = prior.connection_id(),
                    connection_id = id,
                    "identity re-registered, closing prior connection"
                );
                Some(prior)
            }
            _ => {
                debug!(client_id = %identity, connection_id = id, "client registered");
                None
            }
        }
    }

    /// Remove whatever entry holds `identity`. Absent identities are a no-op.
    pub fn unregister(&self, identity: &str) -> bool {
        let removed = self.clients.write().remove(identity).is_some();
        if removed {
            debug!(client_id = identity, "client unregistered");
        }
        removed
    }

    /// Remove `connection` only if it still owns its identity.
    ///
    /// A connection displaced by a newer one must not evict its replacement
    /// when its own disconnect arrives late.
    pub fn release(&self, connection: &ClientConnection) -> bool {
        let mut clients = self.clients.write();
        let owns = clients
            .get(connection.identity().as_str())
            .is_some_and(|c| c.connection_id() == connection.connection_id());
        if owns {
            let _ = clients.remove(connection.identity().as_str());
            debug!(
                client_id = %connection.identity(),
                connection_id = connection.connection_id(),
                "client released"
            );
        }
        owns
    }

    /// Find the live connection for `identity`.
    pub fn lookup(&self, identity: &str) -> Option<Arc<ClientConnection>> {
        self.clients.read().get(identity).cloned()
    }

    /// Resolve several identities under a single read lock.
    pub fn resolve<'a, I>(&self, identities: I) -> Vec<(ClientId, Option<Arc<ClientConnection>>)>
    where
        I: IntoIterator<Item = &'a ClientId>,
    {
        let clients = self.clients.read();
        identities
            .into_iter()
            .map(|id| (id.clone(), clients.get(id.as_str()).cloned()))
            .collect()
    }

    /// Whether `identity` is registered.
    pub fn contains(&self, identity: &str) -> bool {
        self.clients.read().contains_key(identity)
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Sorted snapshot of registered identities.
    pub fn identities(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
