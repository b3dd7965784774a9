// src/core/registry.rs

//! Maps the opaque ids handed across the C ABI to live clients.
//!
//! Ids are never reused, so a stale id from the host resolves to nothing
//! instead of to someone else's client.

use crate::core::BridgeError;
use crate::core::client::Client;
use crate::core::connection::HandleId;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tracing::debug;

/// The process-wide registry used by the C ABI.
pub static REGISTRY: Lazy<HandleRegistry> = Lazy::new(HandleRegistry::default);

#[derive(Debug, Default)]
pub struct HandleRegistry {
    clients: DashMap<HandleId, Arc<Client>>,
}

impl HandleRegistry {
    pub fn insert(&self, client: Client) -> HandleId {
        let id = client.id();
        self.clients.insert(id, Arc::new(client));
        id
    }

    /// Looks up a live client. An unknown id reads as a closed handle.
    pub fn get(&self, id: HandleId) -> Result<Arc<Client>, BridgeError> {
        self.clients
            .get(&id)
            .map(|c| Arc::clone(c.value()))
            .ok_or(BridgeError::Closing)
    }

    /// Removes the client and closes it. Returns `false` for an unknown id.
    pub fn destroy(&self, id: HandleId) -> bool {
        // Remove first so the map shard lock is not held across close.
        let Some((_, client)) = self.clients.remove(&id) else {
            debug!("Ignoring close of unknown client {id}.");
            return false;
        };
        client.close();
        true
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
