//! Trust store: the peers this server is willing to link with.
//!
//! A peer is trusted by name. The address is where we dial it; inbound
//! links are accepted from any address as long as the declared name is
//! trusted. Certificate handling lives with the transport, not here.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use eventlink_core::config::TrustedPeerConfig;

/// A trusted peer and where to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustedPeer {
    pub name: String,
    pub addr: String,
}

/// Registry of trusted peers, keyed by server name.
#[derive(Clone, Default)]
pub struct TrustStore {
    peers: Arc<DashMap<String, TrustedPeer>>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the `[trust]` config section.
    pub fn from_config(peers: &[TrustedPeerConfig]) -> Self {
        let store = Self::new();
        for p in peers {
            store.trust(&p.name, &p.addr);
        }
        store
    }

    /// Trust `name`, reachable at `addr`. Replaces any previous address.
    pub fn trust(&self, name: &str, addr: &str) {
        self.peers.insert(
            name.to_string(),
            TrustedPeer {
                name: name.to_string(),
                addr: addr.to_string(),
            },
        );
        tracing::info!(peer = name, addr, "peer trusted");
    }

    /// Forget `name`. Returns whether it was trusted.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.peers.remove(name).is_some();
        if removed {
            tracing::info!(peer = name, "peer trust removed");
        }
        removed
    }

    pub fn is_trusted(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<TrustedPeer> {
        self.peers.get(name).map(|p| p.value().clone())
    }

    /// All trusted peers, sorted by name.
    pub fn list(&self) -> Vec<TrustedPeer> {
        let mut peers: Vec<_> = self.peers.iter().map(|e| e.value().clone()).collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name));
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
