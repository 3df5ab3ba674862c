//! Connection manager — owns the peer registry and addressed sends.
//!
//! The registry maps a peer name to the one [`Connection`] currently
//! canonical for it. Connections remove themselves on teardown with an
//! identity-checked removal, so a stale link can never evict its successor.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::Notify;

use eventlink_core::wire::WireError;
use eventlink_core::{EventPayload, Packet, RouteUpdate};

use crate::connection::{
    Connection, ConnectionContext, ConnectionSettings, Direction, PeerStream, WorkerLiveness,
};
use crate::routing::RoutingTableManager;
use crate::send_target::SendTarget;
use crate::transport::{Authenticated, Transport};
use crate::trust::TrustStore;

/// Peer name → canonical connection.
pub type ConnectionRegistry = Arc<DashMap<String, Connection>>;

pub fn new_registry() -> ConnectionRegistry {
    Arc::new(DashMap::new())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("peer {0} already has a live connection")]
    Duplicate(String),
    #[error("connection to {0} closed before it could be registered")]
    Closed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("unknown target: {}", .0.join(", "))]
    UnknownTarget(Vec<String>),
    #[error("no targets given")]
    NoTargets,
    #[error("encode failed: {0}")]
    Encode(#[from] WireError),
}

/// Result of [`ConnectionManager::delete_connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// A live connection was torn down.
    Removed,
    /// No connection is registered under that name.
    NotFound,
    /// The registered connection had already stopped.
    AlreadyGone,
}

impl std::fmt::Display for DeleteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DeleteOutcome::Removed => "removed",
            DeleteOutcome::NotFound => "not found",
            DeleteOutcome::AlreadyGone => "already gone",
        })
    }
}

/// Shared handle to the registry and everything a connection needs.
#[derive(Clone)]
pub struct ConnectionManager {
    local_name: Arc<str>,
    connections: ConnectionRegistry,
    routes: RoutingTableManager,
    transport: Arc<dyn Transport>,
    settings: ConnectionSettings,
    inbound_ready: Arc<Notify>,
    /// Peers with an outbound attempt in flight.
    pending: Arc<DashSet<String>>,
}

impl ConnectionManager {
    pub fn new(
        routes: RoutingTableManager,
        transport: Arc<dyn Transport>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            local_name: Arc::from(routes.local_name()),
            connections: new_registry(),
            routes,
            transport,
            settings,
            inbound_ready: Arc::new(Notify::new()),
            pending: Arc::new(DashSet::new()),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn routes(&self) -> &RoutingTableManager {
        &self.routes
    }

    pub fn settings(&self) -> ConnectionSettings {
        self.settings
    }

    /// Woken whenever any connection queues an inbound event.
    pub fn inbound_ready(&self) -> Arc<Notify> {
        self.inbound_ready.clone()
    }

    pub fn context(&self) -> ConnectionContext {
        ConnectionContext {
            registry: Arc::downgrade(&self.connections),
            routes: self.routes.clone(),
            inbound_ready: self.inbound_ready.clone(),
            settings: self.settings,
        }
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Start workers on an authenticated stream. Not yet registered.
    pub fn open(&self, peer: &str, direction: Direction, stream: PeerStream) -> Connection {
        Connection::spawn(peer, direction, stream, self.context())
    }

    /// Open and register an authenticated stream from the transport.
    pub async fn attach(&self, auth: Authenticated) -> Result<Connection, RegisterError> {
        let conn = self.open(&auth.peer, auth.direction, auth.stream);
        self.register(conn.clone()).await?;
        Ok(conn)
    }

    /// Install `conn` as the canonical connection for its peer.
    ///
    /// A live existing connection wins, except when both ends dialled each
    /// other at once: then both sides keep the link dialled by the lesser
    /// server name. A stale entry is replaced. On success the peer is sent
    /// every locally owned route.
    pub async fn register(&self, conn: Connection) -> Result<(), RegisterError> {
        let peer = conn.peer().to_string();

        let replaced = match self.connections.entry(peer.clone()) {
            Entry::Occupied(mut e) => {
                if e.get().same_as(&conn) {
                    return Ok(());
                }
                if self.keeps_existing(e.get(), &conn) {
                    drop(e);
                    tracing::info!(peer = %peer, "peer already connected, refusing new link");
                    conn.interrupt();
                    return Err(RegisterError::Duplicate(peer));
                }
                Some(e.insert(conn.clone()))
            }
            Entry::Vacant(e) => {
                e.insert(conn.clone());
                None
            }
        };

        if let Some(stale) = replaced {
            tracing::info!(peer = %peer, direction = ?stale.direction(), "replacing previous connection");
            stale.interrupt();
        }

        // The workers may have torn down before the insert, leaving an entry
        // nothing would ever remove. Teardown again now that it is in place.
        if conn.is_closing() {
            conn.teardown().await;
            return Err(RegisterError::Closed(peer));
        }

        tracing::info!(peer = %peer, direction = ?conn.direction(), "peer connected");
        self.sync_routes(&conn);
        Ok(())
    }

    fn keeps_existing(&self, existing: &Connection, new: &Connection) -> bool {
        if !existing.is_alive() || existing.is_closing() {
            return false;
        }
        if existing.direction() == new.direction() {
            return true;
        }
        let preferred = if *self.local_name < *new.peer() {
            Direction::Outbound
        } else {
            Direction::Inbound
        };
        existing.direction() == preferred
    }

    fn sync_routes(&self, conn: &Connection) {
        let updates = self.routes.local_updates();
        let count = updates.len();
        for update in &updates {
            match Packet::route(update) {
                Ok(packet) => conn.send(packet),
                Err(e) => tracing::warn!(peer = %conn.peer(), error = %e, "route sync encode failed"),
            }
        }
        tracing::debug!(peer = %conn.peer(), routes = count, "route sync sent");
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Queue `packet` for every resolved target.
    ///
    /// Named targets are resolved before anything is queued; if any of them
    /// has no live connection nothing is sent. Returns the number of peers
    /// the packet was queued for.
    pub fn send_object(&self, target: &SendTarget, packet: Packet) -> Result<usize, SendError> {
        let conns: Vec<Connection> = match target {
            SendTarget::Broadcast => self
                .connections
                .iter()
                .filter(|c| c.is_alive() && !c.is_closing())
                .map(|c| c.value().clone())
                .collect(),
            SendTarget::Peers { names } => {
                if names.is_empty() {
                    return Err(SendError::NoTargets);
                }
                let mut found = Vec::with_capacity(names.len());
                let mut missing = Vec::new();
                for name in names {
                    match self.live(name) {
                        Some(c) if !found.iter().any(|f: &Connection| f.same_as(&c)) => found.push(c),
                        Some(_) => {}
                        None => missing.push(name.clone()),
                    }
                }
                if !missing.is_empty() {
                    return Err(SendError::UnknownTarget(missing));
                }
                found
            }
        };

        for conn in &conns {
            conn.send(packet.clone());
        }
        Ok(conns.len())
    }

    /// Wrap an application event from this server and send it.
    pub fn send_event(
        &self,
        target: &SendTarget,
        name: &str,
        data: serde_json::Value,
    ) -> Result<usize, SendError> {
        let packet = Packet::event(&EventPayload {
            source: self.local_name.to_string(),
            name: name.to_string(),
            data,
        })?;
        self.send_object(target, packet)
    }

    /// Replicate one route update to every live peer.
    pub fn broadcast_route(&self, update: &RouteUpdate) -> Result<usize, SendError> {
        self.send_object(&SendTarget::Broadcast, Packet::route(update)?)
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    fn live(&self, name: &str) -> Option<Connection> {
        self.connections
            .get(name)
            .map(|c| c.value().clone())
            .filter(|c| c.is_alive() && !c.is_closing())
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.live(name).is_some()
    }

    pub fn connection(&self, name: &str) -> Option<Connection> {
        self.connections.get(name).map(|c| c.value().clone())
    }

    /// Every registered connection, ordered by peer name.
    pub fn connections(&self) -> Vec<Connection> {
        let mut conns: Vec<Connection> = self.connections.iter().map(|c| c.value().clone()).collect();
        conns.sort_by(|a, b| a.peer().cmp(b.peer()));
        conns
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Pop every queued inbound packet across all connections.
    pub fn drain_inbound(&self) -> Vec<(String, Packet)> {
        let mut out = Vec::new();
        for conn in self.connections() {
            while let Some(packet) = conn.receive() {
                out.push((conn.peer().to_string(), packet));
            }
        }
        out
    }

    // ── Control ───────────────────────────────────────────────────────────────

    /// Force-close the connection registered for `name`.
    pub async fn delete_connection(&self, name: &str) -> DeleteOutcome {
        let Some(conn) = self.connection(name) else {
            return DeleteOutcome::NotFound;
        };
        let was_alive = conn.is_alive() && !conn.is_closing();
        conn.teardown().await;
        let stragglers = conn.join(self.settings.join_grace).await;
        if stragglers.any() {
            tracing::info!(peer = name, alive = %stragglers, "workers still stopping");
        }
        let outcome = if was_alive {
            DeleteOutcome::Removed
        } else {
            DeleteOutcome::AlreadyGone
        };
        tracing::info!(peer = name, %outcome, "connection deleted");
        outcome
    }

    /// Dial every trusted peer that is not connected and not already being
    /// dialled. Returns the number of attempts started.
    pub fn check_trusted(&self, trust: &TrustStore) -> usize {
        let mut started = 0;
        for peer in trust.list() {
            if peer.name == *self.local_name || self.is_connected(&peer.name) {
                continue;
            }
            if !self.pending.insert(peer.name.clone()) {
                tracing::trace!(peer = %peer.name, "connection attempt already in flight");
                continue;
            }
            started += 1;

            let manager = self.clone();
            tokio::spawn(async move {
                match manager.transport.connect(&peer).await {
                    Ok(auth) => {
                        if let Err(e) = manager.attach(auth).await {
                            tracing::info!(peer = %peer.name, error = %e, "outbound connection refused");
                        }
                    }
                    Err(e) => tracing::debug!(
                        peer = %peer.name,
                        addr = %peer.addr,
                        error = %e,
                        "connection attempt failed"
                    ),
                }
                manager.pending.remove(&peer.name);
            });
        }
        if started > 0 {
            tracing::debug!(started, "trusted peers dialled");
        }
        started
    }

    /// Interrupt every connection and wait, bounded, for them to stop.
    pub async fn stop(&self, grace: Duration) -> Vec<(String, WorkerLiveness)> {
        let conns = self.connections();
        for conn in &conns {
            conn.interrupt();
        }
        let mut stragglers = Vec::new();
        for conn in &conns {
            let alive = conn.join(grace).await;
            if alive.any() {
                tracing::warn!(peer = %conn.peer(), alive = %alive, "connection did not stop in time");
                stragglers.push((conn.peer().to_string(), alive));
            }
        }
        tracing::info!(connections = conns.len(), "connection manager stopped");
        stragglers
    }
}
