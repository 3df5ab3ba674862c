//! Route replication loops.
//!
//! Local routing mutations arrive on the publish channel and are broadcast to
//! every live peer. Two timers keep the mesh honest: the announce loop
//! refreshes our own entries on every peer before their TTL runs out, and
//! the expiry loop evicts remote entries whose owner went quiet.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use eventlink_core::RouteUpdate;

use crate::manager::ConnectionManager;
use crate::routing::RoutingTableManager;

/// Forward published route updates to every connected peer until shutdown
/// or until every publisher is dropped.
pub async fn route_broadcast_loop(
    manager: ConnectionManager,
    mut updates: mpsc::UnboundedReceiver<RouteUpdate>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let update = tokio::select! {
            _ = shutdown.recv() => break,
            next = updates.recv() => match next {
                Some(u) => u,
                None => break,
            },
        };
        match manager.broadcast_route(&update) {
            Ok(peers) => tracing::trace!(
                table = %update.table,
                key = %update.key,
                op = ?update.op,
                peers,
                "route update broadcast"
            ),
            Err(e) => tracing::warn!(table = %update.table, error = %e, "route broadcast failed"),
        }
    }
    tracing::debug!("route broadcast loop stopped");
}

/// Periodically re-stamp and re-publish every locally owned entry.
pub async fn announce_loop(
    routes: RoutingTableManager,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; connect-time sync already covers it.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = interval.tick() => {
                let announced = routes.announce_local();
                tracing::trace!(announced, "local routes announced");
            }
        }
    }
}

/// Periodically evict entries past their TTL.
pub async fn expiry_loop(
    routes: RoutingTableManager,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = interval.tick() => {
                let expired = routes.expire_stale();
                if expired > 0 {
                    tracing::info!(expired, "stale routes expired");
                }
            }
        }
    }
}
