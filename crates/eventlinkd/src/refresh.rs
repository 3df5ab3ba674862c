//! Trust refresh — redials trusted peers that have no live link.
//!
//! Reconnection is never automatic at the connection layer; this loop is
//! what heals the mesh after a peer restarts or a link drops.

use std::time::Duration;

use tokio::sync::broadcast;

use eventlink_services::{ConnectionManager, TrustStore};

pub async fn trust_refresh_loop(
    manager: ConnectionManager,
    trust: TrustStore,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(every_secs = every.as_secs(), peers = trust.len(), "trust refresh starting");

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = interval.tick() => {
                let dialling = manager.check_trusted(&trust);
                if dialling > 0 {
                    tracing::debug!(dialling, "redialling trusted peers");
                }
            }
        }
    }
}
