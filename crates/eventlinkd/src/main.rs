//! eventlinkd — EventLink mesh daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use eventlink_core::config::EventLinkConfig;
use eventlink_services::{
    replication, transport, ConnectionManager, ConnectionSettings, RoutingTableManager,
    TcpTransport, TrustStore,
};

mod dispatch;
mod refresh;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = EventLinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = EventLinkConfig::load().context("failed to load config")?;
    let local_name = match config.server_name() {
        Ok(name) => name.to_string(),
        Err(e) => {
            tracing::error!(
                path = %EventLinkConfig::file_path().display(),
                "server name not set, refusing to start"
            );
            return Err(e.into());
        }
    };
    tracing::info!(name = %local_name, "eventlinkd starting");

    // Shared state
    let trust = TrustStore::from_config(&config.trust.peers);
    let settings = ConnectionSettings::from(&config.connection);

    let (route_tx, route_rx) = mpsc::unbounded_channel();
    let routes = RoutingTableManager::new(local_name.as_str(), config.routing.entry_ttl())
        .publishing_to(route_tx);

    let tcp = TcpTransport::new(&local_name, trust.clone(), settings.handshake_timeout);
    let manager = ConnectionManager::new(routes.clone(), Arc::new(tcp.clone()), settings);

    routes.add_entry("servers", &local_name);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;

    let listener_task = tokio::spawn(transport::serve(
        listener,
        tcp,
        manager.clone(),
        shutdown_tx.subscribe(),
    ));

    let broadcast_task = tokio::spawn(replication::route_broadcast_loop(
        manager.clone(),
        route_rx,
        shutdown_tx.subscribe(),
    ));

    let announce_task = tokio::spawn(replication::announce_loop(
        routes.clone(),
        config.routing.announce_interval(),
        shutdown_tx.subscribe(),
    ));

    let expiry_task = tokio::spawn(replication::expiry_loop(
        routes.clone(),
        config.routing.expiry_interval(),
        shutdown_tx.subscribe(),
    ));

    let refresh_task = tokio::spawn(refresh::trust_refresh_loop(
        manager.clone(),
        trust.clone(),
        config.trust.refresh_interval(),
        shutdown_tx.subscribe(),
    ));

    let pump_task = tokio::spawn(dispatch::event_pump(manager.clone(), shutdown_tx.subscribe()));

    if config.server.api_port != 0 {
        let state = eventlink_api::ApiState::new(manager.clone(), trust.clone());
        let port = config.server.api_port;
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = eventlink_api::serve(state, port, shutdown).await {
                tracing::error!(error = %e, "API server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
        r = listener_task  => tracing::error!("listener exited: {:?}", r),
        r = broadcast_task => tracing::error!("route broadcast exited: {:?}", r),
        r = announce_task  => tracing::error!("announce loop exited: {:?}", r),
        r = expiry_task    => tracing::error!("expiry loop exited: {:?}", r),
        r = refresh_task   => tracing::error!("trust refresh exited: {:?}", r),
        r = pump_task      => tracing::error!("event pump exited: {:?}", r),
    }

    // Withdraw everything we own while the links are still up, and give the
    // broadcast loop and writers a poll interval to flush it.
    let withdrawn = routes.withdraw_local();
    tracing::debug!(tables = withdrawn, "local routes withdrawn");
    tokio::time::sleep(settings.write_poll).await;

    let _ = shutdown_tx.send(());
    let stragglers = manager.stop(settings.join_grace).await;
    if !stragglers.is_empty() {
        tracing::warn!(count = stragglers.len(), "connections still stopping at exit");
    }
    tracing::info!("eventlinkd stopped");
    Ok(())
}
