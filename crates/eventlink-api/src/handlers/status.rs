//! /status, /peers and /refresh handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use eventlink_services::{DeleteOutcome, Direction};

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub name: String,
    pub uptime_secs: u64,
    pub connections: Vec<ConnectionInfo>,
    pub tables: usize,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub peer: String,
    pub direction: Direction,
    /// Workers still running, e.g. "reader, writer".
    pub workers: String,
    pub closing: bool,
    pub established_secs: u64,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let connections = state
        .manager
        .connections()
        .into_iter()
        .map(|c| ConnectionInfo {
            peer: c.peer().to_string(),
            direction: c.direction(),
            workers: c.which_alive().to_string(),
            closing: c.is_closing(),
            established_secs: c.uptime().as_secs(),
        })
        .collect();

    Json(StatusResponse {
        name: state.manager.local_name().to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        connections,
        tables: state.routes().snapshot().len(),
    })
}

// ── /peers ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

#[derive(Serialize)]
pub struct PeerInfo {
    pub name: String,
    pub addr: String,
    pub connected: bool,
}

/// Every trusted peer and whether it currently has a live link.
pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    let peers = state
        .trust
        .list()
        .into_iter()
        .map(|p| PeerInfo {
            connected: state.manager.is_connected(&p.name),
            name: p.name,
            addr: p.addr,
        })
        .collect();

    Json(PeersResponse { peers })
}

// ── /peers/{name} (DELETE) ────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PeerDeleteResponse {
    pub name: String,
    pub status: String,
}

pub async fn handle_peer_delete(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<PeerDeleteResponse>, (StatusCode, String)> {
    let outcome = state.manager.delete_connection(&name).await;
    if outcome == DeleteOutcome::NotFound {
        return Err((StatusCode::NOT_FOUND, format!("no connection to {name}")));
    }
    tracing::info!(peer = %name, %outcome, "connection deleted via API");
    Ok(Json(PeerDeleteResponse {
        name,
        status: outcome.to_string(),
    }))
}

// ── /refresh (POST) ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct RefreshResponse {
    pub dialling: usize,
}

pub async fn handle_refresh(State(state): State<ApiState>) -> Json<RefreshResponse> {
    let dialling = state.manager.check_trusted(&state.trust);
    Json(RefreshResponse { dialling })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;

    #[tokio::test]
    async fn status_names_the_server() {
        let state = test_support::state();
        state.routes().add_entry("servers", "lobby");
        let Json(status) = handle_status(State(state)).await;
        assert_eq!(status.name, "lobby");
        assert!(status.connections.is_empty());
        assert_eq!(status.tables, 1);
    }

    #[tokio::test]
    async fn peers_lists_trusted_with_connection_flag() {
        let state = test_support::state();
        state.trust.trust("survival", "127.0.0.1:1");
        let Json(resp) = handle_peers(State(state)).await;
        assert_eq!(resp.peers.len(), 1);
        assert_eq!(resp.peers[0].name, "survival");
        assert!(!resp.peers[0].connected);
    }

    #[tokio::test]
    async fn deleting_unknown_peer_is_404() {
        let state = test_support::state();
        let err = handle_peer_delete(State(state), Path("ghost".into()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn refresh_skips_our_own_name() {
        let state = test_support::state();
        state.trust.trust("lobby", "127.0.0.1:1");
        let Json(resp) = handle_refresh(State(state)).await;
        assert_eq!(resp.dialling, 0);
    }
}
