//! /trust handlers — add and remove trusted peers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::ApiState;

// ── /trust (POST) ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct TrustAddRequest {
    pub name: String,
    pub addr: String,
}

#[derive(Serialize)]
pub struct TrustAddResponse {
    pub name: String,
    pub dialling: usize,
}

/// Trust a peer and dial it straight away.
pub async fn handle_trust_add(
    State(state): State<ApiState>,
    Json(req): Json<TrustAddRequest>,
) -> Result<Json<TrustAddResponse>, (StatusCode, String)> {
    let name = req.name.trim();
    if name.is_empty() || req.addr.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "name and addr are required".into()));
    }
    if name == state.manager.local_name() {
        return Err((StatusCode::BAD_REQUEST, "cannot trust ourselves".into()));
    }

    state.trust.trust(name, req.addr.trim());
    let dialling = state.manager.check_trusted(&state.trust);

    Ok(Json(TrustAddResponse {
        name: name.to_string(),
        dialling,
    }))
}

// ── /trust/{name} (DELETE) ────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct TrustRemoveResponse {
    pub name: String,
    pub connection: String,
}

/// Forget a peer and drop its connection.
pub async fn handle_trust_remove(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<TrustRemoveResponse>, (StatusCode, String)> {
    if !state.trust.remove(&name) {
        return Err((StatusCode::NOT_FOUND, format!("{name} is not trusted")));
    }
    let outcome = state.manager.delete_connection(&name).await;
    Ok(Json(TrustRemoveResponse {
        name,
        connection: outcome.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;

    #[tokio::test]
    async fn add_then_remove() {
        let state = test_support::state();
        let req = TrustAddRequest {
            name: "survival".into(),
            addr: "127.0.0.1:1".into(),
        };
        let Json(added) = handle_trust_add(State(state.clone()), Json(req)).await.unwrap();
        assert_eq!(added.name, "survival");
        assert!(state.trust.is_trusted("survival"));

        let Json(removed) = handle_trust_remove(State(state.clone()), Path("survival".into()))
            .await
            .unwrap();
        assert_eq!(removed.connection, "not found");
        assert!(!state.trust.is_trusted("survival"));

        let err = handle_trust_remove(State(state), Path("survival".into()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn refuses_self_and_blank() {
        let state = test_support::state();
        for (name, addr) in [("lobby", "127.0.0.1:1"), ("", "127.0.0.1:1"), ("x", " ")] {
            let req = TrustAddRequest {
                name: name.into(),
                addr: addr.into(),
            };
            let err = handle_trust_add(State(state.clone()), Json(req))
                .await
                .err()
                .unwrap();
            assert_eq!(err.0, StatusCode::BAD_REQUEST);
        }
        assert!(state.trust.is_empty());
    }
}
