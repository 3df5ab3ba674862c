//! /routes handlers — read access to the routing tables.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use eventlink_services::RoutingTableEntry;

use super::ApiState;

// ── /routes ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct RoutesResponse {
    pub tables: BTreeMap<String, BTreeMap<String, RoutingTableEntry>>,
}

/// Every live entry of every table. Also dumps the tables to the log.
pub async fn handle_routes(State(state): State<ApiState>) -> Json<RoutesResponse> {
    state.routes().list_tables_to_log();
    Json(RoutesResponse {
        tables: state.routes().snapshot(),
    })
}

// ── /routes/{table} ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct TableResponse {
    pub table: String,
    pub entries: BTreeMap<String, RoutingTableEntry>,
}

pub async fn handle_table(
    State(state): State<ApiState>,
    Path(table): Path<String>,
) -> Json<TableResponse> {
    let entries = state.routes().get_entries(&table).into_iter().collect();
    Json(TableResponse { table, entries })
}

// ── /routes/{table}/{key} ─────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct LocationResponse {
    pub table: String,
    pub key: String,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

pub async fn handle_location(
    State(state): State<ApiState>,
    Path((table, key)): Path<(String, String)>,
) -> Result<Json<LocationResponse>, (StatusCode, String)> {
    let entry = state
        .routes()
        .get_entry(&table, &key)
        .ok_or((StatusCode::NOT_FOUND, format!("{key} not found in {table}")))?;

    Ok(Json(LocationResponse {
        table,
        key,
        owner: entry.owner,
        location: entry.location,
    }))
}
