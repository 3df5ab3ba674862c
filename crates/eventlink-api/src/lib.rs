pub mod handlers;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::status::handle_status))
        .route("/peers", get(handlers::status::handle_peers))
        .route("/peers/{name}", delete(handlers::status::handle_peer_delete))
        .route("/refresh", post(handlers::status::handle_refresh))
        .route("/trust", post(handlers::trust::handle_trust_add))
        .route("/trust/{name}", delete(handlers::trust::handle_trust_remove))
        .route("/routes", get(handlers::routes::handle_routes))
        .route("/routes/{table}", get(handlers::routes::handle_table))
        .route("/routes/{table}/{key}", get(handlers::routes::handle_location))
        .route("/send", post(handlers::send::handle_send))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(
    state: ApiState,
    port: u16,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
