pub mod ws;

use axum::{Json, Router, extract::State, routing::get};
use tower_http::trace::TraceLayer;

use crate::sync::RelayStats;

pub use ws::{WsState, ws_document_handler, ws_root_handler};

/// Build the relay's HTTP surface.
///
/// Every path other than `/health` is a WebSocket endpoint whose final
/// segment names the document.
pub fn router(state: WsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(ws_root_handler))
        .route("/{*path}", get(ws_document_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<WsState>) -> Json<RelayStats> {
    Json(state.registry.stats().await)
}
