//! HTTP/websocket surface: event fan-out, draft queries, revisions, status.

mod drafts;
mod error;
mod events_ws;
mod router;
mod revisions;
mod state;
mod status;
mod time;

pub use error::HttpError;
pub use router::EventRouter;
pub use state::AppState;
pub use time::{format_iso, format_unix, parse_timestamp};

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Assemble the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(events_ws::events_ws))
        .route("/drafts", get(drafts::list_drafts))
        .route("/drafts/:draft_id", get(drafts::get_draft))
        .route("/api/revisions", post(revisions::submit_revision))
        .route("/api/revisions/:draft_id", get(revisions::get_revisions))
        .route("/health", get(status::health))
        .route("/status", get(status::server_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the future is dropped or the listener fails.
pub async fn serve(state: AppState, host: &str, port: u16) -> std::io::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, build_router(state)).await
}
