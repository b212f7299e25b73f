//! Axum router configuration with middleware.
//!
//! All routes are under `/api/`. Middleware: permissive CORS (the chat
//! frontend is served from a different origin in development) and request
//! tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Chat
        .route("/chat/message", post(handlers::chat::process_message))
        .route("/chat/status", get(handlers::chat::conversation_status))
        .route("/chat/reset", post(handlers::chat::reset_conversation))
        .route("/chat/sessions", get(handlers::chat::list_sessions))
        // Documents
        .route("/documents/upload", post(handlers::document::upload_document))
        .route(
            "/documents/download/sanction-letter/{filename}",
            get(handlers::document::download_sanction_letter),
        )
        // History
        .route("/history/applications", get(handlers::history::list_applications));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - simple liveness check.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
