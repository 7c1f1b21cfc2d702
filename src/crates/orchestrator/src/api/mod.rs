//! HTTP and WebSocket surface.
//!
//! The caller's identity arrives in the `x-user-id` header (authentication
//! itself is an upstream concern; the gateway injects the header).

pub mod export;
pub mod files;
pub mod ws;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use std::sync::Arc;
use store::ExportService;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{Result, ServerError};
use crate::request::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub exports: Arc<ExportService>,
}

pub fn user_of(headers: &HeaderMap) -> Result<String> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ServerError::MissingField("x-user-id header".to_string()))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn admin_sessions(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "active_sessions": state.orchestrator.sessions.active_sessions(),
    }))
}

pub fn router(state: AppState) -> Router {
    let admin_enabled = state.orchestrator.settings().admin_api;
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_upgrade))
        .route("/upload", post(files::upload))
        .route("/files/:id", get(files::download))
        .route("/files/:id/indexed", post(files::mark_indexed))
        .route("/share/:token/files/:id", get(files::shared_download))
        .route("/chat/:conversation_id", delete(files::delete_chat))
        .route("/export/request", post(export::request))
        .route("/export/status", get(export::status))
        .route("/export/download", get(export::download))
        .route("/export", delete(export::clear));

    if admin_enabled {
        router = router.route("/admin/sessions", get(admin_sessions));
    }

    router
        .layer(DefaultBodyLimit::max(64 * 1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
