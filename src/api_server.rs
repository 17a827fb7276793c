//! Session Control API
//!
//! Local HTTP surface for external UIs (popup, overlay, scripts) to start and
//! stop the decision loop, swap credential or profile, and read the last
//! published status.

use crate::core::session::SessionControl;
use crate::core::state::ProfileTable;
use crate::io::status::{Status, StatusBoard};
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct ApiState {
    pub control: SessionControl,
    pub board: Arc<StatusBoard>,
    pub profiles: Arc<ProfileTable>,
}

// --- Request/Response Types ---

#[derive(Debug, Deserialize)]
pub struct CredentialRequest {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub status: &'static str,
    pub changed: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub profile: String,
    pub credential_set: bool,
    pub last: Option<Status>,
    pub version: String,
}

// --- Handler Functions ---

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "vigil",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    let settings = state.control.settings();
    Json(StatusResponse {
        running: settings.running,
        credential_set: settings.credential().is_some(),
        profile: settings.profile,
        last: state.board.latest(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn start(State(state): State<ApiState>) -> impl IntoResponse {
    let changed = state.control.start();
    Json(CommandResponse { status: "started", changed })
}

async fn stop(State(state): State<ApiState>) -> impl IntoResponse {
    let changed = state.control.stop();
    Json(CommandResponse { status: "stopped", changed })
}

async fn set_credential(
    State(state): State<ApiState>,
    Json(request): Json<CredentialRequest>,
) -> impl IntoResponse {
    let changed = state.control.set_credential(&request.value);
    Json(CommandResponse { status: "updated", changed })
}

async fn set_profile(
    State(state): State<ApiState>,
    Json(request): Json<ProfileRequest>,
) -> impl IntoResponse {
    if !state.profiles.contains(&request.id) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": format!("Unknown profile: {}", request.id) })),
        )
            .into_response();
    }
    let changed = state.control.set_profile(&request.id);
    Json(CommandResponse { status: "updated", changed }).into_response()
}

/// Build the API router
pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/credential", post(set_credential))
        .route("/profile", post(set_profile))
        .layer(cors)
        .with_state(state)
}

/// Start the API server
pub async fn start_server(state: ApiState, listen: &str) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    println!("🌐 Vigil control API listening on http://{}", listen);

    axum::serve(listener, app).await?;
    Ok(())
}
