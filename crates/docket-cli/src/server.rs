//! HTTP routes for the chat UI.

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tracing::info;

use docket_runtime::{ChatRequest, ChatResponse, ExplainResponse, Orchestrator};

/// Origins the browser UI is served from during development.
pub const UI_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

pub type SharedOrchestrator = Arc<Orchestrator>;

pub fn create_router(orchestrator: SharedOrchestrator) -> anyhow::Result<Router> {
    let origins = UI_ORIGINS
        .iter()
        .map(|o| o.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Ok(Router::new()
        .route("/health", get(health))
        .route("/explain-case", post(explain_case))
        .route("/chat", post(chat))
        .layer(cors)
        .with_state(orchestrator))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Deserialize)]
pub struct CaseRequest {
    pub case_id: String,
}

/// POST /explain-case
pub async fn explain_case(
    State(orchestrator): State<SharedOrchestrator>,
    Json(request): Json<CaseRequest>,
) -> Json<ExplainResponse> {
    info!(case_id = %request.case_id, "explain-case");
    Json(orchestrator.explain_case(request.case_id.trim()).await)
}

/// POST /chat
pub async fn chat(
    State(orchestrator): State<SharedOrchestrator>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatResponse> {
    let response = orchestrator.chat(request).await;
    info!(
        session_id = %response.session_id,
        cards = response.ui_cards.len(),
        "chat"
    );
    Json(response)
}
