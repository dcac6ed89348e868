//! HTTP surface

use crate::bridge::bridge;
use crate::orchestrator::Orchestrator;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Query string of `POST /chat-stream`
#[derive(Debug, Deserialize)]
pub struct ChatStreamParams {
    pub query: String,
}

/// Routes: `POST /chat-stream?query=...` and `GET /health`
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/chat-stream", post(chat_stream))
        .route("/health", get(health))
        .with_state(orchestrator)
}

async fn chat_stream(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(params): Query<ChatStreamParams>,
) -> impl IntoResponse {
    info!(query = %params.query, "Chat stream request");
    let body = Body::from_stream(bridge(orchestrator.run(params.query)));
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}

async fn health() -> &'static str {
    "ok"
}
