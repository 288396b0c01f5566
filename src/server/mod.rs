//! HTTP transform surface (feature `server`).
//!
//! Routes:
//!   POST /api/v1/transform            - batch transform
//!   POST /api/v1/transform/stream     - SSE streaming transform
//!   POST /api/v1/transform/stream-ab  - SSE A/B comparison
//!   GET  /api/v1/transform/tier       - tier info
//!   POST /api/internal/rag/reload     - atomic RAG index reload (token-gated)
//!
//! Auth/JWT lives outside this crate; errors map to `{error, message}` bodies
//! with user-safe Korean messages.

mod rag_admin;
mod transform;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::pipeline::Orchestrator;
use crate::rag::{RagIndex, RagStore};

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub rag_index: Arc<RagIndex>,
    pub rag_store: Option<Arc<RagStore>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            rag_index: Arc::new(RagIndex::new()),
            rag_store: None,
        }
    }

    pub fn with_rag(mut self, index: Arc<RagIndex>, store: Arc<RagStore>) -> Self {
        self.rag_index = index;
        self.rag_store = Some(store);
        self
    }
}

/// Build the transform router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/transform", post(transform::transform))
        .route("/api/v1/transform/stream", post(transform::stream_transform))
        .route(
            "/api/v1/transform/stream-ab",
            post(transform::stream_transform_ab),
        )
        .route("/api/v1/transform/tier", get(transform::tier_info))
        .route("/api/internal/rag/reload", post(rag_admin::reload))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Wire shape of error bodies: `{error: CODE, message: Korean text}`.
pub(crate) fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": code, "message": message })),
    )
        .into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Validation(message) => {
                error_response(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
            }
            Error::TierRestriction(message) => {
                error_response(StatusCode::FORBIDDEN, "TIER_RESTRICTION", message)
            }
            Error::AiTransform { message } => {
                error_response(StatusCode::SERVICE_UNAVAILABLE, "AI_TRANSFORM_ERROR", message)
            }
            _ => {
                tracing::error!("[Server] Unhandled error: {}", self);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "서버 내부 오류가 발생했습니다. 잠시 후 다시 시도해주세요.",
                )
            }
        }
    }
}
