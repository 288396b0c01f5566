//! Internal RAG admin endpoint.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;

use crate::config::settings;

use super::{error_response, AppState};

/// `POST /api/internal/rag/reload` - atomically reload the in-memory index
/// from storage. Requires the `X-Internal-Token` header to match the
/// configured admin token.
pub async fn reload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, Response> {
    let admin_token = &settings().rag_admin_token;
    let provided = headers
        .get("X-Internal-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if admin_token.is_empty() || provided != admin_token {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "Invalid admin token",
        ));
    }

    let Some(store) = state.rag_store.as_ref() else {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "RAG_UNAVAILABLE",
            "RAG 저장소가 구성되지 않았습니다.",
        ));
    };

    let count = state.rag_index.reload(store).map_err(|e| {
        tracing::error!("RAG reload failed: {}", e);
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "RAG 인덱스 재적재에 실패했습니다.",
        )
    })?;

    let by_category: serde_json::Map<String, serde_json::Value> = store
        .count_by_category()
        .unwrap_or_default()
        .into_iter()
        .map(|(category, n)| (category, serde_json::json!(n)))
        .collect();

    tracing::info!("RAG index reloaded via admin: {} entries", count);
    Ok(Json(serde_json::json!({
        "reloaded": count,
        "by_category": by_category,
    })))
}
