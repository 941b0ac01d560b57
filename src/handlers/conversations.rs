use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::services::StoredMessage;
use crate::utils::ApiResult;

/// Get a session's message history
#[utoipa::path(
    get,
    path = "/api/v1/admin/conversations/{session_id}",
    params(
        ("session_id" = String, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Message history", body = Vec<StoredMessage>)
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Conversations"
)]
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let messages = state.conversations.history(&session_id, None);
    Ok(Json(json!({
        "session_id": session_id,
        "messages": messages,
    })))
}

/// Get the heuristic conversation summary for a session
#[utoipa::path(
    get,
    path = "/api/v1/admin/conversations/{session_id}/summary",
    params(
        ("session_id" = String, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Conversation summary")
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Conversations"
)]
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let summary = state.conversations.summary(&session_id);
    Ok(Json(json!({
        "session_id": session_id,
        "summary": summary,
    })))
}

/// Clear a session's history
#[utoipa::path(
    delete,
    path = "/api/v1/admin/conversations/{session_id}",
    params(
        ("session_id" = String, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "History cleared")
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Conversations"
)]
pub async fn clear_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let cleared = state.conversations.clear(&session_id);
    Ok(Json(json!({
        "session_id": session_id,
        "cleared": cleared,
    })))
}
