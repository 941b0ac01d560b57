use axum::{
    Json,
    extract::{Query, State},
};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::models::{FeedbackEntry, FeedbackRequest, GoldenExample, GoldenExampleRequest};
use crate::utils::{ApiError, ApiResult};

/// Capture user feedback on an answer
#[utoipa::path(
    post,
    path = "/api/v1/admin/feedback",
    request_body = FeedbackRequest,
    responses(
        (status = 200, description = "Feedback stored"),
        (status = 400, description = "Malformed feedback")
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Feedback"
)]
pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    request
        .validate()
        .map_err(|e| ApiError::validation_error(e.to_string()))?;

    let entry = FeedbackEntry {
        timestamp: Utc::now(),
        session_id: request.session_id,
        query: request.query,
        sql: request.sql,
        feedback_type: request.feedback_type,
        comment: request.comment,
    };
    state
        .feedback
        .capture_feedback(entry)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    Ok(Json(json!({ "success": true })))
}

/// Add a validated question/SQL pair to the golden set
#[utoipa::path(
    post,
    path = "/api/v1/admin/golden-examples",
    request_body = GoldenExampleRequest,
    responses(
        (status = 200, description = "Golden example stored"),
        (status = 400, description = "Malformed example")
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Feedback"
)]
pub async fn add_golden_example(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GoldenExampleRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    request
        .validate()
        .map_err(|e| ApiError::validation_error(e.to_string()))?;

    let example = GoldenExample {
        timestamp: Utc::now(),
        question: request.question,
        sql: request.sql,
        category: request.category,
        validated_by: request.validated_by,
    };
    state
        .feedback
        .add_golden_example(example)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    Ok(Json(json!({ "success": true })))
}

/// List the golden question set
#[utoipa::path(
    get,
    path = "/api/v1/admin/golden-examples",
    params(
        ("category" = Option<String>, Query, description = "Category filter (optional)")
    ),
    responses(
        (status = 200, description = "Golden examples", body = Vec<GoldenExample>)
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Feedback"
)]
pub async fn list_golden_examples(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<GoldenExample>>> {
    let category = params.get("category").map(String::as_str);
    Ok(Json(state.feedback.golden_examples(category)))
}
