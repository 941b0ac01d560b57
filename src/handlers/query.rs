use axum::{Json, extract::State};
use std::sync::Arc;

use crate::AppState;
use crate::middleware::AuthedCaller;
use crate::models::{QueryOutcome, QueryRequest, QuerySuccess};
use crate::utils::ApiResult;

/// Submit a natural language question to the query pipeline
///
/// Both answered questions and governed refusals return 200; refusals
/// carry `success: false` with a stable `error_type`.
#[utoipa::path(
    post,
    path = "/api/v1/admin/query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Answer or governed refusal", body = QuerySuccess),
        (status = 401, description = "Missing or invalid credentials")
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Query"
)]
pub async fn submit_query(
    State(state): State<Arc<AppState>>,
    axum::extract::Extension(caller): axum::extract::Extension<AuthedCaller>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<QueryOutcome>> {
    tracing::info!(
        role = caller.role.as_str(),
        "Query received: {:?}",
        request.query.chars().take(120).collect::<String>()
    );

    let outcome = state.pipeline.handle(request, caller.role).await;
    Ok(Json(outcome))
}
