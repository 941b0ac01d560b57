use axum::{
    Json,
    extract::{Query, State},
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::AppState;
use crate::services::TableSchema;
use crate::utils::{ApiError, ApiResult};

/// Describe the schema catalogue, or one table
#[utoipa::path(
    get,
    path = "/api/v1/admin/schema",
    params(
        ("table" = Option<String>, Query, description = "Table name (optional)")
    ),
    responses(
        (status = 200, description = "Table schemas", body = Vec<TableSchema>),
        (status = 404, description = "Unknown table")
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Schema"
)]
pub async fn describe_schema(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<TableSchema>>> {
    let table = params.get("table").map(|s| s.trim()).filter(|s| !s.is_empty());
    let tables = state.catalog.describe(table);

    if table.is_some() && tables.is_empty() {
        return Err(ApiError::not_found(format!("table '{}'", table.unwrap_or_default())));
    }

    Ok(Json(tables))
}

/// Re-introspect the warehouse and swap the catalogue snapshot
#[utoipa::path(
    post,
    path = "/api/v1/admin/schema/refresh",
    responses(
        (status = 200, description = "Catalogue refreshed"),
        (status = 502, description = "Warehouse unreachable")
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Schema"
)]
pub async fn refresh_schema(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let table_count = state.catalog.refresh(&state.warehouse).await?;
    Ok(Json(json!({
        "refreshed": true,
        "tables": table_count,
    })))
}
