use axum::{Json, extract::State};
use serde_json::json;
use std::sync::Arc;

use crate::AppState;

/// Service identity and status
pub async fn root(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "claimlens",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "grounded_templates_enabled": state.config.features.grounded_templates,
        "active_sessions": state.conversations.session_count(),
    }))
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn ready_check() -> &'static str {
    "READY"
}
