//! Query API request and response envelopes

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::pipeline::Row;

/// Body of POST /api/v1/admin/query
///
/// Emptiness of `query` is checked by the pipeline, not here: a blank
/// question must come back as a governed InvalidInput envelope with the
/// session id, not a 400.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct QueryRequest {
    /// Natural language question
    pub query: String,
    /// Session to continue; a new one is created when absent
    pub session_id: Option<String>,
    /// Use conversation history to refine SQL generation
    #[serde(default)]
    pub refine_query: bool,
    /// Optional branch tag carried into conversation metadata
    pub branch_id: Option<String>,
}

/// Visualization hint computed from the sanitized result shape
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VisualizationHint {
    #[serde(rename = "type")]
    pub kind: String,
    pub columns: Vec<String>,
}

/// Success envelope for a query (DATA or CHAT turn)
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuerySuccess {
    pub success: bool,
    #[schema(value_type = Option<String>)]
    pub sql: Option<String>,
    pub sql_explanation: Option<String>,
    pub confidence: Option<f64>,
    pub row_count: usize,
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<Row>,
    pub visualization: Option<VisualizationHint>,
    pub summary: String,
    /// "template" | "llm"; absent for CHAT turns
    #[schema(value_type = Option<String>)]
    pub source: Option<&'static str>,
    pub session_id: String,
}

/// Refusal / failure envelope, returned with HTTP 200 for governed
/// outcomes so clients can render the message
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueryFailure {
    pub success: bool,
    pub error: String,
    pub error_type: String,
    pub session_id: String,
}

/// Either envelope; serialized flat
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(untagged)]
pub enum QueryOutcome {
    Success(QuerySuccess),
    Failure(QueryFailure),
}

impl QueryOutcome {
    pub fn failure(error: String, error_type: &str, session_id: String) -> Self {
        Self::Failure(QueryFailure {
            success: false,
            error,
            error_type: error_type.to_string(),
            session_id,
        })
    }
}
