//! Feedback and golden-example models
//!
//! Both stores are append-only JSON files; entries are keyed by capture
//! timestamp and never affect query correctness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Category of user feedback on an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Positive,
    Negative,
    WrongData,
    WrongLogic,
    Incomplete,
}

/// Body of POST /api/v1/admin/feedback
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct FeedbackRequest {
    #[validate(length(min = 1))]
    pub session_id: String,
    #[validate(length(min = 1))]
    pub query: String,
    pub sql: Option<String>,
    pub feedback_type: FeedbackType,
    pub comment: Option<String>,
}

/// Stored feedback entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub query: String,
    pub sql: Option<String>,
    pub feedback_type: FeedbackType,
    pub comment: Option<String>,
}

/// Body of POST /api/v1/admin/golden-examples
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct GoldenExampleRequest {
    #[validate(length(min = 1))]
    pub question: String,
    #[validate(length(min = 1))]
    pub sql: String,
    /// e.g. "operational", "regulatory", "executive"
    pub category: String,
    pub validated_by: String,
}

/// A validated question/SQL pair usable by the grounded-template path
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GoldenExample {
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub sql: String,
    pub category: String,
    pub validated_by: String,
}
