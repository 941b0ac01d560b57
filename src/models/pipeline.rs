//! Pipeline Value Types
//!
//! Typed values that move through the query pipeline: the request context,
//! routing decisions, candidate SQL, execution results and the stage-level
//! error taxonomy. Stages never mutate these in place; each stage produces
//! a new value or appends to the context's outcome log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single result row, column name to value
pub type Row = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Roles
// ============================================================================

/// Caller role resolved by the auth layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Analyst,
    Public,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Analyst => "analyst",
            Self::Public => "public",
        }
    }
}

// ============================================================================
// Routing decisions
// ============================================================================

/// Top-level intent: talk to the warehouse or just talk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopLevelIntent {
    Data,
    Chat,
}

/// Supported analytical domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    ClinicalClaimsDiagnosis,
    ProvidersFacilities,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClinicalClaimsDiagnosis => "clinical_claims_diagnosis",
            Self::ProvidersFacilities => "providers_facilities",
        }
    }
}

/// Outcome of domain routing
#[derive(Debug, Clone)]
pub enum DomainDecision {
    Routed { domain: Domain, detected_tables: BTreeSet<String> },
    Rejected { reason: String },
}

/// Canonical analytical intent for in-scope DATA utterances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalIntent {
    FrequencyVolume,
    TrendTimeSeries,
    CostFinancial,
    ServiceUtilization,
    Unknown,
}

impl CanonicalIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FrequencyVolume => "FREQUENCY_VOLUME",
            Self::TrendTimeSeries => "TREND_TIME_SERIES",
            Self::CostFinancial => "COST_FINANCIAL",
            Self::ServiceUtilization => "SERVICE_UTILIZATION",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Kind of time window detected in an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindowKind {
    LastYear,
    ThisYear,
    Recent,
    LastNDays,
    LastNMonths,
    SpecificMonth,
}

/// A resolved time window with its SQL filter fragment
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWindow {
    pub kind: TimeWindowKind,
    pub sql_fragment: String,
    pub needs_clarification: bool,
}

/// Full intent classification for a DATA utterance
#[derive(Debug, Clone)]
pub struct IntentClassification {
    pub canonical: CanonicalIntent,
    pub time_window: Option<TimeWindow>,
    pub top_n: Option<u32>,
    pub clarification: Option<String>,
}

// ============================================================================
// Candidate SQL
// ============================================================================

/// Where a candidate SQL came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlSource {
    GroundedTemplate,
    LlmGenerated,
}

impl SqlSource {
    /// Wire label used in the response envelope
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GroundedTemplate => "template",
            Self::LlmGenerated => "llm",
        }
    }
}

/// A generated SELECT plus metadata, not yet validated.
/// Mutates only through the rewriter, which produces a new value.
#[derive(Debug, Clone)]
pub struct CandidateSql {
    pub sql: String,
    pub explanation: String,
    pub confidence: f64,
    pub tables_referenced: Vec<String>,
    pub source: SqlSource,
}

// ============================================================================
// Execution result
// ============================================================================

/// Result of a bounded warehouse SELECT.
/// Sanitization yields a new value with hidden columns removed.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub truncated: bool,
    pub elapsed_ms: u64,
}

// ============================================================================
// Request context
// ============================================================================

/// Pipeline stages, in program order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    IntentRouted,
    DomainRouted,
    IntentClassified,
    SqlGenerated,
    SqlValidated,
    SqlRewritten,
    Executed,
    Sanitized,
    Narrated,
    Responded,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::IntentRouted => "intent_routed",
            Self::DomainRouted => "domain_routed",
            Self::IntentClassified => "intent_classified",
            Self::SqlGenerated => "sql_generated",
            Self::SqlValidated => "sql_validated",
            Self::SqlRewritten => "sql_rewritten",
            Self::Executed => "executed",
            Self::Sanitized => "sanitized",
            Self::Narrated => "narrated",
            Self::Responded => "responded",
        }
    }
}

/// One recorded stage transition
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub stage: PipelineStage,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Value threaded through the pipeline for one request.
///
/// Carries the original utterance, identity, and an append-only log of
/// stage outcomes. Created by the orchestrator, dropped after the
/// response is emitted.
#[derive(Debug)]
pub struct QueryContext {
    pub question: String,
    pub session_id: String,
    pub branch_id: Option<String>,
    pub role: Role,
    pub refine_query: bool,
    pub received_at: DateTime<Utc>,
    /// Utterance filters on a state; unlocks users/states for analysts
    pub state_filter_context: bool,
    /// Utterance asks for user-level details; locks users/states down again
    pub user_detail_query: bool,
    stages: Vec<StageOutcome>,
}

const STATE_KEYWORDS: &[&str] = &[
    "zamfara", "kano", "kogi", "kaduna", "fct", "abuja", "adamawa", "sokoto", "rivers", "osun",
    "lagos", "state", "states",
];

const USER_DETAIL_PHRASES: &[&str] = &[
    "user details",
    "user information",
    "user profile",
    "which user",
    "who is the user",
];

impl QueryContext {
    pub fn new(
        question: String,
        session_id: String,
        branch_id: Option<String>,
        role: Role,
        refine_query: bool,
    ) -> Self {
        let lower = question.to_lowercase();
        let state_filter_context = STATE_KEYWORDS.iter().any(|kw| lower.contains(kw));
        let user_detail_query = USER_DETAIL_PHRASES.iter().any(|p| lower.contains(p));

        Self {
            question,
            session_id,
            branch_id,
            role,
            refine_query,
            received_at: Utc::now(),
            state_filter_context,
            user_detail_query,
            stages: Vec::new(),
        }
    }

    /// Record a stage transition on the append-only outcome log
    pub fn record(&mut self, stage: PipelineStage, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::debug!(
            session_id = %self.session_id,
            stage = stage.as_str(),
            "{}",
            detail
        );
        self.stages.push(StageOutcome { stage, detail, at: Utc::now() });
    }

    pub fn stages(&self) -> &[StageOutcome] {
        &self.stages
    }
}

// ============================================================================
// Pipeline error taxonomy
// ============================================================================

/// Which validator check rejected the SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyViolationKind {
    ForbiddenOperation,
    MultipleStatements,
    CartesianJoin,
    RoleViolation,
    PiiExposure,
}

impl SafetyViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForbiddenOperation => "forbidden_operation",
            Self::MultipleStatements => "multiple_statements",
            Self::CartesianJoin => "cartesian_join",
            Self::RoleViolation => "role_violation",
            Self::PiiExposure => "pii_exposure",
        }
    }
}

/// Stage-level errors. The orchestrator maps these to the response
/// envelope; refusals keep their user-facing message, faults get a
/// generic one while the detail stays in logs.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    OutOfScope(String),

    #[error("{0}")]
    Clarification(String),

    #[error("{message}")]
    SafetyViolation { kind: SafetyViolationKind, message: String },

    #[error("Failed to generate SQL: {0}")]
    GenerationFailure(String),

    #[error("Query execution failed: {0}")]
    ExecutionError(String),

    #[error("Request deadline exceeded")]
    Timeout,

    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl PipelineError {
    /// Stable error type label for the failure envelope
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "InvalidInput",
            Self::OutOfScope(_) => "OutOfScope",
            Self::Clarification(_) => "Clarification",
            Self::SafetyViolation { .. } => "SafetyViolation",
            Self::GenerationFailure(_) => "GenerationFailure",
            Self::ExecutionError(_) => "ExecutionError",
            Self::Timeout => "Timeout",
            Self::UpstreamUnavailable(_) => "UpstreamUnavailable",
        }
    }

    /// Governed refusals carry a user-visible message; true faults do not
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::OutOfScope(_)
                | Self::Clarification(_)
                | Self::SafetyViolation { .. }
        )
    }

    /// Message suitable for display to the caller
    pub fn user_message(&self) -> String {
        if self.is_refusal() {
            self.to_string()
        } else {
            match self {
                Self::Timeout => {
                    "The request took too long to process. Please try a narrower question."
                        .to_string()
                },
                _ => "Something went wrong while processing your question. Please try again."
                    .to_string(),
            }
        }
    }
}
