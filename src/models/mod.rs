pub mod feedback;
pub mod pipeline;
pub mod query;

pub use feedback::{FeedbackEntry, FeedbackRequest, FeedbackType, GoldenExample, GoldenExampleRequest};
pub use pipeline::{
    CandidateSql, CanonicalIntent, Domain, DomainDecision, ExecutionResult, IntentClassification,
    PipelineError, PipelineStage, QueryContext, Role, Row, SafetyViolationKind, SqlSource,
    StageOutcome, TimeWindow, TimeWindowKind, TopLevelIntent,
};
pub use query::{QueryFailure, QueryOutcome, QueryRequest, QuerySuccess, VisualizationHint};
