//! Claimlens Library
//!
//! Natural-language analytics gateway over a read-only healthcare claims
//! warehouse. This library contains all the core modules: the staged
//! query pipeline, its side services, and the HTTP surface.

use std::sync::Arc;

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use models::{PipelineError, QueryOutcome, QueryRequest, Role};
pub use services::llm::{LlmClient, LlmError, LlmOracle};
pub use services::{
    ConversationStore, FeedbackStore, QueryPipeline, SchemaCatalog, WarehouseClient,
};

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI container.
/// All services are constructed once at startup, wrapped in Arc for cheap
/// cloning, and passed by reference. No globals, no implicit discovery.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    pub warehouse: Arc<WarehouseClient>,
    pub llm: Arc<LlmClient>,

    pub catalog: Arc<SchemaCatalog>,
    pub conversations: Arc<ConversationStore>,
    pub feedback: Arc<FeedbackStore>,

    pub pipeline: Arc<QueryPipeline>,
}
