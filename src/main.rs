use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use claimlens::config::Config;
use claimlens::models;
use claimlens::services::{
    ConversationStore, DomainRouter, FeedbackStore, InsightGenerator, IntentClassifier,
    IntentRouter, LlmClient, QueryExecutor, QueryPipeline, ResultSanitizer, SafetyValidator,
    SchemaCatalog, SqlGenerator, SqlRewriter, TemplateLibrary, WarehouseClient,
};
use claimlens::{AppState, handlers, middleware, services};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::query::submit_query,

        handlers::conversations::get_history,
        handlers::conversations::get_summary,
        handlers::conversations::clear_history,

        handlers::schema::describe_schema,
        handlers::schema::refresh_schema,

        handlers::feedback::submit_feedback,
        handlers::feedback::add_golden_example,
        handlers::feedback::list_golden_examples,
    ),
    components(
        schemas(
            models::QueryRequest,
            models::QuerySuccess,
            models::QueryFailure,
            models::VisualizationHint,
            models::FeedbackRequest,
            models::FeedbackType,
            models::GoldenExampleRequest,
            models::GoldenExample,
            services::StoredMessage,
            services::MessageRole,
            services::schema_catalog::TableSchema,
            services::schema_catalog::ColumnInfo,
            services::schema_catalog::ForeignKey,
        )
    ),
    tags(
        (name = "Query", description = "Natural language query pipeline"),
        (name = "Conversations", description = "Session history management"),
        (name = "Schema", description = "Warehouse schema catalogue"),
        (name = "Feedback", description = "Feedback capture and golden examples"),
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.as_mut().unwrap();
        components.add_security_scheme(
            "api_key",
            utoipa::openapi::security::SecurityScheme::ApiKey(
                utoipa::openapi::security::ApiKey::Header(
                    utoipa::openapi::security::ApiKeyValue::new("X-API-Key"),
                ),
            ),
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);

    let registry = tracing_subscriber::registry().with(log_filter);

    // The appender guard must outlive main for file logging to flush
    let mut _appender_guard = None;
    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("claimlens.log");

        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _appender_guard = Some(guard);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    tracing::info!("Claimlens starting up");
    tracing::info!("Configuration loaded successfully");

    let warehouse = Arc::new(WarehouseClient::from_config(&config.warehouse));
    tracing::info!(
        "Warehouse pool configured for {}:{}/{}",
        config.warehouse.host,
        config.warehouse.port,
        config.warehouse.name
    );

    let catalog = Arc::new(SchemaCatalog::initialize(&warehouse).await);

    let conversations = Arc::new(ConversationStore::new(
        config.conversation.max_history,
        config.conversation.ttl_hours,
    ));

    let feedback = Arc::new(FeedbackStore::new(
        config.features.feedback_dir.clone(),
        config.features.feedback_capture,
    ));

    let llm = Arc::new(LlmClient::new(config.llm.clone()));
    tracing::info!("LLM oracle configured: {} @ {}", config.llm.model, config.llm.base_url);

    let mut templates = TemplateLibrary::builtin();
    let golden = feedback.golden_examples(None);
    if !golden.is_empty() {
        tracing::info!("Extending template library with {} golden examples", golden.len());
        templates.extend_with_golden(&golden);
    }
    tracing::info!("Grounded template library holds {} entries", templates.len());

    let executor = QueryExecutor::new(
        Arc::clone(&warehouse),
        config.limits.row_cap,
        Duration::from_secs(config.warehouse.statement_timeout_secs),
    );

    let pipeline = Arc::new(QueryPipeline::new(
        IntentRouter::new(Arc::clone(&llm)),
        DomainRouter::new(Arc::clone(&catalog)),
        IntentClassifier::new(),
        SqlGenerator::new(Arc::clone(&llm), templates, config.features.clone()),
        SafetyValidator::new(),
        SqlRewriter::new(),
        executor,
        ResultSanitizer::new(config.limits.suppression_markers.clone()),
        InsightGenerator::new(Arc::clone(&llm)),
        Arc::clone(&conversations),
        Arc::clone(&catalog),
        Arc::clone(&llm),
        Duration::from_secs(config.limits.request_deadline_secs),
    ));
    tracing::info!("Query pipeline assembled");

    let app_state = AppState {
        config: config.clone(),
        warehouse: Arc::clone(&warehouse),
        llm: Arc::clone(&llm),
        catalog: Arc::clone(&catalog),
        conversations: Arc::clone(&conversations),
        feedback: Arc::clone(&feedback),
        pipeline: Arc::clone(&pipeline),
    };

    let reaper_interval = Duration::from_secs(config.conversation.reaper_interval_secs);
    let _reaper_handle =
        ConversationStore::spawn_reaper(Arc::clone(&conversations), reaper_interval);
    tracing::info!("Conversation reaper started (interval: {:?})", reaper_interval);

    let app_state_arc = Arc::new(app_state);

    let auth_state = middleware::AuthState { auth: config.auth.clone() };

    let protected_routes = Router::new()
        .route("/api/v1/admin/query", post(handlers::query::submit_query))
        .route(
            "/api/v1/admin/conversations/:session_id",
            get(handlers::conversations::get_history)
                .delete(handlers::conversations::clear_history),
        )
        .route(
            "/api/v1/admin/conversations/:session_id/summary",
            get(handlers::conversations::get_summary),
        )
        .route("/api/v1/admin/schema", get(handlers::schema::describe_schema))
        .route("/api/v1/admin/schema/refresh", post(handlers::schema::refresh_schema))
        .route("/api/v1/admin/feedback", post(handlers::feedback::submit_feedback))
        .route(
            "/api/v1/admin/golden-examples",
            get(handlers::feedback::list_golden_examples)
                .post(handlers::feedback::add_golden_example),
        )
        .with_state(Arc::clone(&app_state_arc))
        .layer(axum_middleware::from_fn_with_state(auth_state, middleware::auth_middleware));

    let public_routes = Router::new()
        .route("/", get(handlers::system::root))
        .with_state(Arc::clone(&app_state_arc));

    let health_routes = Router::new()
        .route("/health", get(handlers::system::health_check))
        .route("/ready", get(handlers::system::ready_check));

    let cors = build_cors_layer(&config.cors.allowed_origins);

    let app = Router::new()
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public_routes)
        .merge(protected_routes)
        .merge(health_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);
    tracing::info!("Claimlens is ready to serve requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down, closing warehouse pool");
    warehouse.disconnect().await;

    Ok(())
}

/// Allowed origins from configuration; an empty list means permissive
/// (development convenience)
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<axum::http::HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
