use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub warehouse: WarehouseConfig,
    pub llm: LlmConfig,
    pub auth: AuthConfig,
    pub cors: CorsConfig,
    pub conversation: ConversationConfig,
    pub limits: LimitsConfig,
    pub features: FeatureFlags,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Read-only analytics warehouse connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// SQL dialect; only "mysql" is supported today
    pub dialect: String,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub pool_max: usize,
    /// Per-statement timeout in seconds
    pub statement_timeout_secs: u64,
}

/// LLM oracle settings (OpenAI-compatible chat completion API)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Per-call wall clock timeout in seconds
    pub timeout_secs: u64,
    pub max_tokens: u32,
    /// Temperature for SQL generation and classification
    pub sql_temperature: f64,
    /// Temperature for conversational responses
    pub chat_temperature: f64,
    /// Retry attempts for transient upstream errors
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Admin API key; absent means development mode (all callers accepted)
    pub admin_api_key: Option<String>,
    /// Optional analyst-tier API key
    pub analyst_api_key: Option<String>,
    /// Optional public-tier API key
    pub public_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Messages kept per session
    pub max_history: usize,
    /// Idle sessions are purged after this many hours
    pub ttl_hours: i64,
    /// TTL reaper interval in seconds
    pub reaper_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Hard cap on rows returned to the caller
    pub row_cap: usize,
    /// Whole-request deadline in seconds
    pub request_deadline_secs: u64,
    /// Column-name markers for small-cell suppression
    pub suppression_markers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Try the curated template library before the LLM
    pub grounded_templates: bool,
    /// Fall back to the LLM generator when no template matches
    pub legacy_llm_fallback: bool,
    /// Persist feedback / golden examples to disk
    pub feedback_capture: bool,
    /// Directory for the feedback stores
    pub feedback_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "claimlens")]
#[command(version, about = "Claimlens - Natural Language Analytics Gateway")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Warehouse host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub warehouse_host: Option<String>,

    /// Warehouse database name (overrides config file)
    #[arg(long, value_name = "NAME")]
    pub warehouse_name: Option<String>,

    /// LLM API base URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub llm_base_url: Option<String>,

    /// Admin API key (overrides config file)
    #[arg(long, value_name = "KEY")]
    pub admin_api_key: Option<String>,

    /// Logging level (overrides config file, e.g., "info,claimlens=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        // 1. Load from config file (use CLI --config if provided, otherwise find default)
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        // 2. Override with environment variables
        config.apply_env_overrides();

        // 3. Override with command line arguments (highest priority)
        config.apply_cli_overrides(&cli_args);

        // 4. Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_WAREHOUSE_HOST / APP_WAREHOUSE_PORT / APP_WAREHOUSE_NAME
    /// - APP_WAREHOUSE_USER / APP_WAREHOUSE_PASSWORD
    /// - APP_LLM_BASE_URL / APP_LLM_MODEL / APP_LLM_API_KEY / APP_LLM_TIMEOUT_SECS
    /// - APP_ADMIN_API_KEY / APP_ANALYST_API_KEY
    /// - APP_ALLOWED_ORIGINS (comma separated)
    /// - APP_MAX_HISTORY / APP_CONVERSATION_TTL_HOURS
    /// - APP_ROW_CAP / APP_REQUEST_DEADLINE_SECS
    /// - APP_LOG_LEVEL
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(host) = std::env::var("APP_WAREHOUSE_HOST") {
            self.warehouse.host = host;
            tracing::info!("Override warehouse.host from env");
        }

        if let Ok(port) = std::env::var("APP_WAREHOUSE_PORT")
            && let Ok(port) = port.parse()
        {
            self.warehouse.port = port;
        }

        if let Ok(name) = std::env::var("APP_WAREHOUSE_NAME") {
            self.warehouse.name = name;
        }

        if let Ok(user) = std::env::var("APP_WAREHOUSE_USER") {
            self.warehouse.user = user;
        }

        if let Ok(password) = std::env::var("APP_WAREHOUSE_PASSWORD") {
            self.warehouse.password = password;
            tracing::info!("Override warehouse.password from env");
        }

        if let Ok(url) = std::env::var("APP_LLM_BASE_URL") {
            self.llm.base_url = url;
            tracing::info!("Override llm.base_url from env: {}", self.llm.base_url);
        }

        if let Ok(model) = std::env::var("APP_LLM_MODEL") {
            self.llm.model = model;
            tracing::info!("Override llm.model from env: {}", self.llm.model);
        }

        if let Ok(key) = std::env::var("APP_LLM_API_KEY") {
            self.llm.api_key = Some(key);
            tracing::info!("Override llm.api_key from env");
        }

        if let Ok(timeout) = std::env::var("APP_LLM_TIMEOUT_SECS")
            && let Ok(timeout) = timeout.parse()
        {
            self.llm.timeout_secs = timeout;
        }

        if let Ok(key) = std::env::var("APP_ADMIN_API_KEY") {
            self.auth.admin_api_key = Some(key);
            tracing::info!("Override auth.admin_api_key from env");
        }

        if let Ok(key) = std::env::var("APP_ANALYST_API_KEY") {
            self.auth.analyst_api_key = Some(key);
        }

        if let Ok(origins) = std::env::var("APP_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            tracing::info!(
                "Override cors.allowed_origins from env: {:?}",
                self.cors.allowed_origins
            );
        }

        if let Ok(max) = std::env::var("APP_MAX_HISTORY")
            && let Ok(max) = max.parse()
        {
            self.conversation.max_history = max;
        }

        if let Ok(ttl) = std::env::var("APP_CONVERSATION_TTL_HOURS")
            && let Ok(ttl) = ttl.parse()
        {
            self.conversation.ttl_hours = ttl;
        }

        if let Ok(cap) = std::env::var("APP_ROW_CAP")
            && let Ok(cap) = cap.parse()
        {
            self.limits.row_cap = cap;
            tracing::info!("Override limits.row_cap from env: {}", self.limits.row_cap);
        }

        if let Ok(deadline) = std::env::var("APP_REQUEST_DEADLINE_SECS")
            && let Ok(deadline) = deadline.parse()
        {
            self.limits.request_deadline_secs = deadline;
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(host) = &args.warehouse_host {
            self.warehouse.host = host.clone();
            tracing::info!("Override warehouse.host from CLI");
        }

        if let Some(name) = &args.warehouse_name {
            self.warehouse.name = name.clone();
        }

        if let Some(url) = &args.llm_base_url {
            self.llm.base_url = url.clone();
            tracing::info!("Override llm.base_url from CLI: {}", self.llm.base_url);
        }

        if let Some(key) = &args.admin_api_key {
            self.auth.admin_api_key = Some(key.clone());
            tracing::info!("Override auth.admin_api_key from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.auth.admin_api_key.is_none() {
            tracing::warn!("⚠️  No admin API key configured!");
            tracing::warn!("⚠️  Running in DEVELOPMENT mode: all callers are accepted.");
            tracing::warn!("⚠️  Set APP_ADMIN_API_KEY for production use.");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.warehouse.dialect != "mysql" {
            anyhow::bail!("Unsupported warehouse dialect: {}", self.warehouse.dialect);
        }

        if self.warehouse.host.is_empty() || self.warehouse.name.is_empty() {
            anyhow::bail!("Warehouse host and name cannot be empty");
        }

        if self.limits.row_cap == 0 {
            anyhow::bail!("limits.row_cap must be > 0");
        }

        if self.limits.request_deadline_secs == 0 {
            anyhow::bail!("limits.request_deadline_secs must be > 0");
        }

        if self.conversation.max_history == 0 {
            anyhow::bail!("conversation.max_history must be > 0");
        }

        if self.conversation.ttl_hours <= 0 {
            anyhow::bail!("conversation.ttl_hours must be > 0");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8001 }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            dialect: "mysql".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3306,
            name: "analytics".to_string(),
            user: "readonly".to_string(),
            password: String::new(),
            pool_max: 10,
            statement_timeout_secs: 30,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.1-70b-versatile".to_string(),
            api_key: None,
            timeout_secs: 300,
            max_tokens: 2000,
            sql_temperature: 0.1,
            chat_temperature: 0.7,
            max_retries: 3,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { max_history: 10, ttl_hours: 24, reaper_interval_secs: 300 }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            row_cap: 500,
            request_deadline_secs: 120,
            suppression_markers: vec![
                "count".to_string(),
                "total".to_string(),
                "num".to_string(),
            ],
        }
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            grounded_templates: true,
            legacy_llm_fallback: true,
            feedback_capture: true,
            feedback_dir: "data/feedback".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,claimlens=debug".to_string(),
            file: Some("logs/claimlens.log".to_string()),
        }
    }
}
