//! Server Configuration
//!
//! Loaded from an optional file, `config/default`, `config/local` and
//! `CLIPFUND__*` environment variables; CLI flags override on top.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use clipfund_db::DatabaseConfig;
use clipfund_engine::{EngineConfig, SchedulerConfig, ScoringConfig};
use clipfund_ingest::{IpAllowlist, ProviderConfig};

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server binding configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// PostgreSQL connection
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Refresh cycle timing and batch sizes
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Point weights and redistribution tunables
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Metrics provider client
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Inbound provider webhooks
    #[serde(default)]
    pub webhook: WebhookSettings,

    /// Cron and admin credentials
    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server binding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Use the in-memory store instead of PostgreSQL
    #[serde(default)]
    pub in_memory: bool,

    /// CORS allowed origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            in_memory: false,
            cors_origins: default_cors_origins(),
        }
    }
}

impl ServerSettings {
    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address {}:{}: {}", self.host, self.port, e))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Provider webhook settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// HMAC-SHA256 shared secret
    #[serde(default)]
    pub secret: String,

    /// Exact IPs or CIDR ranges; empty allows every source
    #[serde(default)]
    pub ip_allowlist: Vec<String>,

    /// Take the client address from the first X-Forwarded-For hop
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ip_allowlist: Vec::new(),
            trust_forwarded_for: false,
        }
    }
}

/// Cron and admin credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Bearer secret the external cron presents
    #[serde(default)]
    pub cron_secret: String,

    /// Operator token accepted in `X-Admin-Token`
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            cron_secret: String::new(),
            admin_token: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Exporter port (separate from the main server)
    #[serde(default = "default_metrics_port")]
    pub port: Option<u16>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

// =============================================================================
// Default Functions
// =============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_metrics_port() -> Option<u16> {
    Some(9090)
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl ServerConfig {
    /// Load configuration from environment and optional config file
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("CLIPFUND")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("webhook.ip_allowlist")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            );

        let server_config: ServerConfig = builder.build()?.try_deserialize()?;
        Ok(server_config)
    }

    /// Configuration for local runs against the in-memory store
    pub fn development() -> Self {
        Self {
            server: ServerSettings {
                in_memory: true,
                ..Default::default()
            },
            auth: AuthSettings {
                cron_secret: "dev-cron-secret".to_string(),
                admin_token: Some("dev-admin-token".to_string()),
            },
            webhook: WebhookSettings {
                secret: "dev-webhook-secret".to_string(),
                ..Default::default()
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
            metrics: MetricsConfig {
                enabled: false,
                port: None,
            },
            ..Default::default()
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            scheduler: self.scheduler.clone(),
            scoring: self.scoring.clone(),
        }
    }

    pub fn allowlist(&self) -> anyhow::Result<IpAllowlist> {
        Ok(IpAllowlist::parse(self.webhook.ip_allowlist.as_slice())?)
    }
}

/// Refuse to start on settings that would make the service unsafe or unusable
pub fn validate_config(config: &ServerConfig) -> anyhow::Result<()> {
    if config.auth.cron_secret.trim().is_empty() {
        anyhow::bail!("auth.cron_secret must be set (CLIPFUND__AUTH__CRON_SECRET)");
    }
    if config.webhook.secret.trim().is_empty() {
        anyhow::bail!("webhook.secret must be set (CLIPFUND__WEBHOOK__SECRET)");
    }
    if matches!(&config.auth.admin_token, Some(token) if token.trim().is_empty()) {
        anyhow::bail!("auth.admin_token is set but empty");
    }
    if !config.server.in_memory && config.database.url.is_empty() {
        anyhow::bail!("database.url must be set unless running in-memory");
    }
    if config.provider.base_url.is_empty() {
        anyhow::bail!("provider.base_url must be set");
    }
    if config.provider.api_token.is_empty() {
        tracing::warn!("provider.api_token is empty; provider calls will be unauthenticated");
    }
    config.allowlist()?;
    config.engine().validate()?;
    config.server.socket_addr()?;
    Ok(())
}
