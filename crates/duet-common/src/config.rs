//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: `PORT` > `DUET__*` env vars > .env file > config.toml > defaults

use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::OnceLock;

use crate::error::{DuetError, DuetResult};

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Initialize the global configuration from environment and the given config file.
///
/// Should be called once at application startup. Later calls return the first result.
pub fn init(file: &str) -> DuetResult<&'static AppConfig> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let app_config = load(file)?;
    Ok(CONFIG.get_or_init(|| app_config))
}

/// Build a configuration without touching the global slot.
pub fn load(file: &str) -> DuetResult<AppConfig> {
    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("server.environment", "development")?
        .set_default("matchmaking.outbound_capacity", 64)?
        .set_default("matchmaking.typing_interval_ms", 1_000)?
        .set_default("matchmaking.wait_timeout_secs", 0)? // unbounded wait
        .set_default("matchmaking.sweep_interval_secs", 5)?
        .set_default(
            "ice.stun_urls",
            vec!["stun:stun.l.google.com:19302", "stun:stun1.l.google.com:19302"],
        )?
        .set_default("ice.turn_urls", Vec::<String>::new())?
        .set_default("limits.max_chat_length", 2_000)?
        .set_default("limits.max_frame_bytes", 65_536)? // SDP blobs stay well under this
        // Optional config file
        .add_source(config::File::with_name(file).required(false))
        // Environment variables (DUET__SERVER__HOST, DUET__CORS__PROD_FRONTEND_URL, etc.)
        .add_source(
            config::Environment::with_prefix("DUET")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("ice.stun_urls")
                .with_list_parse_key("ice.turn_urls")
                .try_parsing(true),
        )
        // Plain PORT, as set by most hosting platforms
        .set_override_option("server.port", std::env::var("PORT").ok())?
        .build()?;

    Ok(cfg.try_deserialize()?)
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    pub matchmaking: MatchmakingConfig,
    pub ice: IceConfig,
    pub limits: LimitsConfig,
}

impl AppConfig {
    /// Frontend origin allowed for CORS in the current environment, if any.
    pub fn frontend_origin(&self) -> Option<&str> {
        let origin = match self.server.environment {
            Environment::Production => self.cors.prod_frontend_url.as_deref(),
            Environment::Development => self.cors.dev_frontend_url.as_deref(),
        };
        origin.filter(|o| !o.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
}

impl ServerConfig {
    /// Address to bind, from `host` and `port`.
    pub fn socket_addr(&self) -> DuetResult<SocketAddr> {
        let ip = self.host.parse().map_err(|e| DuetError::Validation {
            message: format!("invalid server.host {:?}: {e}", self.host),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CorsConfig {
    pub dev_frontend_url: Option<String>,
    pub prod_frontend_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchmakingConfig {
    /// Outbound frames buffered per connection before it is dropped as too slow.
    pub outbound_capacity: usize,
    /// Minimum spacing between forwarded typing notifications from one sender.
    pub typing_interval_ms: u64,
    /// Waiters older than this get `match-timeout`; 0 disables expiry.
    pub wait_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IceConfig {
    pub stun_urls: Vec<String>,
    pub turn_urls: Vec<String>,
    pub turn_username: Option<String>,
    pub turn_credential: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    pub max_chat_length: usize,
    pub max_frame_bytes: usize,
}
