//! Application settings and configuration structures.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// JWT verification settings
    pub jwt: JwtSettings,

    /// Gateway protocol and session settings
    pub gateway: GatewaySettings,

    /// Internal collaborator endpoint settings
    pub internal: InternalSettings,

    /// Ready-state collaborator settings
    pub ready_state: ReadyStateSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// JWT verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Secret key used to verify Identify tokens
    pub secret: String,
}

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    /// Base heartbeat interval announced in Hello (default: 41250)
    pub heartbeat_interval_ms: u64,

    /// Maximum amount subtracted from the base interval per connection
    pub heartbeat_jitter_ms: u64,

    /// Slack added to the interval before a missed heartbeat closes the session
    pub heartbeat_grace_ms: u64,

    /// How often the heartbeat monitor sweeps all sessions
    pub sweep_interval_ms: u64,

    /// Connection timeout for identify in seconds (default: 30)
    pub identify_timeout_secs: u64,

    /// Bounded outbound queue length per session
    pub send_queue_capacity: usize,

    /// Maximum concurrent sessions per user
    pub max_sessions_per_user: usize,

    /// Maximum message size in bytes (default: 64KB)
    pub max_message_size: usize,

    /// Maximum frame size in bytes (default: 16KB)
    pub max_frame_size: usize,
}

/// Internal endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InternalSettings {
    /// Bearer token collaborators present to `/internal/*`
    pub token: String,
}

/// Ready-state collaborator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyStateSettings {
    /// Base URL of the REST collaborator; unset means in-memory snapshots
    pub url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Minimum required length for the internal endpoint token
pub const MIN_INTERNAL_TOKEN_LENGTH: usize = 16;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if a secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3001)?
            .set_default("gateway.heartbeat_interval_ms", 41250_i64)?
            .set_default("gateway.heartbeat_jitter_ms", 1250_i64)?
            .set_default("gateway.heartbeat_grace_ms", 5000_i64)?
            .set_default("gateway.sweep_interval_ms", 1000_i64)?
            .set_default("gateway.identify_timeout_secs", 30_i64)?
            .set_default("gateway.send_queue_capacity", 256_i64)?
            .set_default("gateway.max_sessions_per_user", 5_i64)?
            // Message size limits
            .set_default("gateway.max_message_size", 65536_i64)? // 64KB
            .set_default("gateway.max_frame_size", 16384_i64)? // 16KB
            .set_default("ready_state.timeout_secs", 5_i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__GATEWAY__SEND_QUEUE_CAPACITY=512 -> gateway.send_queue_capacity = 512
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .set_override_option("internal.token", std::env::var("INTERNAL_TOKEN").ok())?
            .set_override_option("ready_state.url", std::env::var("READY_STATE_URL").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| settings.validate().map(|_| settings))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} characters for security. Current length: {}",
                MIN_JWT_SECRET_LENGTH,
                self.jwt.secret.len()
            )));
        }
        if self.internal.token.len() < MIN_INTERNAL_TOKEN_LENGTH {
            return Err(ConfigError::Message(format!(
                "Internal token must be at least {} characters",
                MIN_INTERNAL_TOKEN_LENGTH
            )));
        }
        if self.gateway.send_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "gateway.send_queue_capacity must be greater than zero".into(),
            ));
        }
        if self.gateway.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Message(
                "gateway.heartbeat_interval_ms must be greater than zero".into(),
            ));
        }
        if self.gateway.sweep_interval_ms == 0 {
            return Err(ConfigError::Message(
                "gateway.sweep_interval_ms must be greater than zero".into(),
            ));
        }
        if self.gateway.heartbeat_jitter_ms >= self.gateway.heartbeat_interval_ms {
            return Err(ConfigError::Message(
                "gateway.heartbeat_jitter_ms must be smaller than the heartbeat interval".into(),
            ));
        }
        Ok(())
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl GatewaySettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_jitter(&self) -> Duration {
        Duration::from_millis(self.heartbeat_jitter_ms)
    }

    pub fn heartbeat_grace(&self) -> Duration {
        Duration::from_millis(self.heartbeat_grace_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn identify_timeout(&self) -> Duration {
        Duration::from_secs(self.identify_timeout_secs)
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 41250,
            heartbeat_jitter_ms: 1250,
            heartbeat_grace_ms: 5000,
            sweep_interval_ms: 1000,
            identify_timeout_secs: 30,
            send_queue_capacity: 256,
            max_sessions_per_user: 5,
            max_message_size: 65536,
            max_frame_size: 16384,
        }
    }
}
