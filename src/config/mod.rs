//! Configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::models::Policy;

/// Environment variable holding the OAuth client id.
pub const CLIENT_ID_VAR: &str = "OSU_CLIENT_ID";

/// Environment variable holding the OAuth client secret.
pub const CLIENT_SECRET_VAR: &str = "OSU_CLIENT_SECRET";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Missing environment variable {0}")]
    MissingEnv(&'static str),
}

/// Match data provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the REST API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Base URL of the OAuth server
    #[serde(default = "default_oauth_url")]
    pub oauth_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// How long avatar/rank lookups are reused, in seconds
    #[serde(default = "default_enrichment_ttl")]
    pub enrichment_ttl_seconds: u64,
}

fn default_api_base() -> String {
    "https://osu.ppy.sh/api/v2".to_string()
}

fn default_oauth_url() -> String {
    "https://osu.ppy.sh".to_string()
}

fn default_timeout() -> u64 {
    8
}

fn default_enrichment_ttl() -> u64 {
    300
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            oauth_url: default_oauth_url(),
            timeout_seconds: default_timeout(),
            enrichment_ttl_seconds: default_enrichment_ttl(),
        }
    }
}

/// Refresh cycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,

    #[serde(default)]
    pub policy: Policy,
}

fn default_interval() -> u64 {
    10
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            policy: Policy::default(),
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_cors_origin() -> String {
    "*".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            provider: ProviderConfig::default(),
            refresh: RefreshConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "Provider timeout must be greater than 0".to_string(),
            ));
        }

        if self.refresh.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "Refresh interval must be greater than 0".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "Server port must be greater than 0".to_string(),
            ));
        }

        for (field, value) in [
            ("provider.api_base", &self.provider.api_base),
            ("provider.oauth_url", &self.provider.oauth_url),
        ] {
            if url::Url::parse(value).is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "{} is not a valid URL: {}",
                    field, value
                )));
            }
        }

        Ok(())
    }
}

/// OAuth client credentials for the provider.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Read credentials from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let client_id = non_empty_var(CLIENT_ID_VAR)?;
        let client_secret = non_empty_var(CLIENT_SECRET_VAR)?;
        Ok(Self {
            client_id,
            client_secret,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

fn non_empty_var(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::MissingEnv(name)),
    }
}
