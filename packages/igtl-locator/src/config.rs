use crate::channel::DEFAULT_CHANNEL_CAPACITY;
use crate::connection::RetryPolicy;
use crate::types::MarkerGeometry;
use serde::{Deserialize, Serialize};
use std::env;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 18944;
pub const DEFAULT_QUERY_RESOLUTION_MS: u32 = 50;

/// Locator configuration, loadable from `LOCATOR_*` environment variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// OpenIGTLink server host
    pub host: String,
    /// OpenIGTLink server port
    pub port: u16,
    /// Number of locator channels on the panel
    pub channels: usize,
    /// Connection retry bound and delay
    pub retry: RetryPolicy,
    /// Update interval requested from the device when tracking starts
    pub query_resolution_ms: u32,
    /// Select newly announced streams into empty channels at the same position
    pub auto_select: bool,
    /// Shape handed to the scene for every marker
    pub geometry: MarkerGeometry,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            channels: DEFAULT_CHANNEL_CAPACITY,
            retry: RetryPolicy::default(),
            query_resolution_ms: DEFAULT_QUERY_RESOLUTION_MS,
            auto_select: true,
            geometry: MarkerGeometry::default(),
        }
    }
}

impl LocatorConfig {
    /// Load configuration from the environment (and `.env`, if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup("LOCATOR_PORT") {
            Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidPort)?,
            None => defaults.port,
        };

        let config = Self {
            host: lookup("LOCATOR_HOST").unwrap_or(defaults.host),
            port,
            channels: parse_or(&lookup, "LOCATOR_CHANNELS", defaults.channels)?,
            retry: RetryPolicy {
                attempts: parse_or(&lookup, "LOCATOR_CONNECT_ATTEMPTS", defaults.retry.attempts)?,
                delay_ms: parse_or(&lookup, "LOCATOR_RETRY_DELAY_MS", defaults.retry.delay_ms)?,
            },
            query_resolution_ms: parse_or(
                &lookup,
                "LOCATOR_QUERY_RESOLUTION_MS",
                defaults.query_resolution_ms,
            )?,
            auto_select: lookup("LOCATOR_AUTO_SELECT")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(defaults.auto_select),
            geometry: defaults.geometry,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels == 0 {
            return Err(ConfigError::InvalidValue(
                "LOCATOR_CHANNELS must be at least 1".to_string(),
            ));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "LOCATOR_CONNECT_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue("LOCATOR_HOST is empty".to_string()));
        }
        Ok(())
    }

    /// The full server address (host:port)
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, v))),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
