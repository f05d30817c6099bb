//! Configuration
//!
//! Loaded from environment variables, optionally preceded by a `.env` file.
//! Values from the `.env` file take precedence over the process environment
//! so local overrides never require touching the system environment.

use crate::messaging::nats::NatsConfig;
use crate::resilience::retry_policy::RetryPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
}

/// One source database whose outbox table this relay drains.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Logical service name, used as metric label and topic suffix
    pub name: String,
    pub database_url: String,
}

/// Circuit breaker settings for the publish target.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window_secs(),
            reset_timeout_secs: default_reset_timeout_secs(),
        }
    }
}

fn default_failure_threshold() -> usize {
    5
}

fn default_failure_window_secs() -> u64 {
    60
}

fn default_reset_timeout_secs() -> u64 {
    30
}

/// Top-level relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub nats: NatsConfig,
    /// Topic prefix; events for source `orders` go to `<prefix>.orders`
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Concurrent publishes per cycle
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub breaker: BreakerSettings,
    /// Claims older than this revert to pending
    #[serde(default = "default_stale_claim_timeout_secs")]
    pub stale_claim_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_max_db_connections")]
    pub max_db_connections: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_topic_prefix() -> String {
    "events".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_in_flight() -> usize {
    8
}

fn default_stale_claim_timeout_secs() -> u64 {
    300
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_max_db_connections() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stale_claim_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_claim_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn topic_for(&self, source: &str) -> String {
        format!("{}.{}", self.topic_prefix, source)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::MissingVar("RELAY_SOURCES".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RELAY_BATCH_SIZE".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RELAY_MAX_IN_FLIGHT".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Loads configuration from `.env` (optional) plus environment variables.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_file_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(env_file_path: Option<PathBuf>) -> Self {
        Self { env_file_path }
    }

    pub fn load(&self) -> Result<RelayConfig, ConfigError> {
        if let Some(path) = &self.env_file_path {
            // Missing file is fine; unreadable values surface below.
            let _ = dotenvy::from_path_override(path);
        }

        let sources = parse_sources(
            &std::env::var("RELAY_SOURCES")
                .map_err(|_| ConfigError::MissingVar("RELAY_SOURCES".to_string()))?,
        )?;

        let nats = NatsConfig {
            urls: std::env::var("RELAY_NATS_URLS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["nats://localhost:4222".to_string()]),
            ..NatsConfig::default()
        };

        let config = RelayConfig {
            sources,
            nats,
            topic_prefix: env_or("RELAY_TOPIC_PREFIX", default_topic_prefix()),
            batch_size: env_parsed("RELAY_BATCH_SIZE", default_batch_size())?,
            poll_interval_secs: env_parsed("RELAY_POLL_INTERVAL_SECS", default_poll_interval_secs())?,
            max_in_flight: env_parsed("RELAY_MAX_IN_FLIGHT", default_max_in_flight())?,
            retry: RetryPolicy {
                max_attempts: env_parsed("RELAY_MAX_ATTEMPTS", 5)?,
                base_delay_ms: env_parsed("RELAY_RETRY_BASE_DELAY_MS", 1_000)?,
                max_delay_ms: env_parsed("RELAY_RETRY_MAX_DELAY_MS", 60_000)?,
                jitter_factor: env_parsed("RELAY_RETRY_JITTER_FACTOR", 0.1)?,
            },
            breaker: BreakerSettings {
                failure_threshold: env_parsed(
                    "RELAY_BREAKER_FAILURE_THRESHOLD",
                    default_failure_threshold(),
                )?,
                failure_window_secs: env_parsed(
                    "RELAY_BREAKER_FAILURE_WINDOW_SECS",
                    default_failure_window_secs(),
                )?,
                reset_timeout_secs: env_parsed(
                    "RELAY_BREAKER_RESET_TIMEOUT_SECS",
                    default_reset_timeout_secs(),
                )?,
            },
            stale_claim_timeout_secs: env_parsed(
                "RELAY_STALE_CLAIM_TIMEOUT_SECS",
                default_stale_claim_timeout_secs(),
            )?,
            shutdown_timeout_secs: env_parsed(
                "RELAY_SHUTDOWN_TIMEOUT_SECS",
                default_shutdown_timeout_secs(),
            )?,
            max_db_connections: env_parsed("RELAY_MAX_DB_CONNECTIONS", default_max_db_connections())?,
            log_level: env_or("RELAY_LOG_LEVEL", default_log_level()),
        };

        config.validate()?;
        Ok(config)
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("cannot parse '{value}'"),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse `name=url,name=url` pairs from `RELAY_SOURCES`.
fn parse_sources(raw: &str) -> Result<Vec<SourceConfig>, ConfigError> {
    let mut sources = Vec::new();
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (name, url) = pair
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidValue {
                name: "RELAY_SOURCES".to_string(),
                message: format!("expected name=url, got '{pair}'"),
            })?;
        let name = name.trim();
        let url = url.trim();
        if name.is_empty() || url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "RELAY_SOURCES".to_string(),
                message: format!("empty name or url in '{pair}'"),
            });
        }
        sources.push(SourceConfig {
            name: name.to_string(),
            database_url: url.to_string(),
        });
    }
    if sources.is_empty() {
        return Err(ConfigError::MissingVar("RELAY_SOURCES".to_string()));
    }
    Ok(sources)
}
