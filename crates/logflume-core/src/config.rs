//! Environment configuration for the three services.
//!
//! Every binary builds its config with `from_env()` and validates it
//! before wiring the pipeline. Addresses default to the conventional
//! local ports so a whole stack runs on one machine without any
//! environment at all.

use std::env;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::ConfigError;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn env_log_level() -> String {
    env::var("LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| "info".to_string())
}

fn validate_log_level(level: &str) -> Result<(), ConfigError> {
    if VALID_LOG_LEVELS.contains(&level) {
        return Ok(());
    }
    Err(ConfigError::Invalid(format!(
        "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
    )))
}

/// Time-seeded default identity, used when `AGENT_ID` is not set.
fn default_agent_id() -> String {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    format!("agent-{unix}")
}

/// Collection agent settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Unique producer identity.
    pub agent_id: String,
    /// Config service address (host:port).
    pub config_url: String,
    /// Ingestion service address (host:port).
    pub ingestion_url: String,
    /// Files to tail.
    pub log_paths: Vec<PathBuf>,
    /// Whether batches are zstd-compressed.
    pub compression: bool,
    /// zstd level when compression is on.
    pub compression_level: i32,
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            config_url: "127.0.0.1:8080".to_string(),
            ingestion_url: "127.0.0.1:50051".to_string(),
            log_paths: vec![
                PathBuf::from("/logs/application.log"),
                PathBuf::from("/logs/tomcat.log"),
                PathBuf::from("/logs/nginx.log"),
            ],
            compression: true,
            compression_level: 3,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let log_paths = match env::var("LOG_PATHS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect(),
            Err(_) => defaults.log_paths,
        };

        let config = Self {
            agent_id: env::var("AGENT_ID").unwrap_or(defaults.agent_id),
            config_url: env::var("CONFIG_URL").unwrap_or(defaults.config_url),
            ingestion_url: env::var("INGESTION_URL").unwrap_or(defaults.ingestion_url),
            log_paths,
            compression: env::var("LOG_COMPRESSION")
                .map(|val| val.to_lowercase() != "false")
                .unwrap_or(true),
            compression_level: parse_env("LOG_COMPRESSION_LEVEL", defaults.compression_level)?,
            log_level: env_log_level(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_id.trim().is_empty() {
            return Err(ConfigError::Invalid("AGENT_ID cannot be empty".to_string()));
        }
        if self.log_paths.is_empty() {
            return Err(ConfigError::Invalid(
                "LOG_PATHS must name at least one file".to_string(),
            ));
        }
        if !(1..=21).contains(&self.compression_level) {
            return Err(ConfigError::Invalid(format!(
                "LOG_COMPRESSION_LEVEL {} is outside 1..=21",
                self.compression_level
            )));
        }
        validate_log_level(&self.log_level)
    }
}

/// Ingestion service settings.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Stream listener address.
    pub bind: String,
    /// Columnar store HTTP base URL.
    pub store_url: String,
    /// Target table for bulk inserts.
    pub store_table: String,
    /// Health/metrics HTTP port.
    pub health_port: u16,
    /// Sliding dedup window.
    pub dedup_window: Duration,
    pub log_level: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:50051".to_string(),
            store_url: "http://127.0.0.1:8123".to_string(),
            store_table: "logs".to_string(),
            health_port: 8090,
            dedup_window: Duration::from_secs(60),
            log_level: "info".to_string(),
        }
    }
}

impl IngestionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            bind: env::var("INGESTION_BIND").unwrap_or(defaults.bind),
            store_url: env::var("STORE_URL").unwrap_or(defaults.store_url),
            store_table: env::var("STORE_TABLE").unwrap_or(defaults.store_table),
            health_port: parse_env("HEALTH_PORT", defaults.health_port)?,
            dedup_window: Duration::from_secs(parse_env(
                "DEDUP_WINDOW_SECS",
                defaults.dedup_window.as_secs(),
            )?),
            log_level: env_log_level(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_url.trim().is_empty() {
            return Err(ConfigError::Invalid("STORE_URL cannot be empty".to_string()));
        }
        if self.store_table.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "STORE_TABLE cannot be empty".to_string(),
            ));
        }
        if self.health_port == 0 {
            return Err(ConfigError::Invalid(
                "HEALTH_PORT must be greater than 0".to_string(),
            ));
        }
        if self.dedup_window.is_zero() {
            return Err(ConfigError::Invalid(
                "DEDUP_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }
        validate_log_level(&self.log_level)
    }
}

/// Config distribution service settings.
#[derive(Debug, Clone)]
pub struct ConfigServiceConfig {
    /// Request/response listener address.
    pub bind: String,
    /// Backing policy document.
    pub config_file: PathBuf,
    /// Cadence at which the backing file is re-read.
    pub reload_interval: Duration,
    pub log_level: String,
}

impl Default for ConfigServiceConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            config_file: PathBuf::from("/config/config.yaml"),
            reload_interval: Duration::from_secs(10),
            log_level: "info".to_string(),
        }
    }
}

impl ConfigServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            bind: env::var("CONFIG_BIND").unwrap_or(defaults.bind),
            config_file: env::var("CONFIG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_file),
            reload_interval: Duration::from_secs(parse_env(
                "CONFIG_RELOAD_SECS",
                defaults.reload_interval.as_secs(),
            )?),
            log_level: env_log_level(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reload_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "CONFIG_RELOAD_SECS must be greater than 0".to_string(),
            ));
        }
        validate_log_level(&self.log_level)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_are_valid() {
        assert!(AgentConfig::default().validate().is_ok());
        assert!(IngestionConfig::default().validate().is_ok());
        assert!(ConfigServiceConfig::default().validate().is_ok());
    }

    #[test]
    fn default_agent_id_is_time_seeded() {
        let id = AgentConfig::default().agent_id;
        assert!(id.starts_with("agent-"));
        assert!(id["agent-".len()..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn rejects_empty_log_paths() {
        let config = AgentConfig {
            log_paths: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_compression_level() {
        let config = AgentConfig {
            compression_level: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AgentConfig {
            compression_level: 22,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_log_level() {
        let config = IngestionConfig {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_health_port_and_window() {
        let config = IngestionConfig {
            health_port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = IngestionConfig {
            dedup_window: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
