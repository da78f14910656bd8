use anyhow::{bail, Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid requests_per_second: {0}. Must be positive")]
    InvalidRate(f64),

    #[error("Invalid burst_size: {0}. Must be at least 1")]
    InvalidBurstSize(u32),

    #[error("Invalid promotion_after_grants: {0}. Must be at least 1")]
    InvalidPromotionBound(u32),

    #[error("Invalid max_wait_ms: {0}. Must be positive")]
    InvalidMaxWait(u64),

    #[error("Capital floors must satisfy park_floor ({park}) <= trade_floor ({trade}) <= build_floor ({build})")]
    InvalidFloors { park: i64, trade: i64, build: i64 },

    #[error("Invalid max_contract_agents: {0}. Must be at least 1")]
    InvalidContractAgents(u32),

    #[error("Invalid max_crashes: {0}. Must be at least 1")]
    InvalidMaxCrashes(u32),

    #[error("Invalid {name}: {value}. Must be at least 1")]
    InvalidCapacity { name: &'static str, value: usize },

    #[error("Invalid reevaluate_interval_secs: {0}. Must be positive")]
    InvalidInterval(u64),

    #[error("Remote base_url cannot be empty")]
    EmptyBaseUrl,

    #[error("Invalid remote timeout_secs: {0}. Must be positive")]
    InvalidTimeout(u64),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .flotilla/config.yaml (project config)
    /// 3. .flotilla/local.yaml (local overrides, optional)
    /// 4. Environment variables (FLOTILLA_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".flotilla/config.yaml"))
            .merge(Yaml::file(".flotilla/local.yaml"))
            .merge(Env::prefixed("FLOTILLA_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file. Environment overrides still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!("Config file not found: {}", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("FLOTILLA_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Explicit file when given, otherwise the project hierarchy.
    pub fn resolve(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load(),
        }
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let scheduler = &config.scheduler;
        if !scheduler.requests_per_second.is_finite() || scheduler.requests_per_second <= 0.0 {
            return Err(ConfigError::InvalidRate(scheduler.requests_per_second));
        }
        if scheduler.burst_size == 0 {
            return Err(ConfigError::InvalidBurstSize(scheduler.burst_size));
        }
        if scheduler.promotion_after_grants == 0 {
            return Err(ConfigError::InvalidPromotionBound(scheduler.promotion_after_grants));
        }
        if scheduler.max_wait_ms == 0 {
            return Err(ConfigError::InvalidMaxWait(scheduler.max_wait_ms));
        }

        let strategy = &config.strategy;
        if strategy.park_floor > strategy.trade_floor || strategy.trade_floor > strategy.build_floor {
            return Err(ConfigError::InvalidFloors {
                park: strategy.park_floor,
                trade: strategy.trade_floor,
                build: strategy.build_floor,
            });
        }
        if strategy.max_contract_agents == 0 {
            return Err(ConfigError::InvalidContractAgents(strategy.max_contract_agents));
        }
        if strategy.max_crashes == 0 {
            return Err(ConfigError::InvalidMaxCrashes(strategy.max_crashes));
        }

        let commander = &config.commander;
        if commander.event_queue_capacity == 0 {
            return Err(ConfigError::InvalidCapacity {
                name: "event_queue_capacity",
                value: commander.event_queue_capacity,
            });
        }
        if commander.history_capacity == 0 {
            return Err(ConfigError::InvalidCapacity {
                name: "history_capacity",
                value: commander.history_capacity,
            });
        }
        if commander.reevaluate_interval_secs == 0 {
            return Err(ConfigError::InvalidInterval(commander.reevaluate_interval_secs));
        }

        if config.remote.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }
        if config.remote.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(config.remote.timeout_secs));
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        Ok(())
    }
}
