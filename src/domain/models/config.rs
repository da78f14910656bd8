use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for flotilla
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Shared remote-call budget
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Strategy engine policy
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Agent task supervision
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Commander control loop
    #[serde(default)]
    pub commander: CommanderConfig,

    /// Remote service client
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Retry policy for transient remote failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Durable fleet log
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Request scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Sustained remote calls per second
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Burst allowance on top of the sustained rate
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Grants a waiter may be passed over before it is promoted one tier
    #[serde(default = "default_promotion_after_grants")]
    pub promotion_after_grants: u32,

    /// Maximum time a caller may wait for a permit
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

const fn default_requests_per_second() -> f64 {
    2.0
}

const fn default_burst_size() -> u32 {
    10
}

const fn default_promotion_after_grants() -> u32 {
    8
}

const fn default_max_wait_ms() -> u64 {
    120_000
}

impl SchedulerConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
            promotion_after_grants: default_promotion_after_grants(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

/// Strategy engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StrategyConfig {
    /// Credits required before new build lanes are opened
    #[serde(default = "default_build_floor")]
    pub build_floor: i64,

    /// Credits required before new trade assignments are made
    #[serde(default = "default_trade_floor")]
    pub trade_floor: i64,

    /// Below this every hauler is parked
    #[serde(default = "default_park_floor")]
    pub park_floor: i64,

    /// Upper bound on agents per contract
    #[serde(default = "default_max_contract_agents")]
    pub max_contract_agents: u32,

    /// Crashes before an agent is parked until an operator intervenes
    #[serde(default = "default_max_crashes")]
    pub max_crashes: u32,
}

const fn default_build_floor() -> i64 {
    300_000
}

const fn default_trade_floor() -> i64 {
    50_000
}

const fn default_park_floor() -> i64 {
    30_000
}

const fn default_max_contract_agents() -> u32 {
    2
}

const fn default_max_crashes() -> u32 {
    5
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            build_floor: default_build_floor(),
            trade_floor: default_trade_floor(),
            park_floor: default_park_floor(),
            max_contract_agents: default_max_contract_agents(),
            max_crashes: default_max_crashes(),
        }
    }
}

/// Supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Bounded wait for a cooperative stop before the task is aborted
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

const fn default_stop_timeout_ms() -> u64 {
    5_000
}

impl SupervisorConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

/// Commander configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CommanderConfig {
    /// Bounded event queue; publishers wait when it is full
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Periodic re-evaluation when no events arrive
    #[serde(default = "default_reevaluate_interval_secs")]
    pub reevaluate_interval_secs: u64,

    /// Events kept for the observability tail
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Refresh aggregates from the remote service on each re-evaluation
    #[serde(default = "default_refresh_aggregates")]
    pub refresh_aggregates: bool,
}

const fn default_event_queue_capacity() -> usize {
    1024
}

const fn default_reevaluate_interval_secs() -> u64 {
    30
}

const fn default_history_capacity() -> usize {
    500
}

const fn default_refresh_aggregates() -> bool {
    true
}

impl CommanderConfig {
    pub fn reevaluate_interval(&self) -> Duration {
        Duration::from_secs(self.reevaluate_interval_secs)
    }
}

impl Default for CommanderConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: default_event_queue_capacity(),
            reevaluate_interval_secs: default_reevaluate_interval_secs(),
            history_capacity: default_history_capacity(),
            refresh_aggregates: default_refresh_aggregates(),
        }
    }
}

/// Remote service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token; usually supplied via FLOTILLA_REMOTE__TOKEN
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.spacetraders.io/v2".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    5_000
}

const fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Record plan changes and outcomes to `SQLite`
    #[serde(default)]
    pub enabled: bool,

    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".flotilla/fleet.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}
