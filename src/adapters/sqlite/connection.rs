//! SQLite pool construction for the fleet log.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::DatabaseConfig;

const MEMORY_URL: &str = "sqlite::memory:";

/// Failures opening the fleet log database.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Cannot open fleet log database: {0}")]
    PoolCreationFailed(#[source] sqlx::Error),
    #[error("Not a SQLite database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Cannot create fleet log directory: {0}")]
    DirectoryCreationFailed(#[source] std::io::Error),
}

/// Pool sizing for the fleet log. Appends are small and serialized by the
/// commander, so a handful of connections is plenty.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    /// How long a writer waits for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&DatabaseConfig> for PoolConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections.max(1),
            ..Self::default()
        }
    }
}

/// `sqlite:` URL for a database file path.
pub fn database_url(path: &str) -> String {
    if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite:{path}")
    }
}

/// File path behind a `sqlite:` URL, `None` for in-memory databases.
fn file_path(url: &str) -> Option<&Path> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let path = path.split('?').next().unwrap_or_default();
    (!path.is_empty() && path != ":memory:").then(|| Path::new(path))
}

fn options(url: &str) -> Result<SqliteConnectOptions, ConnectionError> {
    SqliteConnectOptions::from_str(url).map_err(|_| ConnectionError::InvalidDatabaseUrl(url.to_string()))
}

/// Open (creating if needed) a WAL-mode database at `url`.
pub async fn create_pool(url: &str, config: PoolConfig) -> Result<SqlitePool, ConnectionError> {
    if let Some(dir) = file_path(url).and_then(Path::parent) {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(ConnectionError::DirectoryCreationFailed)?;
        }
    }

    let options = options(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(10));

    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .map_err(ConnectionError::PoolCreationFailed)
}

/// Single-connection in-memory pool; each call gets its own database.
pub async fn create_test_pool() -> Result<SqlitePool, ConnectionError> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options(MEMORY_URL)?)
        .await
        .map_err(ConnectionError::PoolCreationFailed)
}
