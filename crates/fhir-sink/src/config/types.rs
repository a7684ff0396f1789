//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure for the sink database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Target database connection settings.
    pub database: DatabaseConfig,

    /// Connection pool sizing.
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Connection pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connections opened eagerly when the pool is built (default: 1).
    #[serde(default = "default_initial_pool_size")]
    pub initial_pool_size: usize,

    /// Upper bound on open connections (default: 8).
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_pool_size: default_initial_pool_size(),
            max_pool_size: default_max_pool_size(),
        }
    }
}

/// Options for the one-off schema setup step.
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    /// Path to the sink database configuration file.
    pub sink_db_config_path: PathBuf,

    /// Comma-separated resource types to provision, e.g. "Patient,Observation".
    pub resource_list: String,

    /// Directory of ViewDefinition JSON files. `None` selects document tables.
    pub view_definitions_dir: Option<PathBuf>,

    /// Overrides `pool.initial_pool_size` from the config file.
    pub jdbc_initial_pool_size: Option<usize>,

    /// Overrides `pool.max_pool_size` from the config file.
    pub jdbc_max_pool_size: Option<usize>,
}

impl SetupOptions {
    /// Apply pool size overrides on top of a loaded configuration.
    pub fn pool_config(&self, base: &PoolConfig) -> PoolConfig {
        PoolConfig {
            initial_pool_size: self
                .jdbc_initial_pool_size
                .unwrap_or(base.initial_pool_size),
            max_pool_size: self.jdbc_max_pool_size.unwrap_or(base.max_pool_size),
        }
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_initial_pool_size() -> usize {
    1
}

fn default_max_pool_size() -> usize {
    8
}
