//! PostgreSQL connection pool for the sink.
//!
//! [`SinkPool`] is an owned handle: build one per configuration and pass it
//! (or an `Arc` of it) to the schema materializer and the record writers.
//! Every [`StatementExecutor::execute`] call checks out one connection, runs a
//! single statement and hands the connection back when the pooled object drops,
//! on success and error alike.

pub mod tls;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, PoolConfig};
use crate::error::{Result, SinkError};
use tls::SslMode;

/// Connection timeout for new pooled connections.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes one statement on one pooled connection.
///
/// Parameters are always bound as text (`None` binds SQL `NULL`); statements
/// cast them to the column type where needed.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Run `sql` with `params`, returning the number of affected rows.
    async fn execute(&self, sql: &str, params: &[Option<String>]) -> Result<u64>;
}

#[async_trait]
impl<T: StatementExecutor + ?Sized> StatementExecutor for std::sync::Arc<T> {
    async fn execute(&self, sql: &str, params: &[Option<String>]) -> Result<u64> {
        (**self).execute(sql, params).await
    }
}

/// Result of a connectivity check.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub connected: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Shared PostgreSQL pool.
#[derive(Clone)]
pub struct SinkPool {
    pool: Pool,
}

impl SinkPool {
    /// Build a pool and open `initial_pool_size` connections up front.
    pub async fn new(config: &DatabaseConfig, sizing: &PoolConfig) -> Result<Self> {
        crate::config::validate_pool(sizing)?;

        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.keepalives(true);
        pg_config.connect_timeout(CONNECT_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        let mgr = match ssl_mode.connector()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };

        let pool = Pool::builder(mgr)
            .max_size(sizing.max_pool_size)
            .build()
            .map_err(|e| SinkError::pool(e, "creating sink pool"))?;

        let sink = Self { pool };
        sink.warm_up(sizing.initial_pool_size).await?;

        info!(
            "Connected to PostgreSQL sink {} (pool {}..{})",
            config.display_url(),
            sizing.initial_pool_size,
            sizing.max_pool_size
        );

        Ok(sink)
    }

    /// Open `count` connections, test each, and return them to the pool together.
    async fn warm_up(&self, count: usize) -> Result<()> {
        let mut clients = Vec::with_capacity(count);
        for _ in 0..count {
            let client = self
                .pool
                .get()
                .await
                .map_err(|e| SinkError::pool(e, "opening initial sink connections"))?;
            client.simple_query("SELECT 1").await?;
            clients.push(client);
        }
        debug!("Warmed up {} sink connections", clients.len());
        Ok(())
    }

    /// Check the database with `SELECT 1`.
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let outcome = async {
            let client = self
                .pool
                .get()
                .await
                .map_err(|e| SinkError::pool(e, "health check"))?;
            client.simple_query("SELECT 1").await?;
            Ok::<_, SinkError>(())
        }
        .await;

        HealthCheckResult {
            connected: outcome.is_ok(),
            latency_ms: start.elapsed().as_millis() as u64,
            error: outcome.err().map(|e| e.to_string()),
        }
    }

    /// Current pool status (size, available).
    pub fn status(&self) -> (usize, usize) {
        let status = self.pool.status();
        (status.size, status.available)
    }

    /// Close the pool; outstanding connections are dropped when returned.
    pub fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl StatementExecutor for SinkPool {
    async fn execute(&self, sql: &str, params: &[Option<String>]) -> Result<u64> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SinkError::pool(e, "acquiring sink connection"))?;

        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        debug!("Executing: {}", sql);
        let affected = client.execute(sql, &refs).await?;
        Ok(affected)
    }
}
