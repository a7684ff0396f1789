//! Configuration validation.

use super::{split_resource_list, PoolConfig, SetupOptions, SinkConfig};
use crate::error::{Result, SinkError};
use crate::identifier::validate_sql_name;
use crate::pool::tls::SslMode;

/// Validate the configuration.
pub fn validate(config: &SinkConfig) -> Result<()> {
    if config.database.host.is_empty() {
        return Err(SinkError::Config("database.host is required".into()));
    }
    if config.database.database.is_empty() {
        return Err(SinkError::Config("database.database is required".into()));
    }
    if config.database.user.is_empty() {
        return Err(SinkError::Config("database.user is required".into()));
    }
    SslMode::parse(&config.database.ssl_mode)?;
    validate_pool(&config.pool)
}

/// Validate pool sizing.
pub fn validate_pool(pool: &PoolConfig) -> Result<()> {
    if pool.initial_pool_size == 0 {
        return Err(SinkError::Config(
            "pool.initial_pool_size must be at least 1".into(),
        ));
    }
    if pool.max_pool_size == 0 {
        return Err(SinkError::Config(
            "pool.max_pool_size must be at least 1".into(),
        ));
    }
    if pool.initial_pool_size > pool.max_pool_size {
        return Err(SinkError::Config(format!(
            "pool.initial_pool_size ({}) exceeds pool.max_pool_size ({})",
            pool.initial_pool_size, pool.max_pool_size
        )));
    }
    Ok(())
}

/// Validate schema setup options.
pub fn validate_setup(options: &SetupOptions) -> Result<()> {
    if options.sink_db_config_path.as_os_str().is_empty() {
        return Err(SinkError::Config("sink DB config path is required".into()));
    }

    let types = split_resource_list(&options.resource_list);
    if types.is_empty() {
        return Err(SinkError::Config(
            "resource list must name at least one resource type".into(),
        ));
    }
    for resource_type in &types {
        validate_sql_name(resource_type)?;
    }

    if let (Some(initial), Some(max)) =
        (options.jdbc_initial_pool_size, options.jdbc_max_pool_size)
    {
        validate_pool(&PoolConfig {
            initial_pool_size: initial,
            max_pool_size: max,
        })?;
    }

    Ok(())
}
