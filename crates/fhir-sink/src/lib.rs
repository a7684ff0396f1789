//! # fhir-sink
//!
//! PostgreSQL sink for FHIR resources.
//!
//! Resources are persisted in one of two modes:
//!
//! - **Document mode**: one table per resource type holding the whole resource
//!   as `JSONB`, keyed by id and upserted on every write
//! - **View mode**: SQL-on-FHIR ViewDefinitions flatten each resource into rows
//!   that are appended to one table per view
//!
//! Tables are created up front by [`create_tables`]; records are then written
//! with a [`ResourceWriter`] sharing one [`SinkPool`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use fhir_sink::{Record, ResourceWriter, SinkConfig, SinkPool};
//!
//! #[tokio::main]
//! async fn main() -> fhir_sink::Result<()> {
//!     let config = SinkConfig::load("sink.yaml")?;
//!     let pool = SinkPool::new(&config.database, &config.pool).await?;
//!     let writer = ResourceWriter::new(pool, None)?;
//!     let record = Record::from_json(r#"{"resourceType": "Patient", "id": "p1"}"#)?;
//!     writer.write(&record).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod identifier;
pub mod pool;
pub mod record;
pub mod schema;
pub mod view;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenient access
pub use config::{DatabaseConfig, PoolConfig, SetupOptions, SinkConfig};
pub use error::{ErrorKind, Result, SinkError};
pub use pool::{HealthCheckResult, SinkPool, StatementExecutor};
pub use record::Record;
pub use schema::{create_tables, SchemaMaterializer};
pub use view::{RowFlattener, RowList, ViewApplicator, ViewCatalog, ViewDefinition};
pub use writer::{DocumentSink, RecordSink, ResourceWriter, ViewSink, WriteSummary};
