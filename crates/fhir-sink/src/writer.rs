//! Per-record persistence in document or view mode.
//!
//! The mode is chosen once when the [`ResourceWriter`] is built:
//!
//! - **Document**: one upsert per record into the table named after its
//!   resource type, replacing any earlier body for the same id.
//! - **View**: every ViewDefinition applicable to the record's type is applied,
//!   and each resulting row is appended to the view's table.
//!
//! Each statement runs on its own pooled connection. Nothing is retried here;
//! the caller decides from [`SinkError::is_retryable`] whether to re-deliver.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Result, SinkError};
use crate::identifier::{quote_list, quote_pg, validate_sql_name};
use crate::pool::StatementExecutor;
use crate::record::Record;
use crate::view::types::placeholder;
use crate::view::{FlatRow, RowFlattener, ViewApplicator, ViewCatalog, ViewDefinition};

/// Work done by one write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Statements executed successfully.
    pub statements: usize,
    /// Rows inserted or upserted.
    pub rows: usize,
}

impl std::ops::AddAssign for WriteSummary {
    fn add_assign(&mut self, other: Self) {
        self.statements += other.statements;
        self.rows += other.rows;
    }
}

/// Something that persists records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn persist(&self, record: &Record) -> Result<WriteSummary>;
}

/// Upsert statement for a document table.
pub fn upsert_sql(resource_type: &str) -> Result<String> {
    Ok(format!(
        "INSERT INTO {} (id, body) VALUES ($1::text, $2::text::jsonb) \
         ON CONFLICT (id) DO UPDATE SET id = EXCLUDED.id, body = EXCLUDED.body",
        quote_pg(resource_type)?
    ))
}

/// Insert statement for one flattened row, casting each text parameter to the
/// column's declared type.
pub fn insert_row_sql(table: &str, row: &FlatRow, types: &HashMap<String, &'static str>) -> Result<String> {
    let columns = row.column_names();
    let placeholders: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| placeholder(i + 1, types.get(*name).copied().unwrap_or("TEXT")))
        .collect();

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_pg(table)?,
        quote_list(&columns)?,
        placeholders.join(", ")
    ))
}

/// Stores each resource whole, keyed by id.
pub struct DocumentSink<E> {
    executor: E,
}

impl<E: StatementExecutor> DocumentSink<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl<E: StatementExecutor> RecordSink for DocumentSink<E> {
    async fn persist(&self, record: &Record) -> Result<WriteSummary> {
        // A bad type is a property of this record, not of the sink setup.
        validate_sql_name(record.resource_type())
            .map_err(|e| SinkError::InvalidRecord(e.to_string()))?;
        let sql = upsert_sql(record.resource_type())?;
        let body = record.encode()?;

        self.executor
            .execute(&sql, &[Some(record.id().to_string()), Some(body)])
            .await?;

        debug!("Upserted {}/{}", record.resource_type(), record.id());
        Ok(WriteSummary {
            statements: 1,
            rows: 1,
        })
    }
}

/// Stores the rows of every applicable view.
pub struct ViewSink<E> {
    executor: E,
    catalog: Arc<ViewCatalog>,
    flattener: Arc<dyn RowFlattener>,
}

impl<E: StatementExecutor> ViewSink<E> {
    pub fn new(executor: E, catalog: Arc<ViewCatalog>, flattener: Arc<dyn RowFlattener>) -> Self {
        Self {
            executor,
            catalog,
            flattener,
        }
    }

    fn flatten(&self, record: &Record, view: &ViewDefinition) -> Result<Vec<FlatRow>> {
        match self.flattener.apply(record, view) {
            Ok(rows) => Ok(rows.rows),
            Err(e @ SinkError::FlattenApplicationFailed { .. }) => Err(e),
            Err(other) => Err(SinkError::flatten(&view.name, other.to_string())),
        }
    }
}

#[async_trait]
impl<E: StatementExecutor> RecordSink for ViewSink<E> {
    async fn persist(&self, record: &Record) -> Result<WriteSummary> {
        let views = self.catalog.lookup(record.resource_type());
        if views.is_empty() {
            debug!("No views for {}; skipping {}", record.resource_type(), record.id());
            return Ok(WriteSummary::default());
        }

        if views.iter().any(|v| v.name.is_empty()) {
            return Err(SinkError::MissingViewName {
                resource_type: record.resource_type().to_string(),
            });
        }

        let mut summary = WriteSummary::default();
        let mut attempted = 0usize;
        let mut failed = 0usize;
        let mut first_failure: Option<(String, String)> = None;

        for view in views {
            let rows = self.flatten(record, view)?;
            let types: HashMap<String, &'static str> = view
                .columns()
                .into_iter()
                .map(|c| {
                    let sql_type = c.sql_type();
                    (c.name, sql_type)
                })
                .collect();

            for row in &rows {
                attempted += 1;
                let sql = insert_row_sql(&view.name, row, &types)?;
                match self.executor.execute(&sql, &row.values()).await {
                    Ok(_) => {
                        summary.statements += 1;
                        summary.rows += 1;
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(
                            "Insert into {} failed for {}/{}: {}",
                            view.name,
                            record.resource_type(),
                            record.id(),
                            e
                        );
                        if first_failure.is_none() {
                            first_failure = Some((view.name.clone(), e.to_string()));
                        }
                    }
                }
            }
            debug!("View {}: {} rows for {}", view.name, rows.len(), record.id());
        }

        match first_failure {
            Some((view, message)) => Err(SinkError::RowInsertFailed {
                view,
                failed,
                attempted,
                message,
            }),
            None => Ok(summary),
        }
    }
}

/// Record writer with the mode fixed at construction.
pub enum ResourceWriter<E> {
    Document(DocumentSink<E>),
    View(ViewSink<E>),
}

impl<E: StatementExecutor> ResourceWriter<E> {
    pub fn document(executor: E) -> Self {
        ResourceWriter::Document(DocumentSink::new(executor))
    }

    pub fn views(executor: E, catalog: Arc<ViewCatalog>, flattener: Arc<dyn RowFlattener>) -> Self {
        ResourceWriter::View(ViewSink::new(executor, catalog, flattener))
    }

    /// View mode with the default flattener when `view_dir` is given,
    /// document mode otherwise.
    pub fn new(executor: E, view_dir: Option<&Path>) -> Result<Self> {
        match view_dir {
            Some(dir) => {
                let catalog = ViewCatalog::load_dir(dir)?;
                Ok(Self::views(executor, Arc::new(catalog), Arc::new(ViewApplicator)))
            }
            None => Ok(Self::document(executor)),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            ResourceWriter::Document(_) => "document",
            ResourceWriter::View(_) => "view",
        }
    }

    /// Persist one record.
    pub async fn write(&self, record: &Record) -> Result<WriteSummary> {
        match self {
            ResourceWriter::Document(sink) => sink.persist(record).await,
            ResourceWriter::View(sink) => sink.persist(record).await,
        }
    }
}
