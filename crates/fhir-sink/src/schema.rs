//! Table provisioning for document and view modes.

use tracing::{debug, info, warn};

use crate::config::{SetupOptions, SinkConfig};
use crate::error::{Result, SinkError};
use crate::identifier::{quote_pg, validate_sql_name};
use crate::pool::{SinkPool, StatementExecutor};
use crate::view::{ViewCatalog, ViewDefinition};

/// DDL for a document-mode table holding one row per resource id.
pub fn document_table_ddl(resource_type: &str) -> Result<String> {
    validate_sql_name(resource_type)?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (id VARCHAR(100) PRIMARY KEY, body JSONB)",
        quote_pg(resource_type)?
    ))
}

/// DDL for a view table with the view's columns in declared order.
pub fn view_table_ddl(view: &ViewDefinition) -> Result<String> {
    if view.name.is_empty() {
        return Err(SinkError::MissingViewName {
            resource_type: view.resource.clone(),
        });
    }

    let columns = view
        .columns()
        .iter()
        .map(|col| Ok(format!("{} {}", quote_pg(&col.name)?, col.sql_type())))
        .collect::<Result<Vec<_>>>()?;

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_pg(&view.name)?,
        columns.join(", ")
    ))
}

/// Creates the tables the writers expect.
pub struct SchemaMaterializer<E> {
    executor: E,
}

impl<E: StatementExecutor> SchemaMaterializer<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    /// Create one table per resource type, or one per applicable view when a
    /// catalog is given. Stops at the first failure.
    pub async fn create_tables(
        &self,
        resource_types: &[String],
        catalog: Option<&ViewCatalog>,
    ) -> Result<()> {
        info!("Creating tables for {} resource types", resource_types.len());

        let mut created = 0usize;
        for resource_type in resource_types {
            match catalog {
                None => {
                    let ddl = document_table_ddl(resource_type)?;
                    debug!("{}", ddl);
                    self.executor.execute(&ddl, &[]).await?;
                    created += 1;
                }
                Some(catalog) => {
                    let views = catalog.lookup(resource_type);
                    if views.is_empty() {
                        warn!("No views found for resource type {}", resource_type);
                        continue;
                    }
                    for view in views {
                        let ddl = view_table_ddl(view)?;
                        debug!("{}", ddl);
                        self.executor.execute(&ddl, &[]).await?;
                        created += 1;
                    }
                }
            }
        }

        info!("Ensured {} tables", created);
        Ok(())
    }
}

/// Validate `options`, connect, and create every table they describe.
pub async fn create_tables(options: &SetupOptions) -> Result<()> {
    options.validate()?;

    let config = SinkConfig::load(&options.sink_db_config_path)?;
    let sizing = options.pool_config(&config.pool);

    let catalog = options
        .view_definitions_dir
        .as_deref()
        .map(ViewCatalog::load_dir)
        .transpose()?;

    let pool = SinkPool::new(&config.database, &sizing).await?;
    let result = SchemaMaterializer::new(pool.clone())
        .create_tables(&options.resource_types(), catalog.as_ref())
        .await;
    pool.close();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::MockExecutor;
    use std::sync::Arc;

    fn view(json: &str) -> ViewDefinition {
        ViewDefinition::from_json(json).unwrap()
    }

    fn patient_flat() -> ViewDefinition {
        view(
            r#"{"resourceType": "ViewDefinition", "name": "patient_flat", "resource": "Patient",
                "select": [
                    {"column": [{"name": "id", "path": "id"},
                                {"name": "active", "path": "active", "type": "boolean"}]},
                    {"forEach": "name", "column": [{"name": "family", "path": "family"},
                                                   {"name": "given", "path": "given", "collection": true}]}
                ]}"#,
        )
    }

    fn unnamed() -> ViewDefinition {
        view(
            r#"{"resourceType": "ViewDefinition", "resource": "Observation",
                "select": [{"column": [{"name": "id", "path": "id"}]}]}"#,
        )
    }

    fn types(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_document_table_ddl() {
        assert_eq!(
            document_table_ddl("Patient").unwrap(),
            r#"CREATE TABLE IF NOT EXISTS "Patient" (id VARCHAR(100) PRIMARY KEY, body JSONB)"#
        );
        assert!(document_table_ddl("Patient; DROP TABLE x").is_err());
    }

    #[test]
    fn test_view_table_ddl_column_order() {
        assert_eq!(
            view_table_ddl(&patient_flat()).unwrap(),
            r#"CREATE TABLE IF NOT EXISTS "patient_flat" ("id" TEXT, "active" BOOLEAN, "family" TEXT, "given" JSONB)"#
        );
    }

    #[test]
    fn test_view_table_ddl_missing_name() {
        let err = view_table_ddl(&unnamed()).unwrap_err();
        assert!(matches!(err, SinkError::MissingViewName { ref resource_type } if resource_type == "Observation"));
    }

    #[tokio::test]
    async fn test_document_mode_creates_one_table_per_type() {
        let exec = Arc::new(MockExecutor::new());
        let materializer = SchemaMaterializer::new(exec.clone());

        materializer
            .create_tables(&types(&["Patient", "Observation"]), None)
            .await
            .unwrap();

        assert_eq!(
            exec.sql(),
            vec![
                document_table_ddl("Patient").unwrap(),
                document_table_ddl("Observation").unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() {
        let exec = Arc::new(MockExecutor::new());
        let catalog = ViewCatalog::from_views(vec![patient_flat()]).unwrap();
        let materializer = SchemaMaterializer::new(exec.clone());

        materializer
            .create_tables(&types(&["Patient"]), Some(&catalog))
            .await
            .unwrap();
        materializer
            .create_tables(&types(&["Patient"]), Some(&catalog))
            .await
            .unwrap();

        let sql = exec.sql();
        assert_eq!(sql.len(), 2);
        assert_eq!(sql[0], sql[1]);
        assert!(sql[0].starts_with("CREATE TABLE IF NOT EXISTS"));
    }

    #[tokio::test]
    async fn test_type_without_views_is_skipped() {
        let exec = Arc::new(MockExecutor::new());
        let catalog = ViewCatalog::from_views(vec![patient_flat()]).unwrap();

        SchemaMaterializer::new(exec.clone())
            .create_tables(&types(&["Encounter", "Patient"]), Some(&catalog))
            .await
            .unwrap();

        let sql = exec.sql();
        assert_eq!(sql.len(), 1);
        assert!(sql[0].contains("\"patient_flat\""));
    }

    #[tokio::test]
    async fn test_missing_view_name_issues_no_statement() {
        let exec = Arc::new(MockExecutor::new());
        let catalog = ViewCatalog::from_views(vec![unnamed()]).unwrap();

        let err = SchemaMaterializer::new(exec.clone())
            .create_tables(&types(&["Observation"]), Some(&catalog))
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::MissingViewName { .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(exec.statements().is_empty());
    }

    #[tokio::test]
    async fn test_first_failure_aborts() {
        let exec = Arc::new(MockExecutor::failing_when(|sql, _| sql.contains("\"Patient\"")));

        let err = SchemaMaterializer::new(exec.clone())
            .create_tables(&types(&["Patient", "Observation"]), None)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(exec.statements().len(), 1);
    }

    #[tokio::test]
    async fn test_top_level_rejects_bad_options() {
        let options = SetupOptions {
            sink_db_config_path: "/nonexistent/sink.yaml".into(),
            resource_list: " , ".to_string(),
            ..Default::default()
        };
        let err = create_tables(&options).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
