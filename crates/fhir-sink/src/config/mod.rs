//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;
pub use validation::validate_pool;

use crate::error::Result;
use std::path::Path;

impl SinkConfig {
    /// Load configuration from a YAML (or JSON) file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SinkConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl DatabaseConfig {
    /// Build a connection string for tokio-postgres (password omitted).
    pub fn display_url(&self) -> String {
        format!(
            "postgres://{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

impl SetupOptions {
    /// Resource types to provision, split from the comma-separated list.
    pub fn resource_types(&self) -> Vec<String> {
        split_resource_list(&self.resource_list)
    }

    /// Validate the options before any connection is opened.
    pub fn validate(&self) -> Result<()> {
        validation::validate_setup(self)
    }
}

/// Split a comma-separated resource list, trimming entries and dropping empty ones.
pub fn split_resource_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_yaml_defaults() {
        let config = SinkConfig::from_yaml(
            r#"
database:
  host: localhost
  database: fhir
  user: etl
  password: secret
"#,
        )
        .unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.ssl_mode, "disable");
        assert_eq!(config.pool.initial_pool_size, 1);
        assert_eq!(config.pool.max_pool_size, 8);
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"database": {{"host": "db", "port": 5433, "database": "fhir", "user": "etl", "password": "pw"}},
               "pool": {{"initial_pool_size": 2, "max_pool_size": 4}}}}"#
        )
        .unwrap();

        let config = SinkConfig::load(file.path()).unwrap();
        assert_eq!(config.database.host, "db");
        assert_eq!(config.database.port, 5433);
        assert_eq!(config.pool.max_pool_size, 4);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(SinkConfig::load("/nonexistent/sink.yaml").is_err());
    }

    #[test]
    fn test_split_resource_list() {
        assert_eq!(
            split_resource_list("Patient, Observation,,Encounter "),
            vec!["Patient", "Observation", "Encounter"]
        );
        assert!(split_resource_list(" , ").is_empty());
    }

    #[test]
    fn test_display_url_omits_password() {
        let config = SinkConfig::from_yaml(
            "database: {host: h, database: d, user: u, password: hunter2}",
        )
        .unwrap();
        let url = config.database.display_url();
        assert_eq!(url, "postgres://u@h:5432/d");
        assert!(!url.contains("hunter2"));
    }
}
