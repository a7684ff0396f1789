//! Error types for the sink library.

use thiserror::Error;

/// Main error type for schema setup and record writes.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Configuration error (invalid YAML, missing fields, bad identifiers, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A ViewDefinition applicable to a resource type has no `name`.
    #[error("Field `name` in ViewDefinition is not defined (resource type {resource_type})")]
    MissingViewName { resource_type: String },

    /// ViewDefinition could not be read or uses unsupported features.
    #[error("ViewDefinition error: {0}")]
    ViewDefinition(String),

    /// Input resource is not a usable FHIR resource.
    #[error("Invalid resource: {0}")]
    InvalidRecord(String),

    /// Applying a view to a resource failed.
    #[error("Failed to apply view {view}: {message}")]
    FlattenApplicationFailed { view: String, message: String },

    /// One or more flattened rows could not be inserted.
    #[error("{failed} of {attempted} row inserts failed for view {view}: {message}")]
    RowInsertFailed {
        view: String,
        failed: usize,
        attempted: usize,
        message: String,
    },

    /// Statement execution against PostgreSQL failed
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Broad classification used by callers to pick a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration. Retrying cannot succeed.
    Configuration,
    /// Connection or statement failure. The caller may re-deliver the record.
    TransientStore,
    /// The resource does not fit the view. Affects only this record.
    DataShape,
}

impl SinkError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        SinkError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a FlattenApplicationFailed error
    pub fn flatten(view: impl Into<String>, message: impl Into<String>) -> Self {
        SinkError::FlattenApplicationFailed {
            view: view.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SinkError::Config(_)
            | SinkError::MissingViewName { .. }
            | SinkError::ViewDefinition(_)
            | SinkError::Yaml(_) => ErrorKind::Configuration,
            SinkError::InvalidRecord(_)
            | SinkError::FlattenApplicationFailed { .. }
            | SinkError::Json(_) => ErrorKind::DataShape,
            SinkError::RowInsertFailed { .. }
            | SinkError::Target(_)
            | SinkError::Pool { .. }
            | SinkError::Io(_) => ErrorKind::TransientStore,
        }
    }

    /// Whether re-delivering the same input could succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientStore
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            SinkError::Io(_) => 1,
            other => match other.kind() {
                ErrorKind::Configuration => 2,
                ErrorKind::TransientStore => 3,
                ErrorKind::DataShape => 4,
            },
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;
