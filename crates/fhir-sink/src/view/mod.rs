//! SQL-on-FHIR ViewDefinitions and the rows they produce.

pub mod catalog;
pub mod flatten;
pub mod path;
pub mod types;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SinkError};
use crate::identifier::validate_sql_name;
pub use catalog::ViewCatalog;
pub use flatten::{RowFlattener, ViewApplicator};
pub use types::ColumnType;

const VIEW_DEFINITION: &str = "ViewDefinition";

/// A ViewDefinition resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDefinition {
    #[serde(default = "default_resource_type")]
    pub resource_type: String,

    /// Target table name. May be empty in a file; it is checked before use.
    #[serde(default)]
    pub name: String,

    /// FHIR resource type the view applies to.
    pub resource: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constant: Vec<Constant>,

    #[serde(default)]
    pub select: Vec<SelectNode>,

    #[serde(default, rename = "where", skip_serializing_if = "Vec::is_empty")]
    pub where_: Vec<WhereClause>,
}

fn default_resource_type() -> String {
    VIEW_DEFINITION.to_string()
}

/// A named constant, referenced from paths as `%name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constant {
    pub name: String,

    /// The `value[x]` entry (`valueString`, `valueInteger`, ...).
    #[serde(flatten)]
    pub value: HashMap<String, Value>,
}

impl Constant {
    pub fn value(&self) -> Option<&Value> {
        self.value
            .iter()
            .find(|(key, _)| key.starts_with("value"))
            .map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectNode {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column: Vec<ColumnDef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<SelectNode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each_or_null: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub union_all: Vec<SelectNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub path: String,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub fhir_type: Option<String>,

    #[serde(default)]
    pub collection: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    pub path: String,
}

/// A column of the view's table, in declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub collection: bool,
}

impl ViewColumn {
    /// PostgreSQL type for the column.
    pub fn sql_type(&self) -> &'static str {
        if self.collection {
            "JSONB"
        } else {
            self.column_type.type_string()
        }
    }
}

impl SelectNode {
    /// Columns in row order: own columns, nested selects, then the first
    /// `unionAll` branch (all branches share the same names).
    fn collect_columns(&self, out: &mut Vec<ViewColumn>) {
        for col in &self.column {
            out.push(ViewColumn {
                name: col.name.clone(),
                column_type: ColumnType::parse(col.fhir_type.as_deref()),
                collection: col.collection,
            });
        }
        for sub in &self.select {
            sub.collect_columns(out);
        }
        if let Some(branch) = self.union_all.first() {
            branch.collect_columns(out);
        }
    }

    fn column_names(&self) -> Vec<String> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols);
        cols.into_iter().map(|c| c.name).collect()
    }

    fn validate(&self, view: &str) -> Result<()> {
        if self.for_each.is_some() && self.for_each_or_null.is_some() {
            return Err(SinkError::ViewDefinition(format!(
                "view '{}': forEach and forEachOrNull are mutually exclusive",
                view
            )));
        }
        for expr in self.for_each.iter().chain(self.for_each_or_null.iter()) {
            check_path(view, expr)?;
        }
        for col in &self.column {
            check_path(view, &col.path)?;
        }
        for sub in self.select.iter().chain(self.union_all.iter()) {
            sub.validate(view)?;
        }

        if let Some((first, rest)) = self.union_all.split_first() {
            let expected = first.column_names();
            for branch in rest {
                if branch.column_names() != expected {
                    return Err(SinkError::ViewDefinition(format!(
                        "view '{}': unionAll branches must declare the same columns ({:?} vs {:?})",
                        view,
                        expected,
                        branch.column_names()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_path(view: &str, expr: &str) -> Result<()> {
    path::parse(expr)
        .map(|_| ())
        .map_err(|e| SinkError::ViewDefinition(format!("view '{}': {}", view, e)))
}

impl ViewDefinition {
    /// Parse a ViewDefinition from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let view: ViewDefinition = serde_json::from_str(json)
            .map_err(|e| SinkError::ViewDefinition(format!("invalid ViewDefinition: {}", e)))?;
        Ok(view)
    }

    /// Ordered column schema of the view's table.
    pub fn columns(&self) -> Vec<ViewColumn> {
        let mut cols = Vec::new();
        for node in &self.select {
            node.collect_columns(&mut cols);
        }
        cols
    }

    /// Constant values by name.
    pub fn constants(&self) -> HashMap<String, Value> {
        self.constant
            .iter()
            .filter_map(|c| c.value().map(|v| (c.name.clone(), v.clone())))
            .collect()
    }

    /// Display name for messages.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            "<unnamed>"
        } else {
            &self.name
        }
    }

    /// Check structure, identifiers and path syntax.
    ///
    /// An empty `name` passes here; it is rejected when a table would be
    /// created or written under it.
    pub fn validate(&self) -> Result<()> {
        if self.resource_type != VIEW_DEFINITION {
            return Err(SinkError::ViewDefinition(format!(
                "expected resourceType ViewDefinition, found '{}'",
                self.resource_type
            )));
        }
        if self.resource.is_empty() {
            return Err(SinkError::ViewDefinition(format!(
                "view '{}' has no resource type",
                self.label()
            )));
        }
        if !self.name.is_empty() {
            validate_sql_name(&self.name)?;
        }

        for constant in &self.constant {
            if constant.value().is_none() {
                return Err(SinkError::ViewDefinition(format!(
                    "view '{}': constant '{}' has no value",
                    self.label(),
                    constant.name
                )));
            }
        }
        for clause in &self.where_ {
            check_path(self.label(), &clause.path)?;
        }
        for node in &self.select {
            node.validate(self.label())?;
        }

        let columns = self.columns();
        if columns.is_empty() {
            return Err(SinkError::ViewDefinition(format!(
                "view '{}' declares no columns",
                self.label()
            )));
        }
        let mut seen = HashSet::new();
        for col in &columns {
            validate_sql_name(&col.name)?;
            if !seen.insert(col.name.as_str()) {
                return Err(SinkError::ViewDefinition(format!(
                    "view '{}': duplicate column '{}'",
                    self.label(),
                    col.name
                )));
            }
        }
        Ok(())
    }
}

/// One value of a flattened row; `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowElement {
    pub column: String,
    pub value: Option<String>,
}

/// One row produced by applying a view to a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatRow {
    pub elements: Vec<RowElement>,
}

impl FlatRow {
    pub fn column_names(&self) -> Vec<&str> {
        self.elements.iter().map(|e| e.column.as_str()).collect()
    }

    pub fn values(&self) -> Vec<Option<String>> {
        self.elements.iter().map(|e| e.value.clone()).collect()
    }
}

/// Rows produced by one application of one view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowList {
    pub column_names: Vec<String>,
    pub rows: Vec<FlatRow>,
}

impl RowList {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}
