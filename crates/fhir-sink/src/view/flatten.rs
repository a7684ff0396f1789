//! Applying ViewDefinitions to resources.

use std::collections::HashMap;

use serde_json::Value;

use super::path::{self, EvalContext, Expr};
use super::{FlatRow, RowElement, RowList, SelectNode, ViewDefinition};
use crate::error::{Result, SinkError};
use crate::record::Record;

/// Turns one resource into the rows of one view.
pub trait RowFlattener: Send + Sync {
    fn apply(&self, record: &Record, view: &ViewDefinition) -> Result<RowList>;
}

/// Default flattener implementing the supported SQL-on-FHIR subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewApplicator;

impl RowFlattener for ViewApplicator {
    fn apply(&self, record: &Record, view: &ViewDefinition) -> Result<RowList> {
        apply_view(record.body(), view).map_err(|message| SinkError::flatten(view.label(), message))
    }
}

type Row = Vec<Option<String>>;

struct CompiledColumn {
    name: String,
    expr: Expr,
    collection: bool,
}

struct CompiledSelect {
    columns: Vec<CompiledColumn>,
    for_each: Option<(Expr, bool)>,
    selects: Vec<CompiledSelect>,
    union_all: Vec<CompiledSelect>,
}

impl CompiledSelect {
    fn compile(node: &SelectNode) -> std::result::Result<Self, String> {
        let for_each = match (&node.for_each, &node.for_each_or_null) {
            (Some(p), _) => Some((path::parse(p)?, false)),
            (None, Some(p)) => Some((path::parse(p)?, true)),
            (None, None) => None,
        };
        let columns = node
            .column
            .iter()
            .map(|c| {
                Ok(CompiledColumn {
                    name: c.name.clone(),
                    expr: path::parse(&c.path)?,
                    collection: c.collection,
                })
            })
            .collect::<std::result::Result<Vec<_>, String>>()?;
        Ok(Self {
            columns,
            for_each,
            selects: node
                .select
                .iter()
                .map(Self::compile)
                .collect::<std::result::Result<_, _>>()?,
            union_all: node
                .union_all
                .iter()
                .map(Self::compile)
                .collect::<std::result::Result<_, _>>()?,
        })
    }

    fn width(&self) -> usize {
        self.columns.len()
            + self.selects.iter().map(Self::width).sum::<usize>()
            + self.union_all.first().map(Self::width).unwrap_or(0)
    }

    fn rows(&self, node: &Value, ctx: &EvalContext<'_>) -> std::result::Result<Vec<Row>, String> {
        let focuses = match &self.for_each {
            None => vec![node.clone()],
            Some((expr, or_null)) => {
                let items = path::evaluate(expr, ctx, std::slice::from_ref(node))?;
                if items.is_empty() {
                    return Ok(if *or_null {
                        vec![vec![None; self.width()]]
                    } else {
                        Vec::new()
                    });
                }
                items
            }
        };

        let mut out = Vec::new();
        for focus in &focuses {
            let mut own = Vec::with_capacity(self.columns.len());
            for col in &self.columns {
                let values = path::evaluate(&col.expr, ctx, std::slice::from_ref(focus))?;
                own.push(render(&col.name, values, col.collection)?);
            }

            let mut parts = vec![vec![own]];
            for sub in &self.selects {
                parts.push(sub.rows(focus, ctx)?);
            }
            if !self.union_all.is_empty() {
                let mut branch_rows = Vec::new();
                for branch in &self.union_all {
                    branch_rows.extend(branch.rows(focus, ctx)?);
                }
                parts.push(branch_rows);
            }
            out.extend(cartesian(parts));
        }
        Ok(out)
    }
}

fn cartesian(parts: Vec<Vec<Row>>) -> Vec<Row> {
    parts.into_iter().fold(vec![Vec::new()], |acc, part| {
        let mut next = Vec::with_capacity(acc.len() * part.len());
        for prefix in &acc {
            for suffix in &part {
                let mut row = prefix.clone();
                row.extend(suffix.iter().cloned());
                next.push(row);
            }
        }
        next
    })
}

fn render(column: &str, values: Vec<Value>, collection: bool) -> std::result::Result<Option<String>, String> {
    if collection {
        if values.is_empty() {
            return Ok(None);
        }
        return serde_json::to_string(&values)
            .map(Some)
            .map_err(|e| e.to_string());
    }
    match values.as_slice() {
        [] => Ok(None),
        [Value::Null] => Ok(None),
        [single] => match path::primitive_text(single) {
            Some(text) => Ok(Some(text)),
            None => serde_json::to_string(single)
                .map(Some)
                .map_err(|e| e.to_string()),
        },
        many => Err(format!(
            "column '{}' produced {} values; declare it with \"collection\": true",
            column,
            many.len()
        )),
    }
}

fn apply_view(resource: &Value, view: &ViewDefinition) -> std::result::Result<RowList, String> {
    let column_names: Vec<String> = view.columns().into_iter().map(|c| c.name).collect();
    let constants: HashMap<String, Value> = view.constants();
    let ctx = EvalContext {
        resource,
        constants: &constants,
    };

    for clause in &view.where_ {
        let result = path::evaluate(&path::parse(&clause.path)?, &ctx, std::slice::from_ref(resource))?;
        if !path::is_true(&result) {
            return Ok(RowList {
                column_names,
                rows: Vec::new(),
            });
        }
    }

    let selects = view
        .select
        .iter()
        .map(CompiledSelect::compile)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut parts = Vec::with_capacity(selects.len());
    for select in &selects {
        parts.push(select.rows(resource, &ctx)?);
    }

    let rows = cartesian(parts)
        .into_iter()
        .map(|values| FlatRow {
            elements: column_names
                .iter()
                .cloned()
                .zip(values)
                .map(|(column, value)| RowElement { column, value })
                .collect(),
        })
        .collect();

    Ok(RowList { column_names, rows })
}
