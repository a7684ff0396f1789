//! View catalog: ViewDefinitions grouped by the resource type they apply to.
//!
//! The [`ViewCatalog`] is loaded once, validated up front and then shared
//! read-only (typically behind an `Arc`) by schema setup and every writer.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::ViewDefinition;
use crate::error::{Result, SinkError};

/// Immutable registry of views by resource type, in load order.
#[derive(Debug, Clone, Default)]
pub struct ViewCatalog {
    views: HashMap<String, Vec<ViewDefinition>>,
    count: usize,
}

impl ViewCatalog {
    /// Load every `*.json` file in `dir` (non-recursive, sorted by file name).
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|e| {
            SinkError::ViewDefinition(format!(
                "cannot read view definitions directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        files.sort();

        let mut views = Vec::with_capacity(files.len());
        for file in &files {
            let text = fs::read_to_string(file)?;
            let view = ViewDefinition::from_json(&text).map_err(|e| {
                SinkError::ViewDefinition(format!("{}: {}", file.display(), e))
            })?;
            debug!("Loaded view '{}' for {} from {}", view.label(), view.resource, file.display());
            views.push(view);
        }

        let catalog = Self::from_views(views)?;
        info!(
            "Loaded {} view definitions for {} resource types from {}",
            catalog.len(),
            catalog.views.len(),
            dir.display()
        );
        Ok(catalog)
    }

    /// Build a catalog from views already in memory, validating each.
    pub fn from_views(views: Vec<ViewDefinition>) -> Result<Self> {
        let mut names = HashSet::new();
        let mut grouped: HashMap<String, Vec<ViewDefinition>> = HashMap::new();
        let count = views.len();

        for view in views {
            view.validate()?;
            if view.name.is_empty() {
                warn!("ViewDefinition for {} has no name", view.resource);
            } else if !names.insert(view.name.clone()) {
                return Err(SinkError::ViewDefinition(format!(
                    "duplicate view name '{}'",
                    view.name
                )));
            }
            grouped.entry(view.resource.clone()).or_default().push(view);
        }

        Ok(Self {
            views: grouped,
            count,
        })
    }

    /// Views applicable to `resource_type`, in load order. Empty when none.
    pub fn lookup(&self, resource_type: &str) -> &[ViewDefinition] {
        self.views
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resource types with at least one view, sorted.
    pub fn resource_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.views.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_view(dir: &TempDir, file: &str, name: &str, resource: &str) {
        let mut f = fs::File::create(dir.path().join(file)).unwrap();
        write!(
            f,
            r#"{{"resourceType": "ViewDefinition", "name": "{}", "resource": "{}",
                "select": [{{"column": [{{"name": "id", "path": "id"}}]}}]}}"#,
            name, resource
        )
        .unwrap();
    }

    #[test]
    fn test_load_dir_sorted_and_grouped() {
        let dir = TempDir::new().unwrap();
        write_view(&dir, "b_patient.json", "patient_b", "Patient");
        write_view(&dir, "a_patient.json", "patient_a", "Patient");
        write_view(&dir, "obs.json", "obs_flat", "Observation");
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        write_view(&dir, "nested/deep.json", "deep", "Patient");

        let catalog = ViewCatalog::load_dir(dir.path()).unwrap();
        assert_eq!(catalog.len(), 3);
        let names: Vec<_> = catalog.lookup("Patient").iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["patient_a", "patient_b"]);
        assert_eq!(catalog.lookup("Observation").len(), 1);
        assert!(catalog.lookup("Encounter").is_empty());
        assert_eq!(catalog.resource_types(), vec!["Observation", "Patient"]);
    }

    #[test]
    fn test_load_dir_missing_directory() {
        let err = ViewCatalog::load_dir("/nonexistent/views").unwrap_err();
        assert!(matches!(err, SinkError::ViewDefinition(_)));
    }

    #[test]
    fn test_load_dir_rejects_invalid_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.json"), r#"{"resourceType": "Patient"}"#).unwrap();
        let err = ViewCatalog::load_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }

    #[test]
    fn test_from_views_rejects_duplicate_names() {
        let view = ViewDefinition::from_json(
            r#"{"resourceType": "ViewDefinition", "name": "dup", "resource": "Patient",
                "select": [{"column": [{"name": "id", "path": "id"}]}]}"#,
        )
        .unwrap();
        let err = ViewCatalog::from_views(vec![view.clone(), view]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_unnamed_views_are_kept() {
        let view = ViewDefinition::from_json(
            r#"{"resourceType": "ViewDefinition", "resource": "Patient",
                "select": [{"column": [{"name": "id", "path": "id"}]}]}"#,
        )
        .unwrap();
        let catalog = ViewCatalog::from_views(vec![view.clone(), view]).unwrap();
        assert_eq!(catalog.lookup("Patient").len(), 2);
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = ViewCatalog::default();
        assert!(catalog.is_empty());
        assert!(catalog.lookup("Patient").is_empty());
    }
}
