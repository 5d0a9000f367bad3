//! Gemspec discovery and loading.

use crate::dependency::DependencyKind;
use crate::gemspec::{fallback_gemspec, parse_gemspec};
use crate::layout::{self, MANIFEST_EXT};
use crate::resolve::ResolvedDependency;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fields removed from every manifest because they change between builds of
/// the same source.
pub const VOLATILE_FIELDS: [&str; 3] = ["date", "rubygems_version", "specification_version"];

/// Errors that can occur when working with manifests.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),

    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("no `Gem::Specification.new` block found")]
    NoSpecification,

    #[error("found {0} `Gem::Specification.new` blocks, expected one")]
    MultipleSpecifications(usize),

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

/// A dependency exactly as a manifest declares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GemDependency {
    /// Gem name.
    pub name: String,
    /// Requirement strings, in declaration order.
    pub requirements: Vec<String>,
    /// Runtime or development.
    pub kind: DependencyKind,
}

/// One parsed gem manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRecord {
    /// Gem name, never empty.
    pub name: String,

    /// Gem version, when the manifest states one.
    pub version: Option<String>,

    /// Declared licenses.
    pub licenses: Vec<String>,

    /// Declared dependencies, in declaration order.
    pub dependencies: Vec<GemDependency>,

    /// Files listed by the manifest, sorted and deduplicated.
    pub files: Vec<String>,

    /// Every other manifest field.
    pub metadata: BTreeMap<String, Value>,
}

impl ManifestRecord {
    /// Bring the record into its canonical form.
    ///
    /// Sorts and deduplicates `files`, drops an empty `metadata` map, and
    /// removes the [`VOLATILE_FIELDS`].
    pub fn normalize(&mut self) {
        self.files.sort();
        self.files.dedup();

        if self
            .metadata
            .get("metadata")
            .is_some_and(|m| m.as_object().is_some_and(serde_json::Map::is_empty))
        {
            self.metadata.remove("metadata");
        }

        for field in VOLATILE_FIELDS {
            self.metadata.remove(field);
        }
    }

    /// The single declared license, if there is exactly one.
    #[must_use]
    pub fn license(&self) -> Option<&str> {
        match self.licenses.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Raw field map of the manifest, with `dependencies` replaced by the
    /// resolved list.
    #[must_use]
    pub fn data(&self, dependencies: &[ResolvedDependency]) -> serde_json::Map<String, Value> {
        let mut data: serde_json::Map<String, Value> = self
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        data.insert(String::from("name"), Value::from(self.name.clone()));
        if let Some(version) = &self.version {
            data.insert(String::from("version"), Value::from(version.clone()));
        }
        if !self.licenses.is_empty() {
            data.insert(String::from("licenses"), Value::from(self.licenses.clone()));
        }
        if !self.files.is_empty() {
            data.insert(String::from("files"), Value::from(self.files.clone()));
        }
        data.insert(
            String::from("dependencies"),
            serde_json::to_value(dependencies).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
        data
    }
}

/// Find every gemspec beneath `root`, skipping test and spec directories.
///
/// Paths are absolute (rooted at `root`) and sorted.
pub fn find_manifests(root: &Path) -> Result<Vec<PathBuf>, ManifestError> {
    let pattern = layout::recursive_pattern(root, MANIFEST_EXT);
    let mut found = Vec::new();

    for entry in glob::glob_with(&pattern, layout::walk_options())? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!(
                    path = %e.path().display(),
                    error = %e.error(),
                    "skipping unreadable entry"
                );
                continue;
            }
        };
        let relative = layout::relative_to(&path, root);
        if !path.is_file() || layout::is_hidden(&relative) || layout::is_excluded(&relative) {
            continue;
        }
        found.push(path);
    }

    found.sort();
    Ok(found)
}

/// Load one gemspec, falling back to dependency extraction when the strict
/// grammar rejects it.
///
/// The fallback record is named after the manifest's root-relative path.
pub fn load_manifest(path: &Path, root: &Path) -> Result<ManifestRecord, ManifestError> {
    let source = std::fs::read_to_string(path)?;

    match parse_gemspec(&source) {
        Ok(record) => Ok(record),
        Err(strict) => {
            let name = layout::display_path(&layout::relative_to(path, root));
            tracing::debug!(
                manifest = %name,
                error = %strict,
                "strict parse failed, trying fallback"
            );
            fallback_gemspec(&source, &name)
        }
    }
}

/// Load every manifest in `paths`, skipping the ones that cannot be parsed.
pub fn load_manifests(root: &Path, paths: &[PathBuf]) -> BTreeMap<PathBuf, ManifestRecord> {
    let mut records = BTreeMap::new();

    for path in paths {
        match load_manifest(path, root) {
            Ok(record) => {
                records.insert(path.clone(), record);
            }
            Err(e) => {
                tracing::warn!(
                    manifest = %path.display(),
                    error = %e,
                    "skipping unparseable manifest"
                );
            }
        }
    }

    records
}
