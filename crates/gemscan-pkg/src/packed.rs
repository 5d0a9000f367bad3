//! Packed gem metadata (`metadata.gz`).
//!
//! An unpacked `.gem` archive carries its specification as gzip'd YAML with
//! Ruby object tags:
//!
//! ```yaml
//! --- !ruby/object:Gem::Specification
//! name: rake
//! version: !ruby/object:Gem::Version
//!   version: 13.0.6
//! dependencies:
//! - !ruby/object:Gem::Dependency
//!   name: minitest
//!   requirement: !ruby/object:Gem::Requirement
//!     requirements:
//!     - - ">="
//!       - !ruby/object:Gem::Version
//!         version: '0'
//!   type: :development
//! ```
//!
//! Tags are dropped and the document is read as plain data.

use crate::dependency::DependencyKind;
use crate::layout::PACKED_MANIFEST_FILE;
use crate::manifest::{GemDependency, ManifestRecord};
use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur when reading packed metadata.
#[derive(Error, Debug)]
pub enum PackedError {
    #[error("failed to decompress {PACKED_MANIFEST_FILE}: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse {PACKED_MANIFEST_FILE}: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid {PACKED_MANIFEST_FILE}: {0}")]
    Invalid(String),
}

/// Read `metadata.gz` from `root`, if present.
///
/// Returns `None` when the file is absent or cannot be read; failures are
/// logged and never propagated.
#[must_use]
pub fn load_packed_manifest(root: &Path) -> Option<ManifestRecord> {
    let path = root.join(PACKED_MANIFEST_FILE);
    if !path.is_file() {
        return None;
    }

    match read_packed_manifest(&path) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring packed metadata");
            None
        }
    }
}

/// Decompress and parse a packed metadata file.
pub fn read_packed_manifest(path: &Path) -> Result<ManifestRecord, PackedError> {
    let file = std::fs::File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut text = String::new();
    decoder.read_to_string(&mut text)?;
    parse_packed_manifest(&text)
}

/// Parse decompressed metadata YAML into a manifest record.
pub fn parse_packed_manifest(yaml: &str) -> Result<ManifestRecord, PackedError> {
    let document: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    let Value::Object(mut fields) = yaml_to_json(document) else {
        return Err(PackedError::Invalid(String::from("expected a mapping")));
    };

    let name = match fields.remove("name") {
        Some(Value::String(name)) if !name.is_empty() => name,
        _ => return Err(PackedError::Invalid(String::from("missing gem name"))),
    };
    let version = fields.remove("version").and_then(version_string);

    let mut licenses = strings(fields.remove("licenses"));
    if licenses.is_empty() {
        licenses = strings(fields.remove("license"));
    }
    let files = strings(fields.remove("files"));

    let dependencies = match fields.remove("dependencies") {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(dependency)
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(PackedError::Invalid(String::from("dependencies must be a list"))),
    };

    let mut record = ManifestRecord {
        name,
        version,
        licenses,
        dependencies,
        files,
        metadata: fields
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .collect(),
    };
    record.normalize();
    Ok(record)
}

/// Convert YAML to JSON, discarding tags.
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Yaml;

    match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            let text = n.to_string();
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
        Yaml::Mapping(map) => Value::Object(
            map.into_iter()
                .filter_map(|(k, v)| scalar_key(k).map(|k| (k, yaml_to_json(v))))
                .collect(),
        ),
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn scalar_key(key: serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Tagged(tagged) => scalar_key(tagged.value),
        _ => None,
    }
}

/// `Gem::Version` is a mapping with a `version` key once untagged.
fn version_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(mut map) => map.remove("version").and_then(version_string),
        _ => None,
    }
}

fn strings(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s],
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn dependency(value: Value) -> Result<GemDependency, PackedError> {
    let Value::Object(mut map) = value else {
        return Err(PackedError::Invalid(String::from("dependency must be a mapping")));
    };

    let name = match map.remove("name") {
        Some(Value::String(name)) if !name.is_empty() => name,
        _ => return Err(PackedError::Invalid(String::from("dependency without a name"))),
    };

    let kind = match map.remove("type") {
        Some(Value::String(kind)) => kind.parse().map_err(PackedError::Invalid)?,
        _ => DependencyKind::Runtime,
    };

    let pairs = map
        .remove("requirement")
        .or_else(|| map.remove("version_requirements"))
        .and_then(|mut r| r.get_mut("requirements").map(Value::take));

    let requirements = match pairs {
        Some(Value::Array(pairs)) => pairs
            .into_iter()
            .filter_map(|pair| match pair {
                Value::Array(mut parts) if parts.len() == 2 => {
                    let version = version_string(parts.pop()?)?;
                    let op = parts.pop()?.as_str()?.to_string();
                    Some(format!("{op} {version}"))
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(GemDependency {
        name,
        requirements,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::TempDir;

    const METADATA: &str = r#"--- !ruby/object:Gem::Specification
name: rake
version: !ruby/object:Gem::Version
  version: 13.0.6
platform: ruby
authors:
- Hiroshi SHIBATA
bindir: exe
cert_chain: []
date: 2021-07-09 00:00:00.000000000 Z
dependencies:
- !ruby/object:Gem::Dependency
  name: minitest
  requirement: !ruby/object:Gem::Requirement
    requirements:
    - - ">="
      - !ruby/object:Gem::Version
        version: '0'
  type: :development
  prerelease: false
- !ruby/object:Gem::Dependency
  name: json
  requirement: !ruby/object:Gem::Requirement
    requirements:
    - - "~>"
      - !ruby/object:Gem::Version
        version: '2.6'
    - - ">="
      - !ruby/object:Gem::Version
        version: 2.6.1
  type: :runtime
  prerelease: false
description: Make-like build tool
files:
- lib/rake.rb
- exe/rake
licenses:
- MIT
metadata: {}
post_install_message:
rubygems_version: 3.2.22
specification_version: 4
summary: Rake is a Make-like program
"#;

    #[test]
    fn parse_tagged_metadata() {
        let record = parse_packed_manifest(METADATA).unwrap();
        assert_eq!(record.name, "rake");
        assert_eq!(record.version.as_deref(), Some("13.0.6"));
        assert_eq!(record.licenses, vec!["MIT"]);
        assert_eq!(record.files, vec!["exe/rake", "lib/rake.rb"]);

        assert_eq!(record.dependencies.len(), 2);
        assert_eq!(record.dependencies[0].kind, DependencyKind::Development);
        assert_eq!(record.dependencies[0].requirements, vec![">= 0"]);
        assert_eq!(record.dependencies[1].kind, DependencyKind::Runtime);
        assert_eq!(record.dependencies[1].requirements, vec!["~> 2.6", ">= 2.6.1"]);

        for dropped in [
            "date",
            "rubygems_version",
            "specification_version",
            "metadata",
            "post_install_message",
        ] {
            assert!(!record.metadata.contains_key(dropped), "{dropped} should be dropped");
        }
        assert_eq!(record.metadata["summary"], "Rake is a Make-like program");
        assert_eq!(record.metadata["cert_chain"], Value::Array(Vec::new()));
    }

    #[test]
    fn reject_nameless_metadata() {
        assert!(matches!(
            parse_packed_manifest("---\nversion: 1.0\n"),
            Err(PackedError::Invalid(_))
        ));
    }

    #[test]
    fn read_compressed_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(PACKED_MANIFEST_FILE);
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(METADATA.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let record = load_packed_manifest(tmp.path()).unwrap();
        assert_eq!(record.name, "rake");
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(PACKED_MANIFEST_FILE), b"not gzip").unwrap();
        assert!(load_packed_manifest(tmp.path()).is_none());
        assert!(read_packed_manifest(&tmp.path().join(PACKED_MANIFEST_FILE)).is_err());
    }

    #[test]
    fn absent_file_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(load_packed_manifest(tmp.path()).is_none());
    }
}
