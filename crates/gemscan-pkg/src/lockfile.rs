//! Lockfile (`Gemfile.lock`) reading.
//!
//! ```text
//! GEM
//!   remote: https://rubygems.org/
//!   specs:
//!     rack (3.0.8)
//!     rack-test (2.1.0)
//!       rack (>= 1.3)
//!
//! PLATFORMS
//!   ruby
//!
//! DEPENDENCIES
//!   rack-test
//! ```
//!
//! Only the four-space `NAME (VERSION)` entries under `specs:` are read; the
//! six-space lines below them are the entry's own requirements.

use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Sections whose `specs:` list pins gem versions.
const SPEC_SECTIONS: [&str; 4] = ["GEM", "PATH", "GIT", "PLUGIN SOURCE"];

/// Errors that can occur when reading a lockfile.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("failed to read lockfile: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed lockfile: {0}")]
    Malformed(String),
}

/// Locked gem versions, keyed by gem name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockedVersionTable {
    versions: BTreeMap<String, String>,
}

impl LockedVersionTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the lockfile at `path`.
    ///
    /// Never fails: a missing file gives an empty table, and an unreadable or
    /// malformed one gives an empty table plus a warning.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        if !path.is_file() {
            return Self::new();
        }
        match Self::read(path) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(lockfile = %path.display(), error = %e, "ignoring lockfile");
                Self::new()
            }
        }
    }

    /// Read and parse the lockfile at `path`.
    pub fn read(path: &Path) -> Result<Self, LockError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse lockfile text.
    pub fn parse(content: &str) -> Result<Self, LockError> {
        let mut versions = BTreeMap::new();
        let mut section: Option<&str> = None;
        let mut in_specs = false;

        for (idx, line) in content.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            if !line.starts_with(' ') {
                section = Some(line);
                in_specs = false;
                continue;
            }

            let Some(current) = section else {
                return Err(LockError::Malformed(format!(
                    "line {}: entry outside of any section",
                    idx + 1
                )));
            };
            if !SPEC_SECTIONS.contains(&current) {
                continue;
            }

            let indent = line.len() - line.trim_start().len();
            match indent {
                2 => in_specs = line.trim_start() == "specs:",
                4 if in_specs => {
                    let (name, version) = parse_spec_line(line.trim_start()).ok_or_else(|| {
                        LockError::Malformed(format!("line {}: bad spec entry", idx + 1))
                    })?;
                    versions
                        .entry(name.to_string())
                        .or_insert_with(|| version.to_string());
                }
                _ => {}
            }
        }

        if section.is_none() && !content.trim().is_empty() {
            return Err(LockError::Malformed(String::from("no sections found")));
        }

        Ok(Self { versions })
    }

    /// The locked version of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.versions.get(name).map(String::as_str)
    }

    /// Number of locked gems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Returns true if nothing is locked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Split `name (version)` into its parts.
fn parse_spec_line(entry: &str) -> Option<(&str, &str)> {
    let (name, rest) = entry.split_once(" (")?;
    let version = rest.strip_suffix(')')?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name, version))
}
