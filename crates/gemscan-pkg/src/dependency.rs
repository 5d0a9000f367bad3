//! Uniform dependency declarations and the scope filter.
//!
//! Gemspec and Gemfile declarations are normalized into
//! [`DependencyDeclaration`]s tagged with the file that declared them, then
//! reduced to one declaration per gem name by [`dedup_and_filter`].

use crate::companion::GemfileDependency;
use crate::manifest::GemDependency;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

/// Groups that mark a dependency as not needed at runtime.
pub const DEV_GROUPS: [&str; 2] = ["development", "test"];

/// Group assigned to Gemfile entries declared outside any group.
pub const DEFAULT_GROUP: &str = "default";

/// Requirement used when a declaration names no constraint.
pub const DEFAULT_REQUIREMENT: &str = ">= 0";

/// Whether a gemspec dependency is needed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Needed by the gem at runtime.
    #[default]
    Runtime,
    /// Only needed to develop or test the gem.
    Development,
}

impl DependencyKind {
    /// Returns the kind as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::Development => "development",
        }
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DependencyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches(':') {
            "runtime" => Ok(Self::Runtime),
            "development" => Ok(Self::Development),
            other => Err(format!("unknown dependency type '{other}'")),
        }
    }
}

/// A dependency declaration with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDeclaration {
    /// Gem name.
    pub name: String,
    /// Normalized requirement, e.g. `">= 1.0, < 2"`.
    pub requirement: String,
    /// Root-relative path of the declaring file.
    pub path: String,
    /// Dependency type as declared by a gemspec; Gemfile entries are runtime.
    pub kind: DependencyKind,
    /// Gemfile groups; empty for gemspec declarations.
    pub groups: BTreeSet<String>,
}

impl DependencyDeclaration {
    /// Normalize a gemspec declaration.
    #[must_use]
    pub fn from_manifest(dep: &GemDependency, path: &str) -> Self {
        Self {
            name: dep.name.clone(),
            requirement: normalize_requirement(&dep.requirements),
            path: path.to_string(),
            kind: dep.kind,
            groups: BTreeSet::new(),
        }
    }

    /// Normalize a Gemfile declaration.
    #[must_use]
    pub fn from_companion(dep: &GemfileDependency, path: &str) -> Self {
        Self {
            name: dep.name.clone(),
            requirement: normalize_requirement(&dep.requirements),
            path: path.to_string(),
            kind: DependencyKind::Runtime,
            groups: dep.groups.clone(),
        }
    }

    /// A declaration is valid unless it is development-typed or belongs to a
    /// development or test group.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let dev_type = self.kind == DependencyKind::Development;
        let dev_group = DEV_GROUPS.iter().any(|g| self.groups.contains(*g));
        !dev_type && !dev_group
    }
}

fn requirement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(~>|>=|<=|!=|=|>|<)?\s*(\S.*?)\s*$").expect("valid regex")
    })
}

/// Render requirement strings the way RubyGems prints them.
///
/// Each constraint becomes `"OP VERSION"` (a bare version gets `=`),
/// duplicates are dropped, and the list is joined with `", "`. No
/// constraints at all means [`DEFAULT_REQUIREMENT`].
#[must_use]
pub fn normalize_requirement(requirements: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();

    for req in requirements {
        let Some(caps) = requirement_re().captures(req) else {
            continue;
        };
        let op = caps.get(1).map_or("=", |m| m.as_str());
        let part = format!("{op} {}", &caps[2]);
        if !parts.contains(&part) {
            parts.push(part);
        }
    }

    if parts.is_empty() {
        String::from(DEFAULT_REQUIREMENT)
    } else {
        parts.join(", ")
    }
}

/// Reduce declarations to one per gem name.
///
/// Declarations are grouped by name in first-encounter order. A group is
/// dropped when its name is one of `manifest_names`, or as soon as one of its
/// members is invalid. Otherwise the first member represents the group, so a
/// gemspec declaration wins over a Gemfile one when the gemspec's list comes
/// first.
#[must_use]
pub fn dedup_and_filter(
    declarations: Vec<DependencyDeclaration>,
    manifest_names: &BTreeSet<String>,
) -> Vec<DependencyDeclaration> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<DependencyDeclaration>> = HashMap::new();

    for decl in declarations {
        groups
            .entry(decl.name.clone())
            .or_insert_with(|| {
                order.push(decl.name.clone());
                Vec::new()
            })
            .push(decl);
    }

    order
        .into_iter()
        .filter_map(|name| {
            let group = groups.remove(&name)?;
            if manifest_names.contains(&name) {
                tracing::debug!(dependency = %name, "dropping self-referential dependency");
                return None;
            }
            if !group.iter().all(DependencyDeclaration::is_valid) {
                tracing::debug!(dependency = %name, "dropping development-scoped dependency");
                return None;
            }
            group.into_iter().next()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decl(
        name: &str,
        kind: DependencyKind,
        groups: &[&str],
        path: &str,
    ) -> DependencyDeclaration {
        DependencyDeclaration {
            name: name.to_string(),
            requirement: String::from(DEFAULT_REQUIREMENT),
            path: path.to_string(),
            kind,
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    fn names(decls: &[DependencyDeclaration]) -> Vec<&str> {
        decls.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn normalize_requirements() {
        assert_eq!(normalize_requirement(&[]), ">= 0");
        assert_eq!(normalize_requirement(&[">=1.0".to_string()]), ">= 1.0");
        assert_eq!(normalize_requirement(&["1.2".to_string()]), "= 1.2");
        assert_eq!(
            normalize_requirement(&[
                "~> 1.0".to_string(),
                ">= 1.0.2".to_string(),
                "~>1.0".to_string(),
            ]),
            "~> 1.0, >= 1.0.2"
        );
        assert_eq!(normalize_requirement(&["  ".to_string()]), ">= 0");
    }

    #[test]
    fn validity() {
        assert!(decl("a", DependencyKind::Runtime, &[], "x").is_valid());
        assert!(decl("a", DependencyKind::Runtime, &["default", "production"], "x").is_valid());
        assert!(!decl("a", DependencyKind::Development, &[], "x").is_valid());
        assert!(!decl("a", DependencyKind::Runtime, &["test"], "x").is_valid());
        assert!(!decl("a", DependencyKind::Runtime, &["default", "development"], "x").is_valid());
    }

    #[test]
    fn first_declaration_wins() {
        let decls = vec![
            decl("rack", DependencyKind::Runtime, &[], "a.gemspec"),
            decl("rack", DependencyKind::Runtime, &["default"], "Gemfile"),
        ];
        let kept = dedup_and_filter(decls, &BTreeSet::new());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].path, "a.gemspec");
    }

    #[test]
    fn any_dev_declaration_taints_the_name() {
        let decls = vec![
            decl("rspec", DependencyKind::Runtime, &[], "a.gemspec"),
            decl("rspec", DependencyKind::Runtime, &["test"], "Gemfile"),
            decl("rack", DependencyKind::Runtime, &[], "a.gemspec"),
        ];
        let kept = dedup_and_filter(decls, &BTreeSet::new());
        assert_eq!(names(&kept), vec!["rack"]);
    }

    #[test]
    fn self_references_are_dropped() {
        let decls = vec![
            decl("a", DependencyKind::Runtime, &[], "Gemfile"),
            decl("b", DependencyKind::Development, &[], "a.gemspec"),
            decl("c", DependencyKind::Runtime, &[], "a.gemspec"),
        ];
        let manifests: BTreeSet<String> = ["a".to_string(), "c".to_string()].into();
        assert!(dedup_and_filter(decls, &manifests).is_empty());
    }

    #[test]
    fn encounter_order_is_kept() {
        let decls = vec![
            decl("zeta", DependencyKind::Runtime, &[], "x"),
            decl("alpha", DependencyKind::Runtime, &[], "x"),
            decl("zeta", DependencyKind::Runtime, &[], "y"),
        ];
        let kept = dedup_and_filter(decls, &BTreeSet::new());
        assert_eq!(names(&kept), vec!["zeta", "alpha"]);
    }

    #[test]
    fn parse_kind() {
        assert_eq!(":runtime".parse::<DependencyKind>(), Ok(DependencyKind::Runtime));
        assert_eq!("development".parse::<DependencyKind>(), Ok(DependencyKind::Development));
        assert!("optional".parse::<DependencyKind>().is_err());
    }
}
