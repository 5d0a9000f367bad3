//! Lock resolution for filtered dependency declarations.
//!
//! This does not solve version constraints. A declaration is resolved to the
//! version its lockfile pins, or keeps its declared requirement when the
//! lockfile says nothing about it.

use crate::dependency::DependencyDeclaration;
use crate::lockfile::LockedVersionTable;
use serde::{Deserialize, Serialize};

/// A dependency as reported for a discovery unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDependency {
    /// Gem name.
    pub name: String,
    /// Locked version, or the declared requirement when nothing is locked.
    pub version: String,
    /// Root-relative path of the declaring file.
    pub path: String,
}

/// Resolves declarations against a lockfile.
#[derive(Debug, Clone, Copy)]
pub struct LockResolver<'a> {
    table: &'a LockedVersionTable,
}

impl<'a> LockResolver<'a> {
    /// Create a resolver over `table`.
    #[must_use]
    pub fn new(table: &'a LockedVersionTable) -> Self {
        Self { table }
    }

    /// Resolve every declaration, sorted by name.
    ///
    /// Names are compared exactly. Sorting is stable, so declarations with
    /// equal names keep their relative order.
    #[must_use]
    pub fn resolve(&self, declarations: Vec<DependencyDeclaration>) -> Vec<ResolvedDependency> {
        let mut resolved: Vec<ResolvedDependency> = declarations
            .into_iter()
            .map(|decl| self.resolve_one(decl))
            .collect();
        resolved.sort_by(|a, b| a.name.cmp(&b.name));
        resolved
    }

    fn resolve_one(&self, decl: DependencyDeclaration) -> ResolvedDependency {
        let version = match self.table.get(&decl.name) {
            Some(locked) => {
                tracing::trace!(dependency = %decl.name, locked, "using locked version");
                locked.to_string()
            }
            None => decl.requirement,
        };

        ResolvedDependency {
            name: decl.name,
            version,
            path: decl.path,
        }
    }
}
