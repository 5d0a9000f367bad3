//! The scan pipeline.
//!
//! A scan locates manifests (or the packed fallback), merges each manifest's
//! declarations with its directory's Gemfile, filters and lock-resolves them,
//! and finally gathers the scripts no manifest claims into one aggregate unit.
//!
//! The process working directory is never consulted or changed. Every path is
//! resolved against the [`ScanContext`] handed down to each step.

use crate::companion::Gemfile;
use crate::dependency::{dedup_and_filter, DependencyDeclaration};
use crate::layout::{self, COMPANION_FILE, LOCK_FILE, PACKED_MANIFEST_FILE, STDLIB_REPO};
use crate::lockfile::LockedVersionTable;
use crate::manifest::{find_manifests, load_manifests, ManifestError, ManifestRecord};
use crate::packed::load_packed_manifest;
use crate::resolve::{LockResolver, ResolvedDependency};
use crate::scripts::find_scripts;
use crate::unit::DiscoveryUnit;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abort a scan.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),
}

/// Caller-supplied scan settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanConfig {
    repo: Option<String>,
    subdir: Option<PathBuf>,
}

impl ScanConfig {
    /// Settings with no repository identifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the repository identifier, e.g. `github.com/rack/rack`.
    #[must_use]
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    /// Record where the scan root sits inside the repository.
    ///
    /// Informational only; the scan root is not changed.
    #[must_use]
    pub fn with_subdir(mut self, subdir: impl Into<PathBuf>) -> Self {
        self.subdir = Some(subdir.into());
        self
    }

    /// The repository identifier, if any.
    #[must_use]
    pub fn repo(&self) -> Option<&str> {
        self.repo.as_deref()
    }

    /// The recorded subdirectory, if any.
    #[must_use]
    pub fn subdir(&self) -> Option<&Path> {
        self.subdir.as_deref()
    }

    /// Returns true when scanning the Ruby standard library, whose loose
    /// scripts are not aggregated.
    #[must_use]
    pub fn is_stdlib(&self) -> bool {
        self.repo() == Some(STDLIB_REPO)
    }
}

/// The scan root together with the directory currently being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanContext {
    root: PathBuf,
    dir: PathBuf,
}

impl ScanContext {
    /// A context positioned at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            dir: root.clone(),
            root,
        }
    }

    /// The same root, positioned at `dir`.
    #[must_use]
    pub fn at(&self, dir: impl Into<PathBuf>) -> Self {
        Self {
            root: self.root.clone(),
            dir: dir.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Render `path` relative to the scan root.
    #[must_use]
    pub fn display(&self, path: &Path) -> String {
        layout::display_path(&layout::relative_to(path, &self.root))
    }

    /// Gemfile declarations of the current directory.
    ///
    /// An unreadable Gemfile contributes nothing.
    #[must_use]
    pub fn companion_declarations(&self) -> Vec<DependencyDeclaration> {
        let gemfile = match Gemfile::load(&self.dir) {
            Ok(gemfile) => gemfile,
            Err(e) => {
                tracing::warn!(dir = %self.display(&self.dir), error = %e, "ignoring Gemfile");
                Gemfile::default()
            }
        };

        let path = self.display(&self.dir.join(COMPANION_FILE));
        gemfile
            .dependencies
            .iter()
            .map(|dep| DependencyDeclaration::from_companion(dep, &path))
            .collect()
    }

    /// Locked versions of the current directory.
    #[must_use]
    pub fn lock_table(&self) -> LockedVersionTable {
        LockedVersionTable::load(&self.dir.join(LOCK_FILE))
    }

    /// Filter `declarations` and resolve the survivors against this
    /// directory's lockfile.
    #[must_use]
    pub fn resolve(
        &self,
        declarations: Vec<DependencyDeclaration>,
        manifest_names: &BTreeSet<String>,
    ) -> Vec<ResolvedDependency> {
        let survivors = dedup_and_filter(declarations, manifest_names);
        let table = self.lock_table();
        LockResolver::new(&table).resolve(survivors)
    }
}

/// A manifest waiting to become a unit.
struct Located {
    /// Directory holding the manifest.
    dir: PathBuf,
    /// Root-relative path of the declaring file.
    path: String,
    record: ManifestRecord,
}

/// Runs a scan over one directory tree.
#[derive(Debug, Clone)]
pub struct Scanner {
    ctx: ScanContext,
    config: ScanConfig,
}

impl Scanner {
    /// Create a scanner rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, config: ScanConfig) -> Self {
        Self {
            ctx: ScanContext::new(root),
            config,
        }
    }

    /// Scan the tree and return every unit, sorted by name.
    ///
    /// A root that cannot be listed yields no units.
    pub fn scan(&self) -> Result<Vec<DiscoveryUnit>, ScanError> {
        let root = self.ctx.root();
        if let Err(reason) = self.check_root() {
            tracing::warn!(root = %root.display(), %reason, "nothing to scan");
            return Ok(Vec::new());
        }

        tracing::debug!(
            root = %root.display(),
            repo = self.config.repo().unwrap_or_default(),
            subdir = ?self.config.subdir(),
            "starting scan"
        );

        let located = self.locate()?;
        let manifest_names: BTreeSet<String> =
            located.iter().map(|l| l.record.name.clone()).collect();

        let mut units = Vec::with_capacity(located.len() + 1);
        for manifest in &located {
            units.push(self.manifest_unit(manifest, &manifest_names)?);
        }

        if self.config.is_stdlib() {
            tracing::debug!("standard library repository, not aggregating loose scripts");
        } else if let Some(unit) = self.scripts_unit(&units, &manifest_names)? {
            units.push(unit);
        }

        units.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::info!(
            manifests = located.len(),
            units = units.len(),
            "scan complete"
        );
        Ok(units)
    }

    fn check_root(&self) -> Result<(), String> {
        let root = self.ctx.root();
        let meta = std::fs::metadata(root).map_err(|e| e.to_string())?;
        if !meta.is_dir() {
            return Err(String::from("not a directory"));
        }
        std::fs::read_dir(root).map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Gemspecs, or the packed metadata when there are none.
    fn locate(&self) -> Result<Vec<Located>, ScanError> {
        let root = self.ctx.root();
        let paths = find_manifests(root)?;

        if paths.is_empty() {
            tracing::debug!("no gemspec found, trying {PACKED_MANIFEST_FILE}");
            return Ok(load_packed_manifest(root)
                .map(|record| Located {
                    dir: root.to_path_buf(),
                    path: String::from(PACKED_MANIFEST_FILE),
                    record,
                })
                .into_iter()
                .collect());
        }

        tracing::debug!(count = paths.len(), "found gemspecs");
        Ok(load_manifests(root, &paths)
            .into_iter()
            .map(|(path, record)| Located {
                dir: path.parent().unwrap_or(root).to_path_buf(),
                path: self.ctx.display(&path),
                record,
            })
            .collect())
    }

    fn manifest_unit(
        &self,
        manifest: &Located,
        manifest_names: &BTreeSet<String>,
    ) -> Result<DiscoveryUnit, ScanError> {
        let ctx = self.ctx.at(&manifest.dir);

        let mut declarations: Vec<DependencyDeclaration> = manifest
            .record
            .dependencies
            .iter()
            .map(|dep| DependencyDeclaration::from_manifest(dep, &manifest.path))
            .collect();
        declarations.extend(ctx.companion_declarations());

        let dependencies = ctx.resolve(declarations, manifest_names);
        let scripts = find_scripts(ctx.dir(), ctx.root())?;

        tracing::debug!(
            gem = %manifest.record.name,
            manifest = %manifest.path,
            dependencies = dependencies.len(),
            scripts = scripts.len(),
            "assembled gem unit"
        );

        Ok(DiscoveryUnit::from_manifest(
            &manifest.record,
            ctx.display(ctx.dir()),
            scripts,
            dependencies,
        ))
    }

    /// The aggregate of root-level scripts that no gem unit claims.
    fn scripts_unit(
        &self,
        units: &[DiscoveryUnit],
        manifest_names: &BTreeSet<String>,
    ) -> Result<Option<DiscoveryUnit>, ScanError> {
        let claimed: BTreeSet<&str> = units
            .iter()
            .filter(|u| !u.is_aggregate())
            .flat_map(|u| u.files.iter().map(String::as_str))
            .collect();

        let orphans: Vec<String> = find_scripts(self.ctx.root(), self.ctx.root())?
            .into_iter()
            .filter(|script| !claimed.contains(script.as_str()))
            .collect();

        if orphans.is_empty() {
            return Ok(None);
        }

        let dependencies = self
            .ctx
            .resolve(self.ctx.companion_declarations(), manifest_names);
        tracing::debug!(scripts = orphans.len(), "assembled loose script unit");
        Ok(Some(DiscoveryUnit::scripts(orphans, dependencies)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitType;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn config_builder() {
        let config = ScanConfig::new().with_repo("github.com/ruby/ruby").with_subdir("lib");
        assert!(config.is_stdlib());
        assert_eq!(config.subdir(), Some(Path::new("lib")));
        assert!(!ScanConfig::new().with_repo("github.com/ruby/rake").is_stdlib());
        assert!(!ScanConfig::new().is_stdlib());
    }

    #[test]
    fn context_renders_relative_paths() {
        let ctx = ScanContext::new("/repo").at("/repo/gems/a");
        assert_eq!(ctx.display(ctx.dir()), "gems/a");
        assert_eq!(ctx.display(ctx.root()), ".");
    }

    #[test]
    fn missing_root_yields_no_units() {
        let tmp = TempDir::new().unwrap();
        let units = Scanner::new(tmp.path().join("absent"), ScanConfig::new())
            .scan()
            .unwrap();
        assert!(units.is_empty());
    }

    #[test]
    fn file_root_yields_no_units() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "file.rb", "");
        let units = Scanner::new(tmp.path().join("file.rb"), ScanConfig::new())
            .scan()
            .unwrap();
        assert!(units.is_empty());
    }

    #[test]
    fn empty_tree_has_no_units() {
        let tmp = TempDir::new().unwrap();
        let units = Scanner::new(tmp.path(), ScanConfig::new()).scan().unwrap();
        assert!(units.is_empty());
    }

    #[test]
    fn nested_gem_claims_only_its_scripts() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "gems/a/a.gemspec",
            "Gem::Specification.new do |s|\n  s.name = 'a'\nend\n",
        );
        write(tmp.path(), "gems/a/lib/a.rb", "");
        write(tmp.path(), "bin/tool.rb", "");
        write(tmp.path(), "Gemfile", "gem 'rake', '~> 13.0'\ngem 'a'\n");

        let units = Scanner::new(tmp.path(), ScanConfig::new()).scan().unwrap();
        assert_eq!(units.len(), 2);

        assert_eq!(units[0].name, ".");
        assert_eq!(units[0].unit_type, UnitType::Ruby);
        assert_eq!(units[0].files, vec!["bin/tool.rb"]);
        assert_eq!(units[0].dependencies.len(), 1);
        assert_eq!(units[0].dependencies[0].name, "rake");
        assert_eq!(units[0].dependencies[0].version, "~> 13.0");
        assert_eq!(units[0].dependencies[0].path, "Gemfile");

        assert_eq!(units[1].name, "a");
        assert_eq!(units[1].dir, "gems/a");
        assert_eq!(units[1].files, vec!["gems/a/lib/a.rb", "."]);
    }

    #[test]
    fn companion_declarations_follow_manifest_ones() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "a.gemspec",
            "Gem::Specification.new do |s|\n  s.name = 'a'\n  s.add_dependency 'rack', '>= 2'\nend\n",
        );
        write(tmp.path(), "Gemfile", "gemspec\ngem 'rack', '~> 3.0'\ngem 'puma'\n");

        let units = Scanner::new(tmp.path(), ScanConfig::new()).scan().unwrap();
        let deps = &units[0].dependencies;
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].name, "puma");
        assert_eq!(deps[0].path, "Gemfile");
        assert_eq!(deps[1].name, "rack");
        assert_eq!(deps[1].version, ">= 2");
        assert_eq!(deps[1].path, "a.gemspec");
    }
}
