//! Discovery of Ruby gems and loose scripts.
//!
//! This crate provides:
//! - Locating and statically parsing `*.gemspec` manifests, with a tolerant
//!   fallback for manifests that use dynamic Ruby
//! - Reading `Gemfile` declarations and `Gemfile.lock` pinned versions
//! - Reading packed `metadata.gz` specifications when no gemspec exists
//! - Scope filtering and lock resolution of dependencies
//! - Assembly of sorted, deterministic [`DiscoveryUnit`]s
//!
//! ```no_run
//! use gemscan_pkg::{ScanConfig, Scanner};
//!
//! let config = ScanConfig::new().with_repo("github.com/rack/rack");
//! let units = Scanner::new(".", config).scan()?;
//! println!("{}", serde_json::to_string(&units)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod companion;
mod dependency;
mod gemspec;
mod layout;
mod lockfile;
mod manifest;
mod packed;
mod resolve;
mod scan;
mod scripts;
mod unit;

pub use companion::{CompanionError, Gemfile, GemfileDependency};
pub use dependency::{
    dedup_and_filter, normalize_requirement, DependencyDeclaration, DependencyKind, DEFAULT_GROUP,
    DEFAULT_REQUIREMENT, DEV_GROUPS,
};
pub use gemspec::{fallback_gemspec, parse_gemspec};
pub use layout::{
    display_path, is_excluded, is_hidden, relative_to, COMPANION_FILE, EXCLUDED_SEGMENTS,
    LOCK_FILE, MANIFEST_EXT, PACKED_MANIFEST_FILE, SCRIPT_EXT, STDLIB_REPO,
};
pub use lockfile::{LockError, LockedVersionTable};
pub use manifest::{
    find_manifests, load_manifest, load_manifests, GemDependency, ManifestError, ManifestRecord,
    VOLATILE_FIELDS,
};
pub use packed::{load_packed_manifest, parse_packed_manifest, read_packed_manifest, PackedError};
pub use resolve::{LockResolver, ResolvedDependency};
pub use scan::{ScanConfig, ScanContext, ScanError, Scanner};
pub use scripts::find_scripts;
pub use unit::{DiscoveryUnit, Ops, UnitType, AGGREGATE_DATA_NAME, AGGREGATE_NAME};
