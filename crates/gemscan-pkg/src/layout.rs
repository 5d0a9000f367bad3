//! Conventional file names of a Ruby project and the path rules shared by
//! every discovery pass.
//!
//! ```text
//! my-gem/
//! ├── my-gem.gemspec        # Manifest
//! ├── Gemfile               # Companion dependency file
//! ├── Gemfile.lock          # Lockfile
//! ├── lib/
//! │   └── my_gem.rb         # Scripts claimed by the manifest
//! └── test/                 # Never reported
//! ```

use std::path::{Component, Path, PathBuf};

/// Manifest file extension.
pub const MANIFEST_EXT: &str = "gemspec";

/// Loose source file extension.
pub const SCRIPT_EXT: &str = "rb";

/// The companion dependency file read next to each manifest.
pub const COMPANION_FILE: &str = "Gemfile";

/// The lockfile read next to each manifest.
pub const LOCK_FILE: &str = "Gemfile.lock";

/// Packed gem metadata consulted when no manifest exists.
pub const PACKED_MANIFEST_FILE: &str = "metadata.gz";

/// Repository identifier of the Ruby standard library.
pub const STDLIB_REPO: &str = "github.com/ruby/ruby";

/// Directory segments whose contents are never reported.
pub const EXCLUDED_SEGMENTS: [&str; 4] = ["spec", "specs", "test", "tests"];

/// Check whether a root-relative path lies under a test or spec directory.
///
/// Only directory segments count: `test.rb` at the root is kept while
/// `test/helper.rb` is excluded. Matching is case-sensitive.
#[must_use]
pub fn is_excluded(relative: &Path) -> bool {
    relative.parent().is_some_and(|dir| {
        dir.components().any(|c| match c {
            Component::Normal(segment) => EXCLUDED_SEGMENTS.iter().any(|e| segment == *e),
            _ => false,
        })
    })
}

/// Check whether any segment of a root-relative path is a dotfile.
#[must_use]
pub fn is_hidden(relative: &Path) -> bool {
    relative.components().any(|c| match c {
        Component::Normal(segment) => segment.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// Strip `root` from `path`, leaving paths outside the root untouched.
#[must_use]
pub fn relative_to(path: &Path, root: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

/// Render a root-relative path with `/` separators; the root itself is `.`.
#[must_use]
pub fn display_path(relative: &Path) -> String {
    let parts: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::ParentDir => Some(String::from("..")),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        String::from(".")
    } else {
        parts.join("/")
    }
}

/// Build a glob pattern matching `*.ext` anywhere beneath `dir`.
pub(crate) fn recursive_pattern(dir: &Path, ext: &str) -> String {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    format!("{escaped}/**/*.{ext}")
}

/// Options for tree walks: hidden entries are skipped the way a shell glob
/// skips them.
pub(crate) fn walk_options() -> glob::MatchOptions {
    glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    }
}
