//! Loose Ruby source discovery.

use crate::layout::{self, SCRIPT_EXT};
use std::path::Path;

/// Find every `.rb` file beneath `dir`, skipping test, spec and hidden
/// directories.
///
/// Paths are rendered relative to `root` with `/` separators and returned
/// sorted. A `dir` that does not exist yields nothing.
pub fn find_scripts(dir: &Path, root: &Path) -> Result<Vec<String>, glob::PatternError> {
    let pattern = layout::recursive_pattern(dir, SCRIPT_EXT);
    let mut scripts = Vec::new();

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
        if !path.is_file() {
            continue;
        }
        let relative = layout::relative_to(&path, root);
        if layout::is_hidden(&relative) || layout::is_excluded(&relative) {
            continue;
        }
        scripts.push(layout::display_path(&relative));
    }

    scripts.sort();
    scripts.dedup();
    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "puts 1\n").unwrap();
    }

    #[test]
    fn finds_nested_scripts_sorted() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "script.rb");
        touch(tmp.path(), "lib/b.rb");
        touch(tmp.path(), "lib/a/deep.rb");
        touch(tmp.path(), "README.md");

        let scripts = find_scripts(tmp.path(), tmp.path()).unwrap();
        assert_eq!(scripts, vec!["lib/a/deep.rb", "lib/b.rb", "script.rb"]);
    }

    #[test]
    fn skips_test_spec_and_hidden() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "test.rb");
        touch(tmp.path(), "test/helper.rb");
        touch(tmp.path(), "lib/spec/x.rb");
        touch(tmp.path(), ".bundle/config.rb");

        let scripts = find_scripts(tmp.path(), tmp.path()).unwrap();
        assert_eq!(scripts, vec!["test.rb"]);
    }

    #[test]
    fn paths_relative_to_root() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "gems/a/lib/a.rb");
        touch(tmp.path(), "other.rb");

        let scripts = find_scripts(&tmp.path().join("gems/a"), tmp.path()).unwrap();
        assert_eq!(scripts, vec!["gems/a/lib/a.rb"]);
    }

    #[test]
    fn missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(find_scripts(&tmp.path().join("nope"), tmp.path()).unwrap().is_empty());
    }
}
