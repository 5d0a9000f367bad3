//! Gemfile reading.
//!
//! Gemfiles are Ruby too. Only the declarative subset matters here: `gem`
//! lines and the `group ... do` blocks around them. Every other line is
//! ignored, and nothing is evaluated.
//!
//! ```ruby
//! source "https://rubygems.org"
//! gemspec
//!
//! gem "rails", "~> 7.1"
//! gem "pg", group: :production
//!
//! group :development, :test do
//!   gem "rspec-rails"
//! end
//! ```

use crate::dependency::DEFAULT_GROUP;
use crate::layout::COMPANION_FILE;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// Errors that can occur when reading a Gemfile.
#[derive(Error, Debug)]
pub enum CompanionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One `gem` line of a Gemfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GemfileDependency {
    /// Gem name.
    pub name: String,
    /// Requirement strings, in declaration order.
    pub requirements: Vec<String>,
    /// Effective groups, including those of enclosing `group` blocks.
    pub groups: BTreeSet<String>,
}

/// The declarations of a Gemfile, unfiltered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gemfile {
    /// Declarations in file order.
    pub dependencies: Vec<GemfileDependency>,
}

fn gem_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*gem[\s(]+(['"])([^'"]+)['"]\s*(.*?)\)?\s*$"#).expect("valid regex")
    })
}

fn group_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*group[\s(]+(.+?)\)?\s+do\s*(\|.*\|)?\s*$").expect("valid regex")
    })
}

fn keyword_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(if|unless|case|begin|while|until|for)\b").expect("valid regex")
    })
}

fn other_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bdo\s*(\|.*\|)?\s*$").expect("valid regex"))
}

fn end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*end\b").expect("valid regex"))
}

fn group_option_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^:?(group|groups)\s*(:|=>)\s*(.+)$").expect("valid regex")
    })
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#":([A-Za-z_][A-Za-z0-9_]*)|['"]([^'"]+)['"]"#).expect("valid regex")
    })
}

impl Gemfile {
    /// Read the Gemfile in `dir`.
    ///
    /// A directory without a Gemfile has no declarations.
    pub fn load(dir: &Path) -> Result<Self, CompanionError> {
        let path = dir.join(COMPANION_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(&path).map_err(|source| CompanionError::Io { path, source })?;
        Ok(Self::parse(&content))
    }

    /// Parse Gemfile text.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        // One frame per open block; `do` and keyword blocks that are not
        // groups push an empty frame so their `end` leaves groups intact.
        let mut frames: Vec<Vec<String>> = Vec::new();
        let mut dependencies = Vec::new();

        for raw in content.lines() {
            let line = strip_comment(raw);
            if line.trim().is_empty() {
                continue;
            }

            if let Some(caps) = group_re().captures(line) {
                frames.push(names_before_options(&caps[1]));
            } else if let Some(caps) = gem_re().captures(line) {
                let mut dep = gem_line(&caps[2], &caps[3]);
                dep.groups.extend(frames.iter().flatten().cloned());
                if dep.groups.is_empty() {
                    dep.groups.insert(String::from(DEFAULT_GROUP));
                }
                dependencies.push(dep);
            } else if end_re().is_match(line) {
                frames.pop();
            } else if keyword_block_re().is_match(line) || other_block_re().is_match(line) {
                frames.push(Vec::new());
            }
        }

        Self { dependencies }
    }
}

/// Drop a trailing `#` comment that is not inside a string.
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '#') => return &line[..i],
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            _ => {}
        }
    }
    line
}

/// Split on commas that are outside brackets and quotes.
fn split_args(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote = None;
    let mut start = 0;

    for (i, c) in args.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(' | '{') => depth += 1,
            (None, ']' | ')' | '}') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(args[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(args[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Symbols and strings listed before the first `key:` option.
fn names_before_options(args: &str) -> Vec<String> {
    split_args(args)
        .into_iter()
        .take_while(|part| !is_option(part))
        .filter_map(|part| {
            name_re()
                .captures(part)
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

fn is_option(part: &str) -> bool {
    let part = part.trim_start_matches(':');
    part.contains("=>")
        || part
            .split_once(':')
            .is_some_and(|(key, _)| !key.is_empty() && key.chars().all(is_word_char))
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Drop a trailing `if`/`unless` modifier, and with it the closing paren of
/// a parenthesized call.
fn strip_modifier(args: &str) -> &str {
    let mut depth = 0usize;
    let mut quote = None;
    let mut cut = args.len();

    for (i, c) in args.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(' | '{') => depth += 1,
            (None, ']' | ')' | '}') => depth = depth.saturating_sub(1),
            (None, 'i' | 'u') if depth == 0 && modifier_at(args, i) => {
                cut = i;
                break;
            }
            _ => {}
        }
    }

    let kept = args[..cut].trim_end();
    if cut == args.len() {
        return kept;
    }
    match kept.strip_suffix(')') {
        Some(inner) if inner.matches('(').count() == inner.matches(')').count() => inner,
        _ => kept,
    }
}

fn modifier_at(args: &str, i: usize) -> bool {
    if args[..i].chars().next_back().is_some_and(|c| !c.is_whitespace()) {
        return false;
    }
    ["if", "unless"].iter().any(|keyword| {
        args[i..]
            .strip_prefix(keyword)
            .is_some_and(|after| after.starts_with(char::is_whitespace))
    })
}

fn gem_line(name: &str, rest: &str) -> GemfileDependency {
    let mut requirements = Vec::new();
    let mut groups = BTreeSet::new();
    let mut options_started = false;

    let rest = strip_modifier(rest).trim_start().trim_start_matches(',');
    for part in split_args(rest) {
        if let Some(caps) = group_option_re().captures(part) {
            options_started = true;
            groups.extend(
                name_re()
                    .captures_iter(&caps[3])
                    .filter_map(|c| c.get(1).or_else(|| c.get(2)))
                    .map(|m| m.as_str().to_string()),
            );
        } else if is_option(part) {
            options_started = true;
        } else if !options_started {
            let unquoted = part.trim_matches(|c| c == '"' || c == '\'');
            if unquoted.len() + 2 == part.len() {
                requirements.push(unquoted.to_string());
            }
        }
    }

    GemfileDependency {
        name: name.to_string(),
        requirements,
        groups,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn groups(dep: &GemfileDependency) -> Vec<&str> {
        dep.groups.iter().map(String::as_str).collect()
    }

    #[test]
    fn parse_plain_gems() {
        let gemfile = Gemfile::parse(
            r#"
source "https://rubygems.org"
ruby "3.2.2"
gemspec

gem "rails", "~> 7.1", ">= 7.1.2"
gem 'pg' # database
gem("puma", "6.4.0")
"#,
        );
        let deps = &gemfile.dependencies;
        assert_eq!(deps.len(), 3);
        assert_eq!(deps[0].name, "rails");
        assert_eq!(deps[0].requirements, vec!["~> 7.1", ">= 7.1.2"]);
        assert_eq!(groups(&deps[0]), vec!["default"]);
        assert_eq!(deps[1].name, "pg");
        assert!(deps[1].requirements.is_empty());
        assert_eq!(deps[2].requirements, vec!["6.4.0"]);
    }

    #[test]
    fn parse_group_blocks() {
        let gemfile = Gemfile::parse(
            r#"
group :development, :test do
  gem "rspec"
  platforms :mri do
    gem "byebug"
  end
end

group "tools", optional: true do
  gem "rubocop", require: false
end

gem "rack"
"#,
        );
        let deps = &gemfile.dependencies;
        assert_eq!(deps.len(), 4);
        assert_eq!(groups(&deps[0]), vec!["development", "test"]);
        assert_eq!(groups(&deps[1]), vec!["development", "test"]);
        assert_eq!(groups(&deps[2]), vec!["tools"]);
        assert!(deps[2].requirements.is_empty());
        assert_eq!(groups(&deps[3]), vec!["default"]);
    }

    #[test]
    fn parse_inline_groups() {
        let gemfile = Gemfile::parse(
            r#"
gem "capybara", ">= 3", group: :test
gem "pry", groups: [:development, :test]
gem "web-console", :group => "development"
gem "sass", "3.0", require: false, group: :assets
"#,
        );
        let deps = &gemfile.dependencies;
        assert_eq!(deps[0].requirements, vec![">= 3"]);
        assert_eq!(groups(&deps[0]), vec!["test"]);
        assert_eq!(groups(&deps[1]), vec!["development", "test"]);
        assert_eq!(groups(&deps[2]), vec!["development"]);
        assert_eq!(deps[3].requirements, vec!["3.0"]);
        assert_eq!(groups(&deps[3]), vec!["assets"]);
    }

    #[test]
    fn git_options_are_not_requirements() {
        let gemfile =
            Gemfile::parse(r#"gem "rack", git: "https://github.com/rack/rack", branch: "main""#);
        assert!(gemfile.dependencies[0].requirements.is_empty());
    }

    #[test]
    fn conditional_inside_group_keeps_group() {
        let gemfile = Gemfile::parse(
            r#"
group :development do
  if RUBY_VERSION >= "3"
    gem "debug"
  end
  gem "pry"
end
"#,
        );
        let deps = &gemfile.dependencies;
        assert_eq!(deps[0].name, "debug");
        assert_eq!(groups(&deps[0]), vec!["development"]);
        assert_eq!(deps[1].name, "pry");
        assert_eq!(groups(&deps[1]), vec!["development"]);
    }

    #[test]
    fn keyword_blocks_nest_like_do_blocks() {
        let gemfile = Gemfile::parse(
            r#"
group :test do
  case RUBY_PLATFORM
  when /darwin/
    gem "rb-fsevent"
  end
  begin
    gem "minitest"
  end
  gem "rspec"
end
gem "rack"
"#,
        );
        let deps = &gemfile.dependencies;
        assert_eq!(deps.len(), 4);
        assert!(deps[..3].iter().all(|d| groups(d) == vec!["test"]));
        assert_eq!(groups(&deps[3]), vec!["default"]);
    }

    #[test]
    fn trailing_modifier_keeps_requirements() {
        let gemfile = Gemfile::parse(
            r#"
gem "rails", "~> 7.1" if ENV["X"]
gem("pg", ">= 1.5") unless ENV["NO_PG"]
gem "sqlite3", group: :test if ENV["CI"]
gem "unlessy", "1.0"
"#,
        );
        let deps = &gemfile.dependencies;
        assert_eq!(deps.len(), 4);
        assert_eq!(deps[0].requirements, vec!["~> 7.1"]);
        assert_eq!(groups(&deps[0]), vec!["default"]);
        assert_eq!(deps[1].requirements, vec![">= 1.5"]);
        assert_eq!(groups(&deps[2]), vec!["test"]);
        assert_eq!(deps[3].requirements, vec!["1.0"]);
    }

    #[test]
    fn load_missing_gemfile_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(Gemfile::load(tmp.path()).unwrap(), Gemfile::default());
    }

    #[test]
    fn load_from_directory() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(COMPANION_FILE), "gem 'rake'\n").unwrap();
        let gemfile = Gemfile::load(tmp.path()).unwrap();
        assert_eq!(gemfile.dependencies[0].name, "rake");
    }
}
