//! Implementation of the `gemscan scan` command.
//!
//! Scans the current directory and writes the discovered units to stdout as
//! one JSON array.

use anyhow::{bail, Context, Result};
use gemscan_pkg::{DiscoveryUnit, ScanConfig, Scanner};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Options for the scan command.
#[derive(Debug, Default)]
pub struct ScanOptions {
    /// Repository identifier.
    pub repo: Option<String>,
    /// Where the current directory sits inside the repository.
    pub subdir: Option<PathBuf>,
    /// Indent the output.
    pub pretty: bool,
    /// Stray positional arguments, always rejected.
    pub args: Vec<String>,
}

impl ScanOptions {
    fn config(&self) -> ScanConfig {
        let mut config = ScanConfig::new();
        if let Some(repo) = &self.repo {
            config = config.with_repo(repo.clone());
        }
        if let Some(subdir) = &self.subdir {
            config = config.with_subdir(subdir.clone());
        }
        config
    }
}

/// Scan the current directory and print the result.
pub fn run_scan(options: ScanOptions) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let units = scan_dir(&cwd, &options)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_units(&mut out, &units, options.pretty)?;
    out.flush().context("Failed to flush stdout")?;
    Ok(())
}

/// Validate `options` and scan `root`.
fn scan_dir(root: &Path, options: &ScanOptions) -> Result<Vec<DiscoveryUnit>> {
    if !options.args.is_empty() {
        bail!(
            "no args may be specified to scan (got {:?}); it only scans the current directory",
            options.args
        );
    }

    let config = options.config();
    if let Some(subdir) = config.subdir() {
        tracing::info!(subdir = %subdir.display(), "scanning repository subdirectory");
    }

    Scanner::new(root, config)
        .scan()
        .with_context(|| format!("Failed to scan {}", root.display()))
}

/// Serialize `units` as one JSON array followed by a newline.
fn write_units(out: &mut impl Write, units: &[DiscoveryUnit], pretty: bool) -> Result<()> {
    let written = if pretty {
        serde_json::to_writer_pretty(&mut *out, units)
    } else {
        serde_json::to_writer(&mut *out, units)
    };
    written.context("Failed to serialize scan output")?;
    writeln!(out).context("Failed to write scan output")?;
    Ok(())
}
