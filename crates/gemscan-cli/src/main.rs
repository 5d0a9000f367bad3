//! gemscan CLI - Discovers Ruby gems and scripts in the current directory

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod scan;

/// Environment variable overriding `--log-level` with a full filter directive.
const LOG_ENV: &str = "GEMSCAN_LOG";

#[derive(Parser)]
#[command(name = "gemscan")]
#[command(version)]
#[command(about = "Discover Ruby gems and scripts", long_about = None)]
struct Cli {
    /// Diagnostic verbosity, written to stderr
    #[arg(long, value_enum, global = true, default_value = "warn")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the current directory and print discovered units as JSON
    Scan {
        /// Repository identifier, e.g. github.com/rack/rack
        #[arg(long)]
        repo: Option<String>,

        /// Location of the current directory within the repository
        #[arg(long)]
        subdir: Option<PathBuf>,

        /// Indent the JSON output
        #[arg(long)]
        pretty: bool,

        #[arg(hide = true)]
        args: Vec<String>,
    },
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn initialize_tracing(log_level: LogLevel) {
    let filter = std::env::var(LOG_ENV)
        .ok()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(log_level.to_filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(cli.log_level);

    match cli.command {
        Commands::Scan {
            repo,
            subdir,
            pretty,
            args,
        } => {
            let options = scan::ScanOptions {
                repo,
                subdir,
                pretty,
                args,
            };
            scan::run_scan(options)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scan_flags() {
        let cli = Cli::try_parse_from([
            "gemscan",
            "scan",
            "--repo",
            "github.com/rack/rack",
            "--subdir",
            "lib",
            "--pretty",
        ])
        .unwrap();
        assert_eq!(cli.log_level, LogLevel::Warn);
        match cli.command {
            Commands::Scan {
                repo,
                subdir,
                pretty,
                args,
            } => {
                assert_eq!(repo.as_deref(), Some("github.com/rack/rack"));
                assert_eq!(subdir, Some(PathBuf::from("lib")));
                assert!(pretty);
                assert!(args.is_empty());
            }
        }
    }

    #[test]
    fn test_positional_args_are_captured() {
        let cli = Cli::try_parse_from(["gemscan", "scan", "some/dir"]).unwrap();
        let Commands::Scan { args, .. } = cli.command;
        assert_eq!(args, vec!["some/dir"]);
    }

    #[test]
    fn test_log_level_after_subcommand() {
        let cli = Cli::try_parse_from(["gemscan", "scan", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["gemscan"]).is_err());
    }
}
