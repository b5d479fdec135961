//! Command-line arguments
//!
//! Structured flags are parsed with clap; the free-form logger flags
//! (`--debug-<module>`, `--verbose-<module>`) are consumed by the logger
//! directly from the raw argument list, so they are stripped before clap
//! sees the rest.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "warden",
    version,
    about = "Operational safety and admission-control core for an always-on trading bot",
    after_help = "Logger flags: --debug-<module> and --verbose-<module> enable per-module \
                  diagnostics (modules: store, ledger, cache, ratelimit, throttle, probation, \
                  healing, config, system)."
)]
pub struct CliArgs {
    /// Path to the TOML configuration file (default: <data dir>/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the base directory for all durable state and logs
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Raise the console log threshold to warnings
    #[arg(long)]
    pub quiet: bool,

    /// Lower the console log threshold to verbose
    #[arg(long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Parse from a raw argument list, ignoring the logger's module flags
    pub fn parse_filtered(args: &[String]) -> Self {
        let filtered: Vec<&String> = args
            .iter()
            .filter(|a| !a.starts_with("--debug-") && !a.starts_with("--verbose-"))
            .collect();
        Self::parse_from(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("warden")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_defaults() {
        let cli = CliArgs::parse_filtered(&args(&[]));
        assert!(cli.config.is_none());
        assert!(cli.data_dir.is_none());
        assert!(!cli.quiet);
    }

    #[test]
    fn test_logger_flags_ignored() {
        let cli = CliArgs::parse_filtered(&args(&[
            "--debug-store",
            "--config",
            "/tmp/warden.toml",
            "--verbose-healing",
        ]));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/warden.toml")));
    }

    #[test]
    fn test_data_dir_override() {
        let cli = CliArgs::parse_filtered(&args(&["--data-dir", "/var/lib/warden", "--quiet"]));
        assert_eq!(cli.data_dir, Some(PathBuf::from("/var/lib/warden")));
        assert!(cli.quiet);
    }
}
