//! CLI commands and argument parsing.

pub mod mirror;
pub mod purge;
pub mod run;
pub mod validate;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// oci-mirror - mirror OCI images between registries
#[derive(Parser)]
#[command(name = "oci-mirror")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to the mirror configuration (YAML, or JSON with a .json extension)
    #[arg(long, global = true, env = "OCI_MIRROR_CONFIG", default_value = "oci-mirror.yaml")]
    pub mirror_config: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Mirror images as specified in the configuration
    Mirror(RunArgs),

    /// Purge destination tags as specified in the configuration
    Purge(PurgeArgs),

    /// Delete every destination tag no rule wants
    PurgeUnknown(PurgeArgs),

    /// Validate the configuration without contacting any registry
    Validate,

    /// Print version information
    Version,
}

/// Options of commands that talk to registries.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Number of rules processed at the same time
    #[arg(long, default_value = "1")]
    pub concurrency: usize,

    /// Cancel the run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Timeout of a single registry request in seconds
    #[arg(long)]
    pub request_timeout: Option<u64>,
}

/// Options of the purge commands.
#[derive(Args, Debug, Clone)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Log what would be deleted without deleting
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["oci-mirror", "mirror"]).unwrap();
        assert_eq!(cli.global.mirror_config, PathBuf::from("oci-mirror.yaml"));
        assert!(!cli.global.debug);
        assert_eq!(cli.global.log_format, LogFormat::Text);

        let Commands::Mirror(args) = cli.command else {
            panic!("expected mirror command");
        };
        assert_eq!(args.concurrency, 1);
        assert!(args.timeout.is_none());
    }

    #[test]
    fn test_purge_options() {
        let cli = Cli::try_parse_from([
            "oci-mirror",
            "purge-unknown",
            "--dry-run",
            "--concurrency",
            "4",
            "--timeout",
            "600",
            "--mirror-config",
            "/etc/oci-mirror/config.yaml",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.global.mirror_config, PathBuf::from("/etc/oci-mirror/config.yaml"));
        assert_eq!(cli.global.log_format, LogFormat::Json);
        let Commands::PurgeUnknown(args) = cli.command else {
            panic!("expected purge-unknown command");
        };
        assert!(args.dry_run);
        assert_eq!(args.run.concurrency, 4);
        assert_eq!(args.run.timeout, Some(600));
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        assert!(Cli::try_parse_from(["oci-mirror", "--log-format", "xml", "mirror"]).is_err());
    }

    #[test]
    fn test_dry_run_only_for_purge() {
        assert!(Cli::try_parse_from(["oci-mirror", "mirror", "--dry-run"]).is_err());
    }
}
