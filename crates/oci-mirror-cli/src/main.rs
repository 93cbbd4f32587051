//! oci-mirror - mirrors container images between registries and purges
//! what a policy no longer wants.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::{Cli, Commands, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.debug, cli.global.log_format);

    match &cli.command {
        Commands::Mirror(args) => commands::mirror::run(&cli.global, args).await,
        Commands::Purge(args) => commands::purge::run(&cli.global, args).await,
        Commands::PurgeUnknown(args) => commands::purge::run_unknown(&cli.global, args).await,
        Commands::Validate => commands::validate::run(&cli.global),
        Commands::Version => {
            println!("oci-mirror {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(debug: bool, format: LogFormat) {
    let default_directive = if debug { "oci_mirror=debug" } else { "oci_mirror=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
    }
}
