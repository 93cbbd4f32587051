//! Purge command implementations.

use std::time::Instant;

use anyhow::Result;
use tracing::{info, info_span};

use oci_mirror_engine::PurgeEngine;

use super::run::{cancellation, engine_config, finish, load_policy, registry};
use super::{GlobalArgs, PurgeArgs};

fn engine(args: &PurgeArgs) -> Result<PurgeEngine> {
    Ok(PurgeEngine::new(registry(&args.run)?)
        .with_config(engine_config(&args.run, args.dry_run))
        .with_cancellation(cancellation(args.run.timeout)))
}

/// Runs the purge command: applies every rule's purge section.
pub async fn run(global: &GlobalArgs, args: &PurgeArgs) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), config = %global.mirror_config.display(), dry_run = args.dry_run, "Starting purge");
    let policy = load_policy(&global.mirror_config)?;

    let started = Instant::now();
    let result = engine(args)?
        .with_span(info_span!("purge"))
        .purge(&policy)
        .await;

    finish("purge", started, result)
}

/// Runs the purge-unknown command: sweeps every destination registry.
pub async fn run_unknown(global: &GlobalArgs, args: &PurgeArgs) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), config = %global.mirror_config.display(), dry_run = args.dry_run, "Starting purge of unknown tags");
    let policy = load_policy(&global.mirror_config)?;

    let started = Instant::now();
    let result = engine(args)?
        .with_span(info_span!("purge_unknown"))
        .purge_unknown(&policy)
        .await;

    finish("purge-unknown", started, result)
}
