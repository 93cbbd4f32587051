//! Mirror command implementation.

use std::time::Instant;

use anyhow::Result;
use tracing::{info, info_span};

use oci_mirror_engine::MirrorEngine;

use super::run::{cancellation, engine_config, finish, load_policy, registry};
use super::{GlobalArgs, RunArgs};

/// Runs the mirror command.
pub async fn run(global: &GlobalArgs, args: &RunArgs) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), config = %global.mirror_config.display(), "Starting mirror");
    let policy = load_policy(&global.mirror_config)?;
    let registry = registry(args)?;

    let started = Instant::now();
    let result = MirrorEngine::new(registry)
        .with_config(engine_config(args, false))
        .with_cancellation(cancellation(args.timeout))
        .with_span(info_span!("mirror"))
        .mirror(&policy)
        .await;

    finish("mirror", started, result)
}
