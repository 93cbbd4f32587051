//! Setup shared by the commands that talk to registries.

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use oci_mirror_core::PolicyConfig;
use oci_mirror_engine::{EngineConfig, Failures};
use oci_mirror_registry::{ClientConfig, HttpRegistry};

use super::RunArgs;

/// Loads and validates the mirror configuration.
pub fn load_policy(path: &Path) -> Result<PolicyConfig> {
    oci_mirror_core::config::load(path)
        .with_context(|| format!("Cannot use mirror config {}", path.display()))
}

/// Creates the HTTP registry client.
pub fn registry(args: &RunArgs) -> Result<Arc<HttpRegistry>> {
    let mut config = ClientConfig::new();
    if let Some(secs) = args.request_timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    let registry = HttpRegistry::new(config).context("Cannot create registry client")?;
    Ok(Arc::new(registry))
}

/// Engine options from the command line.
pub fn engine_config(args: &RunArgs, dry_run: bool) -> EngineConfig {
    EngineConfig::new()
        .with_concurrency(args.concurrency)
        .with_dry_run(dry_run)
}

/// A token cancelled on Ctrl-C or when the run deadline passes.
pub fn cancellation(timeout: Option<u64>) -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Interrupted, cancelling run"),
            () = deadline => warn!(timeout_secs = ?timeout, "Run deadline reached, cancelling"),
            () = trigger.cancelled() => return,
        }
        trigger.cancel();
    });

    token
}

/// Logs the outcome of a run; fails if anything failed.
pub fn finish<S: Display>(operation: &str, started: Instant, result: Result<S, Failures>) -> Result<()> {
    let elapsed = started.elapsed();
    match result {
        Ok(summary) => {
            info!(%summary, elapsed = ?elapsed, "Finished {operation}");
            Ok(())
        }
        Err(failures) => {
            for failure in &failures {
                error!(scope = %failure.scope, error = %failure.error, "Failure during {operation}");
            }
            anyhow::bail!("{operation} finished with {} failure(s) after {elapsed:?}", failures.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use oci_mirror_engine::EngineError;

    #[test]
    fn test_load_policy_reports_path() {
        let err = load_policy(Path::new("/nonexistent/oci-mirror.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/oci-mirror.yaml"));
    }

    #[test]
    fn test_load_policy_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "images:\n  - source: alpine\n    destination: alpine\n    match:\n      tags: [latest]"
        )
        .unwrap();

        let err = load_policy(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("must differ"));
    }

    #[test]
    fn test_engine_config_from_args() {
        let args = RunArgs {
            concurrency: 0,
            timeout: None,
            request_timeout: Some(30),
        };
        let config = engine_config(&args, true);
        assert_eq!(config.concurrency, 1);
        assert!(config.dry_run);
    }

    #[test]
    fn test_finish() {
        assert!(finish("mirror", Instant::now(), Ok::<_, Failures>("done")).is_ok());

        let mut failures = Failures::new();
        failures.record("docker.io/library/alpine:3.19", EngineError::Cancelled);
        let err = finish::<&str>("purge", Instant::now(), Err(failures)).unwrap_err();
        assert!(err.to_string().starts_with("purge finished with 1 failure(s)"));
    }

    #[tokio::test]
    async fn test_cancellation_deadline() {
        let token = cancellation(Some(0));
        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
    }
}
