//! Validate command implementation.

use anyhow::{Context, Result};
use tracing::info;

use oci_mirror_core::{PolicyConfig, Validate};

use super::GlobalArgs;

/// Runs the validate command.
pub fn run(global: &GlobalArgs) -> Result<()> {
    let path = &global.mirror_config;
    info!(config = %path.display(), "Validating mirror config");

    let policy = PolicyConfig::from_file(path)
        .with_context(|| format!("Cannot read mirror config {}", path.display()))?;

    match policy.validate() {
        Ok(()) => {
            println!(
                "✓ {}: {} rule(s), {} registry credential(s)",
                path.display(),
                policy.images.len(),
                policy.registries.len()
            );
            Ok(())
        }
        Err(errors) => {
            println!("✗ {}", path.display());
            for error in &errors {
                println!("  - [{}] {error}", error.kind);
            }
            anyhow::bail!("{} validation error(s)", errors.len())
        }
    }
}
