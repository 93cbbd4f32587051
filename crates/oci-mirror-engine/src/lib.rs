//! # oci-mirror engine
//!
//! Reconciles destination registries with a mirror policy.
//!
//! - [`TagSelector`] - which source tags a rule mirrors
//! - [`MirrorEngine`] - copies the selected images, rule by rule
//! - [`PurgeEngine`] - deletes destination tags per rule or registry-wide
//! - [`Failures`] - every failure of a run, with the rule or image it hit
//!
//! Engines work against the [`oci_mirror_registry::Registry`] trait and never
//! install a log subscriber; their events are recorded under a span supplied
//! with `with_span`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use oci_mirror_core::config::load;
//! use oci_mirror_engine::{EngineConfig, MirrorEngine, PurgeEngine};
//! use oci_mirror_registry::{ClientConfig, HttpRegistry};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let policy = load("oci-mirror.yaml")?;
//!     let registry = Arc::new(HttpRegistry::new(ClientConfig::new())?);
//!     let cancel = CancellationToken::new();
//!
//!     let mirrored = MirrorEngine::new(registry.clone())
//!         .with_config(EngineConfig::new().with_concurrency(4))
//!         .with_cancellation(cancel.clone())
//!         .mirror(&policy)
//!         .await?;
//!     println!("mirror: {mirrored}");
//!
//!     let purged = PurgeEngine::new(registry)
//!         .with_cancellation(cancel)
//!         .purge(&policy)
//!         .await?;
//!     println!("purge: {purged}");
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod access;
mod config;
mod error;
mod mirror;
mod purge;
mod selector;
mod session;

#[cfg(test)]
mod proptest_tests;

pub use access::{AccessResolver, RuleAccess};
pub use config::EngineConfig;
pub use error::{EngineError, Failure, Failures};
pub use mirror::{MirrorEngine, MirrorSummary};
pub use purge::{purge_candidates, PurgeEngine, PurgeSummary};
pub use selector::{Selection, TagMapping, TagSelector};
