//! # oci-mirror core
//!
//! Policy model and building blocks shared by the oci-mirror crates.
//!
//! - [`PolicyConfig`] - the declared mirror rules and registry credentials
//! - [`validation`] - aggregated validation of a loaded policy
//! - [`Repository`] / [`ImageReference`] - Docker-style reference parsing
//! - [`version`] - lenient tag versions and version constraints
//!
//! ## Example
//!
//! ```rust
//! use oci_mirror_core::{PolicyConfig, Validate};
//!
//! let config = PolicyConfig::from_yaml_str(r#"
//! images:
//!   - source: alpine
//!     destination: http://localhost:5000/library/alpine
//!     match:
//!       semver: ">= 3.17"
//! "#).unwrap();
//!
//! config.validate().unwrap();
//! let target = config.images[0].target().unwrap();
//! assert!(target.insecure);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod reference;
pub mod validation;
pub mod version;

#[cfg(test)]
mod proptest_tests;

pub use config::{Credentials, ImageRule, Match, PolicyConfig, Purge, RegistryConfig};
pub use error::{Error, Result};
pub use reference::{Identifier, ImageReference, MirrorTarget, Repository};
pub use validation::{Validate, ValidationError, ValidationErrors};
pub use version::Constraint;

/// Tag that is never deleted by any purge policy.
pub const LATEST_TAG: &str = "latest";
