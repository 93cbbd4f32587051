//! # oci-mirror registry
//!
//! Registry access for the mirror engines.
//!
//! - [`Registry`] - the operations the engines need: list tags, fetch a
//!   manifest, copy, resolve a digest, delete and list a catalog
//! - [`HttpRegistry`] - implementation over the OCI distribution API
//! - [`Access`] - per-call transport security and credentials
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use oci_mirror_core::Repository;
//! use oci_mirror_registry::{Access, ClientConfig, HttpRegistry, Registry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = HttpRegistry::new(ClientConfig::new())?;
//!     let alpine = Repository::parse("alpine")?;
//!
//!     let tags = registry.list_tags(&alpine, &Access::anonymous()).await?;
//!     println!("{} tags", tags.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Authentication
//!
//! Requests are first sent without credentials. A `401` challenge is
//! answered with basic credentials or a bearer token fetched from the
//! challenge's realm; tokens are cached per host and scope for the lifetime
//! of the client.

#![deny(missing_docs)]

pub mod auth;
mod client;
mod config;
mod error;
pub mod oci;
mod registry;

pub use client::HttpRegistry;
pub use config::{Access, ClientConfig};
pub use error::RegistryError;
pub use oci::{ManifestKind, MediaType};
pub use registry::{CopyOutcome, CopyRequest, RawManifest, Registry, RepositoryCopy};
