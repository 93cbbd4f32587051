//! # oci-mirror test support
//!
//! Test doubles and fixtures for the oci-mirror engines:
//!
//! - [`MemoryRegistry`] - an in-memory [`Registry`](oci_mirror_registry::Registry)
//!   with call recording and failure injection
//! - [`RuleBuilder`] / [`PolicyBuilder`] - fluent policy construction
//! - assertion helpers for repository contents
//!
//! ## Example
//!
//! ```rust
//! use oci_mirror_test::{assert_tags, MemoryRegistry, PolicyBuilder, RuleBuilder};
//!
//! let registry = MemoryRegistry::new()
//!     .with_tags("docker.io/library/alpine", &["3.18", "3.19", "latest"]);
//!
//! let policy = PolicyBuilder::new()
//!     .rule(RuleBuilder::new("alpine", "localhost:5000/library/alpine").last(1))
//!     .build();
//!
//! assert_eq!(policy.images.len(), 1);
//! assert_tags(&registry, "alpine", &["latest", "3.19", "3.18"]);
//! ```

pub mod assertions;
pub mod fixtures;
pub mod memory;

pub use assertions::{assert_empty, assert_same_content, assert_tags};
pub use fixtures::{PolicyBuilder, RuleBuilder};
pub use memory::{Call, MemoryRegistry, Operation};

/// Tags of the upstream alpine repository used across engine tests.
pub const ALPINE_TAGS: [&str; 13] = [
    "foo", "bar", "3.10", "3.11", "3.12", "3.13", "3.14", "3.15", "3.16", "3.17", "3.18", "3.19", "latest",
];

/// Tags of the upstream busybox repository used across engine tests.
pub const BUSYBOX_TAGS: [&str; 7] = ["1.0", "1.1", "1.2", "1.3", "1.4", "1.5", "1.6"];
