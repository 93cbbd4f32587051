//! Error types for oci-mirror core operations.
//!
//! This module defines the error types used throughout the `oci-mirror-core` crate.

use std::path::PathBuf;

use thiserror::Error;

use crate::validation::ValidationErrors;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in oci-mirror core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Mirror configuration file could not be read.
    #[error("Failed to read mirror config from {path}: {source}")]
    ConfigLoad {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// YAML mirror configuration could not be parsed.
    #[error("Failed to parse mirror config: {0}")]
    ConfigYaml(#[from] serde_yaml::Error),

    /// JSON mirror configuration could not be parsed.
    #[error("Failed to parse mirror config: {0}")]
    ConfigJson(#[from] serde_json::Error),

    /// Mirror configuration failed validation.
    #[error("Mirror config invalid: {0}")]
    ConfigInvalid(#[from] ValidationErrors),

    /// A repository or image reference is malformed.
    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference {
        /// The reference as written.
        reference: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A semantic version constraint could not be parsed.
    #[error("Invalid semver constraint '{constraint}': {source}")]
    InvalidConstraint {
        /// The constraint as written.
        constraint: String,
        /// Underlying parse error.
        #[source]
        source: semver::Error,
    },
}

impl Error {
    pub(crate) fn reference(reference: &str, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_reference() {
        let err = Error::reference("Foo/Bar", "repository path must be lowercase");
        assert_eq!(
            err.to_string(),
            "Invalid reference 'Foo/Bar': repository path must be lowercase"
        );
    }

    #[test]
    fn test_error_display_config_load() {
        let err = Error::ConfigLoad {
            path: PathBuf::from("oci-mirror.yaml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to read mirror config from oci-mirror.yaml: missing"
        );
    }

    #[test]
    fn test_error_display_invalid_constraint() {
        let source = semver::VersionReq::parse("not a range").unwrap_err();
        let err = Error::InvalidConstraint {
            constraint: "not a range".to_string(),
            source,
        };
        assert!(err
            .to_string()
            .starts_with("Invalid semver constraint 'not a range':"));
    }
}
