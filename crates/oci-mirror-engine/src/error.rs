//! Engine errors and failure aggregation.
//!
//! Engines never stop at the first problem. Every failure is recorded in a
//! [`Failures`] accumulator together with the scope it happened in (a rule,
//! a single tag, a registry host) and the whole list is returned at the end.

use std::fmt;

use thiserror::Error;

use oci_mirror_core::{Error as CoreError, ValidationErrors};
use oci_mirror_registry::RegistryError;

/// Errors that can occur while mirroring or purging.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The policy failed validation; nothing was attempted.
    #[error("Invalid configuration:\n{0}")]
    ConfigInvalid(#[from] ValidationErrors),

    /// The policy document could not be read or parsed.
    #[error("Cannot load configuration: {source}")]
    ConfigLoad {
        /// Underlying load error.
        #[source]
        source: CoreError,
    },

    /// A rule's source or destination is not a valid reference.
    #[error("Invalid reference: {source}")]
    ReferenceInvalid {
        /// Underlying parse error.
        #[source]
        source: CoreError,
    },

    /// A version constraint could not be parsed.
    #[error("Invalid version constraint: {source}")]
    InvalidConstraint {
        /// Underlying parse error.
        #[source]
        source: CoreError,
    },

    /// A registry call failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A manifest could not be decoded.
    #[error("Cannot decode manifest {reference}: {source}")]
    ManifestDecode {
        /// Image whose manifest was fetched.
        reference: String,
        /// Decoding error.
        #[source]
        source: RegistryError,
    },

    /// Deletions were withheld because some rule's desired tags are unknown.
    #[error("Desired tags of {rules} rule(s) could not be computed, no deletions performed")]
    IncompleteDesiredState {
        /// Number of rules that failed.
        rules: usize,
    },

    /// The run was cancelled before the operation completed.
    #[error("Operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Wraps a core error in the matching engine category.
    #[must_use]
    pub fn from_core(source: CoreError) -> Self {
        match source {
            CoreError::InvalidReference { .. } => Self::ReferenceInvalid { source },
            CoreError::InvalidConstraint { .. } => Self::InvalidConstraint { source },
            CoreError::ConfigInvalid(errors) => Self::ConfigInvalid(errors),
            CoreError::ConfigLoad { .. } | CoreError::ConfigYaml(_) | CoreError::ConfigJson(_) => {
                Self::ConfigLoad { source }
            }
        }
    }

    /// Returns `true` for [`EngineError::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` when the registry reported the target as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Registry(err) if err.is_not_found())
    }
}

impl From<CoreError> for EngineError {
    fn from(source: CoreError) -> Self {
        Self::from_core(source)
    }
}

/// One recorded failure.
#[derive(Debug)]
pub struct Failure {
    /// What was being processed: a rule, an image or a host.
    pub scope: String,
    /// What went wrong.
    pub error: EngineError,
}

impl Failure {
    /// Creates a failure for a scope.
    pub fn new(scope: impl Into<String>, error: impl Into<EngineError>) -> Self {
        Self {
            scope: scope.into(),
            error: error.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.scope, self.error)
    }
}

/// Append-only list of failures collected during a run.
#[derive(Debug, Default)]
pub struct Failures {
    failures: Vec<Failure>,
}

impl Failures {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure.
    pub fn push(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    /// Records an error for a scope.
    pub fn record(&mut self, scope: impl Into<String>, error: impl Into<EngineError>) {
        self.push(Failure::new(scope, error));
    }

    /// Appends every failure of another accumulator.
    pub fn extend(&mut self, other: Self) {
        self.failures.extend(other.failures);
    }

    /// Returns `true` if nothing failed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of failures.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.failures.len()
    }

    /// Iterates over the failures in the order they were recorded.
    pub fn iter(&self) -> impl Iterator<Item = &Failure> {
        self.failures.iter()
    }

    /// Returns `true` if any failure was a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.failures.iter().any(|failure| failure.error.is_cancelled())
    }

    /// Returns `value` if nothing failed, the accumulator otherwise.
    ///
    /// # Errors
    ///
    /// Returns `self` when at least one failure was recorded.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl IntoIterator for Failures {
    type Item = Failure;
    type IntoIter = std::vec::IntoIter<Failure>;

    fn into_iter(self) -> Self::IntoIter {
        self.failures.into_iter()
    }
}

impl<'a> IntoIterator for &'a Failures {
    type Item = &'a Failure;
    type IntoIter = std::slice::Iter<'a, Failure>;

    fn into_iter(self) -> Self::IntoIter {
        self.failures.iter()
    }
}

impl fmt::Display for Failures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} failure(s):", self.failures.len())?;
        for failure in &self.failures {
            writeln!(f, "  - {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Failures {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_accumulate_in_order() {
        let mut failures = Failures::new();
        assert!(failures.is_empty());

        failures.record("docker.io/library/alpine:3.19", EngineError::Cancelled);
        failures.record(
            "docker.io/library/busybox",
            RegistryError::NotFound {
                reference: "docker.io/library/busybox".to_string(),
            },
        );

        assert_eq!(failures.len(), 2);
        let scopes: Vec<_> = failures.iter().map(|f| f.scope.as_str()).collect();
        assert_eq!(scopes, vec!["docker.io/library/alpine:3.19", "docker.io/library/busybox"]);
        assert!(failures.is_cancelled());
    }

    #[test]
    fn test_failures_display_lists_everything() {
        let mut failures = Failures::new();
        failures.record("a", EngineError::Cancelled);
        failures.record("b", EngineError::IncompleteDesiredState { rules: 2 });

        let text = failures.to_string();
        assert!(text.starts_with("2 failure(s):"));
        assert!(text.contains("a: Operation cancelled"));
        assert!(text.contains("b: Desired tags of 2 rule(s)"));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(Failures::new().into_result(7).unwrap(), 7);

        let mut failures = Failures::new();
        failures.record("x", EngineError::Cancelled);
        assert!(failures.into_result(()).is_err());
    }

    #[test]
    fn test_extend_keeps_both() {
        let mut left = Failures::new();
        left.record("a", EngineError::Cancelled);
        let mut right = Failures::new();
        right.record("b", EngineError::Cancelled);

        left.extend(right);
        assert_eq!(left.len(), 2);
    }

    #[test]
    fn test_from_core_error() {
        let err = oci_mirror_core::Constraint::parse("not a range").unwrap_err();
        assert!(matches!(
            EngineError::from(err),
            EngineError::InvalidConstraint { .. }
        ));

        let err = oci_mirror_core::Repository::parse("alpine:3.19").unwrap_err();
        assert!(matches!(
            EngineError::from(err),
            EngineError::ReferenceInvalid { .. }
        ));

        let err = oci_mirror_core::PolicyConfig::from_yaml_str("images: [").unwrap_err();
        assert!(matches!(
            EngineError::from(err),
            EngineError::ConfigLoad { .. }
        ));

        let err = oci_mirror_core::PolicyConfig::from_file("/nonexistent/oci-mirror.yaml").unwrap_err();
        assert!(matches!(
            EngineError::from(err),
            EngineError::ConfigLoad { .. }
        ));
    }

    #[test]
    fn test_is_not_found() {
        let err = EngineError::from(RegistryError::HttpError {
            status: 404,
            message: String::new(),
        });
        assert!(err.is_not_found());
        assert!(!EngineError::Cancelled.is_not_found());
    }
}
