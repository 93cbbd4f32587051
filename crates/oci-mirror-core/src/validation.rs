//! Policy validation results.
//!
//! A policy is checked as a whole: [`ValidationErrors`] collects every
//! violation together with the path of the offending field, so one run of
//! `oci-mirror validate` shows everything that needs fixing.

use std::fmt;

/// What is wrong with a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    /// The field is empty or absent.
    Missing,
    /// The value does not parse (reference, tag or constraint syntax).
    Malformed,
    /// A number is outside its allowed range.
    OutOfRange,
    /// Two rules name the same repository in the same role.
    Duplicate,
    /// The value contradicts another field or another rule.
    Conflict,
}

impl ValidationErrorKind {
    /// Short lowercase name, as printed by the CLI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Malformed => "malformed",
            Self::OutOfRange => "out of range",
            Self::Duplicate => "duplicate",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One violation found in a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Path of the field, e.g. `images[2].destination`.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
    /// Category of the violation.
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    /// Creates a violation.
    ///
    /// ```
    /// use oci_mirror_core::ValidationError;
    /// use oci_mirror_core::validation::ValidationErrorKind;
    ///
    /// let error = ValidationError::new(
    ///     "images[0].match.semver",
    ///     ValidationErrorKind::Malformed,
    ///     "unexpected character '!'",
    /// );
    /// assert_eq!(error.to_string(), "images[0].match.semver: unexpected character '!'");
    /// ```
    pub fn new(field: impl Into<String>, kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            kind,
        }
    }

    /// The field must be set.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, ValidationErrorKind::Missing, "must not be empty")
    }

    /// The value does not parse.
    pub fn malformed(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, ValidationErrorKind::Malformed, message)
    }

    /// A number is out of range.
    pub fn out_of_range(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, ValidationErrorKind::OutOfRange, message)
    }

    /// The repository is already used by another rule in the same role.
    pub fn duplicate(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, ValidationErrorKind::Duplicate, message)
    }

    /// The value contradicts another field or rule.
    pub fn conflict(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, ValidationErrorKind::Conflict, message)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Every violation found in a policy, in the order they were found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Records a violation.
    pub fn add(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    /// Records a violation unless `condition` is false.
    pub fn add_if(&mut self, condition: bool, error: impl FnOnce() -> ValidationError) {
        if condition {
            self.0.push(error());
        }
    }

    /// True when nothing was recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of violations.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the violations.
    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.0.iter()
    }

    /// True when some violation was recorded for `field`.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|error| error.field == field)
    }

    /// `Ok` when nothing was recorded, otherwise every violation.
    ///
    /// # Errors
    ///
    /// Returns `self` when it is not empty.
    pub fn into_result(self) -> Result<(), Self> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a ValidationError;
    type IntoIter = std::slice::Iter<'a, ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => f.write_str("policy is valid"),
            [only] => write!(f, "invalid policy: {only}"),
            all => {
                write!(f, "invalid policy ({} problems):", all.len())?;
                for error in all {
                    write!(f, "\n  - {error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationErrors {}

/// Types that can check themselves before use.
///
/// ```
/// use oci_mirror_core::validation::{Validate, ValidationError, ValidationErrors};
///
/// struct Mirror {
///     host: String,
/// }
///
/// impl Validate for Mirror {
///     fn validate(&self) -> Result<(), ValidationErrors> {
///         let mut errors = ValidationErrors::new();
///         errors.add_if(self.host.is_empty(), || ValidationError::missing("host"));
///         errors.into_result()
///     }
/// }
///
/// assert!(Mirror { host: "ghcr.io".to_string() }.validate().is_ok());
/// assert!(Mirror { host: String::new() }.validate().is_err());
/// ```
pub trait Validate {
    /// Checks `self`, returning every violation.
    ///
    /// # Errors
    ///
    /// Returns the violations when there is at least one.
    fn validate(&self) -> Result<(), ValidationErrors>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_kind() {
        assert_eq!(ValidationError::missing("f").kind, ValidationErrorKind::Missing);
        assert_eq!(ValidationError::malformed("f", "m").kind, ValidationErrorKind::Malformed);
        assert_eq!(ValidationError::out_of_range("f", "m").kind, ValidationErrorKind::OutOfRange);
        assert_eq!(ValidationError::duplicate("f", "m").kind, ValidationErrorKind::Duplicate);
        assert_eq!(ValidationError::conflict("f", "m").kind, ValidationErrorKind::Conflict);
    }

    #[test]
    fn test_add_if() {
        let mut errors = ValidationErrors::new();
        errors.add_if(false, || ValidationError::missing("images[0].source"));
        assert!(errors.is_empty());

        errors.add_if(true, || ValidationError::missing("images[0].source"));
        assert!(errors.has_field("images[0].source"));
    }

    #[test]
    fn test_into_result_keeps_order() {
        assert!(ValidationErrors::new().into_result().is_ok());

        let mut errors = ValidationErrors::new();
        errors.add(ValidationError::missing("images[1].source"));
        errors.add(ValidationError::out_of_range("images[0].match.last", "last must be at least 1"));

        let errors = errors.into_result().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["images[1].source", "images[0].match.last"]);
    }

    #[test]
    fn test_display_single() {
        let mut errors = ValidationErrors::new();
        errors.add(ValidationError::missing("images[0].destination"));
        assert_eq!(
            errors.to_string(),
            "invalid policy: images[0].destination: must not be empty"
        );
    }

    #[test]
    fn test_display_lists_every_problem() {
        let mut errors = ValidationErrors::new();
        errors.add(ValidationError::missing("images[0].source"));
        errors.add(ValidationError::conflict("images[1].destination", "source and destination must differ"));

        let display = errors.to_string();
        assert!(display.starts_with("invalid policy (2 problems):"));
        assert!(display.contains("\n  - images[0].source: must not be empty"));
        assert!(display.contains("\n  - images[1].destination: source and destination must differ"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ValidationErrorKind::OutOfRange.to_string(), "out of range");
        assert_eq!(ValidationErrorKind::Conflict.to_string(), "conflict");
    }
}
