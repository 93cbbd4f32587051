//! Semantic version handling for image tags.
//!
//! Image tags are versions far more loosely than crates are: `3.19`, `v1.2`
//! and `1.36.0` are all common. Tags are therefore parsed leniently:
//! - an optional leading `v` is ignored
//! - missing minor/patch components default to `0` (`3.18` → `3.18.0`)
//!
//! Parsing, ordering and constraint checks are delegated to the `semver` crate.
//! Constraints are written the way image tooling writes them:
//! - comparators (`>= 1.35`, `~1.4`, `^2`, `1.2.x`) joined by commas or spaces
//!   must all hold (`>=1.2, <2` or `>=1.2 <2`)
//! - `||` separates alternatives
//! - a version without operator is an exact match when complete (`3.15.0`)
//!   and matches every release it covers when partial (`3.15` is `3.15.x`)

use std::fmt;

use semver::{Version, VersionReq};

use crate::error::{Error, Result};

/// Parses an image tag as a semantic version.
///
/// Returns `None` for tags that are not versions; such tags can never
/// satisfy a version constraint.
///
/// # Examples
///
/// ```
/// use oci_mirror_core::version::parse_tag;
///
/// assert_eq!(parse_tag("3.18").unwrap().to_string(), "3.18.0");
/// assert_eq!(parse_tag("v1.2.3-rc.1").unwrap().to_string(), "1.2.3-rc.1");
/// assert!(parse_tag("latest").is_none());
/// ```
#[must_use]
pub fn parse_tag(tag: &str) -> Option<Version> {
    let trimmed = tag.strip_prefix('v').unwrap_or(tag);

    let split = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split);

    let padded = match core.split('.').count() {
        1 => format!("{core}.0.0{suffix}"),
        2 => format!("{core}.0{suffix}"),
        _ => trimmed.to_string(),
    };

    Version::parse(&padded).ok()
}

/// A parsed semantic version range constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl Constraint {
    /// Parses a constraint string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConstraint`] if any alternative fails to parse.
    ///
    /// # Examples
    ///
    /// ```
    /// use oci_mirror_core::version::Constraint;
    ///
    /// let constraint = Constraint::parse(">= 1.35").unwrap();
    /// assert!(constraint.matches_tag("1.36.0"));
    /// assert!(!constraint.matches_tag("1.34.9"));
    /// assert!(!constraint.matches_tag("foo"));
    ///
    /// let exact = Constraint::parse("3.15.0").unwrap();
    /// assert!(exact.matches_tag("3.15.0"));
    /// assert!(!exact.matches_tag("3.16.0"));
    ///
    /// assert!(Constraint::parse("abc").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let alternatives = input
            .split("||")
            .map(|alternative| {
                VersionReq::parse(&comparators(alternative)).map_err(|source| Error::InvalidConstraint {
                    constraint: input.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: input.to_string(),
            alternatives,
        })
    }

    /// Returns true if `version` satisfies any alternative.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Returns true if `tag` parses as a version that satisfies this constraint.
    #[must_use]
    pub fn matches_tag(&self, tag: &str) -> bool {
        parse_tag(tag).is_some_and(|version| self.matches(&version))
    }

    /// The constraint as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Rewrites one alternative into `semver` comparator syntax.
///
/// Operators may be detached from their version (`>= 1.35`), a leading `v`
/// is dropped, and an operator-less version becomes `=` so it is not read
/// as a caret requirement.
fn comparators(alternative: &str) -> String {
    let mut comparators = Vec::new();
    let mut operator = String::new();

    for token in alternative
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
    {
        let split = token.find(|c: char| !is_operator(c)).unwrap_or(token.len());
        let (op, version) = token.split_at(split);
        operator.push_str(op);
        if version.is_empty() {
            continue;
        }

        let version = version.strip_prefix(['v', 'V']).unwrap_or(version);
        if operator.is_empty() && !is_wildcard(version) {
            operator.push('=');
        }
        comparators.push(format!("{operator}{version}"));
        operator.clear();
    }
    if !operator.is_empty() {
        comparators.push(operator);
    }

    comparators.join(", ")
}

const fn is_operator(c: char) -> bool {
    matches!(c, '=' | '<' | '>' | '~' | '^')
}

fn is_wildcard(version: &str) -> bool {
    version.split('.').any(|part| matches!(part, "*" | "x" | "X"))
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
