//! Repository and image reference parsing.
//!
//! Handles Docker-style references the way registries and `docker pull` read them:
//! - `alpine` → `docker.io/library/alpine`
//! - `index.docker.io/alpine` → `docker.io/library/alpine`
//! - `ghcr.io/org/app` → `ghcr.io/org/app`
//! - `localhost:5000/library/alpine:3.19` → tag `3.19` of `localhost:5000/library/alpine`
//! - `quay.io/org/app@sha256:…` → digest reference
//!
//! Mirror rules name repositories only. A tag or digest on a rule's
//! `source` or `destination` is rejected by [`Repository::parse`].

use std::fmt;

use crate::error::{Error, Result};

/// Registry used when a reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Host names that all refer to Docker Hub.
pub const DOCKER_HUB_ALIASES: [&str; 3] = [DEFAULT_REGISTRY, "index.docker.io", "registry-1.docker.io"];

/// Prefix marking a destination that is reached without TLS verification.
pub const INSECURE_PREFIX: &str = "http://";

const OFFICIAL_REPO_PREFIX: &str = "library";
const MAX_PATH_LENGTH: usize = 255;
const MAX_TAG_LENGTH: usize = 128;

/// Splits the insecure-transport marker off a configured destination.
///
/// Returns the reference without the marker and whether it was present.
///
/// # Examples
///
/// ```
/// use oci_mirror_core::reference::strip_insecure;
///
/// assert_eq!(strip_insecure("http://localhost:5000/alpine"), ("localhost:5000/alpine", true));
/// assert_eq!(strip_insecure("ghcr.io/org/app"), ("ghcr.io/org/app", false));
/// ```
#[must_use]
pub fn strip_insecure(input: &str) -> (&str, bool) {
    input
        .strip_prefix(INSECURE_PREFIX)
        .map_or((input, false), |rest| (rest, true))
}

/// A repository inside a registry, without tag or digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Repository {
    registry: String,
    path: String,
}

impl Repository {
    /// Parses a repository reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] if the reference is malformed or
    /// carries a tag or digest.
    ///
    /// # Examples
    ///
    /// ```
    /// use oci_mirror_core::Repository;
    ///
    /// let repo = Repository::parse("alpine").unwrap();
    /// assert_eq!(repo.to_string(), "docker.io/library/alpine");
    ///
    /// assert!(Repository::parse("alpine:3.19").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let parsed = ImageReference::parse_parts(input)?;
        match parsed.1 {
            None => Ok(parsed.0),
            Some(Identifier::Tag(tag)) => Err(Error::reference(
                input,
                format!("repository must not contain a tag (found ':{tag}')"),
            )),
            Some(Identifier::Digest(digest)) => Err(Error::reference(
                input,
                format!("repository must not contain a digest (found '@{digest}')"),
            )),
        }
    }

    /// Builds a repository from a registry host and a path as listed by the
    /// registry catalog.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] if the path is not a valid
    /// repository path.
    pub fn from_catalog(registry: &str, path: &str) -> Result<Self> {
        let reference = format!("{registry}/{path}");
        validate_registry(&reference, registry)?;
        validate_path(&reference, path)?;
        Ok(Self {
            registry: registry.to_string(),
            path: path.to_string(),
        })
    }

    /// Registry host, including the port if one was given.
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry (e.g. `library/alpine`).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns a reference to `tag` within this repository.
    #[must_use]
    pub fn tag(&self, tag: &str) -> ImageReference {
        ImageReference {
            repository: self.clone(),
            identifier: Identifier::Tag(tag.to_string()),
        }
    }

    /// Returns a reference to `digest` within this repository.
    #[must_use]
    pub fn digest(&self, digest: &str) -> ImageReference {
        ImageReference {
            repository: self.clone(),
            identifier: Identifier::Digest(digest.to_string()),
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.path)
    }
}

/// Tag or digest identifier for an image.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Identifier {
    /// Named tag (e.g., `latest`, `3.19`).
    Tag(String),
    /// Content-addressable digest (e.g., `sha256:abc123…`).
    Digest(String),
}

impl Identifier {
    /// Returns the tag or digest string as used in registry API paths.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tag(value) | Self::Digest(value) => value,
        }
    }
}

/// A fully-qualified pointer to repository content: `registry/repo:tag` or
/// `registry/repo@digest`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageReference {
    repository: Repository,
    identifier: Identifier,
}

impl ImageReference {
    /// Parses an image reference. A reference without tag or digest points
    /// at `latest`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] if the reference is malformed.
    ///
    /// # Examples
    ///
    /// ```
    /// use oci_mirror_core::ImageReference;
    ///
    /// let image = ImageReference::parse("localhost:5000/library/alpine:3.19").unwrap();
    /// assert_eq!(image.repository().registry(), "localhost:5000");
    /// assert_eq!(image.tag(), Some("3.19"));
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let (repository, identifier) = Self::parse_parts(input)?;
        Ok(Self {
            repository,
            identifier: identifier.unwrap_or_else(|| Identifier::Tag("latest".to_string())),
        })
    }

    /// Repository this image lives in.
    #[must_use]
    pub const fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Tag or digest of this image.
    #[must_use]
    pub const fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Tag name, if this reference points at a tag.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match &self.identifier {
            Identifier::Tag(tag) => Some(tag),
            Identifier::Digest(_) => None,
        }
    }

    fn parse_parts(input: &str) -> Result<(Repository, Option<Identifier>)> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::reference(input, "reference is empty"));
        }
        if trimmed.contains("://") {
            return Err(Error::reference(input, "reference must not contain a URL scheme"));
        }

        let (name, digest) = match trimmed.split_once('@') {
            Some((name, digest)) => {
                validate_digest(input, digest)?;
                (name, Some(Identifier::Digest(digest.to_string())))
            }
            None => (trimmed, None),
        };

        let (registry, remainder) = match name.split_once('/') {
            Some((first, rest)) if DOCKER_HUB_ALIASES.contains(&first) => {
                (DEFAULT_REGISTRY.to_string(), rest)
            }
            Some((first, rest)) if is_registry(first) => (first.to_string(), rest),
            _ => (DEFAULT_REGISTRY.to_string(), name),
        };

        let (path, tag) = match remainder.rsplit_once(':') {
            Some((path, tag)) => {
                validate_tag(input, tag)?;
                (path, Some(Identifier::Tag(tag.to_string())))
            }
            None => (remainder, None),
        };

        let path = if registry == DEFAULT_REGISTRY && !path.contains('/') {
            format!("{OFFICIAL_REPO_PREFIX}/{path}")
        } else {
            path.to_string()
        };

        validate_registry(input, &registry)?;
        validate_path(input, &path)?;

        let identifier = match (tag, digest) {
            (Some(_), Some(_)) => {
                return Err(Error::reference(input, "reference has both a tag and a digest"))
            }
            (tag, digest) => tag.or(digest),
        };

        Ok((Repository { registry, path }, identifier))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Identifier::Tag(tag) => write!(f, "{}:{tag}", self.repository),
            Identifier::Digest(digest) => write!(f, "{}@{digest}", self.repository),
        }
    }
}

/// Returns `true` if the first path segment names a registry host.
fn is_registry(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

fn validate_registry(input: &str, registry: &str) -> Result<()> {
    let valid = !registry.is_empty()
        && registry
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'));
    if valid {
        Ok(())
    } else {
        Err(Error::reference(input, format!("invalid registry host '{registry}'")))
    }
}

fn validate_path(input: &str, path: &str) -> Result<()> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(Error::reference(
            input,
            format!("repository path exceeds {MAX_PATH_LENGTH} characters"),
        ));
    }
    for component in path.split('/') {
        if !is_valid_component(component) {
            return Err(Error::reference(
                input,
                format!("invalid repository path component '{component}'"),
            ));
        }
    }
    Ok(())
}

/// Path components are lowercase alphanumerics joined by `.`, `_`, `__` or
/// runs of `-`.
fn is_valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    match (bytes.first(), bytes.last()) {
        (Some(&first), Some(&last)) if is_alnum(first) && is_alnum(last) => {}
        _ => return false,
    }

    let mut i = 0;
    while i < bytes.len() {
        if is_alnum(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !is_alnum(bytes[i]) {
            i += 1;
        }
        let separator = &component[start..i];
        let allowed = matches!(separator, "." | "_" | "__")
            || separator.bytes().all(|b| b == b'-');
        if !allowed {
            return false;
        }
    }
    true
}

fn validate_tag(input: &str, tag: &str) -> Result<()> {
    let mut chars = tag.chars();
    let valid = tag.len() <= MAX_TAG_LENGTH
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(Error::reference(input, format!("invalid tag '{tag}'")))
    }
}

fn validate_digest(input: &str, digest: &str) -> Result<()> {
    let valid = digest.split_once(':').is_some_and(|(algorithm, encoded)| {
        !algorithm.is_empty()
            && algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '_' | '-'))
            && encoded.len() >= 32
            && encoded.chars().all(|c| c.is_ascii_hexdigit())
    });
    if valid {
        Ok(())
    } else {
        Err(Error::reference(input, format!("invalid digest '{digest}'")))
    }
}

/// A rule's resolved source and destination repositories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTarget {
    /// Repository images are read from.
    pub source: Repository,
    /// Repository images are written to.
    pub destination: Repository,
    /// Whether the destination is reached without TLS verification.
    pub insecure: bool,
}
