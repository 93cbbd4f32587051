//! Registry client errors.

use thiserror::Error;

/// Failure of a single registry interaction.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry could not be reached, or the request timed out.
    #[error("Registry unreachable at {url}: {source}")]
    ConnectionFailed {
        /// Request URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// Credentials were missing, rejected, or no token could be obtained.
    #[error("Cannot authenticate to {registry}: {message}")]
    AuthenticationFailed {
        /// Registry host.
        registry: String,
        /// Error message.
        message: String,
    },

    /// Manifest, blob or repository does not exist.
    #[error("{reference} does not exist")]
    NotFound {
        /// What was looked up.
        reference: String,
    },

    /// Destination tag exists and overwriting was not allowed.
    #[error("Tag already exists: {reference}")]
    TagExists {
        /// Destination image reference.
        reference: String,
    },

    /// Pushed or downloaded content does not match its digest.
    #[error("Digest mismatch for {reference}: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Image reference.
        reference: String,
        /// Expected digest.
        expected: String,
        /// Actual digest.
        actual: String,
    },

    /// Manifest type this client cannot copy.
    #[error("Unsupported manifest media type '{media_type}' for {reference}")]
    UnsupportedMediaType {
        /// Image reference.
        reference: String,
        /// Media type reported by the registry.
        media_type: String,
    },

    /// Registry answered with an unexpected status.
    #[error("Registry returned status {status}: {message}")]
    HttpError {
        /// Status code, 0 when the request never got a response.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Response body could not be decoded.
    #[error("Invalid registry response: {message}")]
    InvalidResponse {
        /// Error message.
        message: String,
    },

    /// A JSON body (manifest, tag list, token) does not decode.
    #[error("Malformed registry JSON: {source}")]
    JsonError {
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A URL built from a host, realm or Link header does not parse.
    #[error("Unusable URL {url}")]
    InvalidUrl {
        /// URL string.
        url: String,
    },

    /// Reference returned by the registry does not parse.
    #[error(transparent)]
    Reference(#[from] oci_mirror_core::Error),

    /// Some tags of a repository copy failed.
    #[error("Copy of {repository} failed for {} of {total} tags: {}", .failures.len(), .failures.join("; "))]
    RepositoryCopyFailed {
        /// Source repository.
        repository: String,
        /// Number of tags attempted.
        total: usize,
        /// One entry per failed tag.
        failures: Vec<String>,
    },
}

impl RegistryError {
    /// Returns true if the error means the requested object does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::HttpError { status: 404, .. })
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::ConnectionFailed {
                url: err.url().map(ToString::to_string).unwrap_or_default(),
                source: err,
            }
        } else {
            Self::HttpError {
                status: err.status().map_or(0, |status| status.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(source: serde_json::Error) -> Self {
        Self::JsonError { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = RegistryError::NotFound {
            reference: "localhost:5000/library/alpine:3.19".to_string(),
        };
        assert_eq!(err.to_string(), "localhost:5000/library/alpine:3.19 does not exist");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_error_http_404_is_not_found() {
        let err = RegistryError::HttpError {
            status: 404,
            message: "MANIFEST_UNKNOWN".to_string(),
        };
        assert!(err.is_not_found());

        let err = RegistryError::HttpError {
            status: 500,
            message: "boom".to_string(),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_display_digest_mismatch() {
        let err = RegistryError::DigestMismatch {
            reference: "ghcr.io/org/app:1.0".to_string(),
            expected: "sha256:abc".to_string(),
            actual: "sha256:def".to_string(),
        };
        assert!(err.to_string().contains("Digest mismatch"));
    }

    #[test]
    fn test_error_display_repository_copy() {
        let err = RegistryError::RepositoryCopyFailed {
            repository: "docker.io/library/busybox".to_string(),
            total: 3,
            failures: vec!["1.36: boom".to_string(), "1.35: bang".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Copy of docker.io/library/busybox failed for 2 of 3 tags: 1.36: boom; 1.35: bang"
        );
    }
}
