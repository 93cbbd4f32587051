//! The registry capability the mirror engines are written against.

use async_trait::async_trait;
use tracing::warn;

use oci_mirror_core::{ImageReference, Repository};

use crate::config::Access;
use crate::error::RegistryError;
use crate::oci::{ManifestKind, ManifestProbe};

/// A manifest exactly as served by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifest {
    /// `Content-Type` reported by the registry.
    pub media_type: Option<String>,
    /// Manifest bytes.
    pub bytes: Vec<u8>,
}

impl RawManifest {
    /// Creates a manifest from its media type and bytes.
    pub fn new(media_type: Option<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            media_type,
            bytes: bytes.into(),
        }
    }

    /// Decodes the `schemaVersion` field.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a JSON manifest.
    pub fn schema_version(&self) -> Result<u32, RegistryError> {
        let probe: ManifestProbe = serde_json::from_slice(&self.bytes)?;
        Ok(probe.schema_version)
    }

    /// Classifies the manifest.
    #[must_use]
    pub fn kind(&self) -> Option<ManifestKind> {
        ManifestKind::detect(self.media_type.as_deref(), &self.bytes)
    }
}

/// One image copy between two references.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    /// Image to read.
    pub source: ImageReference,
    /// How to reach the source registry.
    pub source_access: Access,
    /// Image to write.
    pub destination: ImageReference,
    /// How to reach the destination registry.
    pub destination_access: Access,
    /// Replace a destination tag that points at different content.
    pub allow_overwrite: bool,
}

impl CopyRequest {
    /// Creates an anonymous copy request that overwrites the destination tag.
    #[must_use]
    pub fn new(source: ImageReference, destination: ImageReference) -> Self {
        Self {
            source,
            source_access: Access::default(),
            destination,
            destination_access: Access::default(),
            allow_overwrite: true,
        }
    }

    /// Sets how the source registry is reached.
    #[must_use]
    pub fn with_source_access(mut self, access: Access) -> Self {
        self.source_access = access;
        self
    }

    /// Sets how the destination registry is reached.
    #[must_use]
    pub fn with_destination_access(mut self, access: Access) -> Self {
        self.destination_access = access;
        self
    }

    /// Sets whether an existing destination tag may be replaced.
    #[must_use]
    pub const fn with_allow_overwrite(mut self, allow_overwrite: bool) -> Self {
        self.allow_overwrite = allow_overwrite;
        self
    }
}

/// What a copy did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Content was written to the destination.
    Copied {
        /// Manifest digest now at the destination.
        digest: String,
    },
    /// Destination already held the same manifest.
    Unchanged {
        /// Manifest digest at the destination.
        digest: String,
    },
}

impl CopyOutcome {
    /// Manifest digest at the destination.
    #[must_use]
    pub fn digest(&self) -> &str {
        match self {
            Self::Copied { digest } | Self::Unchanged { digest } => digest,
        }
    }
}

/// Per-outcome counts of a repository copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepositoryCopy {
    /// Tags whose content was written.
    pub copied: usize,
    /// Tags that were already up to date.
    pub unchanged: usize,
}

/// Operations on OCI registries.
///
/// Every call names its target registry through its references and receives
/// the [`Access`] to use, so one implementation serves every host.
/// Implementations never retry.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Lists the tags of a repository, in registry order.
    async fn list_tags(&self, repository: &Repository, access: &Access) -> Result<Vec<String>, RegistryError>;

    /// Fetches a manifest.
    async fn manifest(&self, image: &ImageReference, access: &Access) -> Result<RawManifest, RegistryError>;

    /// Copies one image.
    async fn copy(&self, request: &CopyRequest) -> Result<CopyOutcome, RegistryError>;

    /// Resolves an image reference to its manifest digest.
    async fn digest(&self, image: &ImageReference, access: &Access) -> Result<String, RegistryError>;

    /// Deletes a manifest by digest.
    async fn delete(&self, repository: &Repository, digest: &str, access: &Access) -> Result<(), RegistryError>;

    /// Lists the repositories of a registry host.
    async fn catalog(&self, registry: &str, access: &Access) -> Result<Vec<String>, RegistryError>;

    /// Copies every tag of a repository, keeping tag names.
    ///
    /// Tags are copied one by one with overwrite allowed. A failing tag does
    /// not stop the others; all failures are reported together.
    async fn copy_repository(
        &self,
        source: &Repository,
        source_access: &Access,
        destination: &Repository,
        destination_access: &Access,
    ) -> Result<RepositoryCopy, RegistryError> {
        let tags = self.list_tags(source, source_access).await?;
        let mut summary = RepositoryCopy::default();
        let mut failures = Vec::new();

        for tag in &tags {
            let request = CopyRequest::new(source.tag(tag), destination.tag(tag))
                .with_source_access(source_access.clone())
                .with_destination_access(destination_access.clone());

            match self.copy(&request).await {
                Ok(CopyOutcome::Copied { .. }) => summary.copied += 1,
                Ok(CopyOutcome::Unchanged { .. }) => summary.unchanged += 1,
                Err(err) => {
                    warn!(source = %request.source, error = %err, "Failed to copy tag");
                    failures.push(format!("{tag}: {err}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(RegistryError::RepositoryCopyFailed {
                repository: source.to_string(),
                total: tags.len(),
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_manifest_schema_version() {
        let manifest = RawManifest::new(None, br#"{"schemaVersion": 1}"#.to_vec());
        assert_eq!(manifest.schema_version().unwrap(), 1);
        assert_eq!(manifest.kind(), Some(ManifestKind::Legacy));

        let broken = RawManifest::new(None, b"<html>".to_vec());
        assert!(broken.schema_version().is_err());
    }

    #[test]
    fn test_copy_request_defaults() {
        let source = ImageReference::parse("alpine:3.19").unwrap();
        let destination = ImageReference::parse("localhost:5000/library/alpine:3.19").unwrap();
        let request = CopyRequest::new(source, destination.clone())
            .with_destination_access(Access::anonymous().with_insecure(true));

        assert!(request.allow_overwrite);
        assert!(request.destination_access.insecure);
        assert!(!request.source_access.insecure);
        assert_eq!(request.destination, destination);
    }

    #[test]
    fn test_copy_outcome_digest() {
        let outcome = CopyOutcome::Unchanged {
            digest: "sha256:abc".to_string(),
        };
        assert_eq!(outcome.digest(), "sha256:abc");
    }
}
