//! In-memory registry.
//!
//! [`MemoryRegistry`] implements [`Registry`] over a map of repositories so
//! engines can be exercised without a network. It records every call, can be
//! told to fail specific operations and can slow every call down to test
//! cancellation.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use oci_mirror_core::{Identifier, ImageReference, Repository};
use oci_mirror_registry::oci::compute_digest;
use oci_mirror_registry::{
    Access, CopyOutcome, CopyRequest, ManifestKind, MediaType, RawManifest, Registry, RegistryError,
};

/// Registry operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    /// [`Registry::list_tags`].
    ListTags,
    /// [`Registry::manifest`].
    Manifest,
    /// [`Registry::copy`].
    Copy,
    /// [`Registry::digest`].
    Digest,
    /// [`Registry::delete`].
    Delete,
    /// [`Registry::catalog`].
    Catalog,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Operation invoked.
    pub operation: Operation,
    /// Repository, image or host the call targeted.
    pub target: String,
    /// Access the call was made with.
    pub access: Access,
}

#[derive(Debug, Default)]
struct RepositoryState {
    tags: BTreeMap<String, String>,
    manifests: BTreeMap<String, RawManifest>,
}

#[derive(Debug, Default)]
struct State {
    repositories: BTreeMap<Repository, RepositoryState>,
    failures: HashSet<(Operation, String)>,
    calls: Vec<Call>,
    writes: usize,
}

/// Registry double holding images in memory.
///
/// # Examples
///
/// ```
/// use oci_mirror_test::MemoryRegistry;
///
/// let registry = MemoryRegistry::new()
///     .with_tags("docker.io/library/alpine", &["3.18", "3.19", "latest"]);
///
/// assert_eq!(registry.tags("docker.io/library/alpine"), vec!["3.18", "3.19", "latest"]);
/// ```
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
    delay: Option<Duration>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one image per tag, each with distinct content.
    ///
    /// # Panics
    ///
    /// Panics if `repository` is not a valid repository reference.
    #[must_use]
    pub fn with_tags(self, repository: &str, tags: &[&str]) -> Self {
        for tag in tags {
            self.push_image(&format!("{repository}:{tag}"));
        }
        self
    }

    /// Adds an image whose manifest uses the legacy schema 1 format.
    ///
    /// # Panics
    ///
    /// Panics if `reference` is not a valid image reference.
    #[must_use]
    pub fn with_legacy_image(self, reference: &str) -> Self {
        let body = serde_json::json!({
            "schemaVersion": 1,
            "name": reference,
            "fsLayers": [],
        });
        self.push_manifest(
            reference,
            RawManifest::new(Some(MediaType::DOCKER_SCHEMA1_SIGNED.to_string()), body.to_string()),
        );
        self
    }

    /// Points `tag` at the same content as `existing` in one repository.
    ///
    /// # Panics
    ///
    /// Panics if the repository or `existing` tag is unknown.
    #[must_use]
    pub fn with_alias(self, repository: &str, tag: &str, existing: &str) -> Self {
        let repository = parse_repository(repository);
        {
            let mut state = self.state.lock();
            let repo = state
                .repositories
                .get_mut(&repository)
                .expect("repository exists");
            let digest = repo.tags.get(existing).cloned().expect("tag exists");
            repo.tags.insert(tag.to_string(), digest);
        }
        self
    }

    /// Slows every call down.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Stores a freshly generated image under `reference` and returns its digest.
    ///
    /// # Panics
    ///
    /// Panics if `reference` is not a tagged image reference.
    pub fn push_image(&self, reference: &str) -> String {
        let body = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MediaType::OCI_MANIFEST,
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": compute_digest(reference.as_bytes()),
                "size": reference.len(),
            },
            "layers": [],
        });
        self.push_manifest(
            reference,
            RawManifest::new(Some(MediaType::OCI_MANIFEST.to_string()), body.to_string()),
        )
    }

    /// Stores a manifest under `reference` and returns its digest.
    ///
    /// # Panics
    ///
    /// Panics if `reference` is not a tagged image reference.
    pub fn push_manifest(&self, reference: &str, manifest: RawManifest) -> String {
        let image = ImageReference::parse(reference).expect("valid image reference");
        let tag = image.tag().expect("tagged reference").to_string();
        let digest = compute_digest(&manifest.bytes);

        let mut state = self.state.lock();
        let repo = state
            .repositories
            .entry(image.repository().clone())
            .or_default();
        repo.manifests.insert(digest.clone(), manifest);
        repo.tags.insert(tag, digest.clone());
        digest
    }

    /// Makes every call of `operation` on `target` fail.
    ///
    /// `target` is the repository (`list_tags`, `delete`), the image
    /// (`manifest`, `digest`), the destination image (`copy`) or the host
    /// (`catalog`), in normalised form such as `docker.io/library/alpine:3.19`.
    pub fn fail(&self, operation: Operation, target: &str) {
        self.state
            .lock()
            .failures
            .insert((operation, target.to_string()));
    }

    /// Sorted tags of a repository; empty if it does not exist.
    ///
    /// # Panics
    ///
    /// Panics if `repository` is not a valid repository reference.
    #[must_use]
    pub fn tags(&self, repository: &str) -> Vec<String> {
        let repository = parse_repository(repository);
        self.state
            .lock()
            .repositories
            .get(&repository)
            .map(|repo| repo.tags.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Digest a tag points at.
    ///
    /// # Panics
    ///
    /// Panics if `reference` is not a tagged image reference.
    #[must_use]
    pub fn digest_of(&self, reference: &str) -> Option<String> {
        let image = ImageReference::parse(reference).expect("valid image reference");
        let tag = image.tag().expect("tagged reference");
        self.state
            .lock()
            .repositories
            .get(image.repository())
            .and_then(|repo| repo.tags.get(tag).cloned())
    }

    /// Every recorded call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Number of calls of one operation.
    #[must_use]
    pub fn call_count(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    /// Number of copies that wrote content.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }

    /// Forgets recorded calls and writes.
    pub fn reset_calls(&self) {
        let mut state = self.state.lock();
        state.calls.clear();
        state.writes = 0;
    }

    async fn enter(&self, operation: Operation, target: String, access: &Access) -> Result<(), RegistryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        let failing = state.failures.contains(&(operation, target.clone()));
        state.calls.push(Call {
            operation,
            target: target.clone(),
            access: access.clone(),
        });

        if failing {
            Err(RegistryError::HttpError {
                status: 500,
                message: format!("injected {operation:?} failure for {target}"),
            })
        } else {
            Ok(())
        }
    }
}

fn parse_repository(repository: &str) -> Repository {
    Repository::parse(repository).expect("valid repository reference")
}

fn not_found(reference: impl ToString) -> RegistryError {
    RegistryError::NotFound {
        reference: reference.to_string(),
    }
}

impl State {
    fn resolve(&self, image: &ImageReference) -> Result<(String, RawManifest), RegistryError> {
        let repo = self
            .repositories
            .get(image.repository())
            .ok_or_else(|| not_found(image))?;
        let digest = match image.identifier() {
            Identifier::Tag(tag) => repo.tags.get(tag).cloned().ok_or_else(|| not_found(image))?,
            Identifier::Digest(digest) => digest.clone(),
        };
        let manifest = repo
            .manifests
            .get(&digest)
            .cloned()
            .ok_or_else(|| not_found(image))?;
        Ok((digest, manifest))
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn list_tags(&self, repository: &Repository, access: &Access) -> Result<Vec<String>, RegistryError> {
        self.enter(Operation::ListTags, repository.to_string(), access)
            .await?;
        self.state
            .lock()
            .repositories
            .get(repository)
            .map(|repo| repo.tags.keys().cloned().collect())
            .ok_or_else(|| not_found(repository))
    }

    async fn manifest(&self, image: &ImageReference, access: &Access) -> Result<RawManifest, RegistryError> {
        self.enter(Operation::Manifest, image.to_string(), access).await?;
        self.state.lock().resolve(image).map(|(_, manifest)| manifest)
    }

    async fn copy(&self, request: &CopyRequest) -> Result<CopyOutcome, RegistryError> {
        self.enter(
            Operation::Copy,
            request.destination.to_string(),
            &request.destination_access,
        )
        .await?;

        let mut state = self.state.lock();
        let (digest, manifest) = state.resolve(&request.source)?;
        if manifest.kind() == Some(ManifestKind::Legacy) {
            return Err(RegistryError::UnsupportedMediaType {
                reference: request.source.to_string(),
                media_type: manifest.media_type.unwrap_or_default(),
            });
        }

        let destination = &request.destination;
        let tag = destination
            .tag()
            .ok_or_else(|| not_found(destination))?
            .to_string();
        let existing = state
            .repositories
            .get(destination.repository())
            .and_then(|repo| repo.tags.get(&tag).cloned());

        match existing {
            Some(existing) if existing == digest => return Ok(CopyOutcome::Unchanged { digest }),
            Some(_) if !request.allow_overwrite => {
                return Err(RegistryError::TagExists {
                    reference: destination.to_string(),
                })
            }
            _ => {}
        }

        let repo = state
            .repositories
            .entry(destination.repository().clone())
            .or_default();
        repo.manifests.insert(digest.clone(), manifest);
        repo.tags.insert(tag, digest.clone());
        state.writes += 1;

        Ok(CopyOutcome::Copied { digest })
    }

    async fn digest(&self, image: &ImageReference, access: &Access) -> Result<String, RegistryError> {
        self.enter(Operation::Digest, image.to_string(), access).await?;
        self.state.lock().resolve(image).map(|(digest, _)| digest)
    }

    async fn delete(&self, repository: &Repository, digest: &str, access: &Access) -> Result<(), RegistryError> {
        self.enter(Operation::Delete, repository.to_string(), access)
            .await?;

        let mut state = self.state.lock();
        let repo = state
            .repositories
            .get_mut(repository)
            .ok_or_else(|| not_found(repository))?;
        if repo.manifests.remove(digest).is_none() {
            return Err(not_found(format!("{repository}@{digest}")));
        }
        repo.tags.retain(|_, tagged| tagged != digest);
        Ok(())
    }

    async fn catalog(&self, registry: &str, access: &Access) -> Result<Vec<String>, RegistryError> {
        self.enter(Operation::Catalog, registry.to_string(), access).await?;

        let state = self.state.lock();
        let repositories: BTreeSet<String> = state
            .repositories
            .keys()
            .filter(|repo| repo.registry() == registry)
            .map(|repo| repo.path().to_string())
            .collect();
        Ok(repositories.into_iter().collect())
    }
}
