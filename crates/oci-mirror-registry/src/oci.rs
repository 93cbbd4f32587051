//! Wire types of the OCI distribution API.
//!
//! Only the fields needed to walk and copy an image are modelled; manifests
//! are always pushed back as the original bytes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Manifest media types understood by the client.
pub struct MediaType;

impl MediaType {
    /// OCI image manifest.
    pub const OCI_MANIFEST: &'static str = "application/vnd.oci.image.manifest.v1+json";

    /// OCI image index.
    pub const OCI_INDEX: &'static str = "application/vnd.oci.image.index.v1+json";

    /// Docker image manifest, schema 2.
    pub const DOCKER_MANIFEST: &'static str =
        "application/vnd.docker.distribution.manifest.v2+json";

    /// Docker manifest list.
    pub const DOCKER_MANIFEST_LIST: &'static str =
        "application/vnd.docker.distribution.manifest.list.v2+json";

    /// Docker image manifest, schema 1.
    pub const DOCKER_SCHEMA1: &'static str = "application/vnd.docker.distribution.manifest.v1+json";

    /// Signed Docker image manifest, schema 1.
    pub const DOCKER_SCHEMA1_SIGNED: &'static str =
        "application/vnd.docker.distribution.manifest.v1+prettyjws";

    /// Every manifest type, in `Accept` header order.
    pub const ACCEPTED: [&'static str; 6] = [
        Self::OCI_INDEX,
        Self::DOCKER_MANIFEST_LIST,
        Self::OCI_MANIFEST,
        Self::DOCKER_MANIFEST,
        Self::DOCKER_SCHEMA1_SIGNED,
        Self::DOCKER_SCHEMA1,
    ];

    /// Value for the `Accept` header of manifest requests.
    #[must_use]
    pub fn accept_header() -> String {
        Self::ACCEPTED.join(", ")
    }
}

/// How a manifest is structured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// A single image: config plus layers.
    Image,
    /// A multi-platform index pointing at other manifests.
    Index,
    /// Schema 1 manifest.
    Legacy,
}

impl ManifestKind {
    /// Classifies a manifest from its media type, falling back to the
    /// document body when the registry did not report one.
    #[must_use]
    pub fn detect(media_type: Option<&str>, body: &[u8]) -> Option<Self> {
        let media_type = media_type
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .filter(|value| !value.is_empty() && value != "application/json")
            .or_else(|| {
                serde_json::from_slice::<ManifestProbe>(body)
                    .ok()
                    .and_then(|probe| probe.media_type)
            });

        match media_type.as_deref() {
            Some(MediaType::OCI_MANIFEST | MediaType::DOCKER_MANIFEST) => Some(Self::Image),
            Some(MediaType::OCI_INDEX | MediaType::DOCKER_MANIFEST_LIST) => Some(Self::Index),
            Some(MediaType::DOCKER_SCHEMA1 | MediaType::DOCKER_SCHEMA1_SIGNED) => Some(Self::Legacy),
            Some(_) => None,
            None => {
                let probe: ManifestProbe = serde_json::from_slice(body).ok()?;
                if probe.schema_version < 2 {
                    Some(Self::Legacy)
                } else if probe.manifests.is_some() {
                    Some(Self::Index)
                } else {
                    Some(Self::Image)
                }
            }
        }
    }
}

/// The fields every manifest version shares.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestProbe {
    /// Manifest schema version; `1` is the legacy Docker format.
    pub schema_version: u32,

    /// Media type declared in the document, if any.
    #[serde(default)]
    pub media_type: Option<String>,

    #[serde(default)]
    manifests: Option<serde_json::Value>,
}

/// OCI content descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    #[serde(default)]
    pub media_type: Option<String>,

    /// Digest of the targeted content.
    pub digest: String,

    /// Size in bytes of the content.
    pub size: u64,
}

/// Image manifest (OCI or Docker schema 2).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Image configuration blob.
    pub config: Descriptor,

    /// Layer blobs.
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    /// Every blob the manifest references, config first.
    pub fn blobs(&self) -> impl Iterator<Item = &Descriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

/// Image index or Docker manifest list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    /// Child manifests.
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

/// Response from the `/v2/<name>/tags/list` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TagList {
    /// Repository name.
    #[serde(default)]
    pub name: String,

    /// Tags; registries return `null` for an empty repository.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Response from the `/v2/_catalog` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    /// Repository names.
    #[serde(default)]
    pub repositories: Option<Vec<String>>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Bearer token issued by the realm.
    #[serde(default)]
    pub token: Option<String>,

    /// Token per OAuth2.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl TokenResponse {
    /// The issued token, whichever field carried it.
    #[must_use]
    pub fn into_token(self) -> Option<String> {
        self.token.or(self.access_token).filter(|token| !token.is_empty())
    }
}

/// Computes the `sha256:<hex>` digest of content.
#[must_use]
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Extracts the target of a `Link: <url>; rel="next"` pagination header.
#[must_use]
pub fn next_link(header: &str) -> Option<&str> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|param| param.trim().replace(' ', "") == "rel=\"next\"");
        is_next.then(|| target.trim().trim_start_matches('<').trim_end_matches('>'))
    })
}
