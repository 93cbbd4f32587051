//! OCI Distribution API client.
//!
//! [`HttpRegistry`] implements [`Registry`] for any host reachable over
//! HTTP(S). Transport security and credentials come from the [`Access`]
//! passed with each call, so a single client serves every registry of a run.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{
    HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LINK, LOCATION, WWW_AUTHENTICATE,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{debug, trace};
use url::Url;

use oci_mirror_core::{ImageReference, Repository};

use crate::auth::{basic_header, Authorization, Challenge, TokenCache};
use crate::config::{Access, ClientConfig};
use crate::error::RegistryError;
use crate::oci::{
    compute_digest, next_link, Catalog, Descriptor, ImageIndex, ImageManifest, ManifestKind, MediaType,
    TagList, TokenResponse,
};
use crate::registry::{CopyOutcome, CopyRequest, RawManifest, Registry};

/// Host actually serving Docker Hub's registry API.
const DOCKER_HUB_ENDPOINT: &str = "registry-1.docker.io";

/// Response header carrying a manifest digest.
const DIGEST_HEADER: &str = "docker-content-digest";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Https,
    Http,
}

impl Scheme {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
        }
    }
}

/// Registry client speaking the OCI distribution API.
#[derive(Debug)]
pub struct HttpRegistry {
    config: ClientConfig,
    http: reqwest::Client,
    http_insecure: reqwest::Client,
    schemes: Mutex<HashMap<String, Scheme>>,
    tokens: TokenCache,
}

impl HttpRegistry {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use oci_mirror_registry::{ClientConfig, HttpRegistry};
    ///
    /// let registry = HttpRegistry::new(ClientConfig::new())?;
    /// # Ok::<(), oci_mirror_registry::RegistryError>(())
    /// ```
    pub fn new(config: ClientConfig) -> Result<Self, RegistryError> {
        Ok(Self {
            http: Self::build_http_client(&config, false)?,
            http_insecure: Self::build_http_client(&config, true)?,
            config,
            schemes: Mutex::new(HashMap::new()),
            tokens: TokenCache::new(),
        })
    }

    /// Returns the client configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn build_http_client(config: &ClientConfig, insecure: bool) -> Result<reqwest::Client, RegistryError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(insecure);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        builder.build().map_err(|e| RegistryError::ConnectionFailed {
            url: "client".to_string(),
            source: e,
        })
    }

    const fn client(&self, access: &Access) -> &reqwest::Client {
        if access.insecure {
            &self.http_insecure
        } else {
            &self.http
        }
    }

    /// Schemes to try for a host, in order.
    fn schemes_for(&self, host: &str, access: &Access) -> Vec<Scheme> {
        if let Some(scheme) = self.schemes.lock().get(host) {
            return vec![*scheme];
        }
        if is_loopback(host) {
            vec![Scheme::Http, Scheme::Https]
        } else if access.insecure {
            vec![Scheme::Https, Scheme::Http]
        } else {
            vec![Scheme::Https]
        }
    }

    /// Sends a request to a registry host, choosing the transport and
    /// answering authentication challenges.
    ///
    /// `request` builds the request from a client and a base URL such as
    /// `https://ghcr.io`; it is called again for every retry.
    async fn send<F>(&self, host: &str, access: &Access, scope: &str, request: F) -> Result<Response, RegistryError>
    where
        F: Fn(&reqwest::Client, &str) -> RequestBuilder + Sync,
    {
        let mut last_error = None;

        for scheme in self.schemes_for(host, access) {
            let base = format!("{}://{}", scheme.as_str(), endpoint_host(host));
            match self.send_authorized(host, access, scope, &base, &request).await {
                Ok(response) => {
                    self.schemes.lock().insert(host.to_string(), scheme);
                    return Ok(response);
                }
                Err(err @ RegistryError::ConnectionFailed { .. }) => {
                    debug!(host, scheme = scheme.as_str(), error = %err, "Registry unreachable");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| RegistryError::InvalidUrl {
            url: host.to_string(),
        }))
    }

    async fn send_authorized<F>(
        &self,
        host: &str,
        access: &Access,
        scope: &str,
        base: &str,
        request: &F,
    ) -> Result<Response, RegistryError>
    where
        F: Fn(&reqwest::Client, &str) -> RequestBuilder + Sync,
    {
        let client = self.client(access);
        let response = self
            .authorize(request(client, base), host, access, scope)
            .send()
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(Challenge::parse);

        match challenge {
            Some(Challenge::Basic) => {
                if access.credentials.is_none() {
                    return Err(RegistryError::AuthenticationFailed {
                        registry: host.to_string(),
                        message: "registry requires credentials".to_string(),
                    });
                }
                self.tokens.insert_basic(host);
            }
            Some(Challenge::Bearer {
                realm,
                service,
                scope: requested,
            }) => {
                let token_scope = requested.as_deref().unwrap_or(scope);
                let token = self
                    .fetch_token(client, host, access, &realm, service.as_deref(), token_scope)
                    .await?;
                self.tokens.insert_token(host, scope, token);
            }
            None => {
                return Err(RegistryError::AuthenticationFailed {
                    registry: host.to_string(),
                    message: "unsupported authentication challenge".to_string(),
                })
            }
        }

        let response = self
            .authorize(request(client, base), host, access, scope)
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate(host, scope);
            return Err(RegistryError::AuthenticationFailed {
                registry: host.to_string(),
                message: "credentials rejected".to_string(),
            });
        }
        Ok(response)
    }

    fn authorize(&self, builder: RequestBuilder, host: &str, access: &Access, scope: &str) -> RequestBuilder {
        match (self.tokens.get(host, scope), &access.credentials) {
            (Some(Authorization::Bearer(token)), _) => builder.bearer_auth(token),
            (Some(Authorization::Basic), Some(credentials)) => {
                builder.header(AUTHORIZATION, basic_header(credentials))
            }
            _ => builder,
        }
    }

    async fn fetch_token(
        &self,
        client: &reqwest::Client,
        host: &str,
        access: &Access,
        realm: &str,
        service: Option<&str>,
        scope: &str,
    ) -> Result<String, RegistryError> {
        let mut url = Url::parse(realm).map_err(|_| RegistryError::InvalidUrl {
            url: realm.to_string(),
        })?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = service {
                query.append_pair("service", service);
            }
            query.append_pair("scope", scope);
        }

        let mut request = client.get(url);
        if let Some(credentials) = &access.credentials {
            request = request.header(AUTHORIZATION, basic_header(credentials));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::AuthenticationFailed {
                registry: host.to_string(),
                message: format!("token endpoint returned {}", response.status()),
            });
        }

        let token: TokenResponse = response.json().await?;
        trace!(host, scope, "Obtained registry token");
        token.into_token().ok_or_else(|| RegistryError::AuthenticationFailed {
            registry: host.to_string(),
            message: "token endpoint returned no token".to_string(),
        })
    }

    /// Follows `Link` pagination, collecting one page at a time.
    async fn paginate<T, F>(
        &self,
        host: &str,
        access: &Access,
        scope: &str,
        first: String,
        reference: &str,
        mut collect: F,
    ) -> Result<(), RegistryError>
    where
        T: serde::de::DeserializeOwned,
        F: FnMut(T) + Send,
    {
        let mut path = first;
        loop {
            let response = self
                .send(host, access, scope, |client, base| client.get(format!("{base}{path}")))
                .await?;
            let response = check(response, reference).await?;
            let next = response
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(next_link)
                .map(link_path)
                .transpose()?;

            collect(response.json::<T>().await?);

            match next {
                Some(next) => path = next,
                None => return Ok(()),
            }
        }
    }

    async fn copy_blobs(
        &self,
        manifest: &RawManifest,
        source: &Repository,
        request: &CopyRequest,
    ) -> Result<(), RegistryError> {
        let image: ImageManifest = serde_json::from_slice(&manifest.bytes)?;
        for blob in image.blobs() {
            self.copy_blob(blob, source, request).await?;
        }
        Ok(())
    }

    async fn copy_blob(&self, blob: &Descriptor, source: &Repository, request: &CopyRequest) -> Result<(), RegistryError> {
        let destination = request.destination.repository();
        let host = destination.registry();
        let access = &request.destination_access;
        let scope = push_scope(destination);
        let blob_path = format!("/v2/{}/blobs/{}", destination.path(), blob.digest);

        let existing = self
            .send(host, access, &scope, |client, base| client.head(format!("{base}{blob_path}")))
            .await?;
        if existing.status().is_success() {
            trace!(digest = %blob.digest, "Blob already present");
            return Ok(());
        }

        let upload_path = if source.registry() == destination.registry() {
            format!(
                "/v2/{}/blobs/uploads/?mount={}&from={}",
                destination.path(),
                blob.digest,
                source.path()
            )
        } else {
            format!("/v2/{}/blobs/uploads/", destination.path())
        };
        let session = self
            .send(host, access, &scope, |client, base| client.post(format!("{base}{upload_path}")))
            .await?;
        if session.status() == StatusCode::CREATED {
            debug!(digest = %blob.digest, from = %source, "Mounted blob");
            return Ok(());
        }
        if session.status() != StatusCode::ACCEPTED {
            return Err(http_error(session).await);
        }
        let location = upload_location(&session)?;

        let download = self
            .send(source.registry(), &request.source_access, &pull_scope(source), |client, base| {
                client.get(format!("{base}/v2/{}/blobs/{}", source.path(), blob.digest))
            })
            .await?;
        let download = check(download, &format!("{source}@{}", blob.digest)).await?;
        let length = download.content_length().unwrap_or(blob.size);

        let mut upload_url = location;
        upload_url.query_pairs_mut().append_pair("digest", &blob.digest);
        let upload = self
            .authorize(self.client(access).put(upload_url), host, access, &scope)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(download.bytes_stream()))
            .send()
            .await?;
        if upload.status() != StatusCode::CREATED && !upload.status().is_success() {
            return Err(http_error(upload).await);
        }

        debug!(digest = %blob.digest, size = length, "Uploaded blob");
        Ok(())
    }

    async fn put_manifest(&self, manifest: &RawManifest, image: &ImageReference, access: &Access) -> Result<(), RegistryError> {
        let repository = image.repository();
        let media_type = manifest
            .media_type
            .clone()
            .filter(|value| value != "application/json")
            .or_else(|| {
                serde_json::from_slice::<crate::oci::ManifestProbe>(&manifest.bytes)
                    .ok()
                    .and_then(|probe| probe.media_type)
            })
            .unwrap_or_else(|| MediaType::OCI_MANIFEST.to_string());
        let path = format!(
            "/v2/{}/manifests/{}",
            repository.path(),
            image.identifier().as_str()
        );

        let response = self
            .send(repository.registry(), access, &push_scope(repository), |client, base| {
                client
                    .put(format!("{base}{path}"))
                    .header(CONTENT_TYPE, media_type.as_str())
                    .body(manifest.bytes.clone())
            })
            .await?;
        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        let expected = compute_digest(&manifest.bytes);
        if let Some(actual) = header_value(response.headers(), DIGEST_HEADER) {
            if actual != expected {
                return Err(RegistryError::DigestMismatch {
                    reference: image.to_string(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn list_tags(&self, repository: &Repository, access: &Access) -> Result<Vec<String>, RegistryError> {
        let mut tags = Vec::new();
        self.paginate(
            repository.registry(),
            access,
            &pull_scope(repository),
            format!("/v2/{}/tags/list", repository.path()),
            &repository.to_string(),
            |page: TagList| tags.extend(page.tags.unwrap_or_default()),
        )
        .await?;

        debug!(repository = %repository, count = tags.len(), "Listed tags");
        Ok(tags)
    }

    async fn manifest(&self, image: &ImageReference, access: &Access) -> Result<RawManifest, RegistryError> {
        let repository = image.repository();
        let path = format!(
            "/v2/{}/manifests/{}",
            repository.path(),
            image.identifier().as_str()
        );
        let accept = MediaType::accept_header();

        let response = self
            .send(repository.registry(), access, &pull_scope(repository), |client, base| {
                client.get(format!("{base}{path}")).header(ACCEPT, accept.as_str())
            })
            .await?;
        let response = check(response, &image.to_string()).await?;

        let media_type = header_value(response.headers(), CONTENT_TYPE.as_str());
        let bytes = response.bytes().await?;
        Ok(RawManifest::new(media_type, bytes.to_vec()))
    }

    async fn copy(&self, request: &CopyRequest) -> Result<CopyOutcome, RegistryError> {
        let source = &request.source;
        let destination = &request.destination;

        let manifest = self.manifest(source, &request.source_access).await?;
        let digest = compute_digest(&manifest.bytes);

        match self.digest(destination, &request.destination_access).await {
            Ok(existing) if existing == digest => {
                debug!(destination = %destination, %digest, "Destination up to date");
                return Ok(CopyOutcome::Unchanged { digest });
            }
            Ok(_) if !request.allow_overwrite => {
                return Err(RegistryError::TagExists {
                    reference: destination.to_string(),
                });
            }
            Ok(_) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let unsupported = |manifest: &RawManifest, reference: &ImageReference| RegistryError::UnsupportedMediaType {
            reference: reference.to_string(),
            media_type: manifest.media_type.clone().unwrap_or_default(),
        };

        match manifest.kind() {
            Some(ManifestKind::Image) => self.copy_blobs(&manifest, source.repository(), request).await?,
            Some(ManifestKind::Index) => {
                let index: ImageIndex = serde_json::from_slice(&manifest.bytes)?;
                for child in &index.manifests {
                    let child_source = source.repository().digest(&child.digest);
                    let child_manifest = self.manifest(&child_source, &request.source_access).await?;

                    let actual = compute_digest(&child_manifest.bytes);
                    if actual != child.digest {
                        return Err(RegistryError::DigestMismatch {
                            reference: child_source.to_string(),
                            expected: child.digest.clone(),
                            actual,
                        });
                    }
                    if child_manifest.kind() != Some(ManifestKind::Image) {
                        return Err(unsupported(&child_manifest, &child_source));
                    }

                    self.copy_blobs(&child_manifest, source.repository(), request).await?;
                    self.put_manifest(
                        &child_manifest,
                        &destination.repository().digest(&child.digest),
                        &request.destination_access,
                    )
                    .await?;
                }
            }
            Some(ManifestKind::Legacy) | None => return Err(unsupported(&manifest, source)),
        }

        self.put_manifest(&manifest, destination, &request.destination_access)
            .await?;
        debug!(source = %source, destination = %destination, %digest, "Copied image");
        Ok(CopyOutcome::Copied { digest })
    }

    async fn digest(&self, image: &ImageReference, access: &Access) -> Result<String, RegistryError> {
        let repository = image.repository();
        let path = format!(
            "/v2/{}/manifests/{}",
            repository.path(),
            image.identifier().as_str()
        );
        let accept = MediaType::accept_header();

        let response = self
            .send(repository.registry(), access, &pull_scope(repository), |client, base| {
                client.head(format!("{base}{path}")).header(ACCEPT, accept.as_str())
            })
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound {
                reference: image.to_string(),
            });
        }
        if response.status().is_success() {
            if let Some(digest) = header_value(response.headers(), DIGEST_HEADER) {
                return Ok(digest);
            }
        }

        let manifest = self.manifest(image, access).await?;
        Ok(compute_digest(&manifest.bytes))
    }

    async fn delete(&self, repository: &Repository, digest: &str, access: &Access) -> Result<(), RegistryError> {
        let path = format!("/v2/{}/manifests/{digest}", repository.path());
        let response = self
            .send(repository.registry(), access, &delete_scope(repository), |client, base| {
                client.delete(format!("{base}{path}"))
            })
            .await?;
        check(response, &format!("{repository}@{digest}")).await?;

        debug!(repository = %repository, digest, "Deleted manifest");
        Ok(())
    }

    async fn catalog(&self, registry: &str, access: &Access) -> Result<Vec<String>, RegistryError> {
        let mut repositories = Vec::new();
        self.paginate(
            registry,
            access,
            "registry:catalog:*",
            "/v2/_catalog".to_string(),
            registry,
            |page: Catalog| repositories.extend(page.repositories.unwrap_or_default()),
        )
        .await?;

        debug!(registry, count = repositories.len(), "Listed catalog");
        Ok(repositories)
    }
}

/// Maps Docker Hub aliases to the host serving its API.
fn endpoint_host(registry: &str) -> &str {
    match registry {
        "docker.io" | "index.docker.io" => DOCKER_HUB_ENDPOINT,
        other => other,
    }
}

/// Returns true for hosts on the local machine, which are reached over
/// plain HTTP first.
fn is_loopback(host: &str) -> bool {
    let name = if host.starts_with('[') {
        host.split_once(']').map_or(host, |(name, _)| name.trim_start_matches('['))
    } else {
        host.split(':').next().unwrap_or(host)
    };
    name == "localhost" || name == "::1" || name.starts_with("127.")
}

fn pull_scope(repository: &Repository) -> String {
    format!("repository:{}:pull", repository.path())
}

fn push_scope(repository: &Repository) -> String {
    format!("repository:{}:pull,push", repository.path())
}

fn delete_scope(repository: &Repository) -> String {
    format!("repository:{}:delete", repository.path())
}

/// Normalises a pagination link to a path and query on the same host.
fn link_path(link: &str) -> Result<String, RegistryError> {
    if link.starts_with('/') {
        return Ok(link.to_string());
    }
    let url = Url::parse(link).map_err(|_| RegistryError::InvalidUrl { url: link.to_string() })?;
    Ok(url.query().map_or_else(
        || url.path().to_string(),
        |query| format!("{}?{query}", url.path()),
    ))
}

fn upload_location(response: &Response) -> Result<Url, RegistryError> {
    let location = header_value(response.headers(), LOCATION.as_str()).ok_or_else(|| {
        RegistryError::InvalidResponse {
            message: "upload session without Location header".to_string(),
        }
    })?;
    response
        .url()
        .join(&location)
        .map_err(|_| RegistryError::InvalidUrl { url: location })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

async fn check(response: Response, reference: &str) -> Result<Response, RegistryError> {
    if response.status().is_success() {
        Ok(response)
    } else if response.status() == StatusCode::NOT_FOUND {
        Err(RegistryError::NotFound {
            reference: reference.to_string(),
        })
    } else {
        Err(http_error(response).await)
    }
}

async fn http_error(response: Response) -> RegistryError {
    RegistryError::HttpError {
        status: response.status().as_u16(),
        message: response.text().await.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpRegistry::new(ClientConfig::new());
        assert!(client.is_ok());
    }

    #[test]
    fn test_endpoint_host_docker_hub() {
        assert_eq!(endpoint_host("docker.io"), "registry-1.docker.io");
        assert_eq!(endpoint_host("index.docker.io"), "registry-1.docker.io");
        assert_eq!(endpoint_host("ghcr.io"), "ghcr.io");
    }

    #[test]
    fn test_is_loopback() {
        assert!(is_loopback("localhost:5000"));
        assert!(is_loopback("localhost"));
        assert!(is_loopback("127.0.0.1:5000"));
        assert!(is_loopback("[::1]:5000"));
        assert!(!is_loopback("ghcr.io"));
        assert!(!is_loopback("registry.local:5000"));
    }

    #[test]
    fn test_schemes_for() {
        let client = HttpRegistry::new(ClientConfig::new()).unwrap();
        let secure = Access::anonymous();
        let insecure = Access::anonymous().with_insecure(true);

        assert_eq!(client.schemes_for("ghcr.io", &secure), vec![Scheme::Https]);
        assert_eq!(
            client.schemes_for("registry.lan", &insecure),
            vec![Scheme::Https, Scheme::Http]
        );
        assert_eq!(
            client.schemes_for("localhost:5000", &secure),
            vec![Scheme::Http, Scheme::Https]
        );

        client.schemes.lock().insert("registry.lan".to_string(), Scheme::Http);
        assert_eq!(client.schemes_for("registry.lan", &insecure), vec![Scheme::Http]);
    }

    #[test]
    fn test_scopes() {
        let repository = Repository::parse("ghcr.io/org/app").unwrap();
        assert_eq!(pull_scope(&repository), "repository:org/app:pull");
        assert_eq!(push_scope(&repository), "repository:org/app:pull,push");
        assert_eq!(delete_scope(&repository), "repository:org/app:delete");
    }

    #[test]
    fn test_link_path() {
        assert_eq!(
            link_path("/v2/_catalog?last=b&n=100").unwrap(),
            "/v2/_catalog?last=b&n=100"
        );
        assert_eq!(
            link_path("https://ghcr.io/v2/org/app/tags/list?last=1.0").unwrap(),
            "/v2/org/app/tags/list?last=1.0"
        );
        assert!(link_path("not a url").is_err());
    }

    #[test]
    fn test_header_value() {
        let mut headers = HeaderMap::new();
        headers.insert(DIGEST_HEADER, "sha256:abc".parse().unwrap());
        assert_eq!(header_value(&headers, DIGEST_HEADER).as_deref(), Some("sha256:abc"));
        assert!(header_value(&headers, "X-Missing").is_none());
    }
}
