//! Mirror policy model.
//!
//! A [`PolicyConfig`] is loaded once at start-up from a YAML or JSON document
//! and stays immutable for the rest of the run:
//!
//! ```yaml
//! images:
//!   - source: alpine
//!     destination: http://localhost:5000/library/alpine
//!     match:
//!       semver: ">= 3.17"
//!       last: 2
//!     purge:
//!       no_match: true
//! registries:
//!   localhost:5000:
//!     auth:
//!       username: mirror
//!       password: secret
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::reference::{strip_insecure, MirrorTarget, Repository, DOCKER_HUB_ALIASES};
use crate::validation::{Validate, ValidationError, ValidationErrors};
use crate::version::Constraint;

/// The declared set of mirror rules and registry credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Mirror rules, in declaration order.
    #[serde(default)]
    pub images: Vec<ImageRule>,

    /// Credentials keyed by registry host.
    #[serde(default)]
    pub registries: BTreeMap<String, RegistryConfig>,
}

/// Settings for one registry host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Credentials presented to the registry.
    pub auth: Credentials,
}

/// Username and password for a registry.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Password or access token.
    pub password: String,
}

impl Credentials {
    /// Creates credentials from a username and password.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One source repository mirrored into one destination repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageRule {
    /// Repository to read from, without tag.
    pub source: String,

    /// Repository to write to, without tag. An `http://` prefix marks the
    /// destination as insecure.
    pub destination: String,

    /// Which source tags to mirror.
    #[serde(default, rename = "match")]
    pub matcher: Match,

    /// Which destination tags to delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purge: Option<Purge>,
}

/// Tag selection criteria. Active criteria are combined as a union.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Match {
    /// Mirror every source tag.
    #[serde(default)]
    pub all_tags: bool,

    /// Exact tag names to mirror.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Version constraint selecting tags that parse as versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semver: Option<String>,

    /// Mirror the N highest-versioned tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<usize>,
}

impl Match {
    /// Returns true if no selection criterion is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.all_tags && self.tags.is_empty() && self.semver.is_none() && self.last.is_none()
    }
}

/// Destination tag deletion criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Purge {
    /// Exact tag names to delete.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Version constraint selecting tags to delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semver: Option<String>,

    /// Delete every destination tag the rule's match no longer selects.
    #[serde(default)]
    pub no_match: bool,
}

impl PolicyConfig {
    /// Loads a policy from a file. Files ending in `.json` are read as
    /// JSON, anything else as YAML.
    ///
    /// The policy is not validated; call [`Validate::validate`] before use.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Parses a policy from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigYaml`] if the document is malformed or has
    /// unknown fields.
    ///
    /// # Examples
    ///
    /// ```
    /// use oci_mirror_core::PolicyConfig;
    ///
    /// let config = PolicyConfig::from_yaml_str(
    ///     "images:\n  - source: alpine\n    destination: ghcr.io/org/alpine\n    match:\n      tags: [\"3.19\"]\n",
    /// ).unwrap();
    /// assert_eq!(config.images[0].matcher.tags, vec!["3.19"]);
    /// ```
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Parses a policy from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigJson`] if the document is malformed or has
    /// unknown fields.
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Returns the credentials configured for a registry host.
    ///
    /// Docker Hub may be configured under any of its host names.
    #[must_use]
    pub fn credentials_for(&self, registry: &str) -> Option<&Credentials> {
        if let Some(config) = self.registries.get(registry) {
            return Some(&config.auth);
        }
        if DOCKER_HUB_ALIASES.contains(&registry) {
            return DOCKER_HUB_ALIASES
                .iter()
                .find_map(|alias| self.registries.get(*alias))
                .map(|config| &config.auth);
        }
        None
    }
}

impl ImageRule {
    /// Resolves the rule's source and destination repositories.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] if either side does not parse as a
    /// repository without tag.
    pub fn target(&self) -> Result<MirrorTarget> {
        let (destination, insecure) = self.destination_reference();
        Ok(MirrorTarget {
            source: Repository::parse(self.source.trim())?,
            destination: Repository::parse(destination)?,
            insecure,
        })
    }

    /// The destination as written, without surrounding whitespace or the
    /// insecure marker, and whether the marker was present.
    fn destination_reference(&self) -> (&str, bool) {
        strip_insecure(self.destination.trim())
    }

    /// Returns true if the rule has a purge policy.
    #[must_use]
    pub const fn has_purge(&self) -> bool {
        self.purge.is_some()
    }
}

/// Canonical identity of a configured repository, used to detect rules that
/// share a repository under different spellings.
fn identity(value: &str) -> String {
    let (stripped, _) = strip_insecure(value.trim());
    Repository::parse(stripped).map_or_else(|_| stripped.to_string(), |repo| repo.to_string())
}

impl Validate for PolicyConfig {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let sources: Vec<String> = self.images.iter().map(|rule| identity(&rule.source)).collect();
        let destinations: Vec<String> = self
            .images
            .iter()
            .map(|rule| identity(&rule.destination))
            .collect();

        for (index, rule) in self.images.iter().enumerate() {
            let field = |name: &str| format!("images[{index}].{name}");
            let source = &sources[index];
            let destination = &destinations[index];

            let source_empty = rule.source.trim().is_empty();
            let destination_empty = rule.destination_reference().0.is_empty();
            if source_empty {
                errors.add(ValidationError::missing(field("source")));
            }
            if destination_empty {
                errors.add(ValidationError::missing(field("destination")));
            }

            if !source_empty {
                if let Some(first) = sources[..index].iter().position(|other| other == source) {
                    errors.add(ValidationError::duplicate(
                        field("source"),
                        format!("source '{source}' is already used by images[{first}]"),
                    ));
                }
            }
            if !destination_empty {
                if let Some(first) = destinations[..index].iter().position(|other| other == destination) {
                    errors.add(ValidationError::duplicate(
                        field("destination"),
                        format!("destination '{destination}' is already used by images[{first}]"),
                    ));
                }
            }

            if !source_empty {
                if let Some(other) = destinations
                    .iter()
                    .enumerate()
                    .position(|(i, other)| i != index && other == source)
                {
                    errors.add(ValidationError::conflict(
                        field("source"),
                        format!("source '{source}' is the destination of images[{other}]"),
                    ));
                }
            }
            if !destination_empty {
                if let Some(other) = sources
                    .iter()
                    .enumerate()
                    .position(|(i, other)| i != index && other == destination)
                {
                    errors.add(ValidationError::conflict(
                        field("destination"),
                        format!("destination '{destination}' is the source of images[{other}]"),
                    ));
                }
            }

            if !source_empty && source == destination {
                errors.add(ValidationError::conflict(
                    field("destination"),
                    "source and destination must differ",
                ));
            }

            if rule.matcher.is_empty() {
                errors.add(ValidationError::conflict(
                    field("match"),
                    "at least one of all_tags, tags, semver or last must be set",
                ));
            }
            if rule.matcher.last == Some(0) {
                errors.add(ValidationError::out_of_range(field("match.last"), "last must be at least 1"));
            }

            if let Some(constraint) = &rule.matcher.semver {
                if let Err(err) = Constraint::parse(constraint) {
                    errors.add(ValidationError::malformed(field("match.semver"), err.to_string()));
                }
            }
            if let Some(constraint) = rule.purge.as_ref().and_then(|purge| purge.semver.as_ref()) {
                if let Err(err) = Constraint::parse(constraint) {
                    errors.add(ValidationError::malformed(field("purge.semver"), err.to_string()));
                }
            }

            if !source_empty {
                if let Err(err) = Repository::parse(rule.source.trim()) {
                    errors.add(ValidationError::malformed(field("source"), err.to_string()));
                }
            }
            if !destination_empty {
                if let Err(err) = Repository::parse(rule.destination_reference().0) {
                    errors.add(ValidationError::malformed(field("destination"), err.to_string()));
                }
            }

            if rule.matcher.all_tags && rule.purge.as_ref().is_some_and(|purge| purge.no_match) {
                errors.add(ValidationError::conflict(
                    field("purge.no_match"),
                    "no_match cannot be combined with match.all_tags",
                ));
            }
        }

        for (host, registry) in &self.registries {
            if host.trim().is_empty() {
                errors.add(ValidationError::missing("registries.<host>"));
            }
            if registry.auth.username.is_empty() && !registry.auth.password.is_empty() {
                errors.add(ValidationError::missing(format!("registries.{host}.auth.username")));
            }
        }

        errors.into_result()
    }
}

/// Loads and validates a policy in one step.
///
/// # Errors
///
/// Returns a load/parse error, or [`Error::ConfigInvalid`] listing every
/// violation.
pub fn load(path: impl AsRef<Path>) -> Result<PolicyConfig> {
    let config = PolicyConfig::from_file(path)?;
    config.validate()?;
    Ok(config)
}

/// Every registry host used as a destination, with whether any rule reaches
/// it insecurely. Rules whose destination does not parse are ignored.
#[must_use]
pub fn destination_hosts(config: &PolicyConfig) -> BTreeMap<String, bool> {
    let mut hosts = BTreeMap::new();
    for rule in &config.images {
        if let Ok(target) = rule.target() {
            let insecure = hosts.entry(target.destination.registry().to_string()).or_insert(false);
            *insecure |= target.insecure;
        }
    }
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationErrorKind;
    use std::io::Write;

    fn rule(source: &str, destination: &str) -> ImageRule {
        ImageRule {
            source: source.to_string(),
            destination: destination.to_string(),
            matcher: Match {
                tags: vec!["latest".to_string()],
                ..Match::default()
            },
            purge: None,
        }
    }

    fn config(images: Vec<ImageRule>) -> PolicyConfig {
        PolicyConfig {
            images,
            registries: BTreeMap::new(),
        }
    }

    fn errors_of(config: &PolicyConfig) -> ValidationErrors {
        config.validate().unwrap_err()
    }

    const SAMPLE: &str = r#"
images:
  - source: alpine
    destination: http://localhost:5000/library/alpine
    match:
      tags: ["3.18", "latest"]
      semver: ">= 3.17"
      last: 2
    purge:
      tags: [foo]
      no_match: true
  - source: busybox
    destination: localhost:5000/library/busybox
    match:
      all_tags: true
registries:
  localhost:5000:
    auth:
      username: mirror
      password: secret
"#;

    #[test]
    fn test_from_yaml_str() {
        let config = PolicyConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.images.len(), 2);

        let alpine = &config.images[0];
        assert_eq!(alpine.matcher.tags, vec!["3.18", "latest"]);
        assert_eq!(alpine.matcher.semver.as_deref(), Some(">= 3.17"));
        assert_eq!(alpine.matcher.last, Some(2));
        let purge = alpine.purge.as_ref().unwrap();
        assert_eq!(purge.tags, vec!["foo"]);
        assert!(purge.no_match);

        assert!(config.images[1].matcher.all_tags);
        assert!(!config.images[1].has_purge());
        assert_eq!(config.registries["localhost:5000"].auth.username, "mirror");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_rejects_unknown_fields() {
        let yaml = "images:\n  - source: alpine\n    destination: ghcr.io/a\n    match:\n      tagz: [x]\n";
        let err = PolicyConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, Error::ConfigYaml(_)));
    }

    #[test]
    fn test_from_file_yaml_and_json() {
        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        yaml.write_all(SAMPLE.as_bytes()).unwrap();
        let from_yaml = PolicyConfig::from_file(yaml.path()).unwrap();

        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        json.write_all(serde_json::to_string(&from_yaml).unwrap().as_bytes())
            .unwrap();
        let from_json = PolicyConfig::from_file(json.path()).unwrap();

        assert_eq!(from_yaml, from_json);
    }

    #[test]
    fn test_from_file_missing() {
        let err = PolicyConfig::from_file("/nonexistent/oci-mirror.yaml").unwrap_err();
        assert!(matches!(err, Error::ConfigLoad { .. }));
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"images:\n  - source: alpine\n    destination: alpine\n")
            .unwrap();
        let err = load(file.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials::new("mirror", "hunter2");
        let debug = format!("{credentials:?}");
        assert!(debug.contains("mirror"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_credentials_for_docker_hub_aliases() {
        let mut config = config(vec![]);
        config.registries.insert(
            "index.docker.io".to_string(),
            RegistryConfig {
                auth: Credentials::new("hub", "pw"),
            },
        );
        assert_eq!(config.credentials_for("docker.io").unwrap().username, "hub");
        assert_eq!(config.credentials_for("registry-1.docker.io").unwrap().username, "hub");
        assert!(config.credentials_for("ghcr.io").is_none());
    }

    #[test]
    fn test_target_strips_insecure_prefix() {
        let target = rule("alpine", "http://localhost:5000/library/alpine").target().unwrap();
        assert_eq!(target.source.to_string(), "docker.io/library/alpine");
        assert_eq!(target.destination.to_string(), "localhost:5000/library/alpine");
        assert!(target.insecure);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = config(vec![
            rule("alpine", "localhost:5000/library/alpine"),
            rule("busybox", "http://localhost:5000/library/busybox"),
        ]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_fields() {
        let errors = errors_of(&config(vec![rule("", "")]));
        assert!(errors.has_field("images[0].source"));
        assert!(errors.has_field("images[0].destination"));
        assert!(errors.iter().any(|e| e.kind == ValidationErrorKind::Missing));
    }

    #[test]
    fn test_validate_duplicate_source() {
        let errors = errors_of(&config(vec![
            rule("alpine", "localhost:5000/a"),
            rule("docker.io/library/alpine", "localhost:5000/b"),
        ]));
        let duplicate = errors
            .iter()
            .find(|e| e.field == "images[1].source")
            .unwrap();
        assert_eq!(duplicate.kind, ValidationErrorKind::Duplicate);
    }

    #[test]
    fn test_validate_duplicate_source_through_docker_hub_alias() {
        let errors = errors_of(&config(vec![
            rule("alpine", "localhost:5000/a"),
            rule("index.docker.io/library/alpine", "localhost:5000/b"),
            rule("registry-1.docker.io/alpine", "localhost:5000/c"),
        ]));
        let duplicates: Vec<&str> = errors
            .iter()
            .filter(|e| e.kind == ValidationErrorKind::Duplicate)
            .map(|e| e.field.as_str())
            .collect();
        assert_eq!(duplicates, ["images[1].source", "images[2].source"]);
    }

    #[test]
    fn test_validated_rules_always_resolve() {
        let config = config(vec![
            rule(" alpine ", " http://localhost:5000/c "),
            rule("\tbusybox", "localhost:5000/d\n"),
        ]);
        assert!(config.validate().is_ok());

        let target = config.images[0].target().unwrap();
        assert_eq!(target.source.to_string(), "docker.io/library/alpine");
        assert_eq!(target.destination.to_string(), "localhost:5000/c");
        assert!(target.insecure);

        let target = config.images[1].target().unwrap();
        assert_eq!(target.destination.to_string(), "localhost:5000/d");
        assert!(!target.insecure);
    }

    #[test]
    fn test_validate_duplicate_destination() {
        let errors = errors_of(&config(vec![
            rule("alpine", "localhost:5000/a"),
            rule("busybox", "http://localhost:5000/a"),
        ]));
        assert!(errors
            .iter()
            .any(|e| e.field == "images[1].destination" && e.kind == ValidationErrorKind::Duplicate));
    }

    #[test]
    fn test_validate_source_used_as_destination() {
        let errors = errors_of(&config(vec![
            rule("alpine", "localhost:5000/a"),
            rule("localhost:5000/a", "localhost:5000/b"),
        ]));
        assert!(errors.has_field("images[1].source"));
        assert!(errors.has_field("images[0].destination"));
    }

    #[test]
    fn test_validate_source_equals_destination() {
        let errors = errors_of(&config(vec![rule("localhost:5000/a", "http://localhost:5000/a")]));
        assert!(errors
            .iter()
            .any(|e| e.message.contains("must differ")));
    }

    #[test]
    fn test_validate_no_match_criteria() {
        let mut image = rule("alpine", "localhost:5000/a");
        image.matcher = Match::default();
        let errors = errors_of(&config(vec![image]));
        assert!(errors.has_field("images[0].match"));
    }

    #[test]
    fn test_validate_last_zero() {
        let mut image = rule("alpine", "localhost:5000/a");
        image.matcher.last = Some(0);
        let errors = errors_of(&config(vec![image]));
        let error = errors.iter().find(|e| e.field == "images[0].match.last").unwrap();
        assert_eq!(error.kind, ValidationErrorKind::OutOfRange);
    }

    #[test]
    fn test_validate_invalid_constraints() {
        let mut image = rule("alpine", "localhost:5000/a");
        image.matcher.semver = Some("abc".to_string());
        image.purge = Some(Purge {
            semver: Some("not a range".to_string()),
            ..Purge::default()
        });
        let errors = errors_of(&config(vec![image]));
        assert!(errors.has_field("images[0].match.semver"));
        assert!(errors.has_field("images[0].purge.semver"));
    }

    #[test]
    fn test_validate_reference_with_tag() {
        let errors = errors_of(&config(vec![rule("alpine:3.19", "http://localhost:5000/a:3.19")]));
        assert!(errors
            .iter()
            .any(|e| e.field == "images[0].source" && e.kind == ValidationErrorKind::Malformed));
        assert!(errors
            .iter()
            .any(|e| e.field == "images[0].destination" && e.kind == ValidationErrorKind::Malformed));
    }

    #[test]
    fn test_validate_no_match_with_all_tags() {
        let mut image = rule("alpine", "localhost:5000/a");
        image.matcher.all_tags = true;
        image.purge = Some(Purge {
            no_match: true,
            ..Purge::default()
        });
        let errors = errors_of(&config(vec![image]));
        assert!(errors.has_field("images[0].purge.no_match"));
    }

    #[test]
    fn test_validate_aggregates_across_rules() {
        let mut no_criteria = rule("busybox", "localhost:5000/b");
        no_criteria.matcher = Match::default();
        let errors = errors_of(&config(vec![
            rule("", "localhost:5000/a"),
            no_criteria,
            rule("redis:7", "localhost:5000/c"),
        ]));
        assert_eq!(errors.len(), 3);
        assert!(errors.has_field("images[0].source"));
        assert!(errors.has_field("images[1].match"));
        assert!(errors.has_field("images[2].source"));
    }

    #[test]
    fn test_validate_registry_password_without_username() {
        let mut config = config(vec![rule("alpine", "localhost:5000/a")]);
        config.registries.insert(
            "localhost:5000".to_string(),
            RegistryConfig {
                auth: Credentials::new("", "secret"),
            },
        );
        let errors = errors_of(&config);
        assert!(errors.has_field("registries.localhost:5000.auth.username"));
    }

    #[test]
    fn test_destination_hosts() {
        let config = config(vec![
            rule("alpine", "localhost:5000/a"),
            rule("busybox", "http://localhost:5000/b"),
            rule("redis", "ghcr.io/org/redis"),
        ]);
        let hosts = destination_hosts(&config);
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts.get("localhost:5000"), Some(&true));
        assert_eq!(hosts.get("ghcr.io"), Some(&false));
    }
}
