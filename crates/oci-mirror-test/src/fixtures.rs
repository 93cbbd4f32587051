//! Builders for mirror rules and policies.

use oci_mirror_core::{Credentials, ImageRule, Match, PolicyConfig, Purge, RegistryConfig};

/// Fluent builder for an [`ImageRule`].
///
/// # Examples
///
/// ```rust
/// use oci_mirror_test::RuleBuilder;
///
/// let rule = RuleBuilder::new("alpine", "localhost:5000/library/alpine")
///     .semver(">= 3.17")
///     .purge_no_match()
///     .build();
///
/// assert_eq!(rule.matcher.semver.as_deref(), Some(">= 3.17"));
/// assert!(rule.purge.unwrap().no_match);
/// ```
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    rule: ImageRule,
}

impl RuleBuilder {
    /// Starts a rule with no criteria.
    #[must_use]
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            rule: ImageRule {
                source: source.into(),
                destination: destination.into(),
                matcher: Match::default(),
                purge: None,
            },
        }
    }

    /// Mirrors every tag.
    #[must_use]
    pub fn all_tags(mut self) -> Self {
        self.rule.matcher.all_tags = true;
        self
    }

    /// Mirrors exact tags.
    #[must_use]
    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.rule.matcher.tags = tags.iter().map(ToString::to_string).collect();
        self
    }

    /// Mirrors tags matching a version constraint.
    #[must_use]
    pub fn semver(mut self, constraint: impl Into<String>) -> Self {
        self.rule.matcher.semver = Some(constraint.into());
        self
    }

    /// Mirrors the `n` highest versions.
    #[must_use]
    pub fn last(mut self, n: usize) -> Self {
        self.rule.matcher.last = Some(n);
        self
    }

    /// Deletes exact destination tags.
    #[must_use]
    pub fn purge_tags(mut self, tags: &[&str]) -> Self {
        self.purge().tags = tags.iter().map(ToString::to_string).collect();
        self
    }

    /// Deletes destination tags matching a version constraint.
    #[must_use]
    pub fn purge_semver(mut self, constraint: impl Into<String>) -> Self {
        self.purge().semver = Some(constraint.into());
        self
    }

    /// Deletes destination tags the rule no longer selects.
    #[must_use]
    pub fn purge_no_match(mut self) -> Self {
        self.purge().no_match = true;
        self
    }

    /// Returns the rule.
    #[must_use]
    pub fn build(self) -> ImageRule {
        self.rule
    }

    fn purge(&mut self) -> &mut Purge {
        self.rule.purge.get_or_insert_with(Purge::default)
    }
}

/// Fluent builder for a [`PolicyConfig`].
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    config: PolicyConfig,
}

impl PolicyBuilder {
    /// Starts an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule.
    #[must_use]
    pub fn rule(mut self, rule: impl Into<ImageRule>) -> Self {
        self.config.images.push(rule.into());
        self
    }

    /// Adds credentials for a registry host.
    #[must_use]
    pub fn credentials(mut self, host: &str, username: &str, password: &str) -> Self {
        self.config.registries.insert(
            host.to_string(),
            RegistryConfig {
                auth: Credentials::new(username, password),
            },
        );
        self
    }

    /// Returns the policy.
    #[must_use]
    pub fn build(self) -> PolicyConfig {
        self.config
    }
}

impl From<RuleBuilder> for ImageRule {
    fn from(builder: RuleBuilder) -> Self {
        builder.build()
    }
}
