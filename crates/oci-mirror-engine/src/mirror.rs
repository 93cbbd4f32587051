//! Mirroring of selected tags from source to destination repositories.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};

use oci_mirror_core::{ImageReference, ImageRule, MirrorTarget, PolicyConfig, Validate};
use oci_mirror_registry::{CopyOutcome, CopyRequest, Registry};

use crate::access::RuleAccess;
use crate::config::EngineConfig;
use crate::error::{EngineError, Failures};
use crate::selector::{Selection, TagSelector};
use crate::session::{note_cancellation, rule_scope, Session};

/// Counts of what a mirror run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorSummary {
    /// Rules processed.
    pub rules: usize,
    /// Tags whose content was written to the destination.
    pub copied: usize,
    /// Tags whose destination already held the source content.
    pub unchanged: usize,
    /// Tags skipped because their manifest uses the legacy schema.
    pub skipped_manifests: usize,
    /// Whole repositories copied by `all_tags` rules.
    pub repositories: usize,
}

impl MirrorSummary {
    fn merge(&mut self, other: &Self) {
        self.rules += other.rules;
        self.copied += other.copied;
        self.unchanged += other.unchanged;
        self.skipped_manifests += other.skipped_manifests;
        self.repositories += other.repositories;
    }
}

impl fmt::Display for MirrorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rules, {} copied, {} unchanged, {} skipped, {} whole repositories",
            self.rules, self.copied, self.unchanged, self.skipped_manifests, self.repositories
        )
    }
}

#[derive(Debug, Default)]
struct RuleReport {
    summary: MirrorSummary,
    failures: Failures,
}

enum TagOutcome {
    Copied,
    Unchanged,
    Skipped,
}

/// Copies the images selected by every rule of a policy.
///
/// Rules are isolated from each other: a failing rule or tag is recorded and
/// the run carries on. The run fails if anything was recorded.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use oci_mirror_core::config::load;
/// use oci_mirror_engine::MirrorEngine;
/// use oci_mirror_registry::{ClientConfig, HttpRegistry};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = load("oci-mirror.yaml")?;
/// let registry = Arc::new(HttpRegistry::new(ClientConfig::default())?);
///
/// let summary = MirrorEngine::new(registry).mirror(&policy).await?;
/// println!("{summary}");
/// # Ok(())
/// # }
/// ```
pub struct MirrorEngine {
    registry: Arc<dyn Registry>,
    config: EngineConfig,
    cancel: CancellationToken,
    span: Span,
}

impl MirrorEngine {
    /// Creates an engine that mirrors through `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            config: EngineConfig::default(),
            cancel: CancellationToken::new(),
            span: info_span!("mirror"),
        }
    }

    /// Sets the runtime options.
    #[must_use]
    pub const fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the token that cancels the run.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the span every log event of the run is recorded under.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Mirrors every rule of the policy.
    ///
    /// # Errors
    ///
    /// Returns every recorded failure. An invalid policy fails with a single
    /// [`EngineError::ConfigInvalid`] before any registry is contacted.
    pub async fn mirror(&self, policy: &PolicyConfig) -> Result<MirrorSummary, Failures> {
        async {
            let mut failures = Failures::new();
            if let Err(errors) = policy.validate() {
                failures.record("config", errors);
                return Err(failures);
            }

            info!(rules = policy.images.len(), "Starting mirror");
            let session = Session::new(
                self.registry.as_ref(),
                policy,
                &self.cancel,
                self.config.concurrency,
            );
            let session = &session;

            let reports = session
                .for_each_rule(policy.images.iter().enumerate(), move |_, rule| {
                    self.mirror_rule(session, rule)
                })
                .await;

            let mut summary = MirrorSummary::default();
            for report in reports {
                summary.merge(&report.summary);
                failures.extend(report.failures);
            }
            note_cancellation(&self.cancel, &mut failures);

            if failures.is_empty() {
                info!(%summary, "Mirror finished");
            } else {
                error!(%summary, failures = failures.len(), "Mirror finished with failures");
            }
            failures.into_result(summary)
        }
        .instrument(self.span.clone())
        .await
    }

    #[instrument(skip_all, fields(source = %rule.source, destination = %rule.destination))]
    async fn mirror_rule(&self, session: &Session<'_>, rule: &ImageRule) -> RuleReport {
        let mut report = RuleReport::default();
        report.summary.rules = 1;

        let target = match rule.target() {
            Ok(target) => target,
            Err(err) => {
                error!(error = %err, "Skipping rule with invalid reference");
                report.failures.record(rule_scope(rule), err);
                return report;
            }
        };
        let access = session.access.rule_access(&target);

        if rule.matcher.all_tags {
            self.mirror_repository(session, rule, &target, &access, &mut report)
                .await;
        } else {
            self.mirror_tags(session, rule, &target, &access, &mut report)
                .await;
        }
        report
    }

    async fn mirror_repository(
        &self,
        session: &Session<'_>,
        rule: &ImageRule,
        target: &MirrorTarget,
        access: &RuleAccess,
        report: &mut RuleReport,
    ) {
        info!("Copying all tags");
        let copy = session
            .call(session.registry.copy_repository(
                &target.source,
                &access.source,
                &target.destination,
                &access.destination,
            ))
            .await;

        match copy {
            Ok(copy) => {
                info!(copied = copy.copied, unchanged = copy.unchanged, "Repository copied");
                report.summary.repositories += 1;
                report.summary.copied += copy.copied;
                report.summary.unchanged += copy.unchanged;
            }
            Err(err) => {
                error!(error = %err, "Repository copy failed");
                report.failures.record(rule_scope(rule), err);
            }
        }
    }

    async fn mirror_tags(
        &self,
        session: &Session<'_>,
        rule: &ImageRule,
        target: &MirrorTarget,
        access: &RuleAccess,
        report: &mut RuleReport,
    ) {
        let live = match session
            .call(session.registry.list_tags(&target.source, &access.source))
            .await
        {
            Ok(tags) => tags,
            Err(err) => {
                error!(error = %err, "Cannot list source tags");
                report.failures.record(rule_scope(rule), err);
                return;
            }
        };

        let selector = match TagSelector::new(&rule.matcher) {
            Ok(selector) => selector,
            Err(err) => {
                error!(error = %err, "Cannot compile match criteria");
                report.failures.record(rule_scope(rule), err);
                return;
            }
        };

        let Selection::Tags(mapping) = selector.select(target, &live) else {
            return;
        };
        info!(selected = mapping.len(), available = live.len(), "Selected tags");

        for (source, destination) in mapping.iter() {
            match self.mirror_tag(session, source, destination, access).await {
                Ok(TagOutcome::Copied) => report.summary.copied += 1,
                Ok(TagOutcome::Unchanged) => report.summary.unchanged += 1,
                Ok(TagOutcome::Skipped) => report.summary.skipped_manifests += 1,
                Err(err) => {
                    let cancelled = err.is_cancelled();
                    error!(image = %source, error = %err, "Failed to mirror tag");
                    report.failures.record(source.to_string(), err);
                    if cancelled {
                        break;
                    }
                }
            }
        }
    }

    async fn mirror_tag(
        &self,
        session: &Session<'_>,
        source: &ImageReference,
        destination: &ImageReference,
        access: &RuleAccess,
    ) -> Result<TagOutcome, EngineError> {
        let manifest = session
            .call(session.registry.manifest(source, &access.source))
            .await?;
        let schema_version = manifest
            .schema_version()
            .map_err(|err| EngineError::ManifestDecode {
                reference: source.to_string(),
                source: err,
            })?;
        if schema_version < 2 {
            warn!(image = %source, schema_version, "Skipping image with unsupported legacy manifest");
            return Ok(TagOutcome::Skipped);
        }

        let request = CopyRequest::new(source.clone(), destination.clone())
            .with_source_access(access.source.clone())
            .with_destination_access(access.destination.clone())
            .with_allow_overwrite(true);

        match session.call(session.registry.copy(&request)).await? {
            CopyOutcome::Copied { digest } => {
                info!(image = %source, destination = %destination, %digest, "Copied image");
                Ok(TagOutcome::Copied)
            }
            CopyOutcome::Unchanged { digest } => {
                debug!(image = %source, %digest, "Destination already up to date");
                Ok(TagOutcome::Unchanged)
            }
        }
    }
}

impl fmt::Debug for MirrorEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorEngine")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_merge() {
        let mut total = MirrorSummary::default();
        total.merge(&MirrorSummary {
            rules: 1,
            copied: 2,
            unchanged: 1,
            skipped_manifests: 0,
            repositories: 0,
        });
        total.merge(&MirrorSummary {
            rules: 1,
            copied: 0,
            unchanged: 0,
            skipped_manifests: 1,
            repositories: 1,
        });

        assert_eq!(
            total,
            MirrorSummary {
                rules: 2,
                copied: 2,
                unchanged: 1,
                skipped_manifests: 1,
                repositories: 1,
            }
        );
    }

    #[test]
    fn test_summary_display() {
        let summary = MirrorSummary {
            rules: 3,
            copied: 4,
            ..MirrorSummary::default()
        };
        assert_eq!(
            summary.to_string(),
            "3 rules, 4 copied, 0 unchanged, 0 skipped, 0 whole repositories"
        );
    }
}
