//! Deletion of destination tags.
//!
//! Two sweeps are offered:
//! - [`PurgeEngine::purge`] applies each rule's `purge` section to the rule's
//!   destination repository
//! - [`PurgeEngine::purge_unknown`] walks the catalog of every destination
//!   host and deletes every tag no rule currently wants
//!
//! Registries delete manifests, not tags, so every candidate is resolved to
//! its digest first. The `latest` tag is never a candidate and content it
//! points at is never deleted.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};

use oci_mirror_core::{
    Constraint, ImageRule, MirrorTarget, PolicyConfig, Purge, Repository, Validate, LATEST_TAG,
};
use oci_mirror_registry::{Access, Registry};

use crate::access::RuleAccess;
use crate::config::EngineConfig;
use crate::error::{EngineError, Failure, Failures};
use crate::selector::TagSelector;
use crate::session::{note_cancellation, rule_scope, Session};

/// Counts of what a purge run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    /// Rules evaluated.
    pub rules: usize,
    /// Manifests deleted, or that would be deleted in a dry run.
    pub deleted: usize,
    /// Candidates kept because `latest` points at the same content.
    pub skipped: usize,
}

impl PurgeSummary {
    fn merge(&mut self, other: &Self) {
        self.rules += other.rules;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
    }
}

impl fmt::Display for PurgeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rules, {} deleted, {} kept for latest",
            self.rules, self.deleted, self.skipped
        )
    }
}

/// Computes the destination tags a rule's `purge` section deletes.
///
/// A tag is a candidate when it is listed in `purge.tags`, when it satisfies
/// `constraint`, or, with `purge.no_match`, when it is missing from
/// `desired`. Passing `None` for `desired` disables the `no_match` criterion.
/// `latest` is never a candidate. The result is sorted and free of
/// duplicates.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
///
/// use oci_mirror_core::Purge;
/// use oci_mirror_engine::purge_candidates;
///
/// let purge = Purge { no_match: true, ..Purge::default() };
/// let live: Vec<String> = ["3.16", "3.17", "latest"].iter().map(|s| s.to_string()).collect();
/// let desired: BTreeSet<String> = ["3.17".to_string()].into();
///
/// assert_eq!(purge_candidates(&live, &purge, None, Some(&desired)), vec!["3.16"]);
/// ```
#[must_use]
pub fn purge_candidates(
    destination_tags: &[String],
    purge: &Purge,
    constraint: Option<&Constraint>,
    desired: Option<&BTreeSet<String>>,
) -> Vec<String> {
    destination_tags
        .iter()
        .filter(|tag| tag.as_str() != LATEST_TAG)
        .filter(|tag| {
            purge.tags.contains(*tag)
                || constraint.is_some_and(|constraint| constraint.matches_tag(tag))
                || (purge.no_match && desired.is_some_and(|desired| !desired.contains(*tag)))
        })
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Default)]
struct Report {
    summary: PurgeSummary,
    failures: Failures,
}

/// What one rule wants to exist at its destination.
struct DesiredState {
    source: Repository,
    destination: Repository,
    tags: BTreeSet<String>,
}

/// Deletes destination tags according to a policy.
pub struct PurgeEngine {
    registry: Arc<dyn Registry>,
    config: EngineConfig,
    cancel: CancellationToken,
    span: Span,
}

impl PurgeEngine {
    /// Creates an engine that deletes through `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            config: EngineConfig::default(),
            cancel: CancellationToken::new(),
            span: info_span!("purge"),
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

    /// Applies the `purge` section of every rule that has one.
    ///
    /// # Errors
    ///
    /// Returns every recorded failure. An invalid policy fails with a single
    /// [`EngineError::ConfigInvalid`] before any registry is contacted.
    pub async fn purge(&self, policy: &PolicyConfig) -> Result<PurgeSummary, Failures> {
        async {
            let mut failures = Failures::new();
            if let Err(errors) = policy.validate() {
                failures.record("config", errors);
                return Err(failures);
            }

            let rules = policy
                .images
                .iter()
                .enumerate()
                .filter(|(_, rule)| rule.has_purge());
            info!(rules = rules.clone().count(), dry_run = self.config.dry_run, "Starting purge");

            let session = Session::new(
                self.registry.as_ref(),
                policy,
                &self.cancel,
                self.config.concurrency,
            );
            let session = &session;
            let reports = session
                .for_each_rule(rules, move |_, rule| self.purge_rule(session, rule))
                .await;

            let mut summary = PurgeSummary::default();
            for report in reports {
                summary.merge(&report.summary);
                failures.extend(report.failures);
            }
            note_cancellation(&self.cancel, &mut failures);
            self.finish(summary, failures)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Deletes every tag on a destination host that no rule wants.
    ///
    /// The desired tags of all rules are computed first. If any of them
    /// cannot be computed nothing is deleted. Repositories configured as some
    /// rule's source are never swept.
    ///
    /// # Errors
    ///
    /// Returns every recorded failure, including
    /// [`EngineError::IncompleteDesiredState`] when deletions were withheld.
    pub async fn purge_unknown(&self, policy: &PolicyConfig) -> Result<PurgeSummary, Failures> {
        async {
            let mut failures = Failures::new();
            if let Err(errors) = policy.validate() {
                failures.record("config", errors);
                return Err(failures);
            }

            info!(rules = policy.images.len(), dry_run = self.config.dry_run, "Starting purge of unknown tags");
            let session = Session::new(
                self.registry.as_ref(),
                policy,
                &self.cancel,
                self.config.concurrency,
            );
            let session = &session;

            let states = session
                .for_each_rule(policy.images.iter().enumerate(), move |_, rule| {
                    self.rule_desired_state(session, rule)
                })
                .await;

            let mut desired: BTreeMap<Repository, BTreeSet<String>> = BTreeMap::new();
            let mut sources = BTreeSet::new();
            let mut incomplete = 0;
            for state in states {
                match state {
                    Ok(state) => {
                        sources.insert(state.source);
                        desired.entry(state.destination).or_default().extend(state.tags);
                    }
                    Err(failure) => {
                        incomplete += 1;
                        failures.push(failure);
                    }
                }
            }

            if session.is_cancelled() {
                note_cancellation(&self.cancel, &mut failures);
                return Err(failures);
            }
            if incomplete > 0 {
                error!(rules = incomplete, "Desired tags incomplete, not deleting anything");
                failures.record("purge-unknown", EngineError::IncompleteDesiredState { rules: incomplete });
                return Err(failures);
            }

            let mut report = Report::default();
            report.summary.rules = policy.images.len();
            for host in oci_mirror_core::config::destination_hosts(policy).into_keys() {
                if session.is_cancelled() {
                    break;
                }
                self.sweep_host(session, &host, &desired, &sources, &mut report)
                    .await;
            }

            failures.extend(report.failures);
            note_cancellation(&self.cancel, &mut failures);
            self.finish(report.summary, failures)
        }
        .instrument(self.span.clone())
        .await
    }

    fn finish(&self, summary: PurgeSummary, failures: Failures) -> Result<PurgeSummary, Failures> {
        if failures.is_empty() {
            info!(%summary, dry_run = self.config.dry_run, "Purge finished");
        } else {
            error!(%summary, failures = failures.len(), "Purge finished with failures");
        }
        failures.into_result(summary)
    }

    #[instrument(skip_all, fields(source = %rule.source, destination = %rule.destination))]
    async fn purge_rule(&self, session: &Session<'_>, rule: &ImageRule) -> Report {
        let mut report = Report::default();
        report.summary.rules = 1;

        let Some(purge) = rule.purge.as_ref() else {
            return report;
        };
        let target = match rule.target() {
            Ok(target) => target,
            Err(err) => {
                error!(error = %err, "Skipping rule with invalid reference");
                report.failures.record(rule_scope(rule), err);
                return report;
            }
        };
        let constraint = match purge.semver.as_deref().map(Constraint::parse).transpose() {
            Ok(constraint) => constraint,
            Err(err) => {
                error!(error = %err, "Cannot compile purge constraint");
                report.failures.record(rule_scope(rule), err);
                return report;
            }
        };
        let access = session.access.rule_access(&target);

        let existing = match session
            .call(session.registry.list_tags(&target.destination, &access.destination))
            .await
        {
            Ok(tags) => tags,
            Err(err) if err.is_not_found() => {
                debug!("Destination repository does not exist, nothing to purge");
                return report;
            }
            Err(err) => {
                error!(error = %err, "Cannot list destination tags");
                report.failures.record(rule_scope(rule), err);
                return report;
            }
        };

        let desired = if purge.no_match && !existing.is_empty() {
            match self.desired_tags(session, rule, &target, &access).await {
                Ok(tags) => Some(tags),
                Err(err) => {
                    warn!(error = %err, "Cannot compute desired tags, skipping drift cleanup");
                    report.failures.record(rule_scope(rule), err);
                    None
                }
            }
        } else {
            None
        };

        let candidates = purge_candidates(&existing, purge, constraint.as_ref(), desired.as_ref());
        info!(candidates = candidates.len(), existing = existing.len(), "Planned deletions");
        self.delete_tags(session, &target.destination, &access.destination, candidates, &mut report)
            .await;
        report
    }

    async fn desired_tags(
        &self,
        session: &Session<'_>,
        rule: &ImageRule,
        target: &MirrorTarget,
        access: &RuleAccess,
    ) -> Result<BTreeSet<String>, EngineError> {
        let selector = TagSelector::new(&rule.matcher)?;
        let live = session
            .call(session.registry.list_tags(&target.source, &access.source))
            .await?;
        Ok(selector.select(target, &live).desired_tags(&live))
    }

    #[instrument(skip_all, fields(source = %rule.source, destination = %rule.destination))]
    async fn rule_desired_state(&self, session: &Session<'_>, rule: &ImageRule) -> Result<DesiredState, Failure> {
        let target = rule
            .target()
            .map_err(|err| Failure::new(rule_scope(rule), err))?;
        let access = session.access.rule_access(&target);

        match self.desired_tags(session, rule, &target, &access).await {
            Ok(tags) => {
                debug!(desired = tags.len(), "Computed desired tags");
                Ok(DesiredState {
                    source: target.source,
                    destination: target.destination,
                    tags,
                })
            }
            Err(err) => {
                error!(error = %err, "Cannot compute desired tags");
                Err(Failure::new(rule_scope(rule), err))
            }
        }
    }

    #[instrument(skip_all, fields(registry = %host))]
    async fn sweep_host(
        &self,
        session: &Session<'_>,
        host: &str,
        desired: &BTreeMap<Repository, BTreeSet<String>>,
        sources: &BTreeSet<Repository>,
        report: &mut Report,
    ) {
        let access = session.access.host_access(host);
        let catalog = match session.call(session.registry.catalog(host, &access)).await {
            Ok(catalog) => catalog,
            Err(err) => {
                error!(error = %err, "Cannot list repository catalog");
                report.failures.record(host, err);
                return;
            }
        };
        info!(repositories = catalog.len(), "Sweeping registry");

        for path in catalog {
            if session.is_cancelled() {
                break;
            }
            let repository = match Repository::from_catalog(host, &path) {
                Ok(repository) => repository,
                Err(err) => {
                    warn!(repository = %path, error = %err, "Skipping unparsable catalog entry");
                    report.failures.record(format!("{host}/{path}"), err);
                    continue;
                }
            };
            if sources.contains(&repository) {
                debug!(repository = %repository, "Repository is a mirror source, not swept");
                continue;
            }

            let tags = match session
                .call(session.registry.list_tags(&repository, &access))
                .await
            {
                Ok(tags) => tags,
                Err(err) if err.is_not_found() => continue,
                Err(err) => {
                    error!(repository = %repository, error = %err, "Cannot list tags");
                    report.failures.record(repository.to_string(), err);
                    continue;
                }
            };

            let wanted = desired.get(&repository);
            let unknown: Vec<String> = tags
                .into_iter()
                .filter(|tag| tag != LATEST_TAG && !wanted.is_some_and(|wanted| wanted.contains(tag)))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if unknown.is_empty() {
                continue;
            }

            info!(repository = %repository, unknown = unknown.len(), "Found tags no rule wants");
            self.delete_tags(session, &repository, &access, unknown, report)
                .await;
        }
    }

    /// Resolves each tag to its digest and deletes it. Content also tagged
    /// `latest` is kept; content shared by several candidates is deleted once.
    async fn delete_tags(
        &self,
        session: &Session<'_>,
        repository: &Repository,
        access: &Access,
        tags: Vec<String>,
        report: &mut Report,
    ) {
        if tags.is_empty() {
            return;
        }

        let latest = match session
            .call(session.registry.digest(&repository.tag(LATEST_TAG), access))
            .await
        {
            Ok(digest) => Some(digest),
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                error!(repository = %repository, error = %err, "Cannot resolve latest, not deleting");
                report.failures.record(repository.to_string(), err);
                return;
            }
        };

        let mut deleted = HashSet::new();
        for tag in tags {
            let image = repository.tag(&tag);
            let digest = match session.call(session.registry.digest(&image, access)).await {
                Ok(digest) => digest,
                Err(err) if err.is_not_found() => {
                    debug!(image = %image, "Tag no longer exists");
                    continue;
                }
                Err(err) => {
                    let cancelled = err.is_cancelled();
                    error!(image = %image, error = %err, "Cannot resolve digest");
                    report.failures.record(image.to_string(), err);
                    if cancelled {
                        break;
                    }
                    continue;
                }
            };

            if latest.as_deref() == Some(digest.as_str()) {
                warn!(image = %image, %digest, "Keeping tag that shares its content with latest");
                report.summary.skipped += 1;
                continue;
            }
            if deleted.contains(&digest) {
                debug!(image = %image, %digest, "Content already deleted");
                continue;
            }

            if self.config.dry_run {
                info!(image = %image, %digest, "Would delete image");
                report.summary.deleted += 1;
                deleted.insert(digest);
                continue;
            }

            match session
                .call(session.registry.delete(repository, &digest, access))
                .await
            {
                Ok(()) => {
                    info!(image = %image, %digest, "Deleted image");
                    report.summary.deleted += 1;
                    deleted.insert(digest);
                }
                Err(err) => {
                    let cancelled = err.is_cancelled();
                    error!(image = %image, %digest, error = %err, "Failed to delete image");
                    report.failures.record(image.to_string(), err);
                    if cancelled {
                        break;
                    }
                }
            }
        }
    }
}

impl fmt::Debug for PurgeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PurgeEngine")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
