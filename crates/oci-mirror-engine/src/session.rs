//! State shared by the rules of one engine run.

use std::future::Future;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use oci_mirror_core::{ImageRule, PolicyConfig};
use oci_mirror_registry::{Registry, RegistryError};

use crate::access::AccessResolver;
use crate::error::{EngineError, Failures};

/// One run of an engine over a policy.
pub(crate) struct Session<'a> {
    pub registry: &'a dyn Registry,
    pub config: &'a PolicyConfig,
    pub access: AccessResolver<'a>,
    cancel: &'a CancellationToken,
    concurrency: usize,
}

impl<'a> Session<'a> {
    pub fn new(
        registry: &'a dyn Registry,
        config: &'a PolicyConfig,
        cancel: &'a CancellationToken,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            config,
            access: AccessResolver::new(config),
            cancel,
            concurrency: concurrency.max(1),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs a registry call unless the run is cancelled first.
    pub async fn call<T, F>(&self, call: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, RegistryError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(EngineError::Cancelled),
            result = call => result.map_err(EngineError::from),
        }
    }

    /// Applies `work` to the selected rules, at most `concurrency` at a
    /// time, and returns the reports in rule order.
    ///
    /// Rules that have not started when the run is cancelled are skipped.
    pub async fn for_each_rule<'r, R, F, Fut>(
        &self,
        rules: impl Iterator<Item = (usize, &'r ImageRule)>,
        work: F,
    ) -> Vec<R>
    where
        F: Fn(usize, &'r ImageRule) -> Fut,
        Fut: Future<Output = R>,
    {
        stream::iter(rules)
            .map(|(index, rule)| {
                let fut = (!self.is_cancelled()).then(|| work(index, rule));
                async move {
                    match fut {
                        Some(fut) => Some(fut.await),
                        None => None,
                    }
                }
            })
            .buffered(self.concurrency)
            .filter_map(|report| async move { report })
            .collect()
            .await
    }
}

/// Adds a run-level cancellation failure unless one was already recorded.
pub(crate) fn note_cancellation(cancel: &CancellationToken, failures: &mut Failures) {
    if cancel.is_cancelled() && !failures.is_cancelled() {
        failures.record("run", EngineError::Cancelled);
    }
}

/// Human-readable scope of a rule for failure reports.
pub(crate) fn rule_scope(rule: &ImageRule) -> String {
    format!("{} -> {}", rule.source, rule.destination)
}
