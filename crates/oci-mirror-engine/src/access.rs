//! Resolution of per-registry access options.
//!
//! A rule's destination is reached insecurely when it carries the `http://`
//! marker. Credentials come from the `registries` section, keyed by host.
//! Missing destination credentials are worth a warning, missing source
//! credentials are normal for public upstreams.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use oci_mirror_core::config::destination_hosts;
use oci_mirror_core::{MirrorTarget, PolicyConfig};
use oci_mirror_registry::Access;

/// Access options for both sides of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleAccess {
    /// How the source registry is reached.
    pub source: Access,
    /// How the destination registry is reached.
    pub destination: Access,
}

/// Looks up transport and credentials for registry hosts.
#[derive(Debug)]
pub struct AccessResolver<'a> {
    config: &'a PolicyConfig,
    insecure_hosts: BTreeMap<String, bool>,
}

impl<'a> AccessResolver<'a> {
    /// Creates a resolver over a policy.
    #[must_use]
    pub fn new(config: &'a PolicyConfig) -> Self {
        Self {
            config,
            insecure_hosts: destination_hosts(config),
        }
    }

    /// Access for the source and destination of a rule.
    ///
    /// A source host is reached insecurely only if some rule marks it as an
    /// insecure destination.
    #[must_use]
    pub fn rule_access(&self, target: &MirrorTarget) -> RuleAccess {
        let source_host = target.source.registry();
        let source = self.lookup(source_host, self.is_insecure(source_host), false);
        let destination = self.lookup(target.destination.registry(), target.insecure, true);
        RuleAccess { source, destination }
    }

    /// Access for a destination host as a whole, e.g. for its catalog.
    #[must_use]
    pub fn host_access(&self, host: &str) -> Access {
        self.lookup(host, self.is_insecure(host), true)
    }

    fn is_insecure(&self, host: &str) -> bool {
        self.insecure_hosts.get(host).copied().unwrap_or(false)
    }

    fn lookup(&self, host: &str, insecure: bool, destination: bool) -> Access {
        let access = Access::anonymous().with_insecure(insecure);
        match self.config.credentials_for(host) {
            Some(credentials) => access.with_credentials(credentials.clone()),
            None => {
                if destination {
                    warn!(registry = %host, "No credentials configured, continuing unauthenticated");
                } else {
                    debug!(registry = %host, "No credentials configured for source registry");
                }
                access
            }
        }
    }
}
