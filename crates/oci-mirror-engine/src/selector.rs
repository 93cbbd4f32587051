//! Selection of the tags a rule mirrors.
//!
//! A rule's `match` section combines three criteria; a tag is selected when
//! any of them selects it:
//! - `tags`: exact tag names
//! - `semver`: tags that parse as versions satisfying a constraint
//! - `last`: the N highest versioned tags
//!
//! `all_tags` bypasses enumeration entirely and selects the whole repository.

use std::collections::{BTreeMap, BTreeSet};

use semver::Version;
use tracing::debug;

use oci_mirror_core::version::parse_tag;
use oci_mirror_core::{Constraint, ImageReference, Match, MirrorTarget};

use crate::error::EngineError;

/// Source image to destination image, ordered by source reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMapping {
    pairs: BTreeMap<ImageReference, ImageReference>,
}

impl TagMapping {
    fn insert(&mut self, target: &MirrorTarget, tag: &str) {
        self.pairs
            .insert(target.source.tag(tag), target.destination.tag(tag));
    }

    /// Number of selected tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns `true` if nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterates over `(source, destination)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ImageReference, &ImageReference)> {
        self.pairs.iter()
    }

    /// Destination images only.
    pub fn destinations(&self) -> impl Iterator<Item = &ImageReference> {
        self.pairs.values()
    }

    /// Tag names of the destination images.
    #[must_use]
    pub fn destination_tags(&self) -> BTreeSet<String> {
        self.pairs
            .values()
            .filter_map(|image| image.tag().map(str::to_string))
            .collect()
    }
}

/// Outcome of tag selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// `all_tags`: the repository is copied as a whole.
    WholeRepository,
    /// Individually selected tags.
    Tags(TagMapping),
}

impl Selection {
    /// Destination tag names this selection wants to exist, given the live
    /// source tags.
    #[must_use]
    pub fn desired_tags(&self, live_tags: &[String]) -> BTreeSet<String> {
        match self {
            Self::WholeRepository => live_tags.iter().cloned().collect(),
            Self::Tags(mapping) => mapping.destination_tags(),
        }
    }
}

/// Compiled `match` criteria of one rule.
#[derive(Debug, Clone)]
pub struct TagSelector {
    all_tags: bool,
    tags: BTreeSet<String>,
    constraint: Option<Constraint>,
    last: Option<usize>,
}

impl TagSelector {
    /// Compiles a rule's match criteria.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConstraint`] if `match.semver` does not
    /// parse.
    pub fn new(matcher: &Match) -> Result<Self, EngineError> {
        let constraint = matcher
            .semver
            .as_deref()
            .map(Constraint::parse)
            .transpose()
            .map_err(EngineError::from_core)?;

        Ok(Self {
            all_tags: matcher.all_tags,
            tags: matcher.tags.iter().cloned().collect(),
            constraint,
            last: matcher.last.filter(|n| *n > 0),
        })
    }

    /// Selects the tags to mirror from the live source tags.
    ///
    /// The result only depends on the inputs and is ordered by source
    /// reference. Each live tag is mapped to the same tag name in the
    /// destination repository.
    #[must_use]
    pub fn select(&self, target: &MirrorTarget, live_tags: &[String]) -> Selection {
        if self.all_tags {
            return Selection::WholeRepository;
        }

        let mut mapping = TagMapping::default();
        let mut versioned: Vec<(Version, &str)> = Vec::new();

        for tag in live_tags {
            if self.tags.contains(tag) {
                mapping.insert(target, tag);
            }

            if self.constraint.is_none() && self.last.is_none() {
                continue;
            }

            let Some(version) = parse_tag(tag) else {
                if self.constraint.is_some() {
                    debug!(tag = %tag, "Tag is not a version, ignored by semver criterion");
                }
                continue;
            };

            if self.constraint.as_ref().is_some_and(|c| c.matches(&version)) {
                mapping.insert(target, tag);
            }
            if self.last.is_some() {
                versioned.push((version, tag));
            }
        }

        if let Some(last) = self.last {
            versioned.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
            versioned.dedup_by(|a, b| a.1 == b.1);
            for (_, tag) in versioned.iter().rev().take(last) {
                mapping.insert(target, tag);
            }
        }

        Selection::Tags(mapping)
    }
}
