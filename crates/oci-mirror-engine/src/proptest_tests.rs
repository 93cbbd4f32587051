//! Property-based tests for tag selection and purge planning.

use std::collections::BTreeSet;

use proptest::prelude::*;

use oci_mirror_core::version::parse_tag;
use oci_mirror_core::{Constraint, Match, MirrorTarget, Purge, Repository, LATEST_TAG};

use crate::purge::purge_candidates;
use crate::selector::{Selection, TagSelector};

fn target() -> MirrorTarget {
    MirrorTarget {
        source: Repository::parse("docker.io/library/busybox").unwrap(),
        destination: Repository::parse("localhost:5000/library/busybox").unwrap(),
        insecure: false,
    }
}

/// Strategy for generating tag names, versions and words mixed.
fn tag_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u64..4, 0u64..20, 0u64..5).prop_map(|(a, b, c)| format!("{a}.{b}.{c}")),
        (0u64..4, 0u64..20).prop_map(|(a, b)| format!("{a}.{b}")),
        (0u64..4, 0u64..20).prop_map(|(a, b)| format!("v{a}.{b}")),
        "[a-z]{3,8}",
        Just(LATEST_TAG.to_string()),
    ]
}

fn tags_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(tag_strategy(), 0..30)
}

fn selected_tags(selector: &TagSelector, live: &[String]) -> BTreeSet<String> {
    selector.select(&target(), live).desired_tags(live)
}

proptest! {
    #[test]
    fn test_selection_is_deterministic(live in tags_strategy(), last in 0usize..6) {
        let matcher = Match {
            semver: Some(">= 1.5".to_string()),
            last: Some(last),
            ..Match::default()
        };
        let selector = TagSelector::new(&matcher).unwrap();

        let first = selector.select(&target(), &live);
        let second = selector.select(&target(), &live);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_selection_only_contains_live_tags(live in tags_strategy(), wanted in tags_strategy()) {
        let matcher = Match {
            tags: wanted,
            semver: Some("< 2".to_string()),
            last: Some(3),
            ..Match::default()
        };
        let selector = TagSelector::new(&matcher).unwrap();

        for tag in selected_tags(&selector, &live) {
            prop_assert!(live.contains(&tag));
        }
    }

    #[test]
    fn test_union_of_criteria(live in tags_strategy(), wanted in tags_strategy(), last in 1usize..5) {
        let by_tags = Match { tags: wanted.clone(), ..Match::default() };
        let by_semver = Match { semver: Some(">= 2".to_string()), ..Match::default() };
        let by_last = Match { last: Some(last), ..Match::default() };
        let combined = Match {
            tags: wanted,
            semver: Some(">= 2".to_string()),
            last: Some(last),
            ..Match::default()
        };

        let mut expected = BTreeSet::new();
        for matcher in [&by_tags, &by_semver, &by_last] {
            expected.extend(selected_tags(&TagSelector::new(matcher).unwrap(), &live));
        }
        let actual = selected_tags(&TagSelector::new(&combined).unwrap(), &live);
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn test_last_window_size(live in tags_strategy(), last in 1usize..10) {
        let matcher = Match { last: Some(last), ..Match::default() };
        let selector = TagSelector::new(&matcher).unwrap();

        let versioned: BTreeSet<&String> = live.iter().filter(|tag| parse_tag(tag).is_some()).collect();
        let selected = selected_tags(&selector, &live);
        prop_assert_eq!(selected.len(), versioned.len().min(last));
    }

    #[test]
    fn test_last_window_holds_highest_versions(live in tags_strategy(), last in 1usize..10) {
        let matcher = Match { last: Some(last), ..Match::default() };
        let selected = selected_tags(&TagSelector::new(&matcher).unwrap(), &live);

        let lowest_selected = selected.iter().filter_map(|tag| parse_tag(tag)).min();
        if let Some(lowest) = lowest_selected {
            let higher_unselected = live
                .iter()
                .filter(|tag| !selected.contains(*tag))
                .filter_map(|tag| parse_tag(tag))
                .any(|version| version > lowest);
            prop_assert!(!higher_unselected);
        }
    }

    #[test]
    fn test_all_tags_selects_whole_repository(live in tags_strategy()) {
        let matcher = Match { all_tags: true, last: Some(1), ..Match::default() };
        let selection = TagSelector::new(&matcher).unwrap().select(&target(), &live);
        prop_assert_eq!(selection, Selection::WholeRepository);
    }

    #[test]
    fn test_purge_never_selects_latest(
        existing in tags_strategy(),
        named in tags_strategy(),
        desired in tags_strategy(),
        no_match in any::<bool>(),
    ) {
        let purge = Purge {
            tags: named,
            semver: Some(">= 0".to_string()),
            no_match,
        };
        let constraint = Constraint::parse(">= 0").unwrap();
        let desired: BTreeSet<String> = desired.into_iter().collect();

        let candidates = purge_candidates(&existing, &purge, Some(&constraint), Some(&desired));
        prop_assert!(!candidates.iter().any(|tag| tag == LATEST_TAG));
    }

    #[test]
    fn test_no_match_spares_desired_tags(existing in tags_strategy(), desired in tags_strategy()) {
        let purge = Purge { no_match: true, ..Purge::default() };
        let desired: BTreeSet<String> = desired.into_iter().collect();

        let candidates = purge_candidates(&existing, &purge, None, Some(&desired));
        for tag in &existing {
            let expected = tag != LATEST_TAG && !desired.contains(tag);
            prop_assert_eq!(candidates.contains(tag), expected);
        }
    }
}
