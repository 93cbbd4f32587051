//! Property-based tests for references, versions and validation.

use proptest::prelude::*;

use crate::config::{ImageRule, Match, PolicyConfig};
use crate::reference::{strip_insecure, ImageReference, Repository};
use crate::validation::Validate;
use crate::version::{parse_tag, Constraint};

/// Strategy for generating registry hosts.
fn registry_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{3,10}\\.(io|com|dev)",
        "localhost:[1-9][0-9]{3}",
        "registry\\.[a-z]{3,8}\\.internal:5000",
    ]
}

/// Strategy for generating repository paths.
fn path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9]{0,8}([-_.][a-z0-9]{1,4})?", 1..4)
        .prop_map(|parts| parts.join("/"))
}

/// Strategy for generating tags.
fn tag_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_][A-Za-z0-9_.-]{0,30}"
}

proptest! {
    #[test]
    fn test_repository_display_reparses(registry in registry_strategy(), path in path_strategy()) {
        prop_assume!(registry != "docker.io");
        let repo = Repository::parse(&format!("{registry}/{path}")).unwrap();
        prop_assert_eq!(repo.registry(), registry.as_str());
        prop_assert_eq!(repo.path(), path.as_str());

        let reparsed = Repository::parse(&repo.to_string()).unwrap();
        prop_assert_eq!(reparsed, repo);
    }

    #[test]
    fn test_tagged_reference_keeps_tag(registry in registry_strategy(), path in path_strategy(), tag in tag_strategy()) {
        prop_assume!(registry != "docker.io");
        let image = ImageReference::parse(&format!("{registry}/{path}:{tag}")).unwrap();
        prop_assert_eq!(image.tag(), Some(tag.as_str()));
        prop_assert_eq!(image.repository().path(), path.as_str());

        let tagged = format!("{}/{}:{}", registry, path, tag);
        let rejected = Repository::parse(&tagged).is_err();
        prop_assert!(rejected, "tagged repository accepted: {}", tagged);
    }

    #[test]
    fn test_strip_insecure_only_removes_marker(registry in registry_strategy(), path in path_strategy()) {
        let plain = format!("{registry}/{path}");
        prop_assert_eq!(strip_insecure(&plain), (plain.as_str(), false));
        let marked = format!("http://{}", plain);
        let (stripped, insecure) = strip_insecure(&marked);
        prop_assert_eq!(stripped, plain.as_str());
        prop_assert!(insecure);
    }

    #[test]
    fn test_parse_tag_accepts_versions(major in 0u64..100, minor in 0u64..100, patch in 0u64..100) {
        let version = parse_tag(&format!("{major}.{minor}.{patch}")).unwrap();
        prop_assert_eq!((version.major, version.minor, version.patch), (major, minor, patch));

        let short = parse_tag(&format!("v{major}.{minor}")).unwrap();
        prop_assert_eq!((short.major, short.minor, short.patch), (major, minor, 0));
    }

    #[test]
    fn test_parse_tag_rejects_words(word in "[a-z]{2,12}") {
        prop_assert!(parse_tag(&word).is_none());
    }

    #[test]
    fn test_lower_bound_constraint(bound in 0u64..50, major in 0u64..100) {
        let constraint = Constraint::parse(&format!(">= {bound}")).unwrap();
        let tag = format!("{major}.0.0");
        prop_assert_eq!(constraint.matches_tag(&tag), major >= bound);
    }

    #[test]
    fn test_duplicate_sources_always_rejected(path in path_strategy(), n in 2usize..5) {
        let images = (0..n)
            .map(|i| ImageRule {
                source: format!("ghcr.io/{path}"),
                destination: format!("localhost:5000/mirror{i}"),
                matcher: Match { all_tags: true, ..Match::default() },
                purge: None,
            })
            .collect();
        let config = PolicyConfig { images, ..PolicyConfig::default() };

        let errors = config.validate().unwrap_err();
        prop_assert_eq!(errors.iter().filter(|e| e.field.ends_with(".source")).count(), n - 1);
    }
}
