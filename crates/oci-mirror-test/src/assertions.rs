//! Assertion helpers for registry state.

use crate::memory::MemoryRegistry;

/// Asserts that a repository holds exactly `expected` tags, in any order.
///
/// # Panics
///
/// Panics if the tag sets differ.
#[track_caller]
pub fn assert_tags(registry: &MemoryRegistry, repository: &str, expected: &[&str]) {
    let mut expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
    expected.sort();
    let actual = registry.tags(repository);
    assert_eq!(
        actual, expected,
        "unexpected tags in {repository}: got {actual:?}, expected {expected:?}"
    );
}

/// Asserts that a repository holds no tags.
///
/// # Panics
///
/// Panics if any tag remains.
#[track_caller]
pub fn assert_empty(registry: &MemoryRegistry, repository: &str) {
    let actual = registry.tags(repository);
    assert!(actual.is_empty(), "expected {repository} to be empty, found {actual:?}");
}

/// Asserts that two tags point at the same content.
///
/// # Panics
///
/// Panics if either tag is missing or their digests differ.
#[track_caller]
pub fn assert_same_content(registry: &MemoryRegistry, left: &str, right: &str) {
    let left_digest = registry.digest_of(left);
    assert!(left_digest.is_some(), "{left} does not exist");
    assert_eq!(
        left_digest,
        registry.digest_of(right),
        "{left} and {right} differ"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_tags_ignores_order() {
        let registry = MemoryRegistry::new().with_tags("localhost:5000/a", &["2", "1"]);
        assert_tags(&registry, "localhost:5000/a", &["2", "1"]);
    }

    #[test]
    #[should_panic(expected = "unexpected tags")]
    fn test_assert_tags_mismatch() {
        let registry = MemoryRegistry::new().with_tags("localhost:5000/a", &["1"]);
        assert_tags(&registry, "localhost:5000/a", &["1", "2"]);
    }

    #[test]
    fn test_assert_empty_unknown_repository() {
        assert_empty(&MemoryRegistry::new(), "localhost:5000/missing");
    }

    #[test]
    fn test_assert_same_content() {
        let registry = MemoryRegistry::new()
            .with_tags("localhost:5000/a", &["1"])
            .with_alias("localhost:5000/a", "stable", "1");
        assert_same_content(&registry, "localhost:5000/a:1", "localhost:5000/a:stable");
    }
}
