//! Property tests for topic pattern matching.

use proptest::prelude::*;
use topicgate_auth::matcher::{first_match, matches, path_to_topic};

fn segment() -> impl Strategy<Value = String> {
    "[a-z0-9_-]{1,8}"
}

fn segments(min: usize, max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment(), min..=max)
}

#[test]
fn test_empty_path_edge_cases() {
    assert!(!matches("+", ""));
    assert!(matches("#", ""));
    assert!(!matches("*", ""));
    assert!(matches(">", ""));
}

proptest! {
    #[test]
    fn trailing_multi_wildcard_matches_every_extension(
        prefix in segments(1, 4),
        suffix in segments(0, 4),
    ) {
        let pattern = format!("{}/#", prefix.join("/"));
        let path = prefix.iter().chain(suffix.iter()).cloned().collect::<Vec<_>>().join("/");

        prop_assert!(matches(&pattern, &path));
        prop_assert!(matches(&pattern, &prefix.join("/")));
    }

    #[test]
    fn trailing_multi_wildcard_matches_every_extension_dot(
        prefix in segments(1, 4),
        suffix in segments(0, 4),
    ) {
        let pattern = format!("{}.>", prefix.join("."));
        let path = prefix.iter().chain(suffix.iter()).cloned().collect::<Vec<_>>().join(".");

        prop_assert!(matches(&pattern, &path));
    }

    #[test]
    fn misplaced_multi_wildcard_never_matches(
        before in segments(0, 3),
        after in segments(1, 3),
        path in segments(0, 8),
    ) {
        let mut pattern = before;
        pattern.push("#".to_string());
        pattern.extend(after);

        prop_assert!(!matches(&pattern.join("/"), &path.join("/")));
    }

    #[test]
    fn literal_pattern_matches_only_itself(
        pattern in segments(1, 5),
        other in segments(1, 5),
    ) {
        let pattern = pattern.join("/");
        let other = other.join("/");

        prop_assert!(matches(&pattern, &pattern));
        prop_assert_eq!(matches(&pattern, &other), pattern == other);
    }

    #[test]
    fn single_wildcards_match_same_length_paths(
        path in segments(1, 6),
        extra in segment(),
    ) {
        let pattern = vec!["+"; path.len()].join("/");
        let joined = path.join("/");

        prop_assert!(matches(&pattern, &joined));
        let longer = format!("{joined}/{extra}");
        prop_assert!(!matches(&pattern, &longer));
    }

    #[test]
    fn leading_slash_is_ignored(pattern in segments(1, 4), path in segments(1, 4)) {
        let pattern = pattern.join("/");
        let path = path.join("/");
        let http_path = format!("/{path}");

        prop_assert_eq!(
            matches(&pattern, path_to_topic(&http_path)),
            matches(&pattern, &path)
        );
    }

    #[test]
    fn first_match_is_first_in_list_order(
        patterns in prop::collection::vec(segments(1, 3), 0..6),
        path in segments(1, 3),
    ) {
        let patterns: Vec<String> = patterns.iter().map(|p| p.join("/")).collect();
        let path = path.join("/");

        let expected = patterns.iter().find(|p| matches(p, &path)).map(String::as_str);
        prop_assert_eq!(first_match(&patterns, &path), expected);
    }
}
