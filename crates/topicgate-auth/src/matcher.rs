//! Topic pattern matching for request paths.
//!
//! Permission patterns are written in one of two topic dialects borrowed from
//! publish/subscribe brokers:
//!
//! | Schema  | Separator | Single segment | Any remaining segments |
//! |---------|-----------|----------------|------------------------|
//! | `Slash` | `/`       | `+`            | `#`                    |
//! | `Dot`   | `.`       | `*`            | `>`                    |
//!
//! The schema is chosen per pattern by [`TopicSchema::detect`], then both
//! pattern and path are normalized and compared segment by segment.
//!
//! # Example
//!
//! ```
//! use topicgate_auth::matcher::{matches, path_to_topic};
//!
//! let topic = path_to_topic("/api/v1/devices/42");
//! assert!(matches("api/v1/devices/+", topic));
//! assert!(matches("api/#", topic));
//! assert!(!matches("api/v1/+", topic));
//! ```

use std::fmt;

// =============================================================================
// Topic Schema
// =============================================================================

/// Wildcard dialect of a permission pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicSchema {
    /// MQTT-style: `/` separator, `+` single-segment, `#` multi-segment.
    Slash,
    /// NATS-style: `.` separator, `*` single-segment, `>` multi-segment.
    Dot,
}

impl TopicSchema {
    /// Classify a pattern by the characters it contains.
    ///
    /// A pattern is treated as [`TopicSchema::Dot`] when it uses a dot-schema
    /// wildcard (`*` or `>`), or contains `.` but no `/`. Everything else is
    /// [`TopicSchema::Slash`].
    #[must_use]
    pub fn detect(pattern: &str) -> Self {
        let dot_wildcards = pattern.contains('*') || pattern.contains('>');
        let dotted = pattern.contains('.') && !pattern.contains('/');

        if dot_wildcards || dotted {
            Self::Dot
        } else {
            Self::Slash
        }
    }

    /// Segment separator.
    #[must_use]
    pub const fn separator(self) -> char {
        match self {
            Self::Slash => '/',
            Self::Dot => '.',
        }
    }

    /// Wildcard matching exactly one segment.
    #[must_use]
    pub const fn single_wildcard(self) -> &'static str {
        match self {
            Self::Slash => "+",
            Self::Dot => "*",
        }
    }

    /// Wildcard matching all remaining segments, including none.
    #[must_use]
    pub const fn multi_wildcard(self) -> &'static str {
        match self {
            Self::Slash => "#",
            Self::Dot => ">",
        }
    }

    /// Trim leading and trailing separators.
    ///
    /// `/` is always trimmed so that HTTP-shaped input behaves the same in
    /// both schemas; the dot schema additionally trims `.`.
    fn normalize(self, value: &str) -> &str {
        let trimmed = value.trim_matches('/');
        match self {
            Self::Slash => trimmed,
            Self::Dot => trimmed.trim_matches('.'),
        }
    }

    /// Normalize and split into segments. Empty input has no segments.
    fn segments(self, value: &str) -> Vec<&str> {
        let normalized = self.normalize(value);
        if normalized.is_empty() {
            Vec::new()
        } else {
            normalized.split(self.separator()).collect()
        }
    }
}

impl fmt::Display for TopicSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slash => write!(f, "slash"),
            Self::Dot => write!(f, "dot"),
        }
    }
}

// =============================================================================
// Matching
// =============================================================================

/// Check whether `pattern` authorizes `path`.
///
/// The schema is detected from the pattern and applied to both inputs. A
/// pattern that normalizes to exactly the multi-segment wildcard matches any
/// path, including the empty one. A multi-segment wildcard anywhere but the
/// last position makes the pattern malformed and it never matches.
#[must_use]
pub fn matches(pattern: &str, path: &str) -> bool {
    let schema = TopicSchema::detect(pattern);

    if schema.normalize(pattern) == schema.multi_wildcard() {
        return true;
    }

    let pattern_segments = schema.segments(pattern);
    let path_segments = schema.segments(path);

    match_segments(schema, &pattern_segments, &path_segments)
}

fn match_segments(schema: TopicSchema, pattern: &[&str], path: &[&str]) -> bool {
    let multi = schema.multi_wildcard();
    let single = schema.single_wildcard();

    let mut remaining_path = path;
    for (idx, segment) in pattern.iter().enumerate() {
        if *segment == multi {
            // Only valid as the final segment; consumes everything left.
            return idx == pattern.len() - 1;
        }

        let Some((current, rest)) = remaining_path.split_first() else {
            return false;
        };

        if *segment != single && segment != current {
            return false;
        }
        remaining_path = rest;
    }

    remaining_path.is_empty()
}

/// Convert an HTTP request path into matcher input.
///
/// Only a single leading `/` is removed; the remainder is passed through
/// unchanged.
#[must_use]
pub fn path_to_topic(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Return the first pattern in list order that authorizes `topic`.
#[must_use]
pub fn first_match<'a, I>(patterns: I, topic: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    patterns
        .into_iter()
        .map(String::as_str)
        .find(|pattern| matches(pattern, topic))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Schema Detection
    // -------------------------------------------------------------------------

    #[test]
    fn test_detect_slash_schema() {
        assert_eq!(TopicSchema::detect("api/v1/+"), TopicSchema::Slash);
        assert_eq!(TopicSchema::detect("api/#"), TopicSchema::Slash);
        assert_eq!(TopicSchema::detect("#"), TopicSchema::Slash);
        assert_eq!(TopicSchema::detect("plain"), TopicSchema::Slash);
        assert_eq!(TopicSchema::detect(""), TopicSchema::Slash);
    }

    #[test]
    fn test_detect_dot_schema() {
        assert_eq!(TopicSchema::detect("api.v1.*"), TopicSchema::Dot);
        assert_eq!(TopicSchema::detect("api.>"), TopicSchema::Dot);
        assert_eq!(TopicSchema::detect(">"), TopicSchema::Dot);
        assert_eq!(TopicSchema::detect("api.v1"), TopicSchema::Dot);
        // Dot-schema wildcards win even when '/' is present.
        assert_eq!(TopicSchema::detect("api/*"), TopicSchema::Dot);
    }

    #[test]
    fn test_dot_with_slash_is_slash_schema() {
        assert_eq!(TopicSchema::detect("files/report.pdf"), TopicSchema::Slash);
    }

    // -------------------------------------------------------------------------
    // Slash Schema
    // -------------------------------------------------------------------------

    #[test]
    fn test_exact_match() {
        assert!(matches("api/v1/devices", "api/v1/devices"));
        assert!(!matches("api/v1/devices", "api/v1/device"));
        assert!(!matches("api/v1/devices", "api/v1"));
        assert!(!matches("api/v1", "api/v1/devices"));
    }

    #[test]
    fn test_exact_match_is_case_sensitive() {
        assert!(!matches("api/Devices", "api/devices"));
    }

    #[test]
    fn test_single_wildcard_matches_one_segment() {
        assert!(matches("api/v1/devices/+", "api/v1/devices/123"));
        assert!(!matches("api/v1/devices/+", "api/v1/devices/123/readings"));
        assert!(!matches("api/v1/devices/+", "api/v1/devices"));
        assert!(matches("api/+/devices", "api/v2/devices"));
    }

    #[test]
    fn test_multi_wildcard_matches_remaining() {
        assert!(matches("api/v1/#", "api/v1/devices/123/readings"));
        assert!(matches("api/v1/#", "api/v1/devices"));
        assert!(matches("api/v1/#", "api/v1"));
        assert!(!matches("api/v1/#", "api/v2/devices"));
    }

    #[test]
    fn test_multi_wildcard_alone_matches_everything() {
        assert!(matches("#", ""));
        assert!(matches("#", "anything/at/all"));
        assert!(matches("/#/", "x"));
    }

    #[test]
    fn test_misplaced_multi_wildcard_never_matches() {
        assert!(!matches("#/api", "api"));
        assert!(!matches("api/#/devices", "api/v1/devices"));
        assert!(!matches("api/#/devices", "api"));
    }

    #[test]
    fn test_single_wildcard_requires_segment() {
        assert!(!matches("+", ""));
        assert!(matches("+", "a"));
        assert!(!matches("+", "a/b"));
    }

    #[test]
    fn test_separators_are_trimmed() {
        assert!(matches("/api/v1/", "api/v1"));
        assert!(matches("api/v1", "/api/v1/"));
    }

    #[test]
    fn test_empty_pattern_matches_only_empty_path() {
        assert!(matches("", ""));
        assert!(matches("/", "/"));
        assert!(!matches("", "api"));
    }

    #[test]
    fn test_wildcard_characters_inside_segment_are_literal() {
        assert!(!matches("api/v1+", "api/v12"));
        assert!(matches("api/v1#", "api/v1#"));
    }

    // -------------------------------------------------------------------------
    // Dot Schema
    // -------------------------------------------------------------------------

    #[test]
    fn test_dot_schema_matching() {
        assert!(matches("api.v1.*", "api.v1.devices"));
        assert!(!matches("api.v1.*", "api.v1.devices.42"));
        assert!(matches("api.>", "api.v1.devices.42"));
        assert!(matches("api.>", "api"));
        assert!(matches(">", ""));
        assert!(!matches("*", ""));
        assert!(!matches(">.api", "x.api"));
    }

    #[test]
    fn test_dot_schema_does_not_split_on_slash() {
        // The request path is passed through unchanged, so a slash path is a
        // single dot-schema segment.
        assert!(!matches("api.*", "api/v1"));
        assert!(matches("*", "api/v1"));
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    #[test]
    fn test_path_to_topic() {
        assert_eq!(path_to_topic("/api/v1"), "api/v1");
        assert_eq!(path_to_topic("api/v1"), "api/v1");
        assert_eq!(path_to_topic("//api"), "/api");
        assert_eq!(path_to_topic("/"), "");
    }

    #[test]
    fn test_first_match_respects_list_order() {
        let patterns = vec![
            "admin/#".to_string(),
            "api/v1/+".to_string(),
            "api/#".to_string(),
        ];
        assert_eq!(first_match(&patterns, "api/v1/devices"), Some("api/v1/+"));
        assert_eq!(first_match(&patterns, "api/v2/x/y"), Some("api/#"));
        assert_eq!(first_match(&patterns, "other"), None);
    }

    #[test]
    fn test_first_match_empty_list() {
        let patterns: Vec<String> = Vec::new();
        assert_eq!(first_match(&patterns, "api"), None);
    }
}
