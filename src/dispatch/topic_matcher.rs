//! MQTT topic filter matching
//!
//! Pure functions over `/`-delimited topics. `+` consumes exactly one
//! segment and `#` matches everything from its position onward.

use thiserror::Error;

pub const SINGLE_LEVEL_WILDCARD: &str = "+";
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Whether `topic` is accepted by the filter `pattern`
///
/// Segments are compared left to right. A `#` segment accepts the rest of
/// the topic immediately, `+` accepts any single segment, and any other
/// segment requires exact equality. Without a `#` both sides must have the
/// same number of segments.
pub fn matches(topic: &str, pattern: &str) -> bool {
    let topic_parts: Vec<&str> = topic.split('/').collect();
    let pattern_parts: Vec<&str> = pattern.split('/').collect();

    for (i, segment) in pattern_parts.iter().enumerate() {
        if *segment == MULTI_LEVEL_WILDCARD {
            return true;
        }
        let Some(topic_segment) = topic_parts.get(i) else {
            return false;
        };
        if *segment != SINGLE_LEVEL_WILDCARD && segment != topic_segment {
            return false;
        }
    }

    topic_parts.len() == pattern_parts.len()
}

/// Whether the filter contains a wildcard segment
pub fn has_wildcard(pattern: &str) -> bool {
    pattern
        .split('/')
        .any(|segment| segment == SINGLE_LEVEL_WILDCARD || segment == MULTI_LEVEL_WILDCARD)
}

#[derive(Debug, Error, PartialEq)]
pub enum PatternError {
    #[error("topic pattern is empty")]
    Empty,
    #[error("'#' must be the last segment in '{0}'")]
    MultiLevelNotLast(String),
    #[error("wildcard must occupy a whole segment in '{0}'")]
    EmbeddedWildcard(String),
}

/// A validated topic filter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern(String);

impl TopicPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let segments: Vec<&str> = pattern.split('/').collect();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            if *segment == MULTI_LEVEL_WILDCARD && i != last {
                return Err(PatternError::MultiLevelNotLast(pattern.to_string()));
            }
            if segment.len() > 1 && (segment.contains('+') || segment.contains('#')) {
                return Err(PatternError::EmbeddedWildcard(pattern.to_string()));
            }
        }

        Ok(Self(pattern.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_wildcard(&self) -> bool {
        has_wildcard(&self.0)
    }

    pub fn matches(&self, topic: &str) -> bool {
        matches(topic, &self.0)
    }
}

impl std::fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_match() {
        assert!(matches("solar/panel/p1/data", "solar/panel/p1/data"));
        assert!(!matches("solar/panel/p1/data", "solar/panel/p2/data"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(matches("solar/panel/p1/data", "solar/panel/+/data"));
        assert!(!matches("solar/panel/p1/extra/data", "solar/panel/+/data"));
        assert!(!matches("solar/panel/p1", "solar/panel/+/data"));
        // `+` accepts an empty segment
        assert!(matches("solar/panel//data", "solar/panel/+/data"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(matches("solar/panel/p1/data", "solar/panel/#"));
        assert!(matches("solar/panel/p1", "solar/panel/#"));
        assert!(matches("solar/panel", "solar/panel/#"));
        assert!(matches("anything/at/all", "#"));
        assert!(!matches("solar/inverter/x", "solar/panel/#"));
    }

    #[test]
    fn test_segment_count_must_agree_without_hash() {
        assert!(!matches("a/b/c", "a/b"));
        assert!(!matches("a/b", "a/b/c"));
        assert!(!matches("a/b/c", "+/+"));
    }

    #[test]
    fn test_has_wildcard() {
        assert!(has_wildcard("solar/+/data"));
        assert!(has_wildcard("solar/#"));
        assert!(!has_wildcard("solar/panel/p1/data"));
        assert!(!has_wildcard("solar/a+b"));
    }

    #[test]
    fn test_pattern_parse() {
        assert!(TopicPattern::parse("solar/panel/#").is_ok());
        assert!(TopicPattern::parse("solar/+/status").is_ok());
        assert_eq!(TopicPattern::parse(""), Err(PatternError::Empty));
        assert!(matches!(
            TopicPattern::parse("solar/#/panel"),
            Err(PatternError::MultiLevelNotLast(_))
        ));
        assert!(matches!(
            TopicPattern::parse("solar/panel+"),
            Err(PatternError::EmbeddedWildcard(_))
        ));
        assert!(matches!(
            TopicPattern::parse("solar/pan#"),
            Err(PatternError::EmbeddedWildcard(_))
        ));
    }

    #[test]
    fn test_pattern_accessors() {
        let pattern = TopicPattern::parse("solar/alerts/+/message").unwrap();
        assert!(pattern.has_wildcard());
        assert!(pattern.matches("solar/alerts/a1/message"));
        assert_eq!(pattern.to_string(), "solar/alerts/+/message");
    }

    fn topic_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z0-9]{1,6}", 1..6).prop_map(|parts| parts.join("/"))
    }

    proptest! {
        #[test]
        fn topic_matches_itself(topic in topic_strategy()) {
            prop_assert!(matches(&topic, &topic));
        }

        #[test]
        fn hash_matches_everything(topic in topic_strategy()) {
            prop_assert!(matches(&topic, "#"));
        }

        #[test]
        fn prefix_hash_matches_extensions(
            prefix in topic_strategy(),
            suffix in topic_strategy(),
        ) {
            let topic = format!("{prefix}/{suffix}");
            let pattern = format!("{prefix}/#");
            prop_assert!(matches(&topic, &pattern));
        }

        #[test]
        fn plus_matches_any_single_segment(
            parts in prop::collection::vec("[a-z0-9]{1,6}", 1..6),
            index in any::<prop::sample::Index>(),
        ) {
            let i = index.index(parts.len());
            let topic = parts.join("/");
            let mut pattern_parts = parts.clone();
            pattern_parts[i] = "+".to_string();
            prop_assert!(matches(&topic, &pattern_parts.join("/")));
        }

        #[test]
        fn literal_pattern_requires_equality(a in topic_strategy(), b in topic_strategy()) {
            prop_assert_eq!(matches(&a, &b), a == b);
        }
    }
}
