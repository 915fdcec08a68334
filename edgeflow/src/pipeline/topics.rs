//! Topic pattern matching.

use serde::{Deserialize, Serialize};

fn default_separator() -> String {
    "/".to_string()
}

fn default_multi_level() -> String {
    "#".to_string()
}

fn default_single_level() -> String {
    "+".to_string()
}

/// Broker topic syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSyntax {
    /// Level separator.
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Wildcard matching any number of trailing levels.
    #[serde(default = "default_multi_level")]
    pub multi_level_wildcard: String,
    /// Wildcard matching exactly one level.
    #[serde(default = "default_single_level")]
    pub single_level_wildcard: String,
}

impl Default for TopicSyntax {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            multi_level_wildcard: default_multi_level(),
            single_level_wildcard: default_single_level(),
        }
    }
}

/// Matches inbound topics against subscription patterns.
///
/// With the default MQTT-style syntax, `events/+/temperature` matches
/// `events/device1/temperature` but not `events/device1/device2/temperature`,
/// and `events/#` matches `events` and everything below it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicMatcher {
    syntax: TopicSyntax,
}

impl TopicMatcher {
    /// Creates a matcher for the given syntax.
    #[must_use]
    pub const fn new(syntax: TopicSyntax) -> Self {
        Self { syntax }
    }

    /// Returns the syntax in use.
    #[must_use]
    pub const fn syntax(&self) -> &TopicSyntax {
        &self.syntax
    }

    /// Returns true if `topic` matches `pattern`.
    #[must_use]
    pub fn matches(&self, pattern: &str, topic: &str) -> bool {
        let syntax = &self.syntax;
        if pattern == syntax.multi_level_wildcard {
            return true;
        }
        if pattern == topic {
            return true;
        }

        let mut pattern_levels = pattern.split(syntax.separator.as_str());
        let mut topic_levels = topic.split(syntax.separator.as_str());
        loop {
            match (pattern_levels.next(), topic_levels.next()) {
                (Some(p), _) if p == syntax.multi_level_wildcard => {
                    return pattern_levels.next().is_none();
                }
                (Some(p), Some(_)) if p == syntax.single_level_wildcard => {}
                (Some(p), Some(t)) if p == t => {}
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    /// Returns true if `topic` matches any of `patterns`.
    #[must_use]
    pub fn matches_any(&self, patterns: &[String], topic: &str) -> bool {
        patterns.iter().any(|p| self.matches(p, topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mqtt() -> TopicMatcher {
        TopicMatcher::default()
    }

    #[test]
    fn test_single_level_wildcard() {
        let m = mqtt();
        assert!(m.matches("events/+/temperature", "events/device1/temperature"));
        assert!(!m.matches("events/+/temperature", "events/device1/device2/temperature"));
        assert!(!m.matches("events/+/temperature", "events/temperature"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        let m = mqtt();
        assert!(m.matches("#", "anything/at/all"));
        assert!(m.matches("events/#", "events/d1/temperature"));
        assert!(m.matches("events/#", "events"));
        assert!(!m.matches("events/#", "alerts/d1"));
    }

    #[test]
    fn test_multi_level_must_be_last() {
        assert!(!mqtt().matches("events/#/x", "events/a/x"));
    }

    #[test]
    fn test_exact_match() {
        let m = mqtt();
        assert!(m.matches("events/d1", "events/d1"));
        assert!(!m.matches("events/d1", "events/d2"));
        assert!(!m.matches("events/d1", "events/d1/extra"));
    }

    #[test]
    fn test_configurable_syntax() {
        let m = TopicMatcher::new(TopicSyntax {
            separator: ".".into(),
            multi_level_wildcard: ">".into(),
            single_level_wildcard: "*".into(),
        });
        assert!(m.matches("events.*.temperature", "events.d1.temperature"));
        assert!(m.matches("events.>", "events.d1.temperature"));
        assert!(!m.matches("events/+/temperature", "events.d1.temperature"));
    }

    #[test]
    fn test_matches_any() {
        let patterns = vec!["a/+".to_string(), "b/#".to_string()];
        assert!(mqtt().matches_any(&patterns, "b/c/d"));
        assert!(!mqtt().matches_any(&patterns, "c"));
    }
}
