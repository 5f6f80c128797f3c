//! Topic names and their classification.

use std::fmt;

/// Default prefix used by the sensor firmware.
pub const DEFAULT_TOPIC_PREFIX: &str = "sensor/sfm3003";

/// The semantic type carried by a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// Periodic samples ([`crate::Reading`]).
    Raw,
    /// End-of-session reports ([`crate::Summary`]).
    Summary,
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicKind::Raw => f.write_str("raw"),
            TopicKind::Summary => f.write_str("summary"),
        }
    }
}

/// The fixed set of topics the relay subscribes to.
///
/// # Example
///
/// ```rust
/// use breathwatch_types::{TopicKind, TopicMap};
///
/// let topics = TopicMap::with_prefix("lab/sensor");
/// assert_eq!(topics.raw(), "lab/sensor/raw");
/// assert_eq!(topics.classify("lab/sensor/summary"), Some(TopicKind::Summary));
/// assert_eq!(topics.classify("lab/sensor/commands"), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMap {
    raw: String,
    summary: String,
}

impl TopicMap {
    /// Create a map from explicit topic names.
    pub fn new(raw: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            summary: summary.into(),
        }
    }

    /// Create a map using `{prefix}/raw` and `{prefix}/summary`.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self::new(format!("{}/raw", prefix), format!("{}/summary", prefix))
    }

    /// Name of the raw reading topic.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Name of the summary topic.
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Name of the topic for a given kind.
    pub fn name(&self, kind: TopicKind) -> &str {
        match kind {
            TopicKind::Raw => &self.raw,
            TopicKind::Summary => &self.summary,
        }
    }

    /// All topics to subscribe to, in subscription order.
    pub fn topics(&self) -> [&str; 2] {
        [&self.raw, &self.summary]
    }

    /// Classify an incoming topic. Unknown topics yield `None`.
    pub fn classify(&self, topic: &str) -> Option<TopicKind> {
        if topic == self.raw {
            Some(TopicKind::Raw)
        } else if topic == self.summary {
            Some(TopicKind::Summary)
        } else {
            None
        }
    }
}

impl Default for TopicMap {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_TOPIC_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topics() {
        let topics = TopicMap::default();
        assert_eq!(topics.topics(), ["sensor/sfm3003/raw", "sensor/sfm3003/summary"]);
    }

    #[test]
    fn test_prefix_trailing_slash() {
        let topics = TopicMap::with_prefix("a/b/");
        assert_eq!(topics.raw(), "a/b/raw");
        assert_eq!(topics.name(TopicKind::Summary), "a/b/summary");
    }

    #[test]
    fn test_classify_is_exact() {
        let topics = TopicMap::default();
        assert_eq!(topics.classify("sensor/sfm3003/raw"), Some(TopicKind::Raw));
        assert_eq!(topics.classify("sensor/sfm3003/raw/extra"), None);
        assert_eq!(topics.classify("sensor/commands"), None);
    }
}
