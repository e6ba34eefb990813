//! Topic → parser dispatch table
//!
//! The table is the sole authority on which upstream topics produce points.
//! It is built once at startup and handed to the [`FanoutDispatcher`].
//!
//! [`FanoutDispatcher`]: crate::dispatcher::FanoutDispatcher

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::line_protocol;
use crate::point::Point;

/// Parses a raw payload received on `topic` into points
pub type ParserFn = Arc<dyn Fn(&str, &[u8]) -> Option<Vec<Point>> + Send + Sync>;

/// Parse a line protocol payload and tag each point with its topic
pub fn parse_line_protocol_with_topic(topic: &str, payload: &[u8]) -> Option<Vec<Point>> {
    let mut points = line_protocol::parse(payload);
    if points.is_empty() {
        return None;
    }
    for point in &mut points {
        point.push_topic_tag(topic);
    }
    Some(points)
}

#[derive(Clone, Default)]
pub struct DispatchTable {
    parsers: HashMap<String, ParserFn>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table mapping every given topic to the line protocol parser
    pub fn with_line_protocol<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parser: ParserFn = Arc::new(parse_line_protocol_with_topic);
        let mut table = Self::new();
        for topic in topics {
            table.register(topic, Arc::clone(&parser));
        }
        table
    }

    /// Register (or replace) the parser for a topic
    pub fn register(&mut self, topic: impl Into<String>, parser: ParserFn) {
        self.parsers.insert(topic.into(), parser);
    }

    /// Registered topic names, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.parsers.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.parsers.contains_key(topic)
    }

    /// Run the parser registered for `topic`
    ///
    /// Returns `None` for unknown topics and for payloads that produced no points.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> Option<Vec<Point>> {
        let parser = self.parsers.get(topic)?;
        parser(topic, payload).filter(|points| !points.is_empty())
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("topics", &self.topics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_topics_append_topic_tag() {
        let table = DispatchTable::with_line_protocol(["iot_center", "test"]);

        for topic in ["iot_center", "test"] {
            let points = table.dispatch(topic, b"dummy,host=x,a=b t=1 1").unwrap();
            assert_eq!(
                points[0].tag_pairs,
                vec!["host=x".to_string(), "a=b".to_string(), format!("topic={}", topic)]
            );
        }
    }

    #[test]
    fn test_unknown_topic_is_ignored() {
        let table = DispatchTable::with_line_protocol(["iot_center"]);
        assert!(table.dispatch("other", b"dummy t=1 1").is_none());
        assert!(!table.contains("other"));
    }

    #[test]
    fn test_unparseable_payload_yields_nothing() {
        let table = DispatchTable::with_line_protocol(["iot_center"]);
        assert!(table.dispatch("iot_center", b"garbage").is_none());
        assert!(parse_line_protocol_with_topic("iot_center", b"").is_none());
    }

    #[test]
    fn test_custom_parser_and_topics() {
        let mut table = DispatchTable::with_line_protocol(["b", "a"]);
        table.register(
            "fixed",
            Arc::new(|topic: &str, _payload: &[u8]| {
                let mut point = Point::new("fixed", 1);
                point.push_topic_tag(topic);
                Some(vec![point])
            }),
        );
        assert_eq!(table.topics(), vec!["a", "b", "fixed"]);
        let points = table.dispatch("fixed", b"ignored").unwrap();
        assert_eq!(points[0].tag_pairs, vec!["topic=fixed"]);
    }
}
