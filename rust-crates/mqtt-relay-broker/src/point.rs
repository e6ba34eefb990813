use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A single field value carried by a point
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i64),
    UInteger(u64),
    Float(f64),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Boolean(v) => write!(f, "{}", v),
            FieldValue::Integer(v) => write!(f, "{}i", v),
            FieldValue::UInteger(v) => write!(f, "{}u", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::String(v) => {
                write!(f, "\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))
            }
        }
    }
}

/// One measurement event as delivered to subscribers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub measurement: String,
    /// `key=value` strings in the order the source produced them
    pub tag_pairs: Vec<String>,
    pub fields: BTreeMap<String, FieldValue>,
    /// Nanoseconds since the Unix epoch, carried as a decimal string on the wire
    #[serde(with = "nanos_as_string")]
    pub timestamp: i64,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tag_pairs: Vec::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tag_pairs.push(format!("{}={}", key, value));
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Append `topic=<topic>` after the parser-supplied tag pairs
    pub fn push_topic_tag(&mut self, topic: &str) {
        self.tag_pairs.push(format!("topic={}", topic));
    }
}

mod nanos_as_string {
    use super::*;

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_serialization() {
        let point = Point::new("environment", 1629357840000000000)
            .tag("CO2Sensor", "virtual_CO2Sensor")
            .field("CO2", FieldValue::Integer(2572));
        let json = serde_json::to_string(&point).unwrap();
        assert_eq!(
            json,
            r#"{"measurement":"environment","tagPairs":["CO2Sensor=virtual_CO2Sensor"],"fields":{"CO2":2572},"timestamp":"1629357840000000000"}"#
        );
    }

    #[test]
    fn test_timestamp_accepts_number() {
        let point: Point = serde_json::from_str(
            r#"{"measurement":"m","tagPairs":[],"fields":{"t":1.5},"timestamp":42}"#,
        )
        .unwrap();
        assert_eq!(point.timestamp, 42);
        assert_eq!(point.fields["t"], FieldValue::Float(1.5));
    }

    #[test]
    fn test_topic_tag_is_appended_last() {
        let mut point = Point::new("m", 0).tag("host", "x");
        point.push_topic_tag("sensors");
        assert_eq!(point.tag_pairs, vec!["host=x", "topic=sensors"]);
    }
}
