//! Text protocol spoken over each stream connection
//!
//! Inbound: `subscribe:<JSON>` where the JSON is either an array of
//! `{"measurement": string, "tags": [string]}` or a falsy literal that
//! disables delivery. Outbound: a JSON array of matched points.

use serde_json::Value;

use crate::error::ProtocolError;
use crate::point::Point;
use crate::subscription::{Clause, SubscriptionUpdate};

pub const SUBSCRIBE_PREFIX: &str = "subscribe:";

/// Decode an inbound connection message
pub fn decode_subscription(text: &str) -> Result<SubscriptionUpdate, ProtocolError> {
    let body = text
        .strip_prefix(SUBSCRIBE_PREFIX)
        .ok_or_else(|| ProtocolError::UnknownMessage(text.to_string()))?;

    let value: Value = serde_json::from_str(body).map_err(|source| ProtocolError::Unparseable {
        payload: text.to_string(),
        source,
    })?;

    if !is_truthy(&value) {
        return Ok(SubscriptionUpdate::Disable);
    }

    let Value::Array(elements) = &value else {
        return Err(ProtocolError::NotAnArray(value.to_string()));
    };

    // One bad element drops the whole update
    elements
        .iter()
        .map(decode_clause)
        .collect::<Result<Vec<_>, _>>()
        .map(SubscriptionUpdate::Subscribe)
}

/// Serialize the points matched for one connection in one dispatch pass
pub fn encode_points(points: &[&Point]) -> serde_json::Result<String> {
    serde_json::to_string(points)
}

fn decode_clause(element: &Value) -> Result<Clause, ProtocolError> {
    let invalid = |reason| ProtocolError::InvalidClause {
        reason,
        element: element.to_string(),
    };

    let measurement = match element.get("measurement") {
        Some(Value::String(m)) if !m.is_empty() => m.clone(),
        _ => return Err(invalid("missing measurement")),
    };

    let tags = match element.get("tags") {
        Some(Value::Array(tags)) => tags
            .iter()
            .map(|tag| tag.as_str().map(str::to_owned))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| invalid("tags must be key=value strings"))?,
        _ => return Err(invalid("array of tags with key=value pairs expected")),
    };

    Ok(Clause { measurement, tags })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::FieldValue;

    #[test]
    fn test_decode_valid_subscription() {
        let update = decode_subscription(
            r#"subscribe:[{"measurement":"environment","tags":["a=b"]},{"measurement":"dummy","tags":[],"extra":1}]"#,
        )
        .unwrap();
        assert_eq!(
            update,
            SubscriptionUpdate::Subscribe(vec![
                Clause::new("environment").tag("a=b"),
                Clause::new("dummy"),
            ])
        );
    }

    #[test]
    fn test_decode_empty_array() {
        assert_eq!(
            decode_subscription("subscribe:[]").unwrap(),
            SubscriptionUpdate::Subscribe(vec![])
        );
    }

    #[test]
    fn test_falsy_values_disable() {
        for payload in ["false", "null", "0", "\"\"", " false "] {
            let msg = format!("subscribe:{}", payload);
            assert_eq!(
                decode_subscription(&msg).unwrap(),
                SubscriptionUpdate::Disable,
                "payload {}",
                payload
            );
        }
    }

    #[test]
    fn test_truthy_non_array_rejected() {
        for payload in ["true", "1", "\"x\"", r#"{"measurement":"m","tags":[]}"#] {
            let msg = format!("subscribe:{}", payload);
            assert!(matches!(
                decode_subscription(&msg),
                Err(ProtocolError::NotAnArray(_))
            ));
        }
    }

    #[test]
    fn test_unknown_prefix_rejected() {
        assert!(matches!(
            decode_subscription(r#"[{"measurement":"m","tags":[]}]"#),
            Err(ProtocolError::UnknownMessage(_))
        ));
        assert!(matches!(
            decode_subscription("Subscribe:false"),
            Err(ProtocolError::UnknownMessage(_))
        ));
    }

    #[test]
    fn test_unparseable_rejected() {
        assert!(matches!(
            decode_subscription("subscribe:{not json"),
            Err(ProtocolError::Unparseable { .. })
        ));
        assert!(matches!(
            decode_subscription("subscribe:"),
            Err(ProtocolError::Unparseable { .. })
        ));
    }

    #[test]
    fn test_invalid_clause_drops_everything() {
        let cases = [
            r#"[{"measurement":"ok","tags":[]},{"tags":[]}]"#,
            r#"[{"measurement":"","tags":[]}]"#,
            r#"[{"measurement":5,"tags":[]}]"#,
            r#"[{"measurement":"m"}]"#,
            r#"[{"measurement":"m","tags":"a=b"}]"#,
            r#"[{"measurement":"m","tags":["a=b",3]}]"#,
            r#"[null]"#,
        ];
        for case in cases {
            let msg = format!("subscribe:{}", case);
            match decode_subscription(&msg) {
                Err(ProtocolError::InvalidClause { element, .. }) => assert!(!element.is_empty()),
                other => panic!("expected invalid clause for {}, got {:?}", case, other),
            }
        }
    }

    #[test]
    fn test_encode_points_is_array() {
        let a = Point::new("a", 1).field("v", FieldValue::Integer(1));
        let b = Point::new("b", 2);
        let json = encode_points(&[&a, &b]).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["measurement"], "a");
        assert_eq!(value[1]["timestamp"], "2");
    }
}
