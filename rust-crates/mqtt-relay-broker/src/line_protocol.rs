//! InfluxDB line protocol codec
//!
//! Upstream payloads are one or more newline-separated lines of the form
//!
//! ```text
//! measurement[,tag_key=tag_value...] field_key=field_value[,...] [timestamp]
//! ```
//!
//! Malformed lines are skipped; the remaining lines still produce points.

use chrono::Utc;
use thiserror::Error;

use crate::point::{FieldValue, Point};

#[derive(Error, Debug, PartialEq)]
enum LineError {
    #[error("missing field set")]
    MissingFields,

    #[error("empty measurement")]
    EmptyMeasurement,

    #[error("tag without '=': {0}")]
    BadTag(String),

    #[error("field without '=': {0}")]
    BadField(String),

    #[error("invalid value for field {0}")]
    BadFieldValue(String),

    #[error("invalid timestamp: {0}")]
    BadTimestamp(String),

    #[error("unexpected data after timestamp: {0}")]
    TrailingData(String),
}

/// Parse every line of a payload into points
///
/// Invalid UTF-8 yields no points. Lines without a timestamp are stamped
/// with the time the payload was received.
pub fn parse(payload: &[u8]) -> Vec<Point> {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("Ignoring non UTF-8 line protocol payload: {}", e);
            return Vec::new();
        }
    };

    let received = now_nanos();

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match parse_line(line, received) {
            Ok(point) => Some(point),
            Err(e) => {
                tracing::debug!("Skipping malformed line ({}): {}", e, line);
                None
            }
        })
        .collect()
}

/// Encode a point as a single line (no trailing newline)
pub fn to_line(point: &Point) -> String {
    let mut line = escape(&point.measurement, &[',', ' ']);

    for pair in &point.tag_pairs {
        line.push(',');
        match pair.split_once('=') {
            Some((key, value)) => {
                line.push_str(&escape(key, &[',', '=', ' ']));
                line.push('=');
                line.push_str(&escape(value, &[',', '=', ' ']));
            }
            None => line.push_str(&escape(pair, &[',', '=', ' '])),
        }
    }

    let fields: Vec<String> = point
        .fields
        .iter()
        .map(|(name, value)| format!("{}={}", escape(name, &[',', '=', ' ']), value))
        .collect();
    line.push(' ');
    line.push_str(&fields.join(","));

    line.push(' ');
    line.push_str(&point.timestamp.to_string());
    line
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

fn parse_line(line: &str, received: i64) -> Result<Point, LineError> {
    // Quotes are literal in the key; only the field set may quote spaces
    let (key, rest) = split_once_unescaped(line, ' ').ok_or(LineError::MissingFields)?;
    let mut sections = split_unescaped(rest, ' ', true)
        .into_iter()
        .filter(|s| !s.is_empty());

    let fields = sections.next().ok_or(LineError::MissingFields)?;
    let timestamp = match sections.next() {
        Some(ts) => ts
            .parse::<i64>()
            .map_err(|_| LineError::BadTimestamp(ts.to_string()))?,
        None => received,
    };
    if let Some(extra) = sections.next() {
        return Err(LineError::TrailingData(extra.to_string()));
    }

    let mut key_parts = split_unescaped(key, ',', false).into_iter();
    let measurement = unescape(key_parts.next().unwrap_or_default());
    if measurement.is_empty() {
        return Err(LineError::EmptyMeasurement);
    }

    let mut point = Point::new(measurement, timestamp);

    for tag in key_parts {
        let (tag_key, tag_value) =
            split_pair(tag).ok_or_else(|| LineError::BadTag(tag.to_string()))?;
        point
            .tag_pairs
            .push(format!("{}={}", unescape(tag_key), unescape(tag_value)));
    }

    for field in split_unescaped(fields, ',', true) {
        let (name, raw) =
            split_pair(field).ok_or_else(|| LineError::BadField(field.to_string()))?;
        let name = unescape(name);
        let value = parse_field_value(raw).ok_or_else(|| LineError::BadFieldValue(name.clone()))?;
        point.fields.insert(name, value);
    }

    Ok(point)
}

fn parse_field_value(raw: &str) -> Option<FieldValue> {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Some(FieldValue::String(unescape(&raw[1..raw.len() - 1])));
    }

    match raw {
        "t" | "T" | "true" | "True" | "TRUE" => return Some(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Some(FieldValue::Boolean(false)),
        _ => {}
    }

    if let Some(int) = raw.strip_suffix('i') {
        return int.parse().ok().map(FieldValue::Integer);
    }
    if let Some(uint) = raw.strip_suffix('u') {
        return uint.parse().ok().map(FieldValue::UInteger);
    }

    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(FieldValue::Float)
}

/// Split `key=value` at the first unescaped `=`
fn split_pair(s: &str) -> Option<(&str, &str)> {
    split_once_unescaped(s, '=')
}

/// Split at the first unescaped `sep`; `None` if absent or nothing precedes it
fn split_once_unescaped(s: &str, sep: char) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (idx, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            c if c == sep => {
                let (head, tail) = (&s[..idx], &s[idx + c.len_utf8()..]);
                return (!head.is_empty()).then_some((head, tail));
            }
            _ => {}
        }
    }
    None
}

/// Split on `sep` ignoring escaped separators, and separators inside
/// double quotes when `quotes` is set
fn split_unescaped(s: &str, sep: char, quotes: bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    let mut in_quotes = false;

    for (idx, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' if quotes => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&s[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, ',' | '=' | ' ' | '"' | '\\') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
