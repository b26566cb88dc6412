//! Time-series data points and their line-protocol rendering.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::Value;

/// Single field value carried by a data point.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Floating point value.
    Float(f64),
    /// Boolean value.
    Boolean(bool),
    /// String value.
    Text(String),
}

/// One measurement sample destined for the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Measurement name.
    pub measurement: String,
    /// Indexed tags.
    pub tags: BTreeMap<String, String>,
    /// Field values; a point without fields is not writable.
    pub fields: BTreeMap<String, FieldValue>,
    /// Sample time in epoch milliseconds.
    pub timestamp_ms: i64,
}

impl DataPoint {
    /// Build a point by flattening a JSON document into fields.
    ///
    /// Nested objects contribute `.`-joined keys; arrays contribute their index.
    /// Every number becomes a float field, so a key keeps one field type whether
    /// a sample carries `3` or `3.5`. Nulls and non-finite numbers are skipped.
    /// Returns `None` when nothing writable remains.
    #[must_use]
    pub fn from_json(
        measurement: impl Into<String>,
        tags: BTreeMap<String, String>,
        document: &Value,
        timestamp_ms: i64,
    ) -> Option<Self> {
        let mut fields = BTreeMap::new();
        flatten_into(&mut fields, None, document);
        if fields.is_empty() {
            return None;
        }
        Some(Self {
            measurement: measurement.into(),
            tags,
            fields,
            timestamp_ms,
        })
    }

    /// Render the point as one line of line protocol (millisecond precision).
    #[must_use]
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }
        let rendered: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape(key, &[',', '=', ' ']), render(value)))
            .collect();
        let _ = write!(line, " {} {}", rendered.join(","), self.timestamp_ms);
        line
    }
}

fn flatten_into(fields: &mut BTreeMap<String, FieldValue>, prefix: Option<&str>, value: &Value) {
    let key = || prefix.unwrap_or("value").to_string();
    match value {
        Value::Null => {}
        Value::Bool(flag) => {
            fields.insert(key(), FieldValue::Boolean(*flag));
        }
        Value::Number(number) => {
            if let Some(number) = number.as_f64().filter(|value| value.is_finite()) {
                fields.insert(key(), FieldValue::Float(number));
            }
        }
        Value::String(text) => {
            fields.insert(key(), FieldValue::Text(text.clone()));
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                let nested = prefix.map_or_else(|| index.to_string(), |p| format!("{p}.{index}"));
                flatten_into(fields, Some(&nested), item);
            }
        }
        Value::Object(map) => {
            for (name, item) in map {
                let nested = prefix.map_or_else(|| name.clone(), |p| format!("{p}.{name}"));
                flatten_into(fields, Some(&nested), item);
            }
        }
    }
}

fn render(value: &FieldValue) -> String {
    match value {
        FieldValue::Float(number) => format!("{number:?}"),
        FieldValue::Boolean(flag) => flag.to_string(),
        FieldValue::Text(text) => format!("\"{}\"", escape(text, &['"', '\\'])),
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if special.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
