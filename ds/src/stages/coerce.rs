//! Lenient field readers for oracle replies
//!
//! The oracle is asked for JSON but not trusted to type it: confidences come
//! back as strings, lists as single strings, booleans as "yes".

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::agent::clamp_confidence;

/// Any scalar as text; null and containers become empty or their JSON text
pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(value_to_string(&Value::deserialize(d)?))
}

/// An array of scalars, or a single string treated as a one-item list
pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let list = match Value::deserialize(d)? {
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Value::Null => Vec::new(),
        other => {
            let s = value_to_string(&other);
            if s.trim().is_empty() { Vec::new() } else { vec![s] }
        }
    };
    Ok(list)
}

pub fn boolean<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let b = match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "y" | "1"),
        _ => false,
    };
    Ok(b)
}

/// A number or numeric string clamped to [0, 1]; anything else is 0.5
pub fn confidence<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let raw = match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok().map(|f| if f > 1.0 { f / 100.0 } else { f }),
        _ => None,
    };
    Ok(raw.map(clamp_confidence).unwrap_or(0.5))
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize an enum label: lowercase, spaces and dashes to underscores
pub fn normalize_label(label: &str) -> String {
    label.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Sample {
        #[serde(deserialize_with = "string")]
        text: String,
        #[serde(deserialize_with = "string_list")]
        items: Vec<String>,
        #[serde(deserialize_with = "boolean")]
        flag: bool,
        #[serde(deserialize_with = "confidence")]
        conf: f64,
    }

    fn parse_sample(value: Value) -> Sample {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_well_typed_values_pass_through() {
        let p = parse_sample(json!({"text": "hi", "items": ["a", "b"], "flag": true, "conf": 0.8}));
        assert_eq!(p.text, "hi");
        assert_eq!(p.items, vec!["a", "b"]);
        assert!(p.flag);
        assert_eq!(p.conf, 0.8);
    }

    #[test]
    fn test_loose_values_are_coerced() {
        let p = parse_sample(json!({"text": 42, "items": "only one", "flag": "yes", "conf": "0.9"}));
        assert_eq!(p.text, "42");
        assert_eq!(p.items, vec!["only one"]);
        assert!(p.flag);
        assert_eq!(p.conf, 0.9);
    }

    #[test]
    fn test_confidence_clamped_and_percent() {
        assert_eq!(parse_sample(json!({"conf": 7.5})).conf, 1.0);
        assert_eq!(parse_sample(json!({"conf": -1})).conf, 0.0);
        assert_eq!(parse_sample(json!({"conf": "85%"})).conf, 0.85);
        assert_eq!(parse_sample(json!({"conf": "high"})).conf, 0.5);
    }

    #[test]
    fn test_list_drops_blanks_and_nulls() {
        let p = parse_sample(json!({"items": ["a", null, " ", 3]}));
        assert_eq!(p.items, vec!["a", "3"]);
        assert!(parse_sample(json!({"items": null})).items.is_empty());
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label(" Proceed With-Caveats "), "proceed_with_caveats");
    }
}
