// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw payloads: flat, ordered key/value maps.

pub use serde_json::Value;

/// A flat key/value payload. Insertion order is preserved so that
/// "trailing" fields are well defined for partial match styles.
pub type Payload = serde_json::Map<String, Value>;

/// Build a payload from a JSON object value.
///
/// Returns `None` for anything that is not an object.
pub fn from_json(value: Value) -> Option<Payload> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Render a value as plain text (strings are not quoted, null is empty).
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Returns true for strings, numbers and booleans.
pub fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// Compare a configured match value with a payload value.
///
/// Identical JSON values match. Scalars of different JSON types match when
/// their textual renderings are equal, so `5` matches `"5"`.
pub fn values_match(expected: &Value, actual: &Value) -> bool {
    if expected == actual {
        return true;
    }
    is_scalar(expected) && is_scalar(actual) && value_text(expected) == value_text(actual)
}

/// Short JSON rendering of a payload for log lines.
pub fn summarize(payload: &Payload, max_len: usize) -> String {
    let text = serde_json::to_string(payload).unwrap_or_else(|_| "<unprintable>".to_string());
    if text.chars().count() <= max_len {
        text
    } else {
        let cut: String = text.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_object_only() {
        assert!(from_json(json!({"a": 1})).is_some());
        assert!(from_json(json!([1, 2])).is_none());
        assert!(from_json(json!("text")).is_none());
    }

    #[test]
    fn test_payload_preserves_order() {
        let payload = from_json(json!({"z": 1, "a": 2, "m": 3})).expect("object");
        let keys: Vec<&str> = payload.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!("abc")), "abc");
        assert_eq!(value_text(&json!(42)), "42");
        assert_eq!(value_text(&json!(true)), "true");
        assert_eq!(value_text(&Value::Null), "");
    }

    #[test]
    fn test_values_match_loose_scalars() {
        assert!(values_match(&json!("A"), &json!("A")));
        assert!(values_match(&json!(5), &json!("5")));
        assert!(values_match(&json!("true"), &json!(true)));
        assert!(!values_match(&json!("A"), &json!("B")));
        assert!(!values_match(&json!(5), &json!(5.5)));
        assert!(!values_match(&json!(["A"]), &json!("A")));
    }

    #[test]
    fn test_summarize_truncates() {
        let payload = from_json(json!({"key": "a long value"})).expect("object");
        let short = summarize(&payload, 8);
        assert!(short.ends_with("..."));
        assert_eq!(summarize(&payload, 200), r#"{"key":"a long value"}"#);
    }
}
