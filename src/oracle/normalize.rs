//! Response normalization for the oracle boundary.
//!
//! Every structured response goes through [`normalize`]: one direct parse, at
//! most one structural re-parse (code fences stripped, JSON block extracted),
//! array/object coercion, then typed deserialization and semantic validation.
//! Unparseable input is `Malformed`; well-formed input with missing or empty
//! fields is `Validation`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::OracleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Object,
    Array,
}

/// A typed oracle response.
pub trait OracleShape: DeserializeOwned {
    const SHAPE: Shape;

    /// Semantic checks on a well-formed value (empty required fields, ranges).
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)\s*```").expect("fence regex"));

/// Remove markdown code fences, keeping the first fenced body if present.
pub fn strip_code_fences(raw: &str) -> String {
    let t = raw.trim();
    if let Some(cap) = RE_FENCE.captures(t) {
        return cap.get(1).map(|m| m.as_str().trim()).unwrap_or("").to_string();
    }
    t.trim_start_matches("```").trim_end_matches("```").trim().to_string()
}

/// Slice from the first `{`/`[` to the last matching closer.
fn extract_json_block(s: &str) -> Option<&str> {
    let start = s.find(['{', '['])?;
    let closer = if s[start..].starts_with('{') { '}' } else { ']' };
    let end = s.rfind(closer)?;
    (end > start).then(|| &s[start..=end])
}

/// Parse raw text into JSON: direct parse first, then exactly one structural
/// re-parse of the cleaned text.
fn parse_structural(raw: &str) -> Result<Value, OracleError> {
    if let Ok(v) = serde_json::from_str::<Value>(raw.trim()) {
        return Ok(v);
    }
    let cleaned = strip_code_fences(raw);
    let candidate = extract_json_block(&cleaned).unwrap_or(cleaned.as_str());
    serde_json::from_str::<Value>(candidate).map_err(|e| {
        OracleError::Malformed(format!("{e} (input starts with {:?})", preview(raw)))
    })
}

fn coerce(value: Value, shape: Shape) -> Result<Value, OracleError> {
    match (shape, value) {
        (Shape::Object, v @ Value::Object(_)) => Ok(v),
        (Shape::Object, Value::Array(mut items)) if items.len() == 1 && items[0].is_object() => {
            Ok(items.remove(0))
        }
        (Shape::Array, v @ Value::Array(_)) => Ok(v),
        (Shape::Array, Value::Object(map)) => {
            // {"groups": [...]} style wrappers collapse to the single array field.
            let arrays: Vec<&Value> = map.values().filter(|v| v.is_array()).collect();
            if arrays.len() == 1 {
                Ok(arrays[0].clone())
            } else {
                Ok(Value::Array(vec![Value::Object(map)]))
            }
        }
        (shape, other) => Err(OracleError::Malformed(format!(
            "expected {shape:?}, got {}",
            kind_of(&other)
        ))),
    }
}

/// Normalize a raw oracle response into `T`.
pub fn normalize<T: OracleShape>(raw: &str) -> Result<T, OracleError> {
    if raw.trim().is_empty() {
        return Err(OracleError::Validation("empty response".to_string()));
    }
    let value = coerce(parse_structural(raw)?, T::SHAPE)?;
    let typed: T =
        serde_json::from_value(value).map_err(|e| OracleError::Validation(e.to_string()))?;
    typed.validate().map_err(OracleError::Validation)?;
    Ok(typed)
}

/// Normalize a plain-text response: fences and wrapping quotes removed,
/// whitespace collapsed. Empty output is a validation failure.
pub fn normalize_text(raw: &str) -> Result<String, OracleError> {
    let stripped = strip_code_fences(raw);
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let out = collapsed
        .trim_matches(|c| c == '"' || c == '\'' || c == '\u{201C}' || c == '\u{201D}')
        .trim()
        .to_string();
    if out.is_empty() {
        return Err(OracleError::Validation("empty text response".to_string()));
    }
    Ok(out)
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn preview(s: &str) -> String {
    s.chars().take(40).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Copy {
        headline: String,
        body: String,
    }
    impl OracleShape for Copy {
        const SHAPE: Shape = Shape::Object;
        fn validate(&self) -> Result<(), String> {
            if self.headline.trim().is_empty() {
                return Err("empty headline".into());
            }
            Ok(())
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(transparent)]
    struct Groups(Vec<Vec<usize>>);
    impl OracleShape for Groups {
        const SHAPE: Shape = Shape::Array;
    }

    #[test]
    fn fenced_json_is_reparsed() {
        let raw = "Here you go:\n```json\n{\"headline\":\"Bridge opens\",\"body\":\"Text\"}\n```";
        let c: Copy = normalize(raw).unwrap();
        assert_eq!(c.headline, "Bridge opens");
    }

    #[test]
    fn single_element_array_coerces_to_object() {
        let c: Copy = normalize(r#"[{"headline":"H","body":"B"}]"#).unwrap();
        assert_eq!(c.body, "B");
    }

    #[test]
    fn wrapped_array_coerces_to_array() {
        let g: Groups = normalize(r#"{"groups": [[0, 2], [1, 3]]}"#).unwrap();
        assert_eq!(g.0, vec![vec![0, 2], vec![1, 3]]);
    }

    #[test]
    fn garbage_is_malformed() {
        let err = normalize::<Copy>("I cannot help with that").unwrap_err();
        assert!(matches!(err, OracleError::Malformed(_)));
    }

    #[test]
    fn empty_required_field_is_validation() {
        let err = normalize::<Copy>(r#"{"headline":"  ","body":"B"}"#).unwrap_err();
        assert!(matches!(err, OracleError::Validation(_)));
        let err = normalize::<Copy>(r#"{"body":"B"}"#).unwrap_err();
        assert!(matches!(err, OracleError::Validation(_)));
    }

    #[test]
    fn text_response_is_cleaned() {
        let out = normalize_text("```\n\"Storm  closes\n Main St\"\n```").unwrap();
        assert_eq!(out, "Storm closes Main St");
        assert!(normalize_text("``` ```").is_err());
    }
}
