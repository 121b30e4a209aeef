//! Recovery heuristics for malformed model output.
//!
//! Model responses are supposed to be a JSON array (bare, or wrapped in an
//! object under a named field), but long generations get truncated and some
//! models wrap everything in Markdown fences. The strategies here are tried
//! in a fixed order and the first success wins; the caller synthesizes a
//! degraded fallback when all of them fail.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// What the caller expects the array elements to be. Resolved once at the
/// parse boundary instead of duck-typed at each consumption site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedShape {
    Topics,
    Cuts,
}

impl ExpectedShape {
    /// Field name used when the response wraps the array in an object.
    pub fn field_name(&self) -> &'static str {
        match self {
            ExpectedShape::Topics => "topics",
            ExpectedShape::Cuts => "cuts",
        }
    }

    /// Keys an extracted object literal must carry to count as one element.
    fn marker_keys(&self) -> &'static [&'static str] {
        match self {
            ExpectedShape::Topics => &["title"],
            ExpectedShape::Cuts => &["start", "end"],
        }
    }
}

/// Which strategy produced the parse. Reported for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    Direct,
    ClosedTruncation,
    ObjectExtraction,
}

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("response is empty after stripping markdown fences")]
    Empty,
    #[error("no parseable {0:?} structure found in response")]
    Unparseable(ExpectedShape),
}

/// Remove a Markdown code fence wrapper (```json ... ```), if present.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string on the opening fence line
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Truncation test: complete JSON output always ends with a closer.
pub fn looks_truncated(raw: &str) -> bool {
    let trimmed = raw.trim_end();
    !(trimmed.ends_with(']') || trimmed.ends_with('}'))
}

/// Parse a model response into the expected element array, repairing the
/// text when necessary. Accepts both a bare array and an object carrying
/// the shape's named array field.
pub fn parse_structured(
    raw: &str,
    shape: ExpectedShape,
) -> Result<(Vec<Value>, RepairStrategy), RepairError> {
    let text = strip_code_fences(raw);
    if text.is_empty() {
        return Err(RepairError::Empty);
    }

    if !looks_truncated(text) {
        if let Some(items) = try_parse(text, shape) {
            return Ok((items, RepairStrategy::Direct));
        }
    }

    // Strategy 1: close a truncated document at its last complete value.
    if let Some(repaired) = close_truncated(text) {
        if let Some(items) = try_parse(&repaired, shape) {
            debug!(shape = ?shape, "recovered response by closing truncated JSON");
            return Ok((items, RepairStrategy::ClosedTruncation));
        }
    }

    // Strategy 2: harvest individual well-formed object literals.
    let extracted = extract_objects(text, shape);
    if !extracted.is_empty() {
        debug!(
            shape = ?shape,
            count = extracted.len(),
            "recovered response by extracting object literals"
        );
        return Ok((extracted, RepairStrategy::ObjectExtraction));
    }

    Err(RepairError::Unparseable(shape))
}

fn try_parse(text: &str, shape: ExpectedShape) -> Option<Vec<Value>> {
    let value: Value = serde_json::from_str(text).ok()?;
    unwrap_array(value, shape)
}

/// Resolve the bare-array / named-object-field union once.
fn unwrap_array(value: Value, shape: ExpectedShape) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => match map.remove(shape.field_name()) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Cut the text after its last complete `}` and append whatever closing
/// brackets are still open at that point.
fn close_truncated(text: &str) -> Option<String> {
    let cut = text.rfind('}')?;
    let prefix = &text[..=cut];

    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in prefix.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }
    if in_string {
        return None;
    }

    let mut repaired = prefix.to_string();
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    Some(repaired)
}

fn object_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // cut/topic objects never nest braces; keyword arrays only use brackets
    RE.get_or_init(|| Regex::new(r"\{[^{}]*\}").expect("valid regex"))
}

/// Pull every standalone object literal that parses and carries the
/// expected marker keys, reassembled into an array.
fn extract_objects(text: &str, shape: ExpectedShape) -> Vec<Value> {
    object_literal_re()
        .find_iter(text)
        .filter_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .filter(|v| {
            shape
                .marker_keys()
                .iter()
                .all(|key| v.get(key).is_some())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_with_language_tag() {
        let raw = "```json\n[{\"start\": \"00:00:00\"}]\n```";
        assert_eq!(strip_code_fences(raw), "[{\"start\": \"00:00:00\"}]");
    }

    #[test]
    fn leaves_unfenced_text_alone() {
        assert_eq!(strip_code_fences("  [1, 2]  "), "[1, 2]");
    }

    #[test]
    fn detects_truncation() {
        assert!(looks_truncated(r#"[{"start": "00:00:00", "end":"#));
        assert!(!looks_truncated(r#"[{"start": "a"}]"#));
        assert!(!looks_truncated(r#"{"cuts": []}"#));
    }

    #[test]
    fn direct_parse_of_bare_array() {
        let raw = r#"[{"start": "00:00:00", "end": "00:01:00"}]"#;
        let (items, strategy) = parse_structured(raw, ExpectedShape::Cuts).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(strategy, RepairStrategy::Direct);
    }

    #[test]
    fn direct_parse_of_named_object_field() {
        let raw = r#"{"cuts": [{"start": "00:00:00", "end": "00:01:00"}, {"start": "00:01:00", "end": "00:02:00"}]}"#;
        let (items, strategy) = parse_structured(raw, ExpectedShape::Cuts).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(strategy, RepairStrategy::Direct);

        let raw = r#"{"topics": [{"id": 1, "title": "Intro"}]}"#;
        let (items, _) = parse_structured(raw, ExpectedShape::Topics).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn truncated_array_repaired_by_strategy_one() {
        // cut off mid-object: the complete first element survives
        let raw = r#"[{"start": "00:00:00", "end": "00:01:00", "title": "One"}, {"start": "00:01:00", "end"#;
        let (items, strategy) = parse_structured(raw, ExpectedShape::Cuts).unwrap();
        assert_eq!(strategy, RepairStrategy::ClosedTruncation);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["title"], "One");
    }

    #[test]
    fn missing_closers_only_repaired_by_strategy_one() {
        let raw = r#"{"cuts": [{"start": "00:00:00", "end": "00:01:00"}"#;
        let (items, strategy) = parse_structured(raw, ExpectedShape::Cuts).unwrap();
        assert_eq!(strategy, RepairStrategy::ClosedTruncation);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn garbage_with_embedded_objects_uses_strategy_two() {
        let raw = r#"Sure! Here are the cuts you asked for,,, {"start": "00:00:00", "end": "00:01:00", "title": "A"} and then {"start": "00:01:00", "end": "00:02:00", "title": "B"} *** {"unrelated": true}"#;
        let (items, strategy) = parse_structured(raw, ExpectedShape::Cuts).unwrap();
        assert_eq!(strategy, RepairStrategy::ObjectExtraction);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["title"], "A");
        assert_eq!(items[1]["title"], "B");
    }

    #[test]
    fn topics_extraction_requires_title() {
        let raw = r#"noise {"id": 3, "title": "Garlic"} noise {"id": 4}"#;
        let (items, strategy) = parse_structured(raw, ExpectedShape::Topics).unwrap();
        assert_eq!(strategy, RepairStrategy::ObjectExtraction);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], 3);
    }

    #[test]
    fn hopeless_input_is_an_error() {
        assert!(parse_structured("total nonsense", ExpectedShape::Cuts).is_err());
        assert!(parse_structured("", ExpectedShape::Cuts).is_err());
        assert!(parse_structured("```\n```", ExpectedShape::Topics).is_err());
    }

    #[test]
    fn fenced_truncated_response_still_repairs() {
        let raw = "```json\n[{\"id\": 1, \"title\": \"Intro\", \"keywords\": [\"a\", \"b\"]}, {\"id\": 2,";
        let (items, strategy) = parse_structured(raw, ExpectedShape::Topics).unwrap();
        assert_eq!(strategy, RepairStrategy::ClosedTruncation);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["keywords"], serde_json::json!(["a", "b"]));
    }
}
