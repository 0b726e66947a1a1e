//! Pulling structured JSON out of model replies.
//!
//! Replies arrive as prose around a JSON payload, often wrapped in markdown
//! code fences and occasionally polluted with raw control characters that
//! break the parser.

use mimic_core::{Error, Result};
use serde_json::Value;

/// Remove ASCII control characters that are invalid inside JSON strings,
/// keeping tab, newline, and carriage return.
pub fn sanitize_json_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

/// Strip a leading/trailing markdown code fence if present.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Fence may carry a language tag on the same line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Take the substring from the first `open` to the last `close`.
fn bounded<'a>(text: &'a str, open: char, close: char) -> Option<&'a str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Extract the first JSON object from a model reply.
pub fn extract_json_object(text: &str) -> Result<Value> {
    let cleaned = sanitize_json_text(strip_fences(text));
    let candidate = bounded(&cleaned, '{', '}')
        .ok_or_else(|| Error::JsonExtract(format!("no JSON object in reply: {}", preview(text))))?;
    serde_json::from_str(candidate)
        .map_err(|e| Error::JsonExtract(format!("invalid JSON object: {} in {}", e, preview(text))))
}

/// Extract the first JSON array from a model reply.
pub fn extract_json_array(text: &str) -> Result<Vec<Value>> {
    let cleaned = sanitize_json_text(strip_fences(text));
    let candidate = bounded(&cleaned, '[', ']')
        .ok_or_else(|| Error::JsonExtract(format!("no JSON array in reply: {}", preview(text))))?;
    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| Error::JsonExtract(format!("invalid JSON array: {} in {}", e, preview(text))))?;
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(Error::JsonExtract("parsed value is not an array".to_string())),
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_object_with_language_tag() {
        let reply = "Here is the result:\n```json\n{\"action\": \"click\"}\n```";
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["action"], "click");
    }

    #[test]
    fn parses_bare_object_embedded_in_prose() {
        let reply = "Sure! The answer is {\"ok\": true} as requested.";
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn parses_array_with_surrounding_text() {
        let reply = "Plan:\n[{\"type\": \"wait\", \"seconds\": 2}]\nDone.";
        let items = extract_json_array(reply).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["type"], "wait");
    }

    #[test]
    fn control_characters_are_stripped() {
        let reply = "{\"text\": \"bell\u{7} here\"}";
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["text"], "bell here");
    }

    #[test]
    fn newlines_inside_strings_survive_via_escapes() {
        let reply = "{\"text\": \"line one\\nline two\"}";
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["text"], "line one\nline two");
    }

    #[test]
    fn missing_json_is_an_error() {
        assert!(extract_json_object("no structured data here").is_err());
        assert!(extract_json_array("still nothing").is_err());
    }
}
