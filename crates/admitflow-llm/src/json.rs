//! Coercion of model output into JSON.
//!
//! Models asked for JSON still wrap it in prose or markdown fences. Downstream scorers
//! only need the first object or array that parses.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn fenced_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("valid fence regex"))
}

/// Extract a JSON object or array from model output.
///
/// Tries, in order: the whole text, each fenced code block, then the outermost
/// `{...}` span and the outermost `[...]` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Some(value) = parse_structured(trimmed) {
        return Some(value);
    }

    for caps in fenced_block().captures_iter(trimmed) {
        if let Some(value) = caps.get(1).and_then(|m| parse_structured(m.as_str().trim())) {
            return Some(value);
        }
    }

    [('{', '}'), ('[', ']')]
        .into_iter()
        .find_map(|(open, close)| {
            let start = trimmed.find(open)?;
            let end = trimmed.rfind(close)?;
            (end > start)
                .then(|| &trimmed[start..=end])
                .and_then(parse_structured)
        })
}

fn parse_structured(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
