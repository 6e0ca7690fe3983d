use anyhow::{anyhow, bail, Context as _, Result};
use serde_json::{Map, Value};
use std::str::FromStr;

/// The JSON object spanning the first `{` to the last `}` of an LLM reply
pub(crate) fn extract_json_object(reply: &str) -> Result<Map<String, Value>> {
    let start = reply
        .find('{')
        .ok_or_else(|| anyhow!("no JSON object in LLM reply"))?;
    let end = reply
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| anyhow!("unterminated JSON object in LLM reply"))?;

    let value: Value =
        serde_json::from_str(&reply[start..=end]).context("LLM reply is not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        other => bail!("expected a JSON object, got {other}"),
    }
}

/// Parses a label field; absent or unknown labels yield `None`
pub(crate) fn label<T: FromStr>(object: &Map<String, Value>, key: &str) -> Option<T> {
    object
        .get(key)
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())
}

pub(crate) fn text(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn flag(object: &Map<String, Value>, key: &str) -> bool {
    match object.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Confidence in [0, 1]; numbers may also arrive as strings
pub(crate) fn confidence(object: &Map<String, Value>, key: &str) -> f64 {
    let raw = match object.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    raw.filter(|c: &f64| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(0.0)
}
