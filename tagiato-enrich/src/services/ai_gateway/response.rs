//! Backend response normalization
//!
//! Raw output may be bare JSON, JSON in a markdown code fence, or a JSON
//! object embedded in prose. Extraction tries those three shapes in that
//! order; output matching none is an `Unparseable` error, never a panic.

use serde_json::{Map, Value};
use tagiato_common::{AiOperation, GpsCoordinates};

use super::AiError;
use crate::models::AiResult;

/// Longest raw-output excerpt kept in an unparseable-response error
const EXCERPT_LEN: usize = 200;

/// Parse raw backend output into a normalized result
pub fn parse_response(operation: AiOperation, raw: &str) -> Result<AiResult, AiError> {
    let value = extract_json(raw).ok_or_else(|| AiError::Unparseable {
        excerpt: excerpt(raw),
    })?;
    normalize(operation, &value).map_err(|reason| AiError::Unparseable {
        excerpt: format!("{}: {}", reason, excerpt(raw)),
    })
}

/// First JSON object found by the three extraction strategies
pub fn extract_json(raw: &str) -> Option<Value> {
    fenced_block(raw)
        .and_then(parse_object)
        .or_else(|| parse_object(raw.trim()))
        .or_else(|| embedded_object(raw))
}

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .filter(Value::is_object)
}

/// Contents of the first ``` fence, minus an optional language tag
fn fenced_block(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after = &raw[open + 3..];
    // Language tag runs to the end of the opening line
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// First balanced `{...}` span that parses as an object
///
/// Candidates are tried in order of their opening brace.
fn embedded_object(raw: &str) -> Option<Value> {
    balanced_spans(raw)
        .into_iter()
        .find_map(|(start, end)| parse_object(&raw[start..end]))
}

/// Byte ranges of every closed `{...}` pair, sorted by start
///
/// Single pass with a stack of open braces. Braces inside string literals
/// (with escapes) are ignored; quotes only count inside an open brace, so
/// stray quotes in surrounding prose do not hide an object.
fn balanced_spans(text: &str) -> Vec<(usize, usize)> {
    let mut open: Vec<usize> = Vec::new();
    let mut spans = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if !open.is_empty() => in_string = true,
            '{' => open.push(i),
            '}' => {
                if let Some(start) = open.pop() {
                    spans.push((start, i + 1));
                }
            }
            _ => {}
        }
    }

    spans.sort_unstable();
    spans
}

/// Map the operation's JSON contract onto an [`AiResult`]
///
/// describe: `{"description": str}`; blank or missing is an empty result.
/// locate: `{"gps": {"lat", "lng"} | {} | null, "confidence", "location_name",
/// "reasoning"}`; no GPS and no place name is an empty result. A GPS object
/// that is present but not a valid coordinate pair is an error.
pub fn normalize(operation: AiOperation, value: &Value) -> Result<AiResult, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "response is not a JSON object".to_string())?;

    let mut result = AiResult::empty(operation);
    result.reasoning = text_field(obj, "reasoning")?;

    match operation {
        AiOperation::Describe => {
            result.description = text_field(obj, "description")?;
            result.empty = result.description.is_none();
        }
        AiOperation::Locate => {
            result.refined_gps = gps_field(obj)?;
            result.location_name = text_field(obj, "location_name")?;
            result.confidence = obj.get("confidence").and_then(|c| match c {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            });
            result.empty = result.refined_gps.is_none() && result.location_name.is_none();
        }
    }

    Ok(result)
}

/// Trimmed string field; null, missing and blank all read as `None`
fn text_field(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, String> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(other) => Err(format!("field '{}' is not a string: {}", key, other)),
    }
}

fn gps_field(obj: &Map<String, Value>) -> Result<Option<GpsCoordinates>, String> {
    let gps = match obj.get("gps") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(gps)) if gps.is_empty() => return Ok(None),
        Some(Value::Object(gps)) => gps,
        Some(other) => return Err(format!("field 'gps' is not an object: {}", other)),
    };

    let coordinate = |key: &str| -> Result<f64, String> {
        match gps.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| format!("gps.{} missing or not a number", key))
    };

    let coords = GpsCoordinates::new(coordinate("lat")?, coordinate("lng")?);
    if !coords.is_valid() {
        return Err(format!("gps out of range: {}", coords));
    }
    Ok(Some(coords))
}

fn excerpt(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out: String = trimmed.chars().take(EXCERPT_LEN).collect();
    if trimmed.chars().count() > EXCERPT_LEN {
        out.push('…');
    }
    out
}
