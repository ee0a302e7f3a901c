use crate::error::ServiceError;
use serde_json::Value;

/// Parse JSON out of model text
///
/// Accepts bare JSON, a fenced code block, or prose around a single object
/// or array.
///
/// # Errors
/// Returns `ServiceError::Decode` if no JSON value can be found.
pub fn extract_json(text: &str) -> Result<Value, ServiceError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(body) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(body) {
            return Ok(value);
        }
    }

    let start = trimmed.find(['{', '[']);
    let end = trimmed.rfind(['}', ']']);
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    let preview: String = trimmed.chars().take(80).collect();
    Err(ServiceError::Decode(format!("no JSON in model response: {preview}")))
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}
