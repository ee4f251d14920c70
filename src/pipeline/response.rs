//! Model-response handling: raw text → validated structured value.
//!
//! Even when asked for bare JSON, models sometimes wrap the answer in a
//! ```` ```json ```` fence or add a leading sentence. The cleanup here is
//! deliberately narrow: strip an outer fence, otherwise fall back to the
//! outermost `{...}` span. Anything that still does not deserialize into the
//! expected type is an [`SyncError::InvalidModelResponse`].

use crate::error::SyncError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?\s*\n(.*)\n```\s*$").unwrap());

/// Strip an outer code fence, if present.
pub fn strip_json_fences(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map_or(trimmed, |m| m.as_str().trim()),
        None => trimmed,
    }
}

/// Best-effort isolation of the JSON object in a model answer.
fn json_candidate(input: &str) -> &str {
    let unfenced = strip_json_fences(input);
    if unfenced.starts_with('{') {
        return unfenced;
    }
    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    }
}

/// Parse and validate a model answer as `T`.
pub fn parse_structured<T: DeserializeOwned>(model: &str, text: &str) -> Result<T, SyncError> {
    let candidate = json_candidate(text);
    if candidate.is_empty() {
        return Err(SyncError::InvalidModelResponse {
            model: model.to_string(),
            detail: "empty response".into(),
        });
    }
    serde_json::from_str(candidate).map_err(|e| SyncError::InvalidModelResponse {
        model: model.to_string(),
        detail: e.to_string(),
    })
}
