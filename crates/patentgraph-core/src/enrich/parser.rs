//! Locating the JSON array inside free-form model output

use serde_json::Value;
use thiserror::Error;

/// Why a successful response yielded nothing usable
#[derive(Debug, Error)]
pub enum MalformedResponse {
    #[error("response contains no JSON array")]
    NoArray,

    #[error("invalid JSON array: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Slice from the first `[` to the last `]`, inclusive
pub fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Decode the array embedded in `text` into its elements
pub fn parse_json_array(text: &str) -> Result<Vec<Value>, MalformedResponse> {
    let slice = extract_json_array(text).ok_or(MalformedResponse::NoArray)?;
    Ok(serde_json::from_str(slice)?)
}
