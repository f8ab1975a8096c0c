//! JSON parsing helpers for AI backend responses
//!
//! Models often wrap the JSON payload in prose or ```json fences; the payload
//! is taken from the first `{` to the last `}`.

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

use super::types::{AiExtraction, DirectionResolution};

const RAW_PREVIEW_LEN: usize = 200;

/// Parse the classify_extract answer
pub fn parse_extraction(response: &str) -> Result<AiExtraction> {
    parse_json_object(response)
}

/// Parse the resolve_direction answer
pub fn parse_direction(response: &str) -> Result<DirectionResolution> {
    parse_json_object(response)
}

fn parse_json_object<T: DeserializeOwned>(response: &str) -> Result<T> {
    let response = response.trim();

    match (response.find('{'), response.rfind('}')) {
        (Some(s), Some(e)) if s < e => {
            let json_str = &response[s..=e];
            serde_json::from_str(json_str).map_err(|e| {
                Error::ClassificationService(format!(
                    "Invalid JSON from AI: {} | Raw: {}",
                    e,
                    preview(json_str)
                ))
            })
        }
        _ => Err(Error::ClassificationService(format!(
            "No JSON found in AI response | Raw: {}",
            preview(response)
        ))),
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > RAW_PREVIEW_LEN {
        let cut: String = text.chars().take(RAW_PREVIEW_LEN).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
