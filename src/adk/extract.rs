// SPDX-License-Identifier: MIT

//! Structured output extraction
//!
//! Text generators are asked for JSON but often wrap it in prose. The
//! extractor takes everything from the first `{` to the last `}` and parses
//! it; anything else is an `ExtractionError`, which callers fold into state
//! as an ordinary value.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Reason recorded when the raw text holds no parseable JSON object
pub const INVALID_JSON: &str = "invalid_json";

/// Failure to pull JSON out of generator text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionError {
    pub reason: String,
    pub raw: String,
}

impl ExtractionError {
    fn invalid_json(raw: &str) -> Self {
        Self {
            reason: INVALID_JSON.to_string(),
            raw: raw.to_string(),
        }
    }

    /// Fallback record stored in state in place of the expected object
    pub fn to_value(&self) -> Value {
        json!({ "error": self.reason, "raw_output": self.raw })
    }
}

impl std::fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason, self.raw)
    }
}

/// Extract the JSON value spanning the first `{` and the last `}` of `raw`
pub fn extract(raw: &str) -> Result<Value, ExtractionError> {
    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return Err(ExtractionError::invalid_json(raw));
    };
    if end < start {
        return Err(ExtractionError::invalid_json(raw));
    }

    serde_json::from_str(&raw[start..=end]).map_err(|e| {
        log::debug!("Extraction failed: {}", e);
        ExtractionError::invalid_json(raw)
    })
}

/// Extract a value, substituting the fallback record on failure
pub fn extract_or_fallback(raw: &str) -> Value {
    match extract(raw) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Non-JSON generator output, fallback applied");
            e.to_value()
        }
    }
}
