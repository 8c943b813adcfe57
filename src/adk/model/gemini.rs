// SPDX-License-Identifier: MIT

//! Gemini Model - Google's Gemini API implementation

use super::{GenerationConfig, TextGenerator};
use crate::adk::error::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;

const PROVIDER: &str = "Gemini";

/// Google Gemini text generator
pub struct GeminiModel {
    client: Client,
    api_key: String,
    model_name: String,
    config: GenerationConfig,
}

impl GeminiModel {
    /// Create a new GeminiModel
    ///
    /// Requires `GOOGLE_API_KEY` environment variable to be set.
    pub fn new(model_name: String) -> Result<Self, ModelError> {
        let api_key =
            env::var("GOOGLE_API_KEY").map_err(|_| ModelError::ApiKeyMissing(PROVIDER.into()))?;
        Ok(Self {
            client: Client::new(),
            api_key,
            model_name,
            config: GenerationConfig::default(),
        })
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });

        let mut generation = serde_json::Map::new();
        if let Some(t) = self.config.temperature {
            generation.insert("temperature".into(), json!(t));
        }
        if let Some(n) = self.config.max_output_tokens {
            generation.insert("maxOutputTokens".into(), json!(n));
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        body
    }
}

/// Concatenate the text parts of the first candidate
fn response_text(resp_json: &Value) -> Result<String, ModelError> {
    let candidate = resp_json["candidates"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or_else(|| ModelError::InvalidResponse("No candidates in response".into()))?;

    if let Some(reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
        log::debug!("Gemini finish reason: {}", reason);
        if reason == "SAFETY" {
            return Err(ModelError::InvalidResponse(
                "Gemini blocked response due to safety filters.".into(),
            ));
        }
    }

    let parts = candidate["content"]["parts"].as_array().ok_or_else(|| {
        ModelError::InvalidResponse(format!("No parts in candidate: {}", candidate))
    })?;

    Ok(parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join(""))
}

#[async_trait]
impl TextGenerator for GeminiModel {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model_name, self.api_key
        );

        let body = self.request_body(prompt);
        log::debug!(
            "Gemini request body: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(ModelError::Request {
                provider: PROVIDER.into(),
                message: format!("{}: {}", status, text),
            });
        }

        let resp_json: Value = resp.json().await?;
        log::debug!("Gemini response: {}", resp_json);

        response_text(&resp_json)
    }
}
