// SPDX-License-Identifier: MIT

//! Model module - text generation collaborators
//!
//! Workflows only need prose or loosely structured JSON back from a model,
//! so the trait is a single prompt-in, text-out call. Implementations:
//! - [gemini] - Google's Gemini API

pub mod gemini;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::adk::error::ModelError;

/// Configuration for model generation
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

/// Core trait for text generation backends
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for a single prompt
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}
