//! Generative text service abstraction
//!
//! Provides a unified interface for text generation with optional
//! research tools:
//! - OpenAI Responses API (web search, file search over vector stores)
//! - Deterministic mock for local runs

mod openai;

pub use openai::OpenAiResponsesClient;

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Research capability the model may call while generating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tool {
    /// Live web search
    WebSearch,
    /// Semantic search over a deal's uploaded documents
    DocumentSearch { index_id: String },
}

/// One generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Fixed system instructions
    pub instructions: String,
    /// Rendered user prompt
    pub prompt: String,
    pub tools: Vec<Tool>,
    pub max_tokens: u32,
}

/// A cited span in generated text.
///
/// Offsets are character (not byte) positions into [`GeneratedText::text`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextCitation {
    pub url: String,
    pub title: String,
    pub start: usize,
    pub end: usize,
}

/// Generated text with any source annotations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub text: String,
    pub citations: Vec<TextCitation>,
}

/// Trait for generative text services
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    /// Generate text for a single request
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Mock client for local runs without an API key
pub struct MockGenerativeClient;

#[async_trait]
impl GenerativeClient for MockGenerativeClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText> {
        let topic = request
            .prompt
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("the company")
            .trim();

        Ok(GeneratedText {
            text: format!(
                "{}\n\nThe available materials support a preliminary view on this topic. \
                Further diligence is recommended before a final decision.\n\n\
                [Mock response - generative API key not configured]",
                topic
            ),
            citations: Vec::new(),
        })
    }

    fn model_name(&self) -> &str {
        "mock-generation"
    }
}

/// Create a generative client based on configuration
pub fn create_generative_client(config: &LlmConfig) -> Result<Arc<dyn GenerativeClient>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "llm.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(OpenAiResponsesClient::new(
                key,
                config.model.clone(),
                config.api_base.clone(),
                config.timeout_secs,
            )?))
        }
        "mock" => Ok(Arc::new(MockGenerativeClient)),
        other => Err(AppError::Configuration {
            message: format!("Unknown llm provider: {}", other),
        }),
    }
}
