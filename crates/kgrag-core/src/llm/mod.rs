//! LLM integration
//!
//! This module provides:
//! - The [`CompletionModel`] seam used by extraction and answer synthesis
//! - Request/response types matching the OpenAI-compatible API
//! - Normalization of string or multi-part model content
//! - An HTTP client with model fallback and rate-limit retry

mod client;
mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use client::LlmClient;
pub use types::{
    ChatRequest, ChatResponse, Choice, ContentPart, FinishReason, LlmResponse, Message,
    MessageRole, ModelOutput, OutputSchema, ResponseMessage, Usage,
};

/// A language model that maps a prompt to a completion
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Complete `prompt`, optionally asking for output that follows `schema`
    async fn invoke(&self, prompt: &str, schema: Option<&OutputSchema>) -> Result<ModelOutput>;

    /// Name of the model used for logging
    fn model_name(&self) -> &str {
        "unknown"
    }
}
