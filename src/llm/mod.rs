//! LLM integration: a single OpenAI-compatible chat-completions client
//! (`LM_URL` / `LM_MODEL`), matching the external interface this agent
//! actually speaks (§6).

mod openai_compatible;
pub mod provider;

pub use openai_compatible::OpenAiCompatibleProvider;
pub use provider::{
    ChatMessage, FinishReason, LlmProvider, ModelMetadata, Role, StreamChunk, ToolCall, ToolCompletionRequest,
    ToolCompletionResponse, ToolDefinition,
};

use std::sync::Arc;

use crate::error::LlmError;

pub fn create_llm_provider(base_url: &str, model: &str, timeout_secs: u64) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenAiCompatibleProvider::new(base_url, model, timeout_secs)?;
    Ok(Arc::new(provider))
}
