//! OpenAI-compatible chat-completions provider. Connects to any endpoint
//! speaking the OpenAI Chat Completions wire format (`LM_URL`/`LM_MODEL`).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, FinishReason, LlmProvider, ModelMetadata, Role, ToolCall, ToolCompletionRequest,
    ToolCompletionResponse,
};

const PROVIDER_NAME: &str = "openai_compatible";

/// 3 attempts, 2-10s bounds, exponential with +/-25% jitter (§4.2).
const MAX_RETRIES: u32 = 3;
const INITIAL_DELAY_MS: u64 = 2_000;
const MAX_DELAY_MS: u64 = 10_000;

pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url: base_url.into(), model: model.into() })
    }

    async fn send_with_retry(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError> {
        let mut delay_ms = INITIAL_DELAY_MS;
        for attempt in 0..MAX_RETRIES {
            match self.send_once(request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let retryable = matches!(err, LlmError::RequestFailed(_) | LlmError::RateLimited { .. });
                    if attempt + 1 == MAX_RETRIES || !retryable {
                        return Err(err);
                    }
                    tracing::warn!(attempt, delay_ms, error = %err, "LLM request failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    let jitter = (delay_ms as f64 * 0.25) as i64;
                    let jitter_adjustment = if rand::random::<bool>() { jitter } else { -jitter };
                    let new_delay = (delay_ms as i64 * 2).saturating_add(jitter_adjustment);
                    delay_ms = new_delay.max(1).min(MAX_DELAY_MS as i64) as u64;
                }
            }
        }
        unreachable!("loop always returns within MAX_RETRIES iterations")
    }

    async fn send_once(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(std::time::Duration::from_secs);
            return Err(LlmError::RateLimited { retry_after });
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::BAD_REQUEST && looks_like_context_overflow(&body) {
                return Err(LlmError::ContextExceeded);
            }
            return Err(LlmError::Unavailable(format!("{PROVIDER_NAME} rejected request: {status} {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed(format!("{status}: {body}")));
        }
        response.json().await.map_err(|e| LlmError::RequestFailed(e.to_string()))
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn complete_with_tools(&self, req: ToolCompletionRequest) -> Result<ToolCompletionResponse, LlmError> {
        let messages: Vec<ChatCompletionMessage> = req.messages.into_iter().map(Into::into).collect();
        let tools: Vec<ChatCompletionTool> = req
            .tools
            .into_iter()
            .map(|t| ChatCompletionTool {
                tool_type: "function".to_string(),
                function: ChatCompletionFunction { name: t.name, description: Some(t.description), parameters: Some(t.parameters) },
            })
            .collect();

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream: false,
            tools: if tools.is_empty() { None } else { Some(tools) },
        };

        let response = self.send_with_retry(&request).await?;
        let choice = response.choices.into_iter().next().ok_or(LlmError::InvalidContent)?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let arguments = serde_json::from_str(&tc.function.arguments).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, raw = %tc.function.arguments, "failed to parse tool call arguments");
                    serde_json::Value::Object(Default::default())
                });
                ToolCall { id: tc.id, name: tc.function.name, arguments }
            })
            .collect();

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("tool_calls") => FinishReason::ToolUse,
            Some("content_filter") => FinishReason::ContentFilter,
            _ if !tool_calls.is_empty() => FinishReason::ToolUse,
            _ => FinishReason::Unknown,
        };

        Ok(ToolCompletionResponse {
            content: choice.message.content,
            tool_calls,
            finish_reason,
            input_tokens: response.usage.prompt_tokens,
            output_tokens: response.usage.completion_tokens,
        })
    }

    async fn model_metadata(&self) -> Result<ModelMetadata, LlmError> {
        Ok(ModelMetadata { id: self.model.clone(), context_length: None })
    }
}

/// Heuristic match for an OpenAI-style "context_length_exceeded" 400 body,
/// distinguishing it from other client errors so the agent loop can
/// compact and retry once instead of treating it as terminal (§4.2).
fn looks_like_context_overflow(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("context_length_exceeded")
        || lower.contains("maximum context length")
        || lower.contains("context window")
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatCompletionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatCompletionTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatCompletionMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatCompletionToolCall>>,
}

impl From<ChatMessage> for ChatCompletionMessage {
    fn from(msg: ChatMessage) -> Self {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        Self {
            role: role.to_string(),
            content: if msg.content.is_empty() { None } else { Some(msg.content) },
            tool_call_id: msg.tool_call_id,
            name: msg.name,
            tool_calls: msg.tool_calls.map(|calls| {
                calls
                    .into_iter()
                    .map(|c| ChatCompletionToolCall {
                        id: c.id,
                        tool_type: "function".to_string(),
                        function: ChatCompletionFunctionCall { name: c.name, arguments: c.arguments.to_string() },
                    })
                    .collect()
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatCompletionFunction,
}

#[derive(Debug, Serialize)]
struct ChatCompletionFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: ChatCompletionUsage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatCompletionToolCall>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatCompletionToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatCompletionFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatCompletionFunctionCall {
    name: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_conversion_keeps_tool_call_id() {
        let msg = ChatMessage::tool_result("call-1", "ask_user", "yes");
        let converted: ChatCompletionMessage = msg.into();
        assert_eq!(converted.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(converted.role, "tool");
    }

    #[test]
    fn provider_construction_with_bad_url_scheme_still_builds_client() {
        let provider = OpenAiCompatibleProvider::new("http://localhost:1234/v1", "local-model", 30);
        assert!(provider.is_ok());
    }

    #[test]
    fn context_overflow_body_is_recognized() {
        assert!(looks_like_context_overflow(
            "{\"error\": {\"message\": \"This model's maximum context length is 4096 tokens\", \"code\": \"context_length_exceeded\"}}"
        ));
        assert!(!looks_like_context_overflow("{\"error\": \"invalid api key\"}"));
    }
}
