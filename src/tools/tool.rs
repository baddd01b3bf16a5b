//! Tool trait and supporting types.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{Interrupt, SessionContext};

/// Error type for tool execution (runtime failures, not suspensions).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("rate limited, retry after {0:?}")]
    RateLimited(Option<Duration>),

    #[error("external service error: {0}")]
    ExternalService(String),
}

/// Whether a tool error is transient (worth retrying) or permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    Transient,
    Permanent,
}

impl ToolError {
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            ToolError::RateLimited(..)
            | ToolError::ExternalService(..)
            | ToolError::Timeout(..) => ToolErrorKind::Transient,
            ToolError::InvalidParameters(..) | ToolError::ExecutionFailed(..) => {
                ToolErrorKind::Permanent
            }
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ToolError::RateLimited(Some(d)) => Some(*d),
            _ => None,
        }
    }
}

/// What a tool invocation produced: either it ran to completion, or it
/// raised an [`Interrupt`] to suspend the agent loop (§4.3). Kept distinct
/// from `ToolError` so regular errors can never be confused with a
/// suspension in flight.
#[derive(Debug)]
pub enum ToolSignal {
    Error(ToolError),
    Interrupt(Interrupt),
}

impl From<ToolError> for ToolSignal {
    fn from(e: ToolError) -> Self {
        ToolSignal::Error(e)
    }
}

pub type ToolResult = Result<ToolOutput, ToolSignal>;

/// Retry configuration for tool execution.
#[derive(Debug, Clone)]
pub struct ToolRetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ToolRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff delay with 25% jitter, floored at 100ms.
///
/// Honors a provider-supplied `retry_after` hint when present, capped at
/// `config.max_delay`.
pub fn tool_retry_delay(attempt: u32, config: &ToolRetryConfig, error: Option<&ToolError>) -> Duration {
    if let Some(ToolError::RateLimited(Some(hint))) = error {
        return (*hint).min(config.max_delay);
    }
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let capped_ms = exp_ms.min(config.max_delay.as_millis() as u64);
    let jitter_range = capped_ms / 4;
    let jitter = if jitter_range > 0 {
        let offset = rand::thread_rng().gen_range(0..=jitter_range * 2);
        offset as i64 - jitter_range as i64
    } else {
        0
    };
    Duration::from_millis((capped_ms as i64 + jitter).max(100) as u64)
}

/// Output from a successful tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub result: serde_json::Value,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }

    pub fn text(text: impl Into<String>, duration: Duration) -> Self {
        Self {
            result: serde_json::Value::String(text.into()),
            duration,
        }
    }
}

/// Tool descriptor sent to the LLM as a function schema (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    /// Whether this tool may raise an [`Interrupt`] mid-execution.
    pub may_suspend: bool,
}

/// Trait for tools the agent can call during the ReAct loop.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether this tool may call `ctx.interrupt(...)`. Used to populate
    /// the tool descriptor's `may_suspend` flag.
    fn may_suspend(&self) -> bool {
        false
    }

    async fn execute(&self, params: serde_json::Value, ctx: &SessionContext) -> ToolResult;

    fn retry_config(&self) -> ToolRetryConfig {
        ToolRetryConfig::default()
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
            may_suspend: self.may_suspend(),
        }
    }
}

/// Extract a required string parameter from a JSON object.
pub fn require_str<'a>(params: &'a serde_json::Value, name: &str) -> Result<&'a str, ToolError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{name}' parameter")))
}

/// Extract a required parameter of any type from a JSON object.
pub fn require_param<'a>(
    params: &'a serde_json::Value,
    name: &str,
) -> Result<&'a serde_json::Value, ToolError> {
    params
        .get(name)
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{name}' parameter")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{PhaseScheduler, WorkflowType};
    use crate::session::State;

    #[derive(Debug)]
    pub struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes back the input message."
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            })
        }

        async fn execute(&self, params: serde_json::Value, _ctx: &SessionContext) -> ToolResult {
            let message = require_str(&params, "message")?;
            Ok(ToolOutput::text(message, Duration::from_millis(1)))
        }
    }

    fn test_ctx() -> SessionContext {
        SessionContext::new(
            State::new(WorkflowType::WeeklyReview, "user-1"),
            PhaseScheduler::new(WorkflowType::WeeklyReview),
        )
    }

    #[tokio::test]
    async fn echo_tool_executes() {
        let tool = EchoTool;
        let ctx = test_ctx();
        let result = tool
            .execute(serde_json::json!({"message": "hello"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.result, serde_json::json!("hello"));
    }

    #[test]
    fn require_str_missing() {
        let params = serde_json::json!({});
        let err = require_str(&params, "name").unwrap_err();
        assert!(err.to_string().contains("missing 'name'"));
    }

    #[test]
    fn tool_retry_delay_uses_rate_limit_hint() {
        let cfg = ToolRetryConfig::default();
        let hint = Duration::from_secs(10);
        let delay = tool_retry_delay(0, &cfg, Some(&ToolError::RateLimited(Some(hint))));
        assert_eq!(delay, hint);
    }

    #[test]
    fn tool_retry_delay_grows_exponentially() {
        let cfg = ToolRetryConfig {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            max_retries: 3,
        };
        for _ in 0..20 {
            let d0 = tool_retry_delay(0, &cfg, None);
            assert!(d0.as_millis() >= 1500 && d0.as_millis() <= 2500);
        }
    }

    #[test]
    fn error_kind_classification() {
        assert_eq!(
            ToolError::RateLimited(None).kind(),
            ToolErrorKind::Transient
        );
        assert_eq!(
            ToolError::InvalidParameters("x".into()).kind(),
            ToolErrorKind::Permanent
        );
    }
}
