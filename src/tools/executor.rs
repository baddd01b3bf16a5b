//! Tool registry: binds tool names to implementations and dispatches calls
//! from the agent loop, applying retry and recording latencies.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::time::{Duration, Instant};

use crate::session::SessionContext;
use crate::tools::retry::retry_tool_execute;
use crate::tools::tool::{Tool, ToolOutput, ToolSchema, ToolSignal};

/// Registry of tools available to the agent for a given session.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    /// Dispatch a named tool call with retry, recording wall-clock latency.
    ///
    /// An unknown tool name surfaces as a tool-result error (§7 ToolError
    /// handling) rather than aborting the loop.
    pub async fn dispatch(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &SessionContext,
    ) -> (Result<ToolOutput, ToolSignal>, Duration) {
        let start = Instant::now();
        let Some(tool) = self.tools.get(name) else {
            return (
                Err(crate::tools::tool::ToolError::ExecutionFailed(format!(
                    "unknown tool: {name}"
                ))
                .into()),
                start.elapsed(),
            );
        };

        let config = tool.retry_config();
        let retry_counter = AtomicU32::new(0);
        let outcome = retry_tool_execute(
            tool.as_ref(),
            &params,
            ctx,
            &config,
            Duration::from_secs(30),
            &retry_counter,
        )
        .await;
        (outcome.result, start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::scheduler::{PhaseScheduler, WorkflowType};
    use crate::session::State;
    use crate::tools::tool::{ToolResult, require_str};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"message": {"type": "string"}}, "required": ["message"]})
        }
        async fn execute(&self, params: serde_json::Value, _ctx: &SessionContext) -> ToolResult {
            Ok(ToolOutput::text(
                require_str(&params, "message")?,
                Duration::from_millis(1),
            ))
        }
    }

    fn test_ctx() -> SessionContext {
        SessionContext::new(
            State::new(WorkflowType::WeeklyReview, "user-1"),
            PhaseScheduler::new(WorkflowType::WeeklyReview),
        )
    }

    #[tokio::test]
    async fn dispatch_known_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let ctx = test_ctx();
        let (result, _) = registry
            .dispatch("echo", serde_json::json!({"message": "hi"}), &ctx)
            .await;
        assert_eq!(result.unwrap().result, serde_json::json!("hi"));
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_tool_error_not_panic() {
        let registry = ToolRegistry::new();
        let ctx = test_ctx();
        let (result, _) = registry.dispatch("nope", serde_json::json!({}), &ctx).await;
        assert!(matches!(result, Err(ToolSignal::Error(_))));
    }
}
