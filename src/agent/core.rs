//! `AgentCore`: binds an `LlmProvider` and a `ToolRegistry` and runs the
//! ReAct loop over a session's `State` (§4.2).

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;

use crate::error::{Error, LlmError};
use crate::llm::{ChatMessage, LlmProvider, Role, ToolCompletionRequest, ToolDefinition};
use crate::scheduler::Phase;
use crate::session::{Message, SessionContext, ToolCall as SessionToolCall};
use crate::tools::ToolRegistry;
use crate::tools::tool::ToolSignal;
use crate::util::approx_token_count;

/// Maximum tokens of conversation history sent to the model per call.
pub const MAX_INPUT_TOKENS: u32 = 6_000;
/// Maximum tokens requested back from the model.
pub const MAX_RESPONSE_TOKENS: u32 = 2_000;
/// Budget reserved for the rolling phase summary.
pub const SUMMARY_TOKENS: u32 = 500;

/// Default recursion ceiling: past this many loop iterations without a
/// terminal response, the session is presumed stuck (§4.2).
pub const DEFAULT_RECURSION_LIMIT: u32 = 150;

/// Past this many interrupts in one session, something is probably asking
/// the user the same question in a loop. Reported as a warning, never an
/// error — the session keeps running (§4.3).
pub const INTERRUPT_CEILING: u32 = 25;

/// Knobs for a single `invoke`/`stream` call, independent of the session's
/// own persisted state.
#[derive(Debug, Clone)]
pub struct AgentRunConfig {
    pub system_prompt: String,
    pub recursion_limit: u32,
    pub temperature: f32,
}

impl Default for AgentRunConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            temperature: 0.7,
        }
    }
}

fn default_system_prompt() -> String {
    "You are a time-boxed GTD coaching agent for a single ADHD user. Keep the \
     user moving through the current phase; don't dwell, don't lecture. Call \
     tools to record captures, actions, priorities, and phase transitions — \
     don't just describe what you'd do."
        .to_string()
}

/// How a session's ReAct loop ended.
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    /// The model produced a plain-text response with no further tool calls.
    Completed { content: Option<String> },
    /// A tool raised an interrupt; the runner must collect user input and
    /// resume via `ctx.stage_resume` before calling `invoke` again.
    Suspended { prompt: String },
}

/// Which `stream` emits: full state snapshots, per-step updates, or
/// updates plus the raw request/response exchanged with the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Values,
    Updates,
    Debug,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// `StreamMode::Values`: a snapshot of the session's messages so far.
    Values(serde_json::Value),
    /// `StreamMode::Updates` and `StreamMode::Debug`: one event per loop
    /// step (an LLM call or a single tool dispatch).
    Update { node: String, data: serde_json::Value },
    /// `StreamMode::Debug` only: the raw request sent to the model.
    Debug { node: String, detail: serde_json::Value },
}

/// A session's event stream, boxed since the underlying source (an eagerly
/// collected `Vec`, today) is an implementation detail callers shouldn't
/// need to name.
pub type AgentEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

pub struct AgentCore {
    llm: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
}

impl AgentCore {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm, tools: ToolRegistry::new() }
    }

    pub fn set_tools(&mut self, tools: ToolRegistry) {
        self.tools = tools;
    }

    /// Run to completion or suspension, discarding intermediate events.
    pub async fn invoke(&self, ctx: &SessionContext, config: &AgentRunConfig) -> Result<AgentOutcome, Error> {
        let (outcome, _events) = self.run_loop(ctx, config, StreamMode::Values).await?;
        Ok(outcome)
    }

    /// Run to completion or suspension, returning every intermediate event
    /// alongside the outcome. Events are collected eagerly — this provider
    /// has no token-level streaming transport, so there is nothing to yield
    /// lazily — but the `Stream` interface lets callers treat it the same
    /// way a genuinely incremental source would be consumed.
    pub async fn stream(
        &self,
        ctx: &SessionContext,
        config: &AgentRunConfig,
        mode: StreamMode,
    ) -> Result<(AgentOutcome, AgentEventStream), Error> {
        let (outcome, events) = self.run_loop(ctx, config, mode).await?;
        Ok((outcome, Box::pin(futures::stream::iter(events))))
    }

    async fn run_loop(
        &self,
        ctx: &SessionContext,
        config: &AgentRunConfig,
        mode: StreamMode,
    ) -> Result<(AgentOutcome, Vec<StreamEvent>), Error> {
        let mut events = Vec::new();

        // Replay a suspended tool call first, if one is pending: the
        // runner has already staged its resume value via `ctx.stage_resume`.
        let pending = { ctx.state.lock().await.pending_tool_call.clone() };
        if let Some(call) = pending {
            let (result, duration) = self.tools.dispatch(&call.name, call.arguments.clone(), ctx).await;
            match result {
                Err(ToolSignal::Interrupt(interrupt)) => {
                    // Still suspended (shouldn't normally happen on replay,
                    // but the resume value may have been consumed already).
                    self.record_interrupt(ctx).await;
                    return Ok((AgentOutcome::Suspended { prompt: interrupt.prompt }, events));
                }
                Err(ToolSignal::Error(err)) => {
                    self.record_tool_result(ctx, &call, format!("error: {err}"), true).await;
                }
                Ok(output) => {
                    self.record_tool_result(ctx, &call, output.result.to_string(), false).await;
                }
            }
            {
                let mut state = ctx.state.lock().await;
                state.pending_tool_call = None;
                state.tool_latencies.insert(call.name.clone(), duration.as_secs_f64());
            }
            if matches!(mode, StreamMode::Updates | StreamMode::Debug) {
                events.push(StreamEvent::Update {
                    node: format!("tool:{}", call.name),
                    data: serde_json::json!({"resumed": true}),
                });
            }
        }

        let mut iteration: u32 = 0;
        loop {
            iteration += 1;
            if iteration > config.recursion_limit {
                return Err(Error::RecursionLimit(iteration - 1));
            }

            let (urgency, warning) = {
                let mut scheduler = ctx.scheduler.lock().await;
                scheduler.check_time()
            };
            if urgency.is_urgent() {
                let mut state = ctx.state.lock().await;
                state.time_pressure = true;
                if let Some(w) = warning {
                    state.time_warnings.push(w);
                }
            }

            let request = self.prepare_request(ctx, config).await;
            if matches!(mode, StreamMode::Debug) {
                events.push(StreamEvent::Debug {
                    node: "llm_call".into(),
                    detail: serde_json::json!({"message_count": request.messages.len()}),
                });
            }

            let response = match self.call_llm_with_compaction(ctx, request).await {
                Ok(r) => r,
                Err(e) => return Err(e.into()),
            };

            if matches!(mode, StreamMode::Updates | StreamMode::Debug) {
                events.push(StreamEvent::Update {
                    node: "llm_call".into(),
                    data: serde_json::json!({"finish_reason": format!("{:?}", response.finish_reason)}),
                });
            }

            if response.tool_calls.is_empty() {
                let mut state = ctx.state.lock().await;
                state.messages.push(Message::Assistant {
                    content: response.content.clone().unwrap_or_default(),
                    tool_calls: Vec::new(),
                });
                state.phase_changed = false;
                if matches!(mode, StreamMode::Values) {
                    events.push(StreamEvent::Values(serde_json::to_value(&state.messages).unwrap_or_default()));
                }
                return Ok((AgentOutcome::Completed { content: response.content }, events));
            }

            let session_calls: Vec<SessionToolCall> = response
                .tool_calls
                .iter()
                .map(|tc| SessionToolCall { id: tc.id.clone(), name: tc.name.clone(), arguments: tc.arguments.clone() })
                .collect();
            {
                let mut state = ctx.state.lock().await;
                state.messages.push(Message::Assistant {
                    content: response.content.clone().unwrap_or_default(),
                    tool_calls: session_calls.clone(),
                });
                state.phase_changed = false;
            }

            for call in session_calls {
                let (result, duration) = self.tools.dispatch(&call.name, call.arguments.clone(), ctx).await;
                {
                    let mut state = ctx.state.lock().await;
                    state.tool_history.push(call.name.clone());
                    state.tool_latencies.insert(call.name.clone(), duration.as_secs_f64());
                }
                match result {
                    Err(ToolSignal::Interrupt(interrupt)) => {
                        {
                            let mut state = ctx.state.lock().await;
                            state.pending_tool_call = Some(call);
                            state.awaiting_input = true;
                        }
                        self.record_interrupt(ctx).await;
                        return Ok((AgentOutcome::Suspended { prompt: interrupt.prompt }, events));
                    }
                    Err(ToolSignal::Error(err)) => {
                        tracing::warn!(tool = %call.name, error = %err, "tool execution failed");
                        self.record_tool_result(ctx, &call, format!("error: {err}"), true).await;
                    }
                    Ok(output) => {
                        self.record_tool_result(ctx, &call, output.result.to_string(), false).await;
                    }
                }
                if matches!(mode, StreamMode::Updates | StreamMode::Debug) {
                    events.push(StreamEvent::Update {
                        node: format!("tool:{}", call.name),
                        data: serde_json::json!({}),
                    });
                }
            }

            if matches!(mode, StreamMode::Values) {
                let state = ctx.state.lock().await;
                events.push(StreamEvent::Values(serde_json::to_value(&state.messages).unwrap_or_default()));
            }
        }
    }

    /// Increments the session's interrupt counter and warns once the
    /// per-session ceiling is exceeded — a warning, never an error (§4.3).
    async fn record_interrupt(&self, ctx: &SessionContext) {
        let mut state = ctx.state.lock().await;
        state.interrupt_count += 1;
        if state.interrupt_count > INTERRUPT_CEILING {
            tracing::warn!(
                count = state.interrupt_count,
                ceiling = INTERRUPT_CEILING,
                "session exceeded the per-session interrupt ceiling"
            );
        }
    }

    async fn record_tool_result(&self, ctx: &SessionContext, call: &SessionToolCall, content: String, is_error: bool) {
        let mut state = ctx.state.lock().await;
        state.messages.push(Message::ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content,
            is_error,
        });
    }

    /// Calls the model, retrying exactly once after compacting the prompt
    /// to just the system message and the most recent exchange if the
    /// provider reports the context window was exceeded (§4.2 ambient
    /// addition — the provider itself already retries transient failures).
    async fn call_llm_with_compaction(
        &self,
        ctx: &SessionContext,
        request: ToolCompletionRequest,
    ) -> Result<crate::llm::ToolCompletionResponse, LlmError> {
        match self.llm.complete_with_tools(request.clone()).await {
            Err(LlmError::ContextExceeded) => {
                tracing::warn!("context window exceeded, compacting and retrying once");
                {
                    let mut state = ctx.state.lock().await;
                    state.context_overflow_count += 1;
                }
                let compacted = compact_to_system_and_last_exchange(request);
                self.llm.complete_with_tools(compacted).await
            }
            other => other,
        }
    }

    async fn prepare_request(&self, ctx: &SessionContext, config: &AgentRunConfig) -> ToolCompletionRequest {
        let messages = self.prepare_messages(ctx, config).await;
        let tools: Vec<ToolDefinition> = self
            .tools
            .schemas()
            .into_iter()
            .map(|s| ToolDefinition { name: s.name, description: s.description, parameters: s.parameters })
            .collect();
        ToolCompletionRequest::new(messages, tools)
            .with_max_tokens(MAX_RESPONSE_TOKENS)
    }

    /// The pre-model hook (§4.2): on a phase change, collapse everything
    /// but the last two messages into a rolling summary; then trim from
    /// the front until the prompt fits the character budget, counting each
    /// trim against `context_overflow_count`. Never mutates the persisted
    /// `state.messages` — only the outgoing copy.
    async fn prepare_messages(&self, ctx: &SessionContext, config: &AgentRunConfig) -> Vec<ChatMessage> {
        let elapsed = ctx.scheduler.lock().await.elapsed_in_phase();
        let mut state = ctx.state.lock().await;

        let window: Vec<Message> = if state.phase_changed {
            let summary = summarize_messages(&state.messages);
            state.message_summary = summary;
            state.messages.iter().rev().take(2).rev().cloned().collect()
        } else {
            state.messages.clone()
        };

        let mut chat_messages: Vec<ChatMessage> = window.iter().map(to_chat_message).collect();
        trim_to_token_budget(&mut chat_messages, MAX_INPUT_TOKENS as usize, &mut state.context_overflow_count);

        let phase = state.current_phase;
        let workflow = state.workflow_type;
        let phase_summary_tail = tail(&state.phase_summary, SUMMARY_TOKENS as usize * 4);

        let mut prompt = vec![ChatMessage::system(config.system_prompt.clone())];
        prompt.push(ChatMessage::system(phase_time_context(phase, workflow, elapsed)));
        prompt.push(ChatMessage::system(format!("Phase guidance: {}", phase.guidance())));
        if !phase_summary_tail.is_empty() {
            prompt.push(ChatMessage::system(format!("Recent session summary: {phase_summary_tail}")));
        }
        prompt.extend(chat_messages.drain(..));
        prompt
    }
}

fn to_chat_message(m: &Message) -> ChatMessage {
    match m {
        Message::System { content } => ChatMessage::system(content.clone()),
        Message::User { content } => ChatMessage::user(content.clone()),
        Message::Assistant { content, tool_calls } => {
            let calls = tool_calls
                .iter()
                .map(|tc| crate::llm::ToolCall { id: tc.id.clone(), name: tc.name.clone(), arguments: tc.arguments.clone() })
                .collect();
            ChatMessage::assistant_with_tool_calls(
                if content.is_empty() { None } else { Some(content.clone()) },
                calls,
            )
        }
        Message::ToolResult { call_id, name, content, .. } => {
            ChatMessage::tool_result(call_id.clone(), name.clone(), content.clone())
        }
    }
}

fn phase_time_context(phase: Phase, workflow: crate::scheduler::WorkflowType, elapsed: std::time::Duration) -> String {
    let limit = phase.time_limit_minutes(workflow);
    format!(
        "Current phase: {} ({} min budget, {}:{:02} elapsed).",
        phase.name(),
        limit,
        elapsed.as_secs() / 60,
        elapsed.as_secs() % 60
    )
}

/// Deterministic, non-LLM summary of the messages being collapsed on a
/// phase change: the point is a cheap breadcrumb for the next prompt, not
/// a polished recap, so no extra model round-trip is spent producing it.
fn summarize_messages(messages: &[Message]) -> String {
    let older = messages.iter().rev().skip(2).rev();
    let mut parts = Vec::new();
    for m in older {
        match m {
            Message::User { content } => parts.push(format!("user: {}", tail(content, 120))),
            Message::Assistant { content, .. } if !content.is_empty() => {
                parts.push(format!("assistant: {}", tail(content, 120)))
            }
            _ => {}
        }
    }
    tail(&parts.join(" | "), SUMMARY_TOKENS as usize * 4)
}

fn tail(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let start = s.chars().count() - max_chars;
    s.chars().skip(start).collect()
}

/// Aggressive trim for the pre-model hook (§4.2 step 3): drops whole
/// messages from the front ("last" strategy — keep the most recent ones)
/// until the window fits `max_tokens`, then keeps dropping until the window
/// starts on a user turn and ends on a user or tool turn, matching
/// `trim_messages(strategy="last", start_on="human", end_on=("human",
/// "tool"), allow_partial=False)`. Never splits a message's content.
fn trim_to_token_budget(messages: &mut Vec<ChatMessage>, max_tokens: usize, overflow_count: &mut u32) {
    let tokens = |msgs: &[ChatMessage]| -> usize { msgs.iter().map(|m| approx_token_count(&m.content)).sum() };

    if tokens(messages) <= max_tokens {
        return;
    }
    tracing::warn!(tokens = tokens(messages), max_tokens, "context over budget, trimming aggressively");

    while messages.len() > 1 && tokens(messages) > max_tokens {
        messages.remove(0);
        *overflow_count += 1;
    }
    while messages.len() > 1 && messages.first().map(|m| m.role) != Some(Role::User) {
        messages.remove(0);
    }
    while messages.len() > 1 && !matches!(messages.last().map(|m| m.role), Some(Role::User) | Some(Role::Tool)) {
        messages.pop();
    }
}

/// Drops every message except the system prompts and the most recent
/// user/assistant exchange, for the single compaction retry after a
/// context-length-exceeded response.
fn compact_to_system_and_last_exchange(mut request: ToolCompletionRequest) -> ToolCompletionRequest {
    let (system, rest): (Vec<_>, Vec<_>) = request
        .messages
        .drain(..)
        .partition(|m| matches!(m.role, crate::llm::Role::System));
    let tail: Vec<_> = rest.into_iter().rev().take(2).rev().collect();
    let mut messages = system;
    messages.extend(tail);
    request.messages = messages;
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FinishReason, ModelMetadata, ToolCall as LlmToolCall, ToolCompletionResponse};
    use crate::scheduler::{PhaseScheduler, WorkflowType};
    use crate::session::State;
    use crate::tools::clarify::{AskUserTool, CaptureItemTool};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct ScriptedLlm {
        responses: StdMutex<Vec<ToolCompletionResponse>>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<ToolCompletionResponse>) -> Self {
            Self { responses: StdMutex::new(responses), calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn health_check(&self) -> Result<(), LlmError> {
            Ok(())
        }
        async fn complete_with_tools(&self, _req: ToolCompletionRequest) -> Result<ToolCompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(LlmError::InvalidContent);
            }
            Ok(responses.remove(0))
        }
        async fn model_metadata(&self) -> Result<ModelMetadata, LlmError> {
            Ok(ModelMetadata { id: "scripted".into(), context_length: None })
        }
    }

    fn text_response(content: &str) -> ToolCompletionResponse {
        ToolCompletionResponse {
            content: Some(content.to_string()),
            tool_calls: vec![],
            input_tokens: 10,
            output_tokens: 10,
            finish_reason: FinishReason::Stop,
        }
    }

    fn tool_call_response(id: &str, name: &str, args: serde_json::Value) -> ToolCompletionResponse {
        ToolCompletionResponse {
            content: None,
            tool_calls: vec![LlmToolCall { id: id.into(), name: name.into(), arguments: args }],
            input_tokens: 10,
            output_tokens: 10,
            finish_reason: FinishReason::ToolUse,
        }
    }

    fn test_ctx() -> SessionContext {
        SessionContext::new(
            State::new(WorkflowType::WeeklyReview, "user-1"),
            PhaseScheduler::new(WorkflowType::WeeklyReview),
        )
    }

    #[tokio::test]
    async fn completes_on_plain_text_response() {
        let llm = Arc::new(ScriptedLlm::new(vec![text_response("all set")]));
        let mut agent = AgentCore::new(llm);
        agent.set_tools(ToolRegistry::new());
        let ctx = test_ctx();
        let outcome = agent.invoke(&ctx, &AgentRunConfig::default()).await.unwrap();
        assert!(matches!(outcome, AgentOutcome::Completed { content: Some(c) } if c == "all set"));
    }

    #[tokio::test]
    async fn dispatches_tool_call_then_completes() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            tool_call_response("call-1", "capture_item", serde_json::json!({"item": "buy milk"})),
            text_response("captured it"),
        ]));
        let mut agent = AgentCore::new(llm);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CaptureItemTool));
        agent.set_tools(tools);
        let ctx = test_ctx();
        let outcome = agent.invoke(&ctx, &AgentRunConfig::default()).await.unwrap();
        assert!(matches!(outcome, AgentOutcome::Completed { .. }));
        assert_eq!(ctx.state.lock().await.captures, vec!["buy milk"]);
    }

    #[tokio::test]
    async fn tool_interrupt_suspends_the_loop() {
        let llm = Arc::new(ScriptedLlm::new(vec![tool_call_response(
            "call-1",
            "ask_user",
            serde_json::json!({"question": "what's next?"}),
        )]));
        let mut agent = AgentCore::new(llm);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(AskUserTool));
        agent.set_tools(tools);
        let ctx = test_ctx();
        let outcome = agent.invoke(&ctx, &AgentRunConfig::default()).await.unwrap();
        assert!(matches!(outcome, AgentOutcome::Suspended { .. }));
        assert!(ctx.state.lock().await.pending_tool_call.is_some());
        assert_eq!(ctx.state.lock().await.interrupt_count, 1);
    }

    #[tokio::test]
    async fn nested_interrupts_increment_the_counter_each_time() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            tool_call_response("call-1", "ask_user", serde_json::json!({"question": "first?"})),
            tool_call_response("call-2", "ask_user", serde_json::json!({"question": "second?"})),
            text_response("done"),
        ]));
        let mut agent = AgentCore::new(llm);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(AskUserTool));
        agent.set_tools(tools);
        let ctx = test_ctx();

        agent.invoke(&ctx, &AgentRunConfig::default()).await.unwrap();
        assert_eq!(ctx.state.lock().await.interrupt_count, 1);

        ctx.stage_resume("first answer".into()).await;
        agent.invoke(&ctx, &AgentRunConfig::default()).await.unwrap();
        assert_eq!(ctx.state.lock().await.interrupt_count, 2);

        ctx.stage_resume("second answer".into()).await;
        let outcome = agent.invoke(&ctx, &AgentRunConfig::default()).await.unwrap();
        assert!(matches!(outcome, AgentOutcome::Completed { .. }));
        assert_eq!(ctx.state.lock().await.interrupt_count, 2);
    }

    #[tokio::test]
    async fn resume_replays_pending_tool_call() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            tool_call_response("call-1", "ask_user", serde_json::json!({"question": "what's next?"})),
            text_response("got it"),
        ]));
        let mut agent = AgentCore::new(llm);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(AskUserTool));
        agent.set_tools(tools);
        let ctx = test_ctx();

        let first = agent.invoke(&ctx, &AgentRunConfig::default()).await.unwrap();
        assert!(matches!(first, AgentOutcome::Suspended { .. }));

        ctx.stage_resume("buy groceries".into()).await;
        let second = agent.invoke(&ctx, &AgentRunConfig::default()).await.unwrap();
        assert!(matches!(second, AgentOutcome::Completed { .. }));
        assert!(ctx.state.lock().await.pending_tool_call.is_none());
    }

    #[tokio::test]
    async fn recursion_limit_is_enforced() {
        let responses: Vec<_> = (0..5)
            .map(|i| tool_call_response(&format!("c{i}"), "capture_item", serde_json::json!({"item": format!("x{i}")})))
            .collect();
        let llm = Arc::new(ScriptedLlm::new(responses));
        let mut agent = AgentCore::new(llm);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CaptureItemTool));
        agent.set_tools(tools);
        let ctx = test_ctx();
        let config = AgentRunConfig { recursion_limit: 3, ..AgentRunConfig::default() };
        let err = agent.invoke(&ctx, &config).await.unwrap_err();
        assert!(matches!(err, Error::RecursionLimit(3)));
    }

    #[test]
    fn compaction_keeps_system_and_last_exchange() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("old 1"),
            ChatMessage::assistant_with_tool_calls(Some("old reply".into()), vec![]),
            ChatMessage::user("old 2"),
            ChatMessage::assistant_with_tool_calls(Some("latest".into()), vec![]),
        ];
        let request = ToolCompletionRequest::new(messages, vec![]);
        let compacted = compact_to_system_and_last_exchange(request);
        assert_eq!(compacted.messages.len(), 3);
        assert_eq!(compacted.messages[0].content, "sys");
        assert_eq!(compacted.messages[2].content, "latest");
    }

    #[test]
    fn summarize_messages_truncates_to_summary_budget() {
        let messages: Vec<Message> = (0..50)
            .map(|i| Message::User { content: format!("message number {i} with some padding text") })
            .collect();
        let summary = summarize_messages(&messages);
        assert!(summary.chars().count() <= SUMMARY_TOKENS as usize * 4);
    }
}
