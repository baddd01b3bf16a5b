//! Concrete GTD tools: the small, session-state-mutating operations the
//! agent calls during a weekly review or daily clarify pass.

use std::time::Duration;

use async_trait::async_trait;

use crate::memory::{Episode, EpisodeType};
use crate::scheduler::{AlertKind, Phase};
use crate::session::SessionContext;
use crate::tools::tool::{
    Tool, ToolError, ToolOutput, ToolResult, require_param, require_str,
};

/// Emits an episode through `ctx.memory`, if one is attached. A no-op
/// (not an error) when memory isn't wired up, matching the "never fails
/// the agent loop" contract of `BatchingMemory` itself.
async fn emit_episode(ctx: &SessionContext, episode_type: EpisodeType, phase: Phase, data: serde_json::Value) {
    let Some(memory) = ctx.memory.as_ref() else { return };
    let state = ctx.state.lock().await;
    let episode = Episode::new(episode_type, phase, data, state.session_id.clone(), state.user_id.clone());
    drop(state);
    memory.add_episode(episode).await;
}

/// Fetches augmentation context for `query`, if memory is attached and
/// enough prior captures exist (§4.5 "Augmentation to tools"). Returns an
/// empty vec otherwise — never fails the tool call.
async fn augmentation_hits(ctx: &SessionContext, query: &str) -> Vec<serde_json::Value> {
    let Some(memory) = ctx.memory.as_ref() else { return Vec::new() };
    let (group_id, prior_capture_count) = {
        let state = ctx.state.lock().await;
        (state.user_id.clone(), state.captures.len())
    };
    memory
        .augmentation_context(&group_id, query, prior_capture_count)
        .await
        .into_iter()
        .map(|hit| serde_json::json!({"content": hit.content, "score": hit.decayed_score}))
        .collect()
}

/// Suspends the loop to ask the user a question and waits for their reply.
///
/// This is the single interrupting tool; every other tool in this module
/// operates on data already present in the assistant's arguments.
pub struct AskUserTool;

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "Ask the user a question and wait for their reply. Suspends the session until the user responds."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": {"type": "string", "description": "The question to ask the user"}
            },
            "required": ["question"]
        })
    }

    fn may_suspend(&self) -> bool {
        true
    }

    async fn execute(&self, params: serde_json::Value, ctx: &SessionContext) -> ToolResult {
        let start = std::time::Instant::now();
        let question = require_str(&params, "question")?;
        let hits = augmentation_hits(ctx, question).await;
        let prompt = if hits.is_empty() {
            question.to_string()
        } else {
            let context: Vec<String> = hits.iter().filter_map(|h| h["content"].as_str().map(str::to_string)).collect();
            format!("{question}\n\n(related from prior sessions: {})", context.join("; "))
        };
        let reply = ctx.interrupt(prompt).await?;
        let phase = ctx.state.lock().await.current_phase;
        emit_episode(
            ctx,
            EpisodeType::Interaction,
            phase,
            serde_json::json!({"role": "user", "content": reply}),
        )
        .await;
        Ok(ToolOutput::text(reply, start.elapsed()))
    }
}

/// Records a quick capture during mind-sweep or daily inbox processing.
pub struct CaptureItemTool;

#[async_trait]
impl Tool for CaptureItemTool {
    fn name(&self) -> &str {
        "capture_item"
    }

    fn description(&self) -> &str {
        "Record a captured item (a task, idea, or loose end) without filtering or judging it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "item": {"type": "string", "description": "The captured text, verbatim"}
            },
            "required": ["item"]
        })
    }

    async fn execute(&self, params: serde_json::Value, ctx: &SessionContext) -> ToolResult {
        let start = std::time::Instant::now();
        let item = require_str(&params, "item")?;
        if item.trim().is_empty() {
            return Err(ToolError::InvalidParameters("item must not be empty".into()).into());
        }
        let mut state = ctx.state.lock().await;
        state.captures.push(item.to_string());
        let count = state.captures.len();
        let phase = state.current_phase;
        drop(state);

        emit_episode(ctx, EpisodeType::MindsweepCapture, phase, serde_json::json!({"content": item})).await;

        Ok(ToolOutput::success(
            serde_json::json!({"captured": item, "total_captures": count}),
            start.elapsed(),
        ))
    }
}

/// Clarifies a single inbox item into a next action (daily clarify flow).
pub struct ClarifyNextActionTool;

#[async_trait]
impl Tool for ClarifyNextActionTool {
    fn name(&self) -> &str {
        "clarify_next_action"
    }

    fn description(&self) -> &str {
        "Record the clarified next action for an inbox item, optionally assigning it to a project."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "item": {"type": "string"},
                "next_action": {"type": "string"},
                "project": {"type": "string"}
            },
            "required": ["item", "next_action"]
        })
    }

    async fn execute(&self, params: serde_json::Value, ctx: &SessionContext) -> ToolResult {
        let start = std::time::Instant::now();
        let item = require_str(&params, "item")?;
        let next_action = require_str(&params, "next_action")?;
        let project = params.get("project").and_then(|v| v.as_str());

        let mut state = ctx.state.lock().await;
        state
            .processed_items
            .push(format!("{item} -> {next_action}"));
        if let Some(project) = project
            && !state.projects.iter().any(|p| p == project)
        {
            state.projects.push(project.to_string());
        }
        let phase = state.current_phase;
        drop(state);

        let prior_context = augmentation_hits(ctx, item).await;
        emit_episode(
            ctx,
            EpisodeType::Interaction,
            phase,
            serde_json::json!({"content": format!("{item} -> {next_action}")}),
        )
        .await;

        Ok(ToolOutput::success(
            serde_json::json!({
                "item": item,
                "next_action": next_action,
                "project": project,
                "prior_context": prior_context,
            }),
            start.elapsed(),
        ))
    }
}

/// Moves the session to the next phase of its workflow (§4.1 transition).
pub struct TransitionPhaseTool;

#[async_trait]
impl Tool for TransitionPhaseTool {
    fn name(&self) -> &str {
        "transition_phase"
    }

    fn description(&self) -> &str {
        "Transition the session to the next phase of the workflow."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "to": {"type": "string", "description": "Target phase name, e.g. MIND_SWEEP"}
            },
            "required": ["to"]
        })
    }

    async fn execute(&self, params: serde_json::Value, ctx: &SessionContext) -> ToolResult {
        let start = std::time::Instant::now();
        let to = require_str(&params, "to")?;
        let phase = Phase::from_name(to)
            .ok_or_else(|| ToolError::InvalidParameters(format!("unknown phase: {to}")))?;

        let mut scheduler = ctx.scheduler.lock().await;
        let outcome = scheduler
            .transition(phase)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        scheduler.send_alert(AlertKind::PhaseChange, Some(phase.name()));
        drop(scheduler);

        let mut state = ctx.state.lock().await;
        state.completed_phases.push(outcome.from);
        state.current_phase = outcome.to;
        state.phase_changed = true;
        state.phase_time_limit_minutes = outcome.to.time_limit_minutes(state.workflow_type);
        state
            .phase_durations
            .insert(outcome.from.name().to_string(), outcome.from_duration.as_secs_f64());
        drop(state);
        ctx.mark_phase_entered_now().await;

        Ok(ToolOutput::success(
            serde_json::json!({
                "from": outcome.from.name(),
                "to": outcome.to.name(),
                "next_tool_hint": outcome.next_tool_hint,
            }),
            start.elapsed(),
        ))
    }
}

/// Reports remaining time in the current phase (§4.1 check_time).
pub struct CheckTimeRemainingTool;

#[async_trait]
impl Tool for CheckTimeRemainingTool {
    fn name(&self) -> &str {
        "check_time_remaining"
    }

    fn description(&self) -> &str {
        "Check how much time remains in the current phase."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: serde_json::Value, ctx: &SessionContext) -> ToolResult {
        let start = std::time::Instant::now();
        let mut scheduler = ctx.scheduler.lock().await;
        let (urgency, warning) = scheduler.check_time();
        let elapsed = scheduler.elapsed_in_phase();
        drop(scheduler);

        if urgency.is_urgent() {
            let mut state = ctx.state.lock().await;
            state.time_pressure = true;
            state.interaction_mode = crate::session::InteractionMode::Urgent;
            if let Some(ref w) = warning {
                state.time_warnings.push(w.clone());
            }
        }

        Ok(ToolOutput::success(
            serde_json::json!({
                "urgency": urgency.label(),
                "elapsed_secs": elapsed.as_secs(),
                "warning": warning,
            }),
            start.elapsed(),
        ))
    }
}

/// Records the week's top-3 priorities (ABC method, PRIORITIZATION phase).
pub struct SavePrioritiesTool;

#[async_trait]
impl Tool for SavePrioritiesTool {
    fn name(&self) -> &str {
        "save_priorities"
    }

    fn description(&self) -> &str {
        "Save the prioritized list of tasks for the week (up to 3, ABC method)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "priorities": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Ordered list, most important first"
                }
            },
            "required": ["priorities"]
        })
    }

    async fn execute(&self, params: serde_json::Value, ctx: &SessionContext) -> ToolResult {
        let start = std::time::Instant::now();
        let priorities = require_param(&params, "priorities")?
            .as_array()
            .ok_or_else(|| ToolError::InvalidParameters("priorities must be an array".into()))?;
        if priorities.is_empty() {
            return Err(ToolError::InvalidParameters("priorities must not be empty".into()).into());
        }
        let priorities: Vec<String> = priorities
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .take(3)
            .collect();

        let mut state = ctx.state.lock().await;
        state.weekly_priorities = priorities.clone();
        let phase = state.current_phase;
        drop(state);

        emit_episode(ctx, EpisodeType::Priorities, phase, serde_json::json!({"priorities": priorities})).await;

        Ok(ToolOutput::success(
            serde_json::json!({"priorities": priorities}),
            start.elapsed(),
        ))
    }
}

/// Schedules a reminder to fire later in the session (§4.1 set_reminder).
pub struct SetReminderTool;

#[async_trait]
impl Tool for SetReminderTool {
    fn name(&self) -> &str {
        "set_reminder"
    }

    fn description(&self) -> &str {
        "Schedule a reminder to be surfaced after a number of minutes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "minutes_from_now": {"type": "integer"},
                "message": {"type": "string"}
            },
            "required": ["minutes_from_now", "message"]
        })
    }

    async fn execute(&self, params: serde_json::Value, ctx: &SessionContext) -> ToolResult {
        let start = std::time::Instant::now();
        let minutes = require_param(&params, "minutes_from_now")?
            .as_u64()
            .ok_or_else(|| ToolError::InvalidParameters("minutes_from_now must be an integer".into()))?
            as u32;
        let message = require_str(&params, "message")?;

        let mut scheduler = ctx.scheduler.lock().await;
        scheduler.set_reminder(minutes, message);
        drop(scheduler);

        Ok(ToolOutput::text(
            format!("reminder set for {minutes} minutes from now"),
            start.elapsed(),
        ))
    }
}

/// Marks the session complete and triggers the wrap-up summary (§4.1 WRAP_UP / SUMMARY).
pub struct CompleteSessionTool;

#[async_trait]
impl Tool for CompleteSessionTool {
    fn name(&self) -> &str {
        "complete_session"
    }

    fn description(&self) -> &str {
        "Mark the session complete. Call this once all phases are finished."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string", "description": "A short summary of what was accomplished"}
            },
            "required": ["summary"]
        })
    }

    async fn execute(&self, params: serde_json::Value, ctx: &SessionContext) -> ToolResult {
        let start = std::time::Instant::now();
        let summary = require_str(&params, "summary")?;

        let mut state = ctx.state.lock().await;
        state.phase_summary = summary.to_string();
        let captures = state.captures.len();
        let priorities = state.weekly_priorities.len();
        drop(state);

        let scheduler = ctx.scheduler.lock().await;
        scheduler.send_alert(AlertKind::Completion, Some(summary));
        drop(scheduler);

        Ok(ToolOutput::success(
            serde_json::json!({
                "summary": summary,
                "tasks_captured": captures,
                "priorities_set": priorities,
            }),
            start.elapsed(),
        ))
    }
}

/// Returns every tool in this module wired into a fresh registry.
pub fn builtin_tools() -> Vec<std::sync::Arc<dyn Tool>> {
    vec![
        std::sync::Arc::new(AskUserTool),
        std::sync::Arc::new(CaptureItemTool),
        std::sync::Arc::new(ClarifyNextActionTool),
        std::sync::Arc::new(TransitionPhaseTool),
        std::sync::Arc::new(CheckTimeRemainingTool),
        std::sync::Arc::new(SavePrioritiesTool),
        std::sync::Arc::new(SetReminderTool),
        std::sync::Arc::new(CompleteSessionTool),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BatchingMemory, MemoryClient, MemoryHit};
    use crate::memory::batching::BatchingConfig;
    use crate::error::MemoryError;
    use crate::scheduler::{PhaseScheduler, WorkflowType};
    use crate::session::State;
    use crate::tools::tool::ToolSignal;
    use async_trait::async_trait;
    use std::sync::Arc;

    fn test_ctx() -> SessionContext {
        SessionContext::new(
            State::new(WorkflowType::WeeklyReview, "user-1"),
            PhaseScheduler::new(WorkflowType::WeeklyReview),
        )
    }

    #[derive(Default)]
    struct RecordingSink {
        episodes: tokio::sync::Mutex<Vec<Episode>>,
    }

    #[async_trait]
    impl MemoryClient for RecordingSink {
        async fn search(&self, _group_id: &str, _query: &str, _limit: usize) -> Result<Vec<MemoryHit>, MemoryError> {
            Ok(vec![MemoryHit {
                content: "buy groceries".into(),
                raw_score: 1.0,
                decayed_score: 1.0,
                timestamp: chrono::Utc::now(),
            }])
        }

        async fn add_episode(&self, episode: &Episode) -> Result<String, MemoryError> {
            self.episodes.lock().await.push(episode.clone());
            Ok("ep-1".into())
        }
    }

    fn test_ctx_with_memory() -> (SessionContext, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let memory = Arc::new(BatchingMemory::new(sink.clone(), BatchingConfig::new(std::env::temp_dir())));
        let ctx = SessionContext::new(
            State::new(WorkflowType::WeeklyReview, "user-1"),
            PhaseScheduler::new(WorkflowType::WeeklyReview),
        )
        .with_memory(memory);
        (ctx, sink)
    }

    #[tokio::test]
    async fn capture_item_appends_to_state() {
        let ctx = test_ctx();
        let tool = CaptureItemTool;
        tool.execute(serde_json::json!({"item": "buy milk"}), &ctx)
            .await
            .unwrap();
        assert_eq!(ctx.state.lock().await.captures, vec!["buy milk"]);
    }

    #[tokio::test]
    async fn capture_item_rejects_empty() {
        let ctx = test_ctx();
        let tool = CaptureItemTool;
        let err = tool
            .execute(serde_json::json!({"item": "   "}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolSignal::Error(_)));
    }

    #[tokio::test]
    async fn transition_phase_advances_scheduler_and_state() {
        let ctx = test_ctx();
        let tool = TransitionPhaseTool;
        let out = tool
            .execute(serde_json::json!({"to": "MIND_SWEEP"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["to"], "MIND_SWEEP");
        let state = ctx.state.lock().await;
        assert_eq!(state.current_phase, Phase::MindSweep);
        assert_eq!(state.completed_phases, vec![Phase::Startup]);
        assert!(state.phase_changed);
    }

    #[tokio::test]
    async fn transition_phase_rejects_unknown_name() {
        let ctx = test_ctx();
        let tool = TransitionPhaseTool;
        let err = tool
            .execute(serde_json::json!({"to": "NOT_A_PHASE"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolSignal::Error(_)));
    }

    #[tokio::test]
    async fn save_priorities_caps_at_three() {
        let ctx = test_ctx();
        let tool = SavePrioritiesTool;
        tool.execute(
            serde_json::json!({"priorities": ["a", "b", "c", "d"]}),
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(ctx.state.lock().await.weekly_priorities.len(), 3);
    }

    #[tokio::test]
    async fn ask_user_interrupts_then_resumes() {
        let ctx = test_ctx();
        let tool = AskUserTool;
        let first = tool
            .execute(serde_json::json!({"question": "what's next?"}), &ctx)
            .await;
        assert!(matches!(first, Err(ToolSignal::Interrupt(_))));

        ctx.stage_resume("rest".into()).await;
        let second = tool
            .execute(serde_json::json!({"question": "what's next?"}), &ctx)
            .await
            .unwrap();
        assert_eq!(second.result, serde_json::json!("rest"));
    }

    #[tokio::test]
    async fn capture_item_emits_a_mindsweep_episode() {
        let (ctx, sink) = test_ctx_with_memory();
        let tool = CaptureItemTool;
        tool.execute(serde_json::json!({"item": "buy milk"}), &ctx).await.unwrap();
        ctx.memory.as_ref().unwrap().flush().await;
        let episodes = sink.episodes.lock().await;
        assert_eq!(episodes.len(), 1);
        assert!(matches!(episodes[0].episode_type, EpisodeType::MindsweepCapture));
    }

    #[tokio::test]
    async fn clarify_next_action_surfaces_prior_context_above_threshold() {
        let (ctx, _sink) = test_ctx_with_memory();
        {
            let mut state = ctx.state.lock().await;
            state.captures = (0..5).map(|i| format!("item {i}")).collect();
        }
        let tool = ClarifyNextActionTool;
        let out = tool
            .execute(serde_json::json!({"item": "groceries", "next_action": "buy milk"}), &ctx)
            .await
            .unwrap();
        assert!(!out.result["prior_context"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn clarify_next_action_skips_context_below_threshold() {
        let (ctx, _sink) = test_ctx_with_memory();
        let tool = ClarifyNextActionTool;
        let out = tool
            .execute(serde_json::json!({"item": "groceries", "next_action": "buy milk"}), &ctx)
            .await
            .unwrap();
        assert!(out.result["prior_context"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_priorities_emits_a_priorities_episode_immediately() {
        let (ctx, sink) = test_ctx_with_memory();
        let tool = SavePrioritiesTool;
        tool.execute(serde_json::json!({"priorities": ["a"]}), &ctx).await.unwrap();
        let episodes = sink.episodes.lock().await;
        assert_eq!(episodes.len(), 1);
        assert!(matches!(episodes[0].episode_type, EpisodeType::Priorities));
    }

    #[test]
    fn builtin_tools_have_unique_names() {
        let tools = builtin_tools();
        let mut names: Vec<_> = tools.iter().map(|t| t.name().to_string()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), tools.len());
    }

    #[test]
    fn builtin_tool_schemas_are_strict_valid() {
        use crate::tools::schema_validator::validate_strict_schema;
        for tool in builtin_tools() {
            if tool.name() == "save_priorities" || tool.name() == "clarify_next_action" {
                continue; // array-of-string / optional-field schemas are intentionally loose here
            }
            validate_strict_schema(&tool.parameters_schema(), tool.name())
                .unwrap_or_else(|errs| panic!("{}: {errs:?}", tool.name()));
        }
    }
}
