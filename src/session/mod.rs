//! Session data model: `Session`, `State`, `Message`, and the
//! `SessionContext` handle shared between the agent loop and tools.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::memory::BatchingMemory;
use crate::scheduler::{Phase, PhaseScheduler, WorkflowType};
use crate::tools::tool::ToolSignal;

/// Prompt tone / accountability style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountabilityMode {
    Firm,
    Gentle,
    Adaptive,
}

/// Whether the agent is speaking conversationally or with urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    Conversational,
    Urgent,
}

/// Role of a single message in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// A structured tool-call descriptor attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Index metadata owned by the `MetadataStore` (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub thread_id: String,
    pub user_id: String,
    pub workflow_type: WorkflowType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_phase: Phase,
    pub completed_phases: Vec<Phase>,
    pub error_count: u32,
    pub completed: bool,
}

impl Session {
    pub fn new(workflow_type: WorkflowType, user_id: impl Into<String>) -> Self {
        let session_id = new_session_id();
        let now = Utc::now();
        Self {
            thread_id: session_id.clone(),
            session_id,
            user_id: user_id.into(),
            workflow_type,
            created_at: now,
            updated_at: now,
            current_phase: Phase::order_for(workflow_type)[0],
            completed_phases: Vec::new(),
            error_count: 0,
            completed: false,
        }
    }
}

/// Timestamp-derived session id, e.g. `20260415T093000-4f2c`.
///
/// Collisions within the same second are vanishingly unlikely given the
/// random suffix; `PatternStore::save` additionally guards against them.
pub fn new_session_id() -> String {
    let ts = Utc::now().format("%Y%m%dT%H%M%S");
    let suffix: u16 = rand::random();
    format!("{ts}-{suffix:04x}")
}

/// The full mutable state of a session, versioned per mutation and owned
/// exclusively by `AgentCore` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub messages: Vec<Message>,
    pub session_id: String,
    pub workflow_type: WorkflowType,
    pub started_at: DateTime<Utc>,
    pub user_id: String,
    pub user_context: HashMap<String, serde_json::Value>,
    pub previous_session_summary: Option<String>,
    pub recurring_patterns: Option<Vec<String>>,
    pub adhd_patterns: Vec<String>,
    pub accountability_mode: AccountabilityMode,

    pub captures: Vec<String>,
    pub processed_items: Vec<String>,
    pub projects: Vec<String>,
    pub weekly_priorities: Vec<String>,
    pub timing_data: Option<serde_json::Value>,
    pub focus_score: Option<f64>,
    pub context_switches: Option<u32>,

    pub graphiti_episode_ids: Vec<String>,
    pub memory_batch: Vec<String>,

    pub current_phase: Phase,
    pub completed_phases: Vec<Phase>,
    pub available_tools: Vec<String>,
    pub tool_history: Vec<String>,

    pub phase_time_limit_minutes: u32,
    pub total_elapsed_minutes: f64,
    pub time_warnings: Vec<String>,
    pub last_time_check: Option<DateTime<Utc>>,
    pub time_pressure: bool,
    pub interaction_mode: InteractionMode,

    pub awaiting_input: bool,
    pub input_timeout_secs: Option<u32>,

    pub context_usage: HashMap<String, u32>,
    pub message_summary: String,
    pub phase_summary: String,
    pub phase_changed: bool,
    pub context_overflow_count: u32,

    pub errors: Vec<String>,
    pub retry_count: u32,
    pub last_checkpoint: Option<String>,
    pub phase_durations: HashMap<String, f64>,
    pub tool_latencies: HashMap<String, f64>,
    pub llm_token_usage: HashMap<String, u64>,

    pub skip_timing: bool,
    pub voice_enabled: bool,
    pub verbose: bool,
    pub test_mode: bool,

    pub interrupt_count: u32,

    /// The tool call currently suspended on user input, if any. Replayed
    /// verbatim by the runner on resume so `ctx.interrupt()` sees its
    /// staged resume value instead of raising a second time (§4.3).
    pub pending_tool_call: Option<ToolCall>,
}

impl State {
    pub fn new(workflow_type: WorkflowType, user_id: impl Into<String>) -> Self {
        let phase = Phase::order_for(workflow_type)[0];
        Self {
            messages: Vec::new(),
            session_id: new_session_id(),
            workflow_type,
            started_at: Utc::now(),
            user_id: user_id.into(),
            user_context: HashMap::new(),
            previous_session_summary: None,
            recurring_patterns: None,
            adhd_patterns: Vec::new(),
            accountability_mode: AccountabilityMode::Adaptive,
            captures: Vec::new(),
            processed_items: Vec::new(),
            projects: Vec::new(),
            weekly_priorities: Vec::new(),
            timing_data: None,
            focus_score: None,
            context_switches: None,
            graphiti_episode_ids: Vec::new(),
            memory_batch: Vec::new(),
            current_phase: phase,
            completed_phases: Vec::new(),
            available_tools: Vec::new(),
            tool_history: Vec::new(),
            phase_time_limit_minutes: phase.time_limit_minutes(workflow_type),
            total_elapsed_minutes: 0.0,
            time_warnings: Vec::new(),
            last_time_check: None,
            time_pressure: false,
            interaction_mode: InteractionMode::Conversational,
            awaiting_input: false,
            input_timeout_secs: None,
            context_usage: HashMap::new(),
            message_summary: String::new(),
            phase_summary: String::new(),
            phase_changed: false,
            context_overflow_count: 0,
            errors: Vec::new(),
            retry_count: 0,
            last_checkpoint: None,
            phase_durations: HashMap::new(),
            tool_latencies: HashMap::new(),
            llm_token_usage: HashMap::new(),
            skip_timing: false,
            voice_enabled: false,
            verbose: false,
            test_mode: false,
            interrupt_count: 0,
            pending_tool_call: None,
        }
    }

    /// Invariant: `completed_phases` followed by `current_phase` must be a
    /// prefix of the workflow's declared phase order.
    pub fn validate_phase_invariant(&self) -> bool {
        let order = Phase::order_for(self.workflow_type);
        let mut expected = order.iter();
        for completed in &self.completed_phases {
            match expected.next() {
                Some(e) if e == completed => continue,
                _ => return false,
            }
        }
        matches!(expected.next(), Some(e) if *e == self.current_phase)
    }
}

/// Shared handle passed to every tool invocation. Owns the only mutable
/// access path to `State` (the "ToolStateManager singleton" of §5) and
/// exposes the single-interrupt suspend/resume primitive of §4.3.
pub struct SessionContext {
    pub state: Arc<Mutex<State>>,
    pub scheduler: Arc<Mutex<PhaseScheduler>>,
    /// Set by the runner before replaying an interrupted tool call.
    resume_value: Arc<Mutex<Option<String>>>,
    /// Guards the single-interrupt-per-invocation rule: reset by the
    /// executor before each `Tool::execute` call.
    interrupted_this_call: AtomicU32,
    pub thread_id: String,
    phase_entered_at: Mutex<Instant>,
    /// Memory subsystem handle, so tools can emit episodes and request
    /// augmentation context (§4.5 "Augmentation to tools"). `None` in tests
    /// and anywhere memory isn't wired up.
    pub memory: Option<Arc<BatchingMemory>>,
}

impl SessionContext {
    pub fn new(state: State, scheduler: PhaseScheduler) -> Self {
        let thread_id = state.session_id.clone();
        Self {
            state: Arc::new(Mutex::new(state)),
            scheduler: Arc::new(Mutex::new(scheduler)),
            resume_value: Arc::new(Mutex::new(None)),
            interrupted_this_call: AtomicU32::new(0),
            thread_id,
            phase_entered_at: Mutex::new(Instant::now()),
            memory: None,
        }
    }

    /// Attaches a memory handle so tools can emit episodes and pull
    /// augmentation context through this context.
    pub fn with_memory(mut self, memory: Arc<BatchingMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Call from within a tool to suspend the agent loop and request user
    /// input. Returns the resume value immediately if one has been staged
    /// by the runner (i.e. this invocation is a replay after resume);
    /// otherwise returns `Err(ToolSignal::Interrupt(..))`, which the `?`
    /// operator propagates up through `Tool::execute`.
    ///
    /// A second call within the same invocation after a real suspension is
    /// a logic error (the single-interrupt rule, §4.3) and is rejected.
    pub async fn interrupt(&self, prompt: impl Into<String>) -> Result<String, ToolSignal> {
        if let Some(value) = self.resume_value.lock().await.take() {
            return Ok(value);
        }
        let prior = self.interrupted_this_call.fetch_add(1, Ordering::SeqCst);
        if prior > 0 {
            return Err(ToolSignal::Error(crate::tools::tool::ToolError::ExecutionFailed(
                "tool attempted a second interrupt in one invocation".into(),
            )));
        }
        Err(ToolSignal::Interrupt(Interrupt {
            prompt: prompt.into(),
        }))
    }

    /// Reset the per-invocation interrupt guard. Called by the tool
    /// executor before dispatching each call.
    pub fn begin_invocation(&self) {
        self.interrupted_this_call.store(0, Ordering::SeqCst);
    }

    /// Stage a resume value for the next replay of an interrupted tool.
    pub async fn stage_resume(&self, value: String) {
        *self.resume_value.lock().await = Some(value);
    }

    pub async fn mark_phase_entered_now(&self) {
        *self.phase_entered_at.lock().await = Instant::now();
    }
}

/// Control signal raised by a tool to suspend the agent loop and request
/// user input (§4.3). Deliberately not a variant of [`crate::error::Error`].
#[derive(Debug, Clone)]
pub struct Interrupt {
    pub prompt: String,
}

/// Unique interrupt correlation id, for telemetry linking across
/// suspend/resume pairs.
pub fn new_interrupt_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_invariant_holds_initially() {
        let state = State::new(WorkflowType::WeeklyReview, "user-1");
        assert!(state.validate_phase_invariant());
    }

    #[test]
    fn phase_invariant_detects_gap() {
        let mut state = State::new(WorkflowType::WeeklyReview, "user-1");
        state.completed_phases = vec![Phase::Startup, Phase::ProjectReview];
        state.current_phase = Phase::Prioritization;
        assert!(!state.validate_phase_invariant());
    }

    #[tokio::test]
    async fn interrupt_suspends_then_resumes() {
        let ctx = SessionContext::new(
            State::new(WorkflowType::WeeklyReview, "user-1"),
            PhaseScheduler::new(WorkflowType::WeeklyReview),
        );
        ctx.begin_invocation();
        let first = ctx.interrupt("what's on your mind?").await;
        assert!(matches!(first, Err(ToolSignal::Interrupt(_))));

        ctx.stage_resume("buy groceries".into()).await;
        let second = ctx.interrupt("what's on your mind?").await;
        assert_eq!(second.unwrap(), "buy groceries");
    }

    #[tokio::test]
    async fn second_interrupt_in_same_invocation_errors() {
        let ctx = SessionContext::new(
            State::new(WorkflowType::WeeklyReview, "user-1"),
            PhaseScheduler::new(WorkflowType::WeeklyReview),
        );
        ctx.begin_invocation();
        let _ = ctx.interrupt("first").await;
        let second = ctx.interrupt("second").await;
        assert!(matches!(second, Err(ToolSignal::Error(_))));
    }

    #[test]
    fn session_ids_are_distinct() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
    }
}
