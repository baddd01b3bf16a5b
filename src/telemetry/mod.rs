//! Tracer: span/event/score recording for a session, piggy-backed on
//! `tracing` the way the teacher's `LogObserver` piggy-backs structured
//! telemetry on the logging stack rather than adding a second dependency
//! (§4.7).

pub mod prompts;

use std::sync::{Arc, Mutex, OnceLock};

use serde::Serialize;

pub use prompts::{BuiltInPromptSource, LocalPromptSource, PromptRegistry, PromptSource};

/// A named (0, 1]-bounded score attached to a session or span.
#[derive(Debug, Clone, Serialize)]
pub struct Score {
    pub name: String,
    pub value: f64,
}

/// One structured telemetry event. Variants mirror the minimum taxonomy:
/// tool lifecycle, interrupt lifecycle, phase transitions, conversation
/// boundaries, and the end-of-session effectiveness score.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[allow(clippy::large_enum_variant)]
pub enum Event {
    GraphConfig { tools_count: usize, model: String },
    StreamChunk { index: u64 },
    ToolStart { name: String },
    ToolEnd { name: String, duration_ms: u64 },
    ToolError { name: String, error: String },
    InterruptAttempt { tool: String },
    InterruptCaptured { tool: String },
    InterruptResume,
    InterruptState,
    InterruptAnalysis,
    PhaseTransition { from: String, to: String, duration_minutes: f64 },
    ConversationStart { phase: String },
    ConversationComplete { phase: String },
    SessionEffectiveness {
        completed: bool,
        duration_minutes: f64,
        tasks_captured: u32,
        priorities_set: u32,
        interrupts_handled: u32,
        score: f64,
    },
}

/// `base 1.0 if completed else 0.0; +0.2 if any captures; +0.3 if any
/// priorities; +0.2 if duration <= 30 minutes`.
pub fn session_effectiveness_score(
    completed: bool,
    duration_minutes: f64,
    tasks_captured: u32,
    priorities_set: u32,
) -> f64 {
    let mut score = if completed { 1.0 } else { 0.0 };
    if tasks_captured > 0 {
        score += 0.2;
    }
    if priorities_set > 0 {
        score += 0.3;
    }
    if duration_minutes <= 30.0 {
        score += 0.2;
    }
    score.clamp(0.0, f64::MAX)
}

/// Installed once per session, with metadata describing the workflow. MUST
/// degrade to no-ops if the backend is unreachable — the agent loop is
/// never blocked by telemetry.
pub trait Tracer: Send + Sync {
    fn session_id(&self) -> &str;
    fn record(&self, event: Event);
    fn record_score(&self, score: Score);
    /// Records the prompt name/version used for an LLM generation, plus
    /// any tone/workflow tags (e.g. `firm`, `week:2026-W05`, `phase:mindsweep`).
    fn record_prompt_link(&self, prompt_name: &str, prompt_version: &str, tags: &[String]);
}

/// Default tracer: emits every event through `tracing::info!`.
pub struct TracingTracer {
    session_id: String,
    user_id: String,
}

impl TracingTracer {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl Tracer for TracingTracer {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn record(&self, event: Event) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        tracing::info!(
            session_id = %self.session_id,
            user_id = %self.user_id,
            event = %payload,
            "tracer event"
        );
    }

    fn record_score(&self, score: Score) {
        tracing::info!(session_id = %self.session_id, name = %score.name, value = score.value, "tracer score");
    }

    fn record_prompt_link(&self, prompt_name: &str, prompt_version: &str, tags: &[String]) {
        tracing::info!(
            session_id = %self.session_id,
            prompt_name,
            prompt_version,
            tags = ?tags,
            "tracer prompt link"
        );
    }
}

/// Test double capturing events into an in-memory vector, mirroring the
/// teacher's `RecordingObserver`.
#[derive(Default)]
pub struct RecordingTracer {
    session_id: String,
    events: Mutex<Vec<Event>>,
    scores: Mutex<Vec<Score>>,
}

impl RecordingTracer {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            events: Mutex::new(Vec::new()),
            scores: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("tracer mutex poisoned").clone()
    }

    pub fn scores(&self) -> Vec<Score> {
        self.scores.lock().expect("tracer mutex poisoned").clone()
    }
}

impl Tracer for RecordingTracer {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn record(&self, event: Event) {
        self.events.lock().expect("tracer mutex poisoned").push(event);
    }

    fn record_score(&self, score: Score) {
        self.scores.lock().expect("tracer mutex poisoned").push(score);
    }

    fn record_prompt_link(&self, _prompt_name: &str, _prompt_version: &str, _tags: &[String]) {}
}

static ACTIVE_TRACER: OnceLock<Arc<dyn Tracer>> = OnceLock::new();

/// Installs the process-wide tracer. Intended to be called once at session
/// start; subsequent calls are ignored so a background task can't hijack
/// the handle mid-session.
pub fn install_tracer(tracer: Arc<dyn Tracer>) {
    let _ = ACTIVE_TRACER.set(tracer);
}

/// Returns the active tracer, or `None` if none has been installed yet.
pub fn active_tracer() -> Option<Arc<dyn Tracer>> {
    ACTIVE_TRACER.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effectiveness_score_sums_bonuses() {
        let score = session_effectiveness_score(true, 25.0, 4, 3);
        assert!((score - 1.7).abs() < 1e-9);
    }

    #[test]
    fn recording_tracer_captures_events() {
        let tracer = RecordingTracer::new("sess-1");
        tracer.record(Event::ToolStart { name: "ask_user".into() });
        tracer.record_score(Score { name: "session.effectiveness".into(), value: 0.8 });
        assert_eq!(tracer.events().len(), 1);
        assert_eq!(tracer.scores().len(), 1);
    }
}
