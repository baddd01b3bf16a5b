//! Phase scheduler: enforces per-phase wall-clock budgets and orchestrates
//! transitions between the fixed phases of a workflow.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Which workflow a session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    WeeklyReview,
    DailyClarify,
}

/// A named, time-bounded segment of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    // weekly_review
    Startup,
    MindSweep,
    ProjectReview,
    Prioritization,
    WrapUp,
    // daily_clarify
    Load,
    Preview,
    ProcessTask,
    CheckDeepWork,
    AddToToday,
    OfferBreak,
    Save,
    Summary,
}

impl Phase {
    /// Canonical phase sequence for a workflow. The first element is the
    /// starting phase; transitions must follow this order exactly.
    pub fn order_for(workflow: WorkflowType) -> &'static [Phase] {
        match workflow {
            WorkflowType::WeeklyReview => &[
                Phase::Startup,
                Phase::MindSweep,
                Phase::ProjectReview,
                Phase::Prioritization,
                Phase::WrapUp,
            ],
            WorkflowType::DailyClarify => &[
                Phase::Load,
                Phase::Preview,
                Phase::ProcessTask,
                Phase::CheckDeepWork,
                Phase::AddToToday,
                Phase::OfferBreak,
                Phase::Save,
                Phase::Summary,
            ],
        }
    }

    /// Hard time budget for this phase, in minutes.
    pub fn time_limit_minutes(&self, workflow: WorkflowType) -> u32 {
        match (workflow, self) {
            (WorkflowType::WeeklyReview, Phase::Startup) => 2,
            (WorkflowType::WeeklyReview, Phase::MindSweep) => 10,
            (WorkflowType::WeeklyReview, Phase::ProjectReview) => 12,
            (WorkflowType::WeeklyReview, Phase::Prioritization) => 5,
            (WorkflowType::WeeklyReview, Phase::WrapUp) => 3,
            // Daily clarify is per-task driven rather than fixed-duration;
            // these are generous ceilings, not targets.
            (WorkflowType::DailyClarify, Phase::Load) => 1,
            (WorkflowType::DailyClarify, Phase::Preview) => 2,
            (WorkflowType::DailyClarify, Phase::ProcessTask) => 3,
            (WorkflowType::DailyClarify, Phase::CheckDeepWork) => 1,
            (WorkflowType::DailyClarify, Phase::AddToToday) => 1,
            (WorkflowType::DailyClarify, Phase::OfferBreak) => 1,
            (WorkflowType::DailyClarify, Phase::Save) => 1,
            (WorkflowType::DailyClarify, Phase::Summary) => 2,
            _ => 5,
        }
    }

    /// Short coaching guidance surfaced in the pre-model hook (§4.2).
    pub fn guidance(&self) -> &'static str {
        match self {
            Phase::Startup => "Check readiness, set a positive tone.",
            Phase::MindSweep => "Capture quickly, no filtering.",
            Phase::ProjectReview => "Identify next actions for each project.",
            Phase::Prioritization => "Pick the top 3 for the week, ABC method.",
            Phase::WrapUp => "Save, celebrate, reinforce.",
            Phase::Load => "Load today's inbox.",
            Phase::Preview => "Preview the next item before deciding.",
            Phase::ProcessTask => "Clarify: what is this, and what's the next action?",
            Phase::CheckDeepWork => "Check whether this needs a deep-work block.",
            Phase::AddToToday => "Decide whether this belongs on today's list.",
            Phase::OfferBreak => "Offer a short break if several items were processed.",
            Phase::Save => "Persist the day's captures.",
            Phase::Summary => "Summarize what was processed today.",
        }
    }

    /// Parse a phase by its `SCREAMING_SNAKE_CASE` name, as used in tool
    /// call arguments and checkpoint metadata. Returns `None` for unknown
    /// names (including the workflow name itself).
    pub fn from_name(name: &str) -> Option<Phase> {
        Some(match name {
            "STARTUP" => Phase::Startup,
            "MIND_SWEEP" => Phase::MindSweep,
            "PROJECT_REVIEW" => Phase::ProjectReview,
            "PRIORITIZATION" => Phase::Prioritization,
            "WRAP_UP" => Phase::WrapUp,
            "LOAD" => Phase::Load,
            "PREVIEW" => Phase::Preview,
            "PROCESS_TASK" => Phase::ProcessTask,
            "CHECK_DEEP_WORK" => Phase::CheckDeepWork,
            "ADD_TO_TODAY" => Phase::AddToToday,
            "OFFER_BREAK" => Phase::OfferBreak,
            "SAVE" => Phase::Save,
            "SUMMARY" => Phase::Summary,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Startup => "STARTUP",
            Phase::MindSweep => "MIND_SWEEP",
            Phase::ProjectReview => "PROJECT_REVIEW",
            Phase::Prioritization => "PRIORITIZATION",
            Phase::WrapUp => "WRAP_UP",
            Phase::Load => "LOAD",
            Phase::Preview => "PREVIEW",
            Phase::ProcessTask => "PROCESS_TASK",
            Phase::CheckDeepWork => "CHECK_DEEP_WORK",
            Phase::AddToToday => "ADD_TO_TODAY",
            Phase::OfferBreak => "OFFER_BREAK",
            Phase::Save => "SAVE",
            Phase::Summary => "SUMMARY",
        }
    }
}

/// Urgency level returned by [`PhaseScheduler::check_time`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    GoodPace,
    WrapUpSoon,
    WrapUp,
    FinalMinute,
    TimeUp,
}

impl Urgency {
    pub fn label(&self) -> &'static str {
        match self {
            Urgency::GoodPace => "good pace",
            Urgency::WrapUpSoon => "wrap up",
            Urgency::WrapUp => "WRAP UP",
            Urgency::FinalMinute => "FINAL MINUTE",
            Urgency::TimeUp => "TIME UP",
        }
    }

    /// Whether this urgency level should flip the session into urgent
    /// interaction mode (§4.2 pre-model hook consumes this).
    pub fn is_urgent(&self) -> bool {
        matches!(self, Urgency::FinalMinute | Urgency::TimeUp)
    }
}

/// Kind of out-of-band alert a scheduler transition can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Warning,
    Urgent,
    Critical,
    PhaseChange,
    Completion,
}

/// A pending reminder scheduled via [`PhaseScheduler::set_reminder`].
#[derive(Debug, Clone)]
pub struct Reminder {
    pub fire_at: Instant,
    pub message: String,
}

/// Result of a successful phase transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub from: Phase,
    pub to: Phase,
    pub from_duration: Duration,
    /// Hint for which conversational tool the agent should call next.
    pub next_tool_hint: &'static str,
}

/// Enforces hard time budgets per phase and tracks elapsed time.
///
/// Uses a monotonic clock ([`Instant`]) for elapsed-time math; wall-clock
/// timestamps are only used for display and persistence.
pub struct PhaseScheduler {
    workflow: WorkflowType,
    current: Phase,
    phase_start: Instant,
    phase_limit: Duration,
    total_start: Instant,
    warned_thresholds: Vec<Urgency>,
    reminders: Vec<Reminder>,
}

impl PhaseScheduler {
    pub fn new(workflow: WorkflowType) -> Self {
        let current = Phase::order_for(workflow)[0];
        let now = Instant::now();
        Self {
            workflow,
            current,
            phase_start: now,
            phase_limit: Duration::from_secs(u64::from(current.time_limit_minutes(workflow)) * 60),
            total_start: now,
            warned_thresholds: Vec::new(),
            reminders: Vec::new(),
        }
    }

    pub fn current_phase(&self) -> Phase {
        self.current
    }

    pub fn elapsed_in_phase(&self) -> Duration {
        self.phase_start.elapsed()
    }

    pub fn total_elapsed(&self) -> Duration {
        self.total_start.elapsed()
    }

    /// Validate and perform a transition to `next`. Does not mutate state
    /// on error.
    pub fn transition(&mut self, next: Phase) -> Result<TransitionOutcome, SchedulerError> {
        let order = Phase::order_for(self.workflow);
        let cur_idx = order
            .iter()
            .position(|p| *p == self.current)
            .expect("current phase is always in its workflow's order");
        let next_idx = order.iter().position(|p| *p == next).ok_or_else(|| {
            SchedulerError::InvalidPhase(format!("{next:?} is not a phase of this workflow"))
        })?;

        if next_idx != cur_idx + 1 {
            return Err(SchedulerError::OutOfOrder {
                from: self.current.name().to_string(),
                to: next.name().to_string(),
            });
        }

        let from = self.current;
        let from_duration = self.phase_start.elapsed();

        self.current = next;
        self.phase_start = Instant::now();
        self.phase_limit = Duration::from_secs(u64::from(next.time_limit_minutes(self.workflow)) * 60);
        self.warned_thresholds.clear();

        let next_tool_hint = match next {
            Phase::MindSweep | Phase::ProcessTask => "capture_item",
            Phase::ProjectReview => "review_project",
            Phase::Prioritization => "save_priorities",
            Phase::WrapUp | Phase::Summary => "complete_session",
            _ => "ask_user",
        };

        Ok(TransitionOutcome {
            from,
            to: next,
            from_duration,
            next_tool_hint,
        })
    }

    /// Compute the current urgency level. Appends a one-shot warning the
    /// first time each threshold is crossed.
    pub fn check_time(&mut self) -> (Urgency, Option<String>) {
        let elapsed = self.phase_start.elapsed();
        let remaining = self.phase_limit.saturating_sub(elapsed);

        let urgency = if elapsed >= self.phase_limit {
            Urgency::TimeUp
        } else if remaining < Duration::from_secs(60) {
            Urgency::FinalMinute
        } else if remaining < Duration::from_secs(120) {
            Urgency::WrapUp
        } else if (remaining.as_secs_f64()) < 0.2 * self.phase_limit.as_secs_f64() {
            Urgency::WrapUpSoon
        } else {
            Urgency::GoodPace
        };

        let warning = if urgency != Urgency::GoodPace && !self.warned_thresholds.contains(&urgency) {
            self.warned_thresholds.push(urgency);
            Some(format!(
                "{} — {} remaining in {}",
                urgency.label(),
                format_duration(remaining),
                self.current.name()
            ))
        } else {
            None
        };

        (urgency, warning)
    }

    /// Emit an out-of-band alert. In the absence of a richer notification
    /// channel this degrades to a structured log line plus a terminal bell.
    pub fn send_alert(&self, kind: AlertKind, message: Option<&str>) {
        let bell = matches!(kind, AlertKind::Urgent | AlertKind::Critical);
        tracing::info!(
            kind = ?kind,
            phase = self.current.name(),
            message = message.unwrap_or(""),
            "phase scheduler alert"
        );
        if bell {
            print!("\x07");
        }
    }

    pub fn set_reminder(&mut self, minutes_from_now: u32, message: impl Into<String>) {
        self.reminders.push(Reminder {
            fire_at: Instant::now() + Duration::from_secs(u64::from(minutes_from_now) * 60),
            message: message.into(),
        });
    }

    /// Reminders whose fire time has passed; removes them from the pending list.
    pub fn due_reminders(&mut self) -> Vec<Reminder> {
        let now = Instant::now();
        let (due, pending): (Vec<_>, Vec<_>) =
            self.reminders.drain(..).partition(|r| r.fire_at <= now);
        self.reminders = pending;
        due
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}
