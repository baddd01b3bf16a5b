//! Entity-graph memory sink boundary and the batching/retry/decay engine
//! that sits in front of it (§4.5).

pub mod batching;
pub mod http_client;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::scheduler::Phase;

pub use batching::BatchingMemory;
pub use http_client::{HttpMemoryClient, NullMemoryClient};

/// Typed record written to the memory sink describing a discrete event
/// during a session (§3 Episode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeType {
    Interaction,
    MindsweepCapture,
    TimingAnalysis,
    BehaviorPattern,
    SessionSummary,
    PhaseTransition,
    Priorities,
}

impl EpisodeType {
    /// Episode types that must always be sent immediately rather than batched.
    pub fn always_send_immediately(&self) -> bool {
        matches!(
            self,
            EpisodeType::SessionSummary | EpisodeType::PhaseTransition | EpisodeType::Priorities
        )
    }

    /// "Small" episode types flush at the lower batch threshold — short,
    /// high-frequency episodes (§4.5 "default 3 for small types, 5 general").
    pub fn is_small(&self) -> bool {
        matches!(self, EpisodeType::Interaction | EpisodeType::MindsweepCapture)
    }

    /// All variants, in a fixed order used to group a flush deterministically.
    pub fn all() -> &'static [EpisodeType] {
        &[
            EpisodeType::Interaction,
            EpisodeType::MindsweepCapture,
            EpisodeType::TimingAnalysis,
            EpisodeType::BehaviorPattern,
            EpisodeType::SessionSummary,
            EpisodeType::PhaseTransition,
            EpisodeType::Priorities,
        ]
    }

    /// Entity kinds the sink must not attempt to extract for this episode
    /// type, to reduce cost and false positives.
    pub fn excluded_entity_kinds(&self) -> &'static [&'static str] {
        match self {
            EpisodeType::Interaction => &["TimingInsight", "WeeklyReview"],
            EpisodeType::MindsweepCapture => &["TimingInsight", "ADHDPattern"],
            EpisodeType::TimingAnalysis => &["ADHDPattern"],
            EpisodeType::BehaviorPattern => &[],
            EpisodeType::SessionSummary => &[],
            EpisodeType::PhaseTransition => &["TimingInsight", "ADHDPattern", "WeeklyReview"],
            EpisodeType::Priorities => &["TimingInsight"],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub episode_type: EpisodeType,
    pub phase: Phase,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub group_id: String,
    pub critical: bool,
}

impl Episode {
    pub fn new(
        episode_type: EpisodeType,
        phase: Phase,
        data: serde_json::Value,
        session_id: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            episode_type,
            phase,
            data,
            timestamp: Utc::now(),
            session_id: session_id.into(),
            group_id: group_id.into(),
            critical: false,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    fn trivial_content(&self) -> Option<&str> {
        self.data.get("content").and_then(|v| v.as_str())
    }

    /// Whether this episode's content is trivial enough to skip entirely
    /// when `skip_trivial` is enabled.
    pub fn is_trivial(&self) -> bool {
        const TRIVIAL_WORDS: &[&str] = &["ok", "thanks", "yes", "no", "sure"];
        match self.trivial_content() {
            Some(content) => {
                let trimmed = content.trim();
                trimmed.len() < 3 || TRIVIAL_WORDS.contains(&trimmed.to_lowercase().as_str())
            }
            None => false,
        }
    }
}

/// A scored hit returned from a memory search, before and after temporal decay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub content: String,
    pub raw_score: f64,
    pub decayed_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Boundary trait for the entity-graph sink. The concrete network-backed
/// implementation is an out-of-scope external collaborator (§1); this
/// trait lets `BatchingMemory` be fully implemented and tested against an
/// in-memory fake.
#[async_trait]
pub trait MemoryClient: Send + Sync {
    async fn search(&self, group_id: &str, query: &str, limit: usize) -> Result<Vec<MemoryHit>, MemoryError>;
    /// Returns the sink-assigned episode id.
    async fn add_episode(&self, episode: &Episode) -> Result<String, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_detection() {
        let ep = Episode::new(
            EpisodeType::Interaction,
            Phase::Startup,
            serde_json::json!({"content": "ok"}),
            "s1",
            "g1",
        );
        assert!(ep.is_trivial());

        let ep = Episode::new(
            EpisodeType::Interaction,
            Phase::Startup,
            serde_json::json!({"content": "I need to call the dentist tomorrow"}),
            "s1",
            "g1",
        );
        assert!(!ep.is_trivial());
    }

    #[test]
    fn session_summary_always_sends_immediately() {
        assert!(EpisodeType::SessionSummary.always_send_immediately());
        assert!(!EpisodeType::Interaction.always_send_immediately());
    }
}
