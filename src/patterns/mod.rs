//! PatternStore: append-only per-session record of observed ADHD patterns,
//! interventions and outcomes (§4.6).

pub mod evolution;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::PatternError;

pub use evolution::{EvolutionRecord, EvolutionStore, EvolutionType, Severity};

/// One occurrence of an observed pattern during a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedPattern {
    pub pattern_type: String,
    pub severity: Severity,
    pub context: String,
}

/// One intervention offered by the coach in response to a pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervention {
    pub intervention_type: String,
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub completed_phases: u32,
    pub total_phases: u32,
    pub focus_score: Option<f64>,
    pub coherence_score: Option<f64>,
    pub high_severity_pattern_count: u32,
    pub context_switch_count: u32,
}

/// Append-only record of a single session's patterns, interventions and
/// computed effectiveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRecord {
    pub session_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub patterns: Vec<ObservedPattern>,
    pub interventions: Vec<Intervention>,
    pub outcomes: SessionOutcome,
    pub effectiveness: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InterventionHistory {
    pub count: u32,
    pub avg_effectiveness: f64,
    pub recent_contexts: Vec<String>,
}

/// `effectiveness = 0.5 + bonuses - penalties`, clamped to `[0, 1]`.
pub fn compute_effectiveness(outcomes: &SessionOutcome) -> f64 {
    let mut score = 0.5;
    if outcomes.completed_phases == outcomes.total_phases {
        score += 0.2;
    }
    if outcomes.focus_score.is_some_and(|f| f >= 60.0) {
        score += 0.1;
    }
    if outcomes.coherence_score.is_some_and(|c| c >= 0.6) {
        score += 0.1;
    }
    if outcomes.high_severity_pattern_count > 2 {
        score -= 0.1;
    }
    if outcomes.context_switch_count > 10 {
        score -= 0.1;
    }
    score.clamp(0.0, 1.0)
}

/// Buffered pattern/intervention accumulator for the session in progress,
/// flushed to the append-only file by [`PatternStore::save`].
#[derive(Default)]
struct SessionBuffer {
    patterns: Vec<ObservedPattern>,
    interventions: Vec<Intervention>,
}

pub struct PatternStore {
    path: PathBuf,
    buffer: Mutex<SessionBuffer>,
}

impl PatternStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer: Mutex::new(SessionBuffer::default()),
        }
    }

    pub async fn track_pattern(&self, pattern: ObservedPattern) {
        self.buffer.lock().await.patterns.push(pattern);
    }

    pub async fn track_intervention(&self, intervention: Intervention) {
        self.buffer.lock().await.interventions.push(intervention);
    }

    /// Appends the buffered patterns/interventions as a new record and
    /// durably writes the whole file via write-new-then-rename, returning a
    /// monotonically unique session id.
    pub async fn save(&self, outcomes: SessionOutcome) -> Result<String, PatternError> {
        let mut buffer = self.buffer.lock().await;
        let effectiveness = compute_effectiveness(&outcomes);
        let session_id = new_record_id();
        let record = PatternRecord {
            session_id: session_id.clone(),
            timestamp: chrono::Utc::now(),
            patterns: std::mem::take(&mut buffer.patterns),
            interventions: std::mem::take(&mut buffer.interventions),
            outcomes,
            effectiveness,
        };
        let mut records = read_records(&self.path).await?;
        records.push(record);
        write_records_durably(&self.path, &records).await?;
        Ok(session_id)
    }

    /// Patterns appearing at least `N` times in the last `weeks_back` weeks,
    /// where `N` is 3 once the dataset has at least 9 total pattern
    /// occurrences, else 1.
    pub async fn load_recurring(&self, weeks_back: i64) -> Result<Vec<String>, PatternError> {
        let records = read_records(&self.path).await?;
        let cutoff = chrono::Utc::now() - chrono::Duration::weeks(weeks_back);
        let mut counts: HashMap<String, u32> = HashMap::new();
        let mut total = 0u32;
        for record in records.iter().filter(|r| r.timestamp >= cutoff) {
            for pattern in &record.patterns {
                *counts.entry(pattern.pattern_type.clone()).or_insert(0) += 1;
                total += 1;
            }
        }
        let threshold = if total >= 9 { 3 } else { 1 };
        let mut recurring: Vec<_> = counts
            .into_iter()
            .filter(|(_, count)| *count >= threshold)
            .map(|(pattern_type, _)| pattern_type)
            .collect();
        recurring.sort();
        Ok(recurring)
    }

    pub async fn intervention_history(&self, intervention_type: &str) -> Result<InterventionHistory, PatternError> {
        let records = read_records(&self.path).await?;
        let mut count = 0u32;
        let mut effectiveness_sum = 0.0;
        let mut recent_contexts = Vec::new();
        for record in &records {
            for intervention in &record.interventions {
                if intervention.intervention_type == intervention_type {
                    count += 1;
                    effectiveness_sum += record.effectiveness;
                    recent_contexts.push(intervention.context.clone());
                }
            }
        }
        recent_contexts.truncate(10);
        Ok(InterventionHistory {
            count,
            avg_effectiveness: if count > 0 { effectiveness_sum / f64::from(count) } else { 0.0 },
            recent_contexts,
        })
    }
}

fn new_record_id() -> String {
    let now = chrono::Utc::now();
    let suffix: u32 = rand::random();
    format!("{}-{:08x}", now.format("%Y%m%dT%H%M%S%.f"), suffix)
}

async fn read_records(path: &Path) -> Result<Vec<PatternRecord>, PatternError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

/// Writes to a sibling temp file and renames it over `path`, so a crash
/// mid-write never truncates the previously-durable file.
pub(crate) async fn write_durably(path: &Path, contents: &str) -> Result<(), PatternError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

async fn write_records_durably(path: &Path, records: &[PatternRecord]) -> Result<(), PatternError> {
    let contents = serde_json::to_string_pretty(records)?;
    write_durably(path, &contents).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes(completed: u32, total: u32) -> SessionOutcome {
        SessionOutcome {
            completed_phases: completed,
            total_phases: total,
            focus_score: Some(70.0),
            coherence_score: Some(0.7),
            high_severity_pattern_count: 0,
            context_switch_count: 0,
        }
    }

    #[test]
    fn effectiveness_applies_all_bonuses() {
        let score = compute_effectiveness(&outcomes(5, 5));
        assert!((score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn effectiveness_clamps_with_penalties() {
        let mut o = outcomes(5, 5);
        o.high_severity_pattern_count = 5;
        o.context_switch_count = 20;
        let score = compute_effectiveness(&o);
        assert!((score - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn save_and_load_recurring_respects_adaptive_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatternStore::new(dir.path().join("patterns.json"));

        for _ in 0..2 {
            store
                .track_pattern(ObservedPattern {
                    pattern_type: "task_switching".into(),
                    severity: Severity::Medium,
                    context: "mindsweep".into(),
                })
                .await;
            store.save(outcomes(3, 3)).await.unwrap();
        }
        let recurring = store.load_recurring(4).await.unwrap();
        assert_eq!(recurring, vec!["task_switching".to_string()]);
    }

    #[tokio::test]
    async fn intervention_history_averages_effectiveness() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatternStore::new(dir.path().join("patterns.json"));
        store
            .track_intervention(Intervention {
                intervention_type: "break_reminder".into(),
                context: "phase 2".into(),
            })
            .await;
        store.save(outcomes(5, 5)).await.unwrap();
        let history = store.intervention_history("break_reminder").await.unwrap();
        assert_eq!(history.count, 1);
        assert!(history.avg_effectiveness > 0.0);
    }
}
