//! EvolutionStore: append-only supersession chains tracking how a pattern
//! changes across sessions (§4.6). Records are never deleted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::Intervention;
use crate::error::PatternError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    fn level(self) -> i32 {
        match self {
            Severity::None => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionType {
    Improved,
    Worsened,
    Transformed,
    Resolved,
    Emerged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSnapshot {
    pub pattern_type: String,
    pub severity: Severity,
    pub frequency: f64,
    pub duration_minutes: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionRecord {
    pub id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub evolution_type: EvolutionType,
    pub old_pattern: Option<PatternSnapshot>,
    pub new_pattern: Option<PatternSnapshot>,
    pub intervention: Option<Intervention>,
    pub supersedes: Option<String>,
    pub improvement_score: f64,
}

fn classify(old: &Option<PatternSnapshot>, new: &Option<PatternSnapshot>) -> EvolutionType {
    let old_severity = old.as_ref().map(|p| p.severity).unwrap_or(Severity::None);
    let new_severity = new.as_ref().map(|p| p.severity).unwrap_or(Severity::None);

    if new.is_none() || new_severity == Severity::None {
        return EvolutionType::Resolved;
    }
    if old.is_none() || old_severity == Severity::None {
        return EvolutionType::Emerged;
    }
    let type_changed = match (old, new) {
        (Some(o), Some(n)) => o.pattern_type != n.pattern_type,
        _ => false,
    };
    if type_changed {
        return EvolutionType::Transformed;
    }
    if new_severity.level() < old_severity.level() {
        return EvolutionType::Improved;
    }
    if new_severity.level() > old_severity.level() {
        return EvolutionType::Worsened;
    }
    EvolutionType::Transformed
}

/// `(old_level - new_level) * 0.33 + 0.2*(freq down) + 0.2*(duration down)`,
/// clamped to `[-1, 1]`.
fn improvement_score(old: &Option<PatternSnapshot>, new: &Option<PatternSnapshot>) -> f64 {
    let old_level = old.as_ref().map(|p| p.severity.level()).unwrap_or(0) as f64;
    let new_level = new.as_ref().map(|p| p.severity.level()).unwrap_or(0) as f64;
    let mut score = (old_level - new_level) * 0.33;

    if let (Some(o), Some(n)) = (old, new) {
        if n.frequency < o.frequency {
            score += 0.2;
        }
        if n.duration_minutes < o.duration_minutes {
            score += 0.2;
        }
    }
    score.clamp(-1.0, 1.0)
}

pub struct EvolutionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EvolutionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Appends a new evolution record to the chain keyed by the first
    /// pattern id, returning the new record's id.
    pub async fn track(
        &self,
        chain_id: &str,
        old_pattern: Option<PatternSnapshot>,
        new_pattern: Option<PatternSnapshot>,
        intervention: Option<Intervention>,
    ) -> Result<String, PatternError> {
        let _guard = self.lock.lock().await;
        let mut all = read_chains(&self.path).await?;
        let chain = all.entry(chain_id.to_string()).or_default();
        let supersedes = chain.last().map(|r| r.id.clone());
        let record = EvolutionRecord {
            id: new_evo_id(),
            timestamp: chrono::Utc::now(),
            evolution_type: classify(&old_pattern, &new_pattern),
            improvement_score: improvement_score(&old_pattern, &new_pattern),
            old_pattern,
            new_pattern,
            intervention,
            supersedes,
        };
        chain.push(record.clone());
        write_chains_durably(&self.path, &all).await?;
        Ok(record.id)
    }

    pub async fn chain(&self, chain_id: &str) -> Result<Vec<EvolutionRecord>, PatternError> {
        let all = read_chains(&self.path).await?;
        Ok(all.get(chain_id).cloned().unwrap_or_default())
    }

    /// Interventions with a positive mean improvement score, sorted
    /// descending by that mean.
    pub async fn successful_interventions(&self, pattern_type: &str) -> Result<Vec<(String, f64)>, PatternError> {
        let all = read_chains(&self.path).await?;
        let mut sums: HashMap<String, (f64, u32)> = HashMap::new();
        for record in all.values().flatten() {
            let matches_type = record
                .new_pattern
                .as_ref()
                .or(record.old_pattern.as_ref())
                .is_some_and(|p| p.pattern_type == pattern_type);
            if !matches_type {
                continue;
            }
            if let Some(intervention) = &record.intervention {
                let entry = sums.entry(intervention.intervention_type.clone()).or_insert((0.0, 0));
                entry.0 += record.improvement_score;
                entry.1 += 1;
            }
        }
        let mut results: Vec<(String, f64)> = sums
            .into_iter()
            .map(|(name, (sum, count))| (name, sum / f64::from(count)))
            .filter(|(_, mean)| *mean > 0.0)
            .collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(results)
    }

    /// Narrates first-to-last severity for a pattern type, naming up to two
    /// positively-contributing interventions. Returns `None` when severity
    /// did not improve.
    pub async fn improvement_story(&self, pattern_type: &str) -> Result<Option<String>, PatternError> {
        let all = read_chains(&self.path).await?;
        let mut relevant: Vec<&EvolutionRecord> = all
            .values()
            .flatten()
            .filter(|r| {
                r.new_pattern
                    .as_ref()
                    .or(r.old_pattern.as_ref())
                    .is_some_and(|p| p.pattern_type == pattern_type)
            })
            .collect();
        relevant.sort_by_key(|r| r.timestamp);

        let first_severity = relevant.first().and_then(|r| r.old_pattern.as_ref()).map(|p| p.severity);
        let last_severity = relevant.last().and_then(|r| r.new_pattern.as_ref()).map(|p| p.severity);
        let (Some(first), Some(last)) = (first_severity, last_severity) else {
            return Ok(None);
        };
        if last.level() >= first.level() {
            return Ok(None);
        }

        let mut contributors: Vec<&str> = relevant
            .iter()
            .filter(|r| r.improvement_score > 0.0)
            .filter_map(|r| r.intervention.as_ref())
            .map(|i| i.intervention_type.as_str())
            .collect();
        contributors.dedup();
        contributors.truncate(2);

        Ok(Some(format!(
            "{pattern_type} went from {first:?} to {last:?}{}",
            if contributors.is_empty() {
                String::new()
            } else {
                format!(", helped along by {}", contributors.join(" and "))
            }
        )))
    }
}

fn new_evo_id() -> String {
    format!("evo-{}", uuid::Uuid::new_v4())
}

async fn read_chains(path: &Path) -> Result<HashMap<String, Vec<EvolutionRecord>>, PatternError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(err) => Err(err.into()),
    }
}

async fn write_chains_durably(
    path: &Path,
    chains: &HashMap<String, Vec<EvolutionRecord>>,
) -> Result<(), PatternError> {
    let contents = serde_json::to_string_pretty(chains)?;
    super::write_durably(path, &contents).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pattern_type: &str, severity: Severity) -> PatternSnapshot {
        PatternSnapshot {
            pattern_type: pattern_type.into(),
            severity,
            frequency: 3.0,
            duration_minutes: 10.0,
        }
    }

    #[test]
    fn classify_resolved_worsened_improved() {
        assert_eq!(
            classify(&Some(snapshot("p", Severity::Medium)), &Some(snapshot("p", Severity::None))),
            EvolutionType::Resolved
        );
        assert_eq!(
            classify(&Some(snapshot("p", Severity::Low)), &Some(snapshot("p", Severity::High))),
            EvolutionType::Worsened
        );
        assert_eq!(
            classify(&Some(snapshot("p", Severity::High)), &Some(snapshot("p", Severity::Low))),
            EvolutionType::Improved
        );
        assert_eq!(classify(&None, &Some(snapshot("p", Severity::Low))), EvolutionType::Emerged);
    }

    #[test]
    fn improvement_score_clamped() {
        let old = Some(snapshot("p", Severity::Critical));
        let new = Some(PatternSnapshot {
            pattern_type: "p".into(),
            severity: Severity::None,
            frequency: 0.0,
            duration_minutes: 0.0,
        });
        let score = improvement_score(&old, &new);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn track_builds_append_only_chain() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvolutionStore::new(dir.path().join("evolution.json"));
        store
            .track("chain-1", Some(snapshot("task_switching", Severity::High)), Some(snapshot("task_switching", Severity::Medium)), None)
            .await
            .unwrap();
        store
            .track("chain-1", Some(snapshot("task_switching", Severity::Medium)), Some(snapshot("task_switching", Severity::Low)), None)
            .await
            .unwrap();
        let chain = store.chain("chain-1").await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].supersedes.as_deref(), Some(chain[0].id.as_str()));
    }

    #[tokio::test]
    async fn improvement_story_names_contributors_and_null_when_worsened() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvolutionStore::new(dir.path().join("evolution.json"));
        let intervention = Intervention {
            intervention_type: "break_reminder".into(),
            context: "ctx".into(),
        };
        store
            .track("chain-1", Some(snapshot("task_switching", Severity::High)), Some(snapshot("task_switching", Severity::Low)), Some(intervention))
            .await
            .unwrap();
        let story = store.improvement_story("task_switching").await.unwrap();
        assert!(story.unwrap().contains("break_reminder"));

        store
            .track("chain-2", Some(snapshot("hyperfocus", Severity::Low)), Some(snapshot("hyperfocus", Severity::High)), None)
            .await
            .unwrap();
        let story = store.improvement_story("hyperfocus").await.unwrap();
        assert!(story.is_none());
    }
}
