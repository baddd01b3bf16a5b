//! Session metadata store: the index over checkpointed threads (§4.4).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::CheckpointError;
use crate::scheduler::{Phase, WorkflowType};

/// Row persisted per session, indexed by `thread_id` and `updated_at DESC`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub workflow_type: WorkflowType,
    pub user_id: String,
    pub phase: Phase,
    pub completed: bool,
    pub error_count: u32,
    pub metadata: serde_json::Value,
}

/// Aggregate counters returned by [`MetadataStore::get_statistics`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetadataStatistics {
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub total_errors: u64,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn upsert(&self, row: SessionMetadata) -> Result<(), CheckpointError>;
    async fn get(&self, session_id: &str) -> Result<Option<SessionMetadata>, CheckpointError>;
    async fn list_recent(
        &self,
        workflow_type: Option<WorkflowType>,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionMetadata>, CheckpointError>;
    /// Most recent incomplete session started within the last 24 hours.
    async fn get_resumable(&self, user_id: &str) -> Result<Option<SessionMetadata>, CheckpointError>;
    async fn mark_complete(&self, session_id: &str) -> Result<(), CheckpointError>;
    async fn increment_errors(&self, session_id: &str) -> Result<(), CheckpointError>;
    async fn cleanup_older_than(&self, days: i64) -> Result<u64, CheckpointError>;
    async fn get_statistics(&self) -> Result<MetadataStatistics, CheckpointError>;
}

/// In-memory metadata store, sufficient for the in-memory checkpointer
/// backend and for tests.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    rows: Mutex<HashMap<String, SessionMetadata>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn upsert(&self, row: SessionMetadata) -> Result<(), CheckpointError> {
        self.rows.lock().await.insert(row.session_id.clone(), row);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionMetadata>, CheckpointError> {
        Ok(self.rows.lock().await.get(session_id).cloned())
    }

    async fn list_recent(
        &self,
        workflow_type: Option<WorkflowType>,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionMetadata>, CheckpointError> {
        let rows = self.rows.lock().await;
        let mut matches: Vec<_> = rows
            .values()
            .filter(|r| workflow_type.is_none_or(|w| w == r.workflow_type))
            .filter(|r| user_id.is_none_or(|u| u == r.user_id))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn get_resumable(&self, user_id: &str) -> Result<Option<SessionMetadata>, CheckpointError> {
        let rows = self.rows.lock().await;
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        Ok(rows
            .values()
            .filter(|r| r.user_id == user_id && !r.completed && r.updated_at >= cutoff)
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    async fn mark_complete(&self, session_id: &str) -> Result<(), CheckpointError> {
        if let Some(row) = self.rows.lock().await.get_mut(session_id) {
            row.completed = true;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn increment_errors(&self, session_id: &str) -> Result<(), CheckpointError> {
        if let Some(row) = self.rows.lock().await.get_mut(session_id) {
            row.error_count += 1;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn cleanup_older_than(&self, days: i64) -> Result<u64, CheckpointError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|_, r| r.updated_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }

    async fn get_statistics(&self) -> Result<MetadataStatistics, CheckpointError> {
        let rows = self.rows.lock().await;
        Ok(MetadataStatistics {
            total_sessions: rows.len() as u64,
            completed_sessions: rows.values().filter(|r| r.completed).count() as u64,
            total_errors: rows.values().map(|r| u64::from(r.error_count)).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(session_id: &str, user_id: &str, completed: bool) -> SessionMetadata {
        SessionMetadata {
            session_id: session_id.to_string(),
            thread_id: session_id.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            workflow_type: WorkflowType::WeeklyReview,
            user_id: user_id.to_string(),
            phase: Phase::Startup,
            completed,
            error_count: 0,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = InMemoryMetadataStore::new();
        store.upsert(row("s1", "u1", false)).await.unwrap();
        store.upsert(row("s1", "u1", false)).await.unwrap();
        let stats = store.get_statistics().await.unwrap();
        assert_eq!(stats.total_sessions, 1);
    }

    #[tokio::test]
    async fn get_resumable_excludes_completed() {
        let store = InMemoryMetadataStore::new();
        store.upsert(row("s1", "u1", true)).await.unwrap();
        store.upsert(row("s2", "u1", false)).await.unwrap();
        let resumable = store.get_resumable("u1").await.unwrap().unwrap();
        assert_eq!(resumable.session_id, "s2");
    }

    #[tokio::test]
    async fn mark_complete_and_increment_errors() {
        let store = InMemoryMetadataStore::new();
        store.upsert(row("s1", "u1", false)).await.unwrap();
        store.increment_errors("s1").await.unwrap();
        store.mark_complete("s1").await.unwrap();
        let got = store.get("s1").await.unwrap().unwrap();
        assert!(got.completed);
        assert_eq!(got.error_count, 1);
    }

    #[tokio::test]
    async fn cleanup_removes_old_rows() {
        let store = InMemoryMetadataStore::new();
        let mut old = row("s1", "u1", false);
        old.updated_at = Utc::now() - chrono::Duration::days(40);
        store.upsert(old).await.unwrap();
        store.upsert(row("s2", "u1", false)).await.unwrap();
        let removed = store.cleanup_older_than(30).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("s1").await.unwrap().is_none());
    }
}
