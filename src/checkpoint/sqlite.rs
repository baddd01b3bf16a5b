//! libsql-backed checkpointer. Tolerates multiple independent connections
//! to the same file and survives process restarts (§4.4).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;

use crate::checkpoint::metadata_store::{MetadataStatistics, MetadataStore, SessionMetadata};
use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, Checkpointer};
use crate::error::CheckpointError;
use crate::scheduler::{Phase, WorkflowType};

pub struct SqliteCheckpointer {
    db: libsql::Database,
}

impl SqliteCheckpointer {
    pub async fn open(path: &str) -> Result<Self, CheckpointError> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(CheckpointError::LibSql)?;
        let conn = db.connect().map_err(CheckpointError::LibSql)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT NOT NULL,
                checkpoint_id TEXT NOT NULL,
                parent_id TEXT,
                ts TEXT NOT NULL,
                channel_values TEXT NOT NULL,
                channel_versions TEXT NOT NULL,
                versions_seen TEXT NOT NULL,
                metadata TEXT NOT NULL,
                PRIMARY KEY (thread_id, checkpoint_id)
            )",
            (),
        )
        .await
        .map_err(CheckpointError::LibSql)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_thread_ts ON checkpoints (thread_id, ts DESC)",
            (),
        )
        .await
        .map_err(CheckpointError::LibSql)?;
        Ok(Self { db })
    }

    fn row_to_checkpoint(
        thread_id: String,
        checkpoint_id: String,
        parent_id: Option<String>,
        ts: String,
        channel_values: String,
        channel_versions: String,
        versions_seen: String,
        metadata: String,
    ) -> Result<Checkpoint, CheckpointError> {
        Ok(Checkpoint {
            thread_id,
            checkpoint_id,
            parent_id,
            ts: ts.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
            channel_values: serde_json::from_str(&channel_values)?,
            channel_versions: serde_json::from_str(&channel_versions)?,
            versions_seen: serde_json::from_str(&versions_seen)?,
            metadata: serde_json::from_str::<CheckpointMetadata>(&metadata)?,
        })
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let conn = self.db.connect().map_err(CheckpointError::LibSql)?;
        conn.execute(
            "INSERT INTO checkpoints
                (thread_id, checkpoint_id, parent_id, ts, channel_values, channel_versions, versions_seen, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (thread_id, checkpoint_id) DO UPDATE SET
                parent_id = excluded.parent_id,
                ts = excluded.ts,
                channel_values = excluded.channel_values,
                channel_versions = excluded.channel_versions,
                versions_seen = excluded.versions_seen,
                metadata = excluded.metadata",
            params![
                checkpoint.thread_id.clone(),
                checkpoint.checkpoint_id.clone(),
                checkpoint.parent_id.clone(),
                checkpoint.ts.to_rfc3339(),
                serde_json::to_string(&checkpoint.channel_values)?,
                serde_json::to_string(&checkpoint.channel_versions)?,
                serde_json::to_string(&checkpoint.versions_seen)?,
                serde_json::to_string(&checkpoint.metadata)?,
            ],
        )
        .await
        .map_err(CheckpointError::LibSql)?;
        Ok(())
    }

    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>, CheckpointError> {
        let conn = self.db.connect().map_err(CheckpointError::LibSql)?;
        let mut rows = conn
            .query(
                "SELECT thread_id, checkpoint_id, parent_id, ts, channel_values, channel_versions, versions_seen, metadata
                 FROM checkpoints WHERE thread_id = ?1 ORDER BY ts DESC LIMIT 1",
                params![config.thread_id.clone()],
            )
            .await
            .map_err(CheckpointError::LibSql)?;

        let Some(row) = rows.next().await.map_err(CheckpointError::LibSql)? else {
            return Ok(None);
        };
        Ok(Some(Self::row_to_checkpoint(
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
        )?))
    }

    async fn list(&self, config: &CheckpointConfig) -> Result<Vec<Checkpoint>, CheckpointError> {
        let conn = self.db.connect().map_err(CheckpointError::LibSql)?;
        let mut rows = conn
            .query(
                "SELECT thread_id, checkpoint_id, parent_id, ts, channel_values, channel_versions, versions_seen, metadata
                 FROM checkpoints WHERE thread_id = ?1 ORDER BY ts DESC",
                params![config.thread_id.clone()],
            )
            .await
            .map_err(CheckpointError::LibSql)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(CheckpointError::LibSql)? {
            out.push(Self::row_to_checkpoint(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            )?);
        }
        Ok(out)
    }
}

/// `session_metadata` table in the same db file as [`SqliteCheckpointer`]
/// (§6 "Persisted state layout"). Grounded on
/// `CheckpointerManager._ensure_metadata_table` in the original implementation.
pub struct SqliteMetadataStore {
    db: libsql::Database,
}

impl SqliteMetadataStore {
    pub async fn open(path: &str) -> Result<Self, CheckpointError> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(CheckpointError::LibSql)?;
        let conn = db.connect().map_err(CheckpointError::LibSql)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_metadata (
                session_id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                workflow_type TEXT,
                user_id TEXT,
                phase TEXT,
                completed INTEGER DEFAULT 0,
                error_count INTEGER DEFAULT 0,
                metadata TEXT
            )",
            (),
        )
        .await
        .map_err(CheckpointError::LibSql)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_session_metadata_thread_id ON session_metadata (thread_id)",
            (),
        )
        .await
        .map_err(CheckpointError::LibSql)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_session_metadata_updated_at ON session_metadata (updated_at DESC)",
            (),
        )
        .await
        .map_err(CheckpointError::LibSql)?;
        Ok(Self { db })
    }

    fn row_to_metadata(
        session_id: String,
        thread_id: String,
        created_at: String,
        updated_at: String,
        workflow_type: String,
        user_id: String,
        phase: String,
        completed: i64,
        error_count: i64,
        metadata: String,
    ) -> Result<SessionMetadata, CheckpointError> {
        Ok(SessionMetadata {
            session_id,
            thread_id,
            created_at: created_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
            updated_at: updated_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
            workflow_type: serde_json::from_str(&workflow_type).unwrap_or(WorkflowType::DailyClarify),
            user_id,
            phase: serde_json::from_str(&phase).unwrap_or(Phase::Startup),
            completed: completed != 0,
            error_count: error_count as u32,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        })
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn upsert(&self, row: SessionMetadata) -> Result<(), CheckpointError> {
        let conn = self.db.connect().map_err(CheckpointError::LibSql)?;
        conn.execute(
            "INSERT INTO session_metadata
                (session_id, thread_id, created_at, updated_at, workflow_type, user_id, phase, completed, error_count, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (session_id) DO UPDATE SET
                thread_id = excluded.thread_id,
                updated_at = excluded.updated_at,
                workflow_type = excluded.workflow_type,
                user_id = excluded.user_id,
                phase = excluded.phase,
                completed = excluded.completed,
                error_count = excluded.error_count,
                metadata = excluded.metadata",
            params![
                row.session_id.clone(),
                row.thread_id.clone(),
                row.created_at.to_rfc3339(),
                row.updated_at.to_rfc3339(),
                serde_json::to_string(&row.workflow_type)?,
                row.user_id.clone(),
                serde_json::to_string(&row.phase)?,
                row.completed as i64,
                row.error_count as i64,
                serde_json::to_string(&row.metadata)?,
            ],
        )
        .await
        .map_err(CheckpointError::LibSql)?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionMetadata>, CheckpointError> {
        let conn = self.db.connect().map_err(CheckpointError::LibSql)?;
        let mut rows = conn
            .query(
                "SELECT session_id, thread_id, created_at, updated_at, workflow_type, user_id, phase, completed, error_count, metadata
                 FROM session_metadata WHERE session_id = ?1",
                params![session_id.to_string()],
            )
            .await
            .map_err(CheckpointError::LibSql)?;
        let Some(row) = rows.next().await.map_err(CheckpointError::LibSql)? else {
            return Ok(None);
        };
        Ok(Some(Self::row_to_metadata(
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
        )?))
    }

    async fn list_recent(
        &self,
        workflow_type: Option<WorkflowType>,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionMetadata>, CheckpointError> {
        let conn = self.db.connect().map_err(CheckpointError::LibSql)?;
        let mut rows = conn
            .query(
                "SELECT session_id, thread_id, created_at, updated_at, workflow_type, user_id, phase, completed, error_count, metadata
                 FROM session_metadata ORDER BY updated_at DESC",
                (),
            )
            .await
            .map_err(CheckpointError::LibSql)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(CheckpointError::LibSql)? {
            let candidate = Self::row_to_metadata(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
            )?;
            if workflow_type.is_none_or(|w| w == candidate.workflow_type)
                && user_id.is_none_or(|u| u == candidate.user_id)
            {
                out.push(candidate);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn get_resumable(&self, user_id: &str) -> Result<Option<SessionMetadata>, CheckpointError> {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let conn = self.db.connect().map_err(CheckpointError::LibSql)?;
        let mut rows = conn
            .query(
                "SELECT session_id, thread_id, created_at, updated_at, workflow_type, user_id, phase, completed, error_count, metadata
                 FROM session_metadata
                 WHERE user_id = ?1 AND completed = 0 AND updated_at >= ?2
                 ORDER BY updated_at DESC LIMIT 1",
                params![user_id.to_string(), cutoff.to_rfc3339()],
            )
            .await
            .map_err(CheckpointError::LibSql)?;
        let Some(row) = rows.next().await.map_err(CheckpointError::LibSql)? else {
            return Ok(None);
        };
        Ok(Some(Self::row_to_metadata(
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
        )?))
    }

    async fn mark_complete(&self, session_id: &str) -> Result<(), CheckpointError> {
        let conn = self.db.connect().map_err(CheckpointError::LibSql)?;
        conn.execute(
            "UPDATE session_metadata SET completed = 1, updated_at = ?2 WHERE session_id = ?1",
            params![session_id.to_string(), Utc::now().to_rfc3339()],
        )
        .await
        .map_err(CheckpointError::LibSql)?;
        Ok(())
    }

    async fn increment_errors(&self, session_id: &str) -> Result<(), CheckpointError> {
        let conn = self.db.connect().map_err(CheckpointError::LibSql)?;
        conn.execute(
            "UPDATE session_metadata SET error_count = error_count + 1, updated_at = ?2 WHERE session_id = ?1",
            params![session_id.to_string(), Utc::now().to_rfc3339()],
        )
        .await
        .map_err(CheckpointError::LibSql)?;
        Ok(())
    }

    async fn cleanup_older_than(&self, days: i64) -> Result<u64, CheckpointError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let conn = self.db.connect().map_err(CheckpointError::LibSql)?;
        let changed = conn
            .execute(
                "DELETE FROM session_metadata WHERE updated_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(CheckpointError::LibSql)?;
        Ok(changed)
    }

    async fn get_statistics(&self) -> Result<MetadataStatistics, CheckpointError> {
        let conn = self.db.connect().map_err(CheckpointError::LibSql)?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(completed), 0), COALESCE(SUM(error_count), 0) FROM session_metadata",
                (),
            )
            .await
            .map_err(CheckpointError::LibSql)?;
        let Some(row) = rows.next().await.map_err(CheckpointError::LibSql)? else {
            return Ok(MetadataStatistics::default());
        };
        let total_sessions: i64 = row.get(0)?;
        let completed_sessions: i64 = row.get(1)?;
        let total_errors: i64 = row.get(2)?;
        Ok(MetadataStatistics {
            total_sessions: total_sessions as u64,
            completed_sessions: completed_sessions as u64,
            total_errors: total_errors as u64,
        })
    }
}
