//! Checkpointer: durable, thread-isolated versioned storage of session
//! state (§4.4), plus pluggable backend selection.

pub mod metadata_store;
#[cfg(feature = "libsql")]
pub mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::CheckpointError;

pub use metadata_store::{InMemoryMetadataStore, MetadataStore, SessionMetadata};

/// Addresses a single thread's checkpoint history. Checkpoints for distinct
/// `thread_id`s are fully isolated — no backend may satisfy a read for one
/// thread from another's data.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    pub thread_id: String,
}

impl CheckpointConfig {
    pub fn new(thread_id: impl Into<String>) -> Result<Self, CheckpointError> {
        let thread_id = thread_id.into();
        if thread_id.trim().is_empty() {
            return Err(CheckpointError::InvalidArgument(
                "thread_id must not be empty".into(),
            ));
        }
        Ok(Self { thread_id })
    }
}

/// Bookkeeping metadata attached to a checkpoint write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: String,
    pub step: i64,
    pub writes: serde_json::Value,
    pub parents: HashMap<String, String>,
}

/// A single durable snapshot of session state (§3 Checkpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub checkpoint_id: String,
    pub parent_id: Option<String>,
    pub ts: DateTime<Utc>,
    pub channel_values: serde_json::Value,
    pub channel_versions: HashMap<String, u64>,
    pub versions_seen: HashMap<String, u64>,
    pub metadata: CheckpointMetadata,
}

/// Storage backend for checkpoints. Implementations MUST isolate reads and
/// writes by `thread_id` and MUST tolerate an unknown thread by returning
/// `Ok(None)` rather than an error.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError>;
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>, CheckpointError>;
    async fn list(&self, config: &CheckpointConfig) -> Result<Vec<Checkpoint>, CheckpointError>;
}

/// In-memory checkpointer. Default backend; also the only backend this
/// implementation falls back to, and only when explicitly configured —
/// never silently (§4.4 REDESIGN note).
#[derive(Default)]
pub struct InMemoryCheckpointer {
    by_thread: Mutex<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let mut by_thread = self.by_thread.lock().await;
        by_thread
            .entry(checkpoint.thread_id.clone())
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>, CheckpointError> {
        let by_thread = self.by_thread.lock().await;
        Ok(by_thread
            .get(&config.thread_id)
            .and_then(|v| v.last())
            .cloned())
    }

    async fn list(&self, config: &CheckpointConfig) -> Result<Vec<Checkpoint>, CheckpointError> {
        let by_thread = self.by_thread.lock().await;
        let mut checkpoints = by_thread.get(&config.thread_id).cloned().unwrap_or_default();
        checkpoints.reverse(); // most-recent first
        Ok(checkpoints)
    }
}

/// Which checkpointer backend to use. Selection is strict: a backend that
/// cannot be constructed is a fatal `ConfigError` at startup, never a
/// silent downgrade to in-memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointBackend {
    Memory,
    #[cfg(feature = "libsql")]
    Sqlite,
}

pub async fn create_checkpointer(
    backend: CheckpointBackend,
    db_path: &str,
) -> Result<Arc<dyn Checkpointer>, crate::error::ConfigError> {
    match backend {
        CheckpointBackend::Memory => Ok(Arc::new(InMemoryCheckpointer::new())),
        #[cfg(feature = "libsql")]
        CheckpointBackend::Sqlite => {
            let store = sqlite::SqliteCheckpointer::open(db_path)
                .await
                .map_err(|e| crate::error::ConfigError::BackendUnavailable {
                    backend: "sqlite".into(),
                    reason: e.to_string(),
                })?;
            Ok(Arc::new(store))
        }
    }
}

/// Selects the `MetadataStore` matching `backend`, sharing the same db file
/// as the checkpointer so `session_metadata` lives alongside `checkpoints`
/// (§6 "Persisted state layout").
pub async fn create_metadata_store(
    backend: CheckpointBackend,
    db_path: &str,
) -> Result<Arc<dyn MetadataStore>, crate::error::ConfigError> {
    match backend {
        CheckpointBackend::Memory => Ok(Arc::new(InMemoryMetadataStore::new())),
        #[cfg(feature = "libsql")]
        CheckpointBackend::Sqlite => {
            let store = sqlite::SqliteMetadataStore::open(db_path)
                .await
                .map_err(|e| crate::error::ConfigError::BackendUnavailable {
                    backend: "sqlite".into(),
                    reason: e.to_string(),
                })?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(thread_id: &str, step: i64) -> Checkpoint {
        Checkpoint {
            thread_id: thread_id.to_string(),
            checkpoint_id: format!("cp-{step}"),
            parent_id: None,
            ts: Utc::now(),
            channel_values: serde_json::json!({"step": step}),
            channel_versions: HashMap::new(),
            versions_seen: HashMap::new(),
            metadata: CheckpointMetadata {
                source: "test".into(),
                step,
                writes: serde_json::json!({}),
                parents: HashMap::new(),
            },
        }
    }

    #[tokio::test]
    async fn unknown_thread_returns_none_not_error() {
        let cp = InMemoryCheckpointer::new();
        let config = CheckpointConfig::new("nonexistent").unwrap();
        assert!(cp.get(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn threads_are_isolated() {
        let cp = InMemoryCheckpointer::new();
        cp.put(sample("a", 1)).await.unwrap();
        cp.put(sample("b", 1)).await.unwrap();
        let config_a = CheckpointConfig::new("a").unwrap();
        let latest = cp.get(&config_a).await.unwrap().unwrap();
        assert_eq!(latest.thread_id, "a");
    }

    #[tokio::test]
    async fn list_is_most_recent_first() {
        let cp = InMemoryCheckpointer::new();
        cp.put(sample("a", 1)).await.unwrap();
        cp.put(sample("a", 2)).await.unwrap();
        let config = CheckpointConfig::new("a").unwrap();
        let all = cp.list(&config).await.unwrap();
        assert_eq!(all[0].metadata.step, 2);
        assert_eq!(all[1].metadata.step, 1);
    }

    #[test]
    fn empty_thread_id_is_invalid_argument() {
        let err = CheckpointConfig::new("").unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn large_checkpoint_round_trips_losslessly() {
        let cp = InMemoryCheckpointer::new();
        let big_value = "x".repeat(150_000);
        let mut checkpoint = sample("big", 1);
        checkpoint.channel_values = serde_json::json!({"blob": big_value});
        cp.put(checkpoint.clone()).await.unwrap();
        let config = CheckpointConfig::new("big").unwrap();
        let got = cp.get(&config).await.unwrap().unwrap();
        assert_eq!(got.channel_values, checkpoint.channel_values);
    }
}
