//! Batching, retry, temporal-decay and local-backup wrapper around a
//! [`MemoryClient`] sink (§4.5).
//!
//! Memory failures never fail the agent loop: every public method here
//! returns `()` or a best-effort result, swallowing sink errors after
//! falling back to a local JSON backup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::{Episode, EpisodeType, MemoryClient, MemoryHit};
use crate::error::MemoryError;

/// Default number of queued episodes of a "general" type that triggers an
/// automatic flush.
pub const DEFAULT_BATCH_THRESHOLD: usize = 5;
/// Minimum threshold accepted by [`BatchingConfig::new`].
pub const MIN_BATCH_THRESHOLD: usize = 3;
/// Flush threshold for "small" episode types — short, high-frequency
/// episodes that would otherwise sit in the queue for a while under the
/// general threshold (§4.5 "default 3 for small types, 5 general").
pub const SMALL_BATCH_THRESHOLD: usize = 3;
/// Episodes are flushed regardless of threshold after this much queue idle time.
pub const DORMANCY_TIMEOUT: Duration = Duration::from_secs(60);
/// A flush never ships more than this many episodes in one sink call.
pub const MAX_SUB_BATCH: usize = 10;
/// Default decay rate applied to recency-scored search hits.
pub const DEFAULT_DECAY_RATE: f64 = 0.05;
/// Minimum number of prior captures before augmentation context is injected.
pub const AUGMENTATION_THRESHOLD: usize = 5;
/// Default number of decayed hits surfaced as augmentation context.
pub const DEFAULT_TOP_K: usize = 5;

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct BatchingConfig {
    pub batch_threshold: usize,
    pub decay_rate: f64,
    pub top_k: usize,
    pub skip_trivial: bool,
    pub backup_dir: PathBuf,
}

impl BatchingConfig {
    pub fn new(backup_dir: PathBuf) -> Self {
        Self {
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            decay_rate: DEFAULT_DECAY_RATE,
            top_k: DEFAULT_TOP_K,
            skip_trivial: true,
            backup_dir,
        }
    }

    pub fn with_batch_threshold(mut self, threshold: usize) -> Self {
        self.batch_threshold = threshold.max(MIN_BATCH_THRESHOLD);
        self
    }
}

/// 1s, 2s, 4s — exact per-spec backoff, unjittered (distinct from the tool
/// retry formula in [`crate::tools::tool::tool_retry_delay`], which jitters).
fn memory_retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(1000 * 2u64.pow(attempt))
}

fn decay_score(raw_score: f64, age_days: f64, decay_rate: f64) -> f64 {
    raw_score * (-decay_rate * age_days).exp()
}

/// Pending episodes, partitioned by `episode_type` so a flush can group
/// and submit each type's sub-batch in its own enqueue order (§4.5, §5).
#[derive(Default)]
struct PendingQueue {
    by_type: HashMap<EpisodeType, Vec<Episode>>,
    last_enqueued_at: Option<std::time::Instant>,
}

impl PendingQueue {
    fn is_empty(&self) -> bool {
        self.by_type.values().all(|v| v.is_empty())
    }
}

/// Wraps a [`MemoryClient`] sink with batching, retry and local backup.
///
/// Episodes of a type in [`EpisodeType::always_send_immediately`] bypass the
/// queue. Everything else accumulates until `batch_threshold` is reached, a
/// manual [`BatchingMemory::flush`] is called, or the queue has sat idle for
/// [`DORMANCY_TIMEOUT`].
pub struct BatchingMemory {
    sink: Arc<dyn MemoryClient>,
    config: BatchingConfig,
    queue: Mutex<PendingQueue>,
    skipped_trivial: AtomicU64,
}

impl BatchingMemory {
    pub fn new(sink: Arc<dyn MemoryClient>, config: BatchingConfig) -> Self {
        Self {
            sink,
            config,
            queue: Mutex::new(PendingQueue::default()),
            skipped_trivial: AtomicU64::new(0),
        }
    }

    /// The threshold a given episode type's sub-queue flushes at (§4.5
    /// "default 3 for small types, 5 general").
    fn threshold_for(&self, episode_type: EpisodeType) -> usize {
        if episode_type.is_small() {
            SMALL_BATCH_THRESHOLD
        } else {
            self.config.batch_threshold
        }
    }

    /// Number of episodes skipped as trivial content, for the
    /// `skipped_trivial` metric (§8 scenario 4).
    pub fn skipped_trivial(&self) -> u64 {
        self.skipped_trivial.load(Ordering::Relaxed)
    }

    /// Enqueues (or immediately sends) an episode. Never returns an error —
    /// sink failures are absorbed into the local backup path.
    pub async fn add_episode(&self, episode: Episode) {
        if self.config.skip_trivial && !episode.critical && episode.is_trivial() {
            debug!(episode_type = ?episode.episode_type, "skipping trivial episode");
            self.skipped_trivial.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if episode.critical || episode.episode_type.always_send_immediately() {
            self.send_with_retry(&episode).await;
            return;
        }

        let threshold = self.threshold_for(episode.episode_type);
        let should_flush = {
            let mut queue = self.queue.lock().await;
            let bucket = queue.by_type.entry(episode.episode_type).or_default();
            bucket.push(episode);
            let len = bucket.len();
            queue.last_enqueued_at = Some(std::time::Instant::now());
            len >= threshold
        };
        if should_flush {
            self.flush().await;
        }
    }

    /// True if the queue is non-empty and has been idle past the dormancy
    /// timeout. Callers poll this on a timer and call [`Self::flush`].
    pub async fn is_dormant(&self) -> bool {
        let queue = self.queue.lock().await;
        match queue.last_enqueued_at {
            Some(at) => !queue.is_empty() && at.elapsed() >= DORMANCY_TIMEOUT,
            None => false,
        }
    }

    /// Drains and sends the entire queue. Episodes are grouped by type and,
    /// within each type group, submitted in enqueue order in sub-batches of
    /// at most [`MAX_SUB_BATCH`] (§4.5, §5).
    pub async fn flush(&self) {
        let by_type = {
            let mut queue = self.queue.lock().await;
            std::mem::take(&mut queue.by_type)
        };
        for episode_type in EpisodeType::all() {
            let Some(episodes) = by_type.get(episode_type) else { continue };
            for chunk in episodes.chunks(MAX_SUB_BATCH) {
                for episode in chunk {
                    self.send_with_retry(episode).await;
                }
            }
        }
    }

    async fn send_with_retry(&self, episode: &Episode) {
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            match self.sink.add_episode(episode).await {
                Ok(_) => return,
                Err(MemoryError::Terminal(reason)) => {
                    warn!(reason = %reason, "memory sink rejected episode, backing up locally");
                    self.write_local_backup(episode, &reason).await;
                    return;
                }
                Err(err) => {
                    last_err = Some(err);
                    if attempt + 1 < MAX_RETRIES {
                        tokio::time::sleep(memory_retry_delay(attempt)).await;
                    }
                }
            }
        }
        let reason = last_err.map(|e| e.to_string()).unwrap_or_default();
        error!(reason = %reason, "memory sink exhausted retries, backing up locally");
        self.write_local_backup(episode, &reason).await;
    }

    async fn write_local_backup(&self, episode: &Episode, reason: &str) {
        if let Err(err) = self.try_write_local_backup(episode, reason).await {
            error!(error = %err, "failed to write local memory backup");
        }
    }

    async fn try_write_local_backup(&self, episode: &Episode, reason: &str) -> Result<(), MemoryError> {
        tokio::fs::create_dir_all(&self.config.backup_dir).await?;
        let path = self.config.backup_dir.join(format!("{}.jsonl", episode.session_id));
        let record = serde_json::json!({
            "episode": episode,
            "reason": reason,
            "backed_up_at": chrono::Utc::now(),
        });
        let line = serde_json::to_string(&record).map_err(|e| MemoryError::RequestFailed(e.to_string()))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    /// Searches the sink and applies temporal decay, re-sorting by the
    /// decayed score while keeping the raw score visible on each hit.
    pub async fn search_decayed(&self, group_id: &str, query: &str, limit: usize) -> Vec<MemoryHit> {
        let raw = match self.sink.search(group_id, query, limit).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "memory search failed");
                return Vec::new();
            }
        };
        let now = chrono::Utc::now();
        let mut decayed: Vec<MemoryHit> = raw
            .into_iter()
            .map(|hit| {
                let age_days = (now - hit.timestamp).num_seconds() as f64 / 86_400.0;
                let decayed_score = decay_score(hit.raw_score, age_days.max(0.0), self.config.decay_rate);
                MemoryHit { decayed_score, ..hit }
            })
            .collect();
        decayed.sort_by(|a, b| b.decayed_score.total_cmp(&a.decayed_score));
        decayed
    }

    /// Returns augmentation context once the caller has accumulated at least
    /// [`AUGMENTATION_THRESHOLD`] prior captures, otherwise an empty vec.
    pub async fn augmentation_context(
        &self,
        group_id: &str,
        query: &str,
        prior_capture_count: usize,
    ) -> Vec<MemoryHit> {
        if prior_capture_count < AUGMENTATION_THRESHOLD {
            return Vec::new();
        }
        let mut hits = self.search_decayed(group_id, query, self.config.top_k * 2).await;
        hits.truncate(self.config.top_k);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Phase;
    use async_trait::async_trait;

    #[derive(Default)]
    struct FakeSink {
        episodes: Mutex<Vec<Episode>>,
        fail_n_times: Mutex<u32>,
    }

    #[async_trait]
    impl MemoryClient for FakeSink {
        async fn search(&self, _group_id: &str, _query: &str, _limit: usize) -> Result<Vec<MemoryHit>, MemoryError> {
            Ok(vec![
                MemoryHit {
                    content: "old".into(),
                    raw_score: 1.0,
                    decayed_score: 1.0,
                    timestamp: chrono::Utc::now() - chrono::Duration::days(30),
                },
                MemoryHit {
                    content: "new".into(),
                    raw_score: 0.9,
                    decayed_score: 0.9,
                    timestamp: chrono::Utc::now(),
                },
            ])
        }

        async fn add_episode(&self, episode: &Episode) -> Result<String, MemoryError> {
            let mut fail_n = self.fail_n_times.lock().await;
            if *fail_n > 0 {
                *fail_n -= 1;
                return Err(MemoryError::RequestFailed("transient".into()));
            }
            self.episodes.lock().await.push(episode.clone());
            Ok("ep-1".into())
        }
    }

    fn episode(episode_type: EpisodeType, content: &str) -> Episode {
        Episode::new(
            episode_type,
            Phase::Startup,
            serde_json::json!({"content": content}),
            "sess-1",
            "group-1",
        )
    }

    #[tokio::test]
    async fn queue_flushes_at_threshold() {
        let sink = Arc::new(FakeSink::default());
        let mem = BatchingMemory::new(sink.clone(), BatchingConfig::new(std::env::temp_dir()).with_batch_threshold(3));
        for i in 0..3 {
            mem.add_episode(episode(EpisodeType::BehaviorPattern, &format!("capture number {i}"))).await;
        }
        assert_eq!(sink.episodes.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn session_summary_bypasses_queue() {
        let sink = Arc::new(FakeSink::default());
        let mem = BatchingMemory::new(sink.clone(), BatchingConfig::new(std::env::temp_dir()));
        mem.add_episode(episode(EpisodeType::SessionSummary, "final summary text")).await;
        assert_eq!(sink.episodes.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn trivial_episode_is_skipped() {
        let sink = Arc::new(FakeSink::default());
        let mem = BatchingMemory::new(sink.clone(), BatchingConfig::new(std::env::temp_dir()).with_batch_threshold(3));
        mem.add_episode(episode(EpisodeType::Interaction, "ok")).await;
        mem.flush().await;
        assert_eq!(sink.episodes.lock().await.len(), 0);
        assert_eq!(mem.skipped_trivial(), 1);
    }

    #[tokio::test]
    async fn small_episode_types_flush_at_the_lower_threshold() {
        let sink = Arc::new(FakeSink::default());
        let mem = BatchingMemory::new(sink.clone(), BatchingConfig::new(std::env::temp_dir()));
        for i in 0..SMALL_BATCH_THRESHOLD {
            mem.add_episode(episode(EpisodeType::MindsweepCapture, &format!("item {i} with real content"))).await;
        }
        assert_eq!(sink.episodes.lock().await.len(), SMALL_BATCH_THRESHOLD);
    }

    #[tokio::test]
    async fn flush_groups_episodes_by_type() {
        let sink = Arc::new(FakeSink::default());
        let mem = BatchingMemory::new(sink.clone(), BatchingConfig::new(std::env::temp_dir()).with_batch_threshold(10));
        mem.add_episode(episode(EpisodeType::BehaviorPattern, "pattern one with real content")).await;
        mem.add_episode(episode(EpisodeType::TimingAnalysis, "timing one with real content")).await;
        mem.add_episode(episode(EpisodeType::BehaviorPattern, "pattern two with real content")).await;
        mem.flush().await;
        let sent = sink.episodes.lock().await;
        assert_eq!(sent.len(), 3);
        assert!(matches!(sent[0].episode_type, EpisodeType::TimingAnalysis));
        assert!(matches!(sent[1].episode_type, EpisodeType::BehaviorPattern));
        assert!(matches!(sent[2].episode_type, EpisodeType::BehaviorPattern));
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let sink = Arc::new(FakeSink {
            fail_n_times: Mutex::new(2),
            ..Default::default()
        });
        let mem = BatchingMemory::new(sink.clone(), BatchingConfig::new(std::env::temp_dir()));
        mem.add_episode(episode(EpisodeType::SessionSummary, "final summary text").critical()).await;
        assert_eq!(sink.episodes.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn terminal_error_writes_local_backup_not_retry() {
        struct TerminalSink;
        #[async_trait]
        impl MemoryClient for TerminalSink {
            async fn search(&self, _: &str, _: &str, _: usize) -> Result<Vec<MemoryHit>, MemoryError> {
                Ok(Vec::new())
            }
            async fn add_episode(&self, _: &Episode) -> Result<String, MemoryError> {
                Err(MemoryError::Terminal("bad request".into()))
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let mem = BatchingMemory::new(Arc::new(TerminalSink), BatchingConfig::new(dir.path().to_path_buf()));
        mem.add_episode(episode(EpisodeType::SessionSummary, "final summary text")).await;
        let backup_path = dir.path().join("sess-1.jsonl");
        let contents = tokio::fs::read_to_string(&backup_path).await.unwrap();
        assert!(contents.contains("bad request"));
    }

    #[tokio::test]
    async fn decay_orders_recent_hits_first_and_keeps_raw_visible() {
        let sink = Arc::new(FakeSink::default());
        let mem = BatchingMemory::new(sink, BatchingConfig::new(std::env::temp_dir()));
        let hits = mem.search_decayed("group-1", "query", 10).await;
        assert_eq!(hits[0].content, "new");
        assert!(hits[0].raw_score > 0.0);
        assert!(hits[1].decayed_score < hits[1].raw_score);
    }

    #[tokio::test]
    async fn augmentation_context_empty_below_threshold() {
        let sink = Arc::new(FakeSink::default());
        let mem = BatchingMemory::new(sink, BatchingConfig::new(std::env::temp_dir()));
        let ctx = mem.augmentation_context("group-1", "query", 2).await;
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn augmentation_context_present_at_threshold() {
        let sink = Arc::new(FakeSink::default());
        let mem = BatchingMemory::new(sink, BatchingConfig::new(std::env::temp_dir()));
        let ctx = mem.augmentation_context("group-1", "query", AUGMENTATION_THRESHOLD).await;
        assert!(!ctx.is_empty());
    }
}
