//! Error types for the GTD coach session runtime.

use std::time::Duration;

/// Top-level error type for the agent binary.
///
/// Rolls up every subsystem error via `#[from]` so call sites can propagate
/// with `?` regardless of which component failed. `Interrupt` is deliberately
/// absent here — it is a control signal, not an error (see [`crate::tools::tool::ToolSignal`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("tool error: {0}")]
    Tool(#[from] crate::tools::tool::ToolError),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("pattern store error: {0}")]
    Pattern(#[from] PatternError),

    #[error("recursion limit exceeded after {0} iterations")]
    RecursionLimit(u32),

    #[error("session cancelled by user")]
    UserCancel,
}

/// Configuration-related errors. Causes a non-zero startup exit (code 2).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("checkpointer backend {backend} could not be constructed: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Checkpointer / metadata-store errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("invalid checkpoint config: {0}")]
    InvalidArgument(String),

    #[error("storage backend error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "libsql")]
    #[error("libsql error: {0}")]
    LibSql(#[from] libsql::Error),

    #[error("storage corrupted, falling back to in-memory: {0}")]
    Corruption(String),
}

/// Phase scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid phase transition to {0:?}")]
    InvalidPhase(String),

    #[error("transition attempted out of order: {from} -> {to}")]
    OutOfOrder { from: String, to: String },
}

/// LLM client errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("response was not a plain string content message")]
    InvalidContent,

    #[error("context window exceeded even after compaction")]
    ContextExceeded,
}

/// Memory-sink errors (used internally by `BatchingMemory`'s retry logic;
/// never propagated up through the agent loop per the failure-never-aborts
/// contract).
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("sink request failed: {0}")]
    RequestFailed(String),

    #[error("sink rejected request (terminal): {0}")]
    Terminal(String),

    #[error("local backup write failed: {0}")]
    BackupFailed(#[from] std::io::Error),
}

/// Pattern / evolution store errors.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
