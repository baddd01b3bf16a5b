//! Tool-level retry with exponential backoff for transient errors.
//!
//! Wraps only `tool.execute()`. Permanent errors fail immediately; an
//! `Interrupt` signal is never retried — it propagates straight through to
//! the caller so the agent loop can suspend.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::session::SessionContext;
use crate::tools::tool::{Tool, ToolError, ToolErrorKind, ToolOutput, ToolRetryConfig, ToolSignal, tool_retry_delay};

/// Outcome of a retry-wrapped tool execution.
#[derive(Debug)]
pub struct ToolRetryOutcome {
    pub result: Result<ToolOutput, ToolSignal>,
    pub retry_attempts: u32,
}

/// Execute a tool with automatic retry on transient `ToolError`s.
///
/// - Loops up to `config.max_retries + 1` attempts.
/// - `Interrupt` signals and permanent errors return immediately.
/// - Transient errors sleep with exponential backoff + jitter before retrying.
/// - Stops retrying (without sleeping) once the next delay would exceed `budget`.
pub async fn retry_tool_execute(
    tool: &dyn Tool,
    params: &serde_json::Value,
    ctx: &SessionContext,
    config: &ToolRetryConfig,
    budget: Duration,
    retry_counter: &AtomicU32,
) -> ToolRetryOutcome {
    let start = Instant::now();

    for attempt in 0..=config.max_retries {
        ctx.begin_invocation();
        match tool.execute(params.clone(), ctx).await {
            Ok(output) => {
                return ToolRetryOutcome {
                    result: Ok(output),
                    retry_attempts: retry_counter.load(Ordering::Relaxed),
                };
            }
            Err(ToolSignal::Interrupt(interrupt)) => {
                return ToolRetryOutcome {
                    result: Err(ToolSignal::Interrupt(interrupt)),
                    retry_attempts: retry_counter.load(Ordering::Relaxed),
                };
            }
            Err(ToolSignal::Error(err)) => {
                if err.kind() == ToolErrorKind::Permanent || attempt == config.max_retries {
                    return ToolRetryOutcome {
                        result: Err(ToolSignal::Error(err)),
                        retry_attempts: retry_counter.load(Ordering::Relaxed),
                    };
                }

                let elapsed = start.elapsed();
                let remaining = budget.saturating_sub(elapsed);
                let delay = tool_retry_delay(attempt, config, Some(&err)).min(remaining);

                if delay >= remaining {
                    tracing::warn!(tool = %tool.name(), attempt = attempt + 1, error = %err, "retry budget exhausted");
                    return ToolRetryOutcome {
                        result: Err(ToolSignal::Error(err)),
                        retry_attempts: retry_counter.load(Ordering::Relaxed),
                    };
                }

                retry_counter.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(tool = %tool.name(), attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %err, "retrying tool after transient error");
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("retry loop always returns from within its body")
}
