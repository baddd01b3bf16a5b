//! Wires every subsystem into the CLI commands a user actually runs:
//! `weekly`, `daily`, `resume`, `status`, `config`, `test` (§6).

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::agent::{AgentCore, AgentOutcome, AgentRunConfig};
use crate::checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, Checkpointer, MetadataStore, SessionMetadata,
    create_checkpointer, create_metadata_store,
};
use crate::config::{AgentMode, Config};
use crate::error::Error;
use crate::llm::create_llm_provider;
use crate::memory::{BatchingMemory, Episode, EpisodeType, HttpMemoryClient, MemoryClient, NullMemoryClient};
use crate::memory::batching::BatchingConfig;
use crate::patterns::{PatternStore, SessionOutcome};
use crate::scheduler::{PhaseScheduler, WorkflowType};
use crate::session::{AccountabilityMode, Session, SessionContext, State};
use crate::telemetry::{self, Event, PromptRegistry, RecordingTracer, Score, Tracer, TracingTracer};
use crate::tools::ToolRegistry;
use crate::tools::clarify::builtin_tools;

/// The assembled set of shared collaborators a session is driven against.
pub struct Runtime {
    pub config: Config,
    pub checkpointer: Arc<dyn Checkpointer>,
    pub metadata: Arc<dyn MetadataStore>,
    pub memory: Arc<BatchingMemory>,
    pub patterns: Arc<PatternStore>,
    pub prompts: PromptRegistry,
    pub tracer: Arc<dyn Tracer>,
}

impl Runtime {
    /// Constructs every collaborator from `config`, failing fast (exit code
    /// 2) if a selected backend can't be built (§4.4 strict-selection note).
    pub async fn bootstrap(config: Config, session_id: &str, user_id: &str) -> Result<Self, Error> {
        let checkpointer = create_checkpointer(config.storage.backend, &config.storage.db_path).await?;
        let metadata = create_metadata_store(config.storage.backend, &config.storage.db_path).await?;

        let sink: Arc<dyn MemoryClient> = if config.memory.disabled {
            Arc::new(NullMemoryClient)
        } else {
            match &config.memory.uri {
                Some(uri) => Arc::new(HttpMemoryClient::new(
                    uri.clone(),
                    config.memory.user.as_deref(),
                    config.memory.password.as_ref().map(|p| {
                        use secrecy::ExposeSecret;
                        p.expose_secret().to_string()
                    }).as_deref(),
                )?),
                None => Arc::new(NullMemoryClient),
            }
        };
        let batching_config = BatchingConfig {
            batch_threshold: config.memory.batch_threshold,
            decay_rate: config.memory.decay_rate,
            ..BatchingConfig::new(config.memory.backup_dir.clone())
        };
        let memory = Arc::new(BatchingMemory::new(sink, batching_config));

        let patterns = Arc::new(PatternStore::new(config.paths.patterns_file.clone()));
        let prompts = PromptRegistry::local_and_builtin(config.paths.prompts_dir.clone());

        let tracer: Arc<dyn Tracer> = Arc::new(TracingTracer::new(session_id, user_id));
        telemetry::install_tracer(tracer.clone());

        Ok(Self { config, checkpointer, metadata, memory, patterns, prompts, tracer })
    }
}

/// Runs a weekly review session to completion, suspension-resume, or a fatal
/// error, returning the process exit code.
pub async fn run_weekly(config: Config, user_id: &str, use_agent: bool, skip_timing: bool) -> Result<i32, Error> {
    let state = State::new(WorkflowType::WeeklyReview, user_id);
    let runtime = Runtime::bootstrap(config, &state.session_id, user_id).await?;
    run_session(runtime, state, use_agent, AccountabilityMode::Adaptive, skip_timing).await
}

/// Runs a daily clarify session. `resume_session_id` replays a previously
/// suspended thread if set; otherwise a new session is started.
pub async fn run_daily(
    config: Config,
    user_id: &str,
    agent_mode: AgentMode,
    accountability: AccountabilityMode,
    resume_session_id: Option<String>,
) -> Result<i32, Error> {
    let use_agent = !matches!(agent_mode, AgentMode::Workflow);
    if let Some(thread_id) = resume_session_id {
        return resume_thread(config, &thread_id, user_id, use_agent, accountability).await;
    }
    let mut state = State::new(WorkflowType::DailyClarify, user_id);
    state.accountability_mode = accountability;
    let runtime = Runtime::bootstrap(config, &state.session_id, user_id).await?;
    run_session(runtime, state, use_agent, accountability, false).await
}

/// `resume --last`: looks up the last session id persisted to disk and
/// resumes it, since the in-memory metadata index doesn't survive a
/// process restart (see `DESIGN.md`).
pub async fn run_resume_last(config: Config, user_id: &str) -> Result<i32, Error> {
    let last_session_path = config.paths.last_session_file.clone();
    let thread_id = tokio::fs::read_to_string(&last_session_path)
        .await
        .map(|s| s.trim().to_string())
        .map_err(|_| Error::Checkpoint(crate::error::CheckpointError::InvalidArgument(
            "no previous session recorded to resume".into(),
        )))?;
    resume_thread(config, &thread_id, user_id, true, AccountabilityMode::Adaptive).await
}

async fn resume_thread(
    config: Config,
    thread_id: &str,
    user_id: &str,
    use_agent: bool,
    accountability: AccountabilityMode,
) -> Result<i32, Error> {
    let runtime = Runtime::bootstrap(config, thread_id, user_id).await?;
    let checkpoint_config = CheckpointConfig::new(thread_id)?;
    let checkpoint = runtime
        .checkpointer
        .get(&checkpoint_config)
        .await?
        .ok_or_else(|| Error::Checkpoint(crate::error::CheckpointError::InvalidArgument(
            format!("no checkpoint found for session {thread_id}"),
        )))?;
    let state: State = serde_json::from_value(checkpoint.channel_values)
        .map_err(crate::error::CheckpointError::Serialization)?;
    run_session(runtime, state, use_agent, accountability, false).await
}

/// Drives one session's ReAct loop to completion, checkpointing after every
/// step and on suspend/cancel, persisting the final outcome to the pattern
/// store, the memory sink, and the tracer (§4.1, §4.2, §4.4-§4.7).
async fn run_session(
    runtime: Runtime,
    mut state: State,
    use_agent: bool,
    accountability: AccountabilityMode,
    skip_timing: bool,
) -> Result<i32, Error> {
    state.accountability_mode = accountability;
    state.skip_timing = skip_timing;
    let session_id = state.session_id.clone();
    let user_id = state.user_id.clone();
    let workflow_type = state.workflow_type;
    let thread_id = session_id.clone();

    persist_last_session(&runtime.config, &thread_id).await;

    let scheduler = PhaseScheduler::new(workflow_type);
    let ctx = SessionContext::new(state, scheduler).with_memory(runtime.memory.clone());

    let llm = create_llm_provider(&runtime.config.llm.base_url, &runtime.config.llm.model, runtime.config.llm.timeout_secs)?;
    let mut agent = AgentCore::new(llm);
    if use_agent {
        let mut tools = ToolRegistry::new();
        for tool in builtin_tools() {
            tools.register(tool);
        }
        agent.set_tools(tools);
    }

    let prompt_name = match workflow_type {
        WorkflowType::WeeklyReview => "weekly_priorities",
        WorkflowType::DailyClarify => "daily_clarify",
    };
    let run_config = match runtime.prompts.resolve(prompt_name) {
        Some(prompt) => {
            let tags = vec![
                format!("accountability:{:?}", accountability).to_lowercase(),
                format!("phase:{}", ctx.state.lock().await.current_phase.name()),
                format!("week:{}", chrono::Utc::now().format("%G-W%V")),
            ];
            runtime.tracer.record_prompt_link(&prompt.name, &prompt.version, &tags);
            AgentRunConfig { system_prompt: prompt.template, ..AgentRunConfig::default() }
        }
        None => AgentRunConfig::default(),
    };

    runtime.tracer.record(Event::ConversationStart { phase: ctx.scheduler.lock().await.current_phase().name().to_string() });

    let mut step: i64 = 0;
    let metadata_row = |state: &State, step: i64| SessionMetadata {
        session_id: state.session_id.clone(),
        thread_id: state.session_id.clone(),
        created_at: state.started_at,
        updated_at: chrono::Utc::now(),
        workflow_type: state.workflow_type,
        user_id: state.user_id.clone(),
        phase: state.current_phase,
        completed: false,
        error_count: state.errors.len() as u32,
        metadata: serde_json::json!({"step": step}),
    };

    loop {
        let outcome = tokio::select! {
            res = agent.invoke(&ctx, &run_config) => res,
            _ = tokio::signal::ctrl_c() => {
                checkpoint_state(&runtime, &ctx, &thread_id, step).await?;
                return Err(Error::UserCancel);
            }
        };

        step += 1;
        checkpoint_state(&runtime, &ctx, &thread_id, step).await?;
        {
            let state = ctx.state.lock().await;
            runtime.metadata.upsert(metadata_row(&state, step)).await?;
        }

        match outcome {
            Ok(AgentOutcome::Suspended { prompt }) => {
                println!("{prompt}");
                let mut stdin = BufReader::new(tokio::io::stdin());
                let mut line = String::new();
                stdin.read_line(&mut line).await.map_err(crate::error::ConfigError::Io)?;
                ctx.stage_resume(line.trim().to_string()).await;
                continue;
            }
            Ok(AgentOutcome::Completed { content }) => {
                if let Some(content) = content {
                    println!("{content}");
                }
                finalize_session(&runtime, &ctx, &session_id, &user_id, workflow_type).await?;
                return Ok(0);
            }
            Err(Error::RecursionLimit(n)) => {
                tracing::error!(iterations = n, "session hit the recursion limit, checkpoint saved");
                return Ok(1);
            }
            Err(err) => {
                runtime.metadata.increment_errors(&session_id).await.ok();
                tracing::error!(error = %err, "session ended with a runtime error");
                return Ok(1);
            }
        }
    }
}

async fn checkpoint_state(runtime: &Runtime, ctx: &SessionContext, thread_id: &str, step: i64) -> Result<(), Error> {
    let state = ctx.state.lock().await;
    let channel_values = serde_json::to_value(&*state).map_err(crate::error::CheckpointError::Serialization)?;
    drop(state);
    let checkpoint = Checkpoint {
        thread_id: thread_id.to_string(),
        checkpoint_id: format!("cp-{step}-{}", chrono::Utc::now().timestamp_millis()),
        parent_id: None,
        ts: chrono::Utc::now(),
        channel_values,
        channel_versions: std::collections::HashMap::from([("state".to_string(), step as u64)]),
        versions_seen: std::collections::HashMap::new(),
        metadata: CheckpointMetadata {
            source: "runner".to_string(),
            step,
            writes: serde_json::json!({}),
            parents: std::collections::HashMap::new(),
        },
    };
    runtime.checkpointer.put(checkpoint).await?;
    Ok(())
}

async fn finalize_session(
    runtime: &Runtime,
    ctx: &SessionContext,
    session_id: &str,
    user_id: &str,
    workflow_type: WorkflowType,
) -> Result<(), Error> {
    runtime.metadata.mark_complete(session_id).await?;

    let (captures_len, priorities_len, phase) = {
        let state = ctx.state.lock().await;
        (state.captures.len(), state.weekly_priorities.len(), state.current_phase)
    };
    let total_phases = crate::scheduler::Phase::order_for(workflow_type).len() as u32;
    let completed_phases = { ctx.state.lock().await.completed_phases.len() as u32 + 1 };
    let duration_minutes = ctx.scheduler.lock().await.total_elapsed().as_secs_f64() / 60.0;

    runtime.patterns.save(SessionOutcome {
        completed_phases,
        total_phases,
        focus_score: None,
        coherence_score: None,
        high_severity_pattern_count: 0,
        context_switch_count: 0,
    }).await?;

    let episode = Episode::new(
        EpisodeType::SessionSummary,
        phase,
        serde_json::json!({
            "captures": captures_len,
            "priorities": priorities_len,
            "duration_minutes": duration_minutes,
        }),
        session_id,
        user_id,
    );
    runtime.memory.add_episode(episode).await;
    runtime.memory.flush().await;

    runtime.tracer.record(Event::ConversationComplete { phase: phase.name().to_string() });
    let score = telemetry::session_effectiveness_score(true, duration_minutes, captures_len as u32, priorities_len as u32);
    runtime.tracer.record(Event::SessionEffectiveness {
        completed: true,
        duration_minutes,
        tasks_captured: captures_len as u32,
        priorities_set: priorities_len as u32,
        interrupts_handled: { ctx.state.lock().await.interrupt_count },
        score,
    });
    runtime.tracer.record_score(Score { name: "session.effectiveness".to_string(), value: score });
    Ok(())
}

async fn persist_last_session(config: &Config, thread_id: &str) {
    if let Some(parent) = config.paths.last_session_file.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let _ = tokio::fs::write(&config.paths.last_session_file, thread_id).await;
}

/// `gtd-coach status`: prints the metadata store's aggregate counters and
/// the most recent resumable session for `user_id`, if any.
pub async fn print_status(config: Config, user_id: &str) -> Result<(), Error> {
    println!("llm: {} ({})", config.llm.base_url, config.llm.model);
    println!("memory: {}", if config.memory.disabled { "disabled" } else { config.memory.uri.as_deref().unwrap_or("no MEMORY_URI configured") });
    println!("timing: {}", if config.timing.disabled { "disabled" } else { "enabled" });
    println!("storage backend: {:?} at {}", config.storage.backend, config.storage.db_path);

    let metadata = create_metadata_store(config.storage.backend, &config.storage.db_path).await?;
    let stats = metadata.get_statistics().await?;
    println!("sessions: {} total, {} completed, {} errors", stats.total_sessions, stats.completed_sessions, stats.total_errors);

    if let Ok(thread_id) = tokio::fs::read_to_string(&config.paths.last_session_file).await {
        let thread_id = thread_id.trim();
        println!("last session: {thread_id}");
        let checkpointer = create_checkpointer(config.storage.backend, &config.storage.db_path).await?;
        let checkpoint_config = CheckpointConfig::new(thread_id)?;
        if let Some(checkpoint) = checkpointer.get(&checkpoint_config).await? {
            println!("last checkpoint at: {}", checkpoint.ts);
        }
    } else {
        println!("no previous session recorded for {user_id}");
    }
    Ok(())
}

/// `gtd-coach test TARGET`: smoke-tests a single collaborator without
/// running a full session.
pub async fn run_test(config: Config, target: &str) -> Result<i32, Error> {
    match target {
        "llm" => {
            let provider = create_llm_provider(&config.llm.base_url, &config.llm.model, config.llm.timeout_secs)?;
            provider.health_check().await?;
            println!("llm ok: {}", provider.model_name());
        }
        "memory" => {
            let sink: Arc<dyn MemoryClient> = match &config.memory.uri {
                Some(uri) if !config.memory.disabled => Arc::new(HttpMemoryClient::new(
                    uri.clone(),
                    config.memory.user.as_deref(),
                    None,
                )?),
                _ => Arc::new(NullMemoryClient),
            };
            let hits = sink.search("test", "ping", 1).await?;
            println!("memory ok: {} hits", hits.len());
        }
        "tracer" => {
            let tracer = RecordingTracer::new("test-session");
            tracer.record(Event::ToolStart { name: "test".to_string() });
            println!("tracer ok: {} events recorded", tracer.events().len());
        }
        "timing" => {
            println!("timing ok: disabled={}", config.timing.disabled);
        }
        "agent" => {
            let provider = create_llm_provider(&config.llm.base_url, &config.llm.model, config.llm.timeout_secs)?;
            let mut agent = AgentCore::new(provider);
            let mut tools = ToolRegistry::new();
            for tool in builtin_tools() {
                tools.register(tool);
            }
            agent.set_tools(tools);
            println!("agent ok: {} tools registered", builtin_tools().len());
        }
        "all" => {
            for t in ["llm", "memory", "tracer", "timing", "agent"] {
                Box::pin(run_test(config.clone(), t)).await?;
            }
        }
        other => {
            eprintln!("unknown test target: {other}");
            return Ok(2);
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finalize_session_marks_metadata_complete() {
        let state = State::new(WorkflowType::WeeklyReview, "user-1");
        let session_id = state.session_id.clone();
        let runtime = Runtime::bootstrap(
            Config::load().unwrap_or_else(|_| panic!("config should load with defaults in test env")),
            &session_id,
            "user-1",
        )
        .await
        .unwrap();
        runtime.metadata.upsert(SessionMetadata {
            session_id: session_id.clone(),
            thread_id: session_id.clone(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            workflow_type: WorkflowType::WeeklyReview,
            user_id: "user-1".to_string(),
            phase: crate::scheduler::Phase::Startup,
            completed: false,
            error_count: 0,
            metadata: serde_json::json!({}),
        }).await.unwrap();

        let scheduler = PhaseScheduler::new(WorkflowType::WeeklyReview);
        let ctx = SessionContext::new(state, scheduler);
        finalize_session(&runtime, &ctx, &session_id, "user-1", WorkflowType::WeeklyReview).await.unwrap();

        let row = runtime.metadata.get(&session_id).await.unwrap().unwrap();
        assert!(row.completed);
    }
}
