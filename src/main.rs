use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gtd_coach::config::{AgentMode, Config};
use gtd_coach::session::AccountabilityMode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gtd-coach", about = "Time-boxed GTD coaching sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a weekly review session.
    Weekly {
        #[arg(long = "user-id", default_value = "default-user")]
        user_id: String,

        #[arg(long)]
        use_agent: bool,

        #[arg(long)]
        skip_timing: bool,
    },

    /// Run a daily inbox-clarify session.
    Daily {
        #[arg(long = "user-id", default_value = "default-user")]
        user_id: String,

        #[arg(long, default_value = "agent")]
        agent_mode: String,

        #[arg(long, default_value = "adaptive")]
        accountability: String,

        /// Resume a specific suspended session by thread id.
        #[arg(long)]
        resume: Option<String>,

        /// Run against a scripted LLM instead of a live endpoint.
        #[arg(long)]
        test_mode: bool,

        #[arg(long)]
        verbose: bool,
    },

    /// Resume the most recently suspended session.
    Resume {
        #[arg(long = "user-id", default_value = "default-user")]
        user_id: String,
    },

    /// Show session history and the last recorded session.
    Status {
        #[arg(long = "user-id", default_value = "default-user")]
        user_id: String,
    },

    /// Inspect or edit persisted configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Smoke-test a single collaborator (llm, memory, tracer, timing, agent, all).
    Test {
        target: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Init,
    Reset,
    Get { key: String },
    Set { key: String, value: String },
    /// Print which environment variables are recognized and currently set.
    Env,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let verbose = matches!(&cli.command, Commands::Daily { verbose: true, .. });

    let logs_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join("gtd-coach").join("logs");
    let _ = std::fs::create_dir_all(&logs_dir);
    let file_appender = tracing_appender::rolling::never(
        &logs_dir,
        format!("agent_{}.log", chrono::Local::now().format("%Y%m%d_%H%M%S")),
    );
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    let default_filter = if verbose { "gtd_coach=debug" } else { "gtd_coach=info" };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false).with_target(false))
        .init();

    match run(cli).await {
        Ok(code) => std::process::ExitCode::from(code as u8),
        Err(err) => {
            tracing::error!(error = %err, "fatal error");
            eprintln!("error: {err}");
            std::process::ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &gtd_coach::Error) -> u8 {
    match err {
        gtd_coach::Error::Config(_) => 2,
        _ => 1,
    }
}

async fn run(cli: Cli) -> Result<i32, gtd_coach::Error> {
    match cli.command {
        Commands::Weekly { user_id, use_agent, skip_timing } => {
            let config = Config::load()?;
            gtd_coach::runner::run_weekly(config, &user_id, use_agent, skip_timing).await
        }
        Commands::Daily { user_id, agent_mode, accountability, resume, test_mode, verbose: _ } => {
            let mut config = Config::load()?;
            if test_mode {
                config.memory.disabled = true;
                config.timing.disabled = true;
            }
            let agent_mode: AgentMode = agent_mode
                .parse()
                .map_err(|e: String| gtd_coach::error::ConfigError::InvalidValue { key: "agent_mode".into(), message: e })?;
            let accountability = parse_accountability(&accountability);
            gtd_coach::runner::run_daily(config, &user_id, agent_mode, accountability, resume).await
        }
        Commands::Resume { user_id } => {
            let config = Config::load()?;
            gtd_coach::runner::run_resume_last(config, &user_id).await
        }
        Commands::Status { user_id } => {
            let config = Config::load()?;
            gtd_coach::runner::print_status(config, &user_id).await?;
            Ok(0)
        }
        Commands::Config { action } => run_config_action(action).await,
        Commands::Test { target } => {
            let config = Config::load()?;
            gtd_coach::runner::run_test(config, &target).await
        }
    }
}

fn parse_accountability(raw: &str) -> AccountabilityMode {
    match raw.to_lowercase().as_str() {
        "firm" => AccountabilityMode::Firm,
        "gentle" => AccountabilityMode::Gentle,
        _ => AccountabilityMode::Adaptive,
    }
}

async fn run_config_action(action: ConfigAction) -> Result<i32, gtd_coach::Error> {
    use gtd_coach::config::PersistedConfig;

    let config = Config::load()?;
    let path = config.paths.config_file.clone();

    match action {
        ConfigAction::Show => {
            let persisted = PersistedConfig::load_from(&path);
            println!("{}", serde_json::to_string_pretty(&persisted).unwrap_or_default());
        }
        ConfigAction::Init => {
            PersistedConfig::default()
                .save_to(&path)
                .map_err(gtd_coach::error::ConfigError::Io)?;
            println!("wrote default config to {}", path.display());
        }
        ConfigAction::Reset => {
            PersistedConfig::default()
                .save_to(&path)
                .map_err(gtd_coach::error::ConfigError::Io)?;
            println!("reset config at {}", path.display());
        }
        ConfigAction::Get { key } => {
            let persisted = PersistedConfig::load_from(&path);
            match persisted.get(&key) {
                Some(value) => println!("{value}"),
                None => println!("(unset)"),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut persisted = PersistedConfig::load_from(&path);
            persisted.set(&key, &value)?;
            persisted.save_to(&path).map_err(gtd_coach::error::ConfigError::Io)?;
            println!("{key} = {value}");
        }
        ConfigAction::Env => {
            const RECOGNIZED: &[&str] = &[
                "GTD_USE_AGENT", "GTD_AGENT_MODE", "GTD_CONFIG", "GTD_DISABLE_TIMING", "GTD_DISABLE_MEMORY",
                "LM_URL", "LM_MODEL", "TIMING_API_KEY", "MEMORY_URI", "MEMORY_USER", "MEMORY_PASSWORD",
                "TRACER_PUBLIC_KEY", "TRACER_SECRET_KEY", "TRACER_HOST", "DECAY_RATE", "BATCH_THRESHOLD",
                "USER_FACTS_CACHE_TTL",
            ];
            for key in RECOGNIZED {
                match std::env::var(key) {
                    Ok(_) => println!("{key} = <set>"),
                    Err(_) => println!("{key} = (unset)"),
                }
            }
        }
    }
    Ok(0)
}
