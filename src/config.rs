//! Configuration for the GTD coach session runtime. Mirrors the teacher's
//! per-concern `*Config::from_env()` layering (env > persisted file >
//! default), assembled into one [`Config`].

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointBackend;
use crate::error::ConfigError;
use crate::session::AccountabilityMode;

/// Which mode `daily` runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Workflow,
    Agent,
    Hybrid,
}

impl std::str::FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "workflow" => Ok(Self::Workflow),
            "agent" => Ok(Self::Agent),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(format!("invalid agent mode '{s}', expected workflow|agent|hybrid")),
        }
    }
}

pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!("failed to read {key}: {e}"))),
    }
}

fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}

/// On-disk layout rooted at `$HOME`, matching §6's persisted state layout.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config_file: PathBuf,
    pub checkpoint_db: PathBuf,
    pub memory_backup_dir: PathBuf,
    pub patterns_file: PathBuf,
    pub evolution_file: PathBuf,
    pub logs_dir: PathBuf,
    pub last_session_file: PathBuf,
    pub prompts_dir: PathBuf,
}

impl Paths {
    fn new() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            config_file: home.join(".gtd-coach").join("config.json"),
            checkpoint_db: PathBuf::from("./data/agent_state.db"),
            memory_backup_dir: home.join("gtd-coach").join("data").join("memory_backup"),
            patterns_file: home.join(".gtd_coach").join("patterns").join("patterns.json"),
            evolution_file: home.join(".gtd_coach").join("evolution").join("evolution.json"),
            logs_dir: home.join("gtd-coach").join("logs"),
            last_session_file: home.join(".gtd-coach").join("last_session.txt"),
            prompts_dir: home.join(".gtd-coach").join("prompts"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl LlmConfig {
    fn from_env(persisted: &PersistedConfig) -> Result<Self, ConfigError> {
        let base_url = optional_env("LM_URL")?
            .or_else(|| persisted.lm_url.clone())
            .unwrap_or_else(|| "http://localhost:1234/v1".to_string());
        let model = optional_env("LM_MODEL")?
            .or_else(|| persisted.lm_model.clone())
            .unwrap_or_else(|| "local-model".to_string());
        let timeout_secs = parse_optional_env("LM_TIMEOUT_SECS", 30u64)?;
        Ok(Self { base_url, model, timeout_secs })
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: CheckpointBackend,
    pub db_path: String,
}

impl StorageConfig {
    fn from_env(paths: &Paths) -> Result<Self, ConfigError> {
        let db_path = optional_env("GTD_DB_PATH")?.unwrap_or_else(|| paths.checkpoint_db.to_string_lossy().into_owned());
        #[cfg(feature = "libsql")]
        let backend = CheckpointBackend::Sqlite;
        #[cfg(not(feature = "libsql"))]
        let backend = CheckpointBackend::Memory;
        Ok(Self { backend, db_path })
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub disabled: bool,
    pub uri: Option<String>,
    pub user: Option<String>,
    pub password: Option<SecretString>,
    pub decay_rate: f64,
    pub batch_threshold: usize,
    pub backup_dir: PathBuf,
}

impl MemoryConfig {
    fn from_env(paths: &Paths, persisted: &PersistedConfig) -> Result<Self, ConfigError> {
        let disabled = parse_optional_env("GTD_DISABLE_MEMORY", false)?;
        let uri = optional_env("MEMORY_URI")?;
        let user = optional_env("MEMORY_USER")?.or_else(|| persisted.memory_user.clone());
        let password = optional_env("MEMORY_PASSWORD")?.map(SecretString::from);
        let decay_rate = parse_optional_env("DECAY_RATE", crate::memory::batching::DEFAULT_DECAY_RATE)?;
        let batch_threshold = parse_optional_env(
            "BATCH_THRESHOLD",
            persisted.batch_threshold.unwrap_or(crate::memory::batching::DEFAULT_BATCH_THRESHOLD),
        )?;
        Ok(Self {
            disabled,
            uri,
            user,
            password,
            decay_rate,
            batch_threshold,
            backup_dir: paths.memory_backup_dir.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TimingConfig {
    pub disabled: bool,
    pub api_key: Option<SecretString>,
}

impl TimingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            disabled: parse_optional_env("GTD_DISABLE_TIMING", false)?,
            api_key: optional_env("TIMING_API_KEY")?.map(SecretString::from),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TracerConfig {
    pub public_key: Option<String>,
    pub secret_key: Option<SecretString>,
    pub host: Option<String>,
}

impl TracerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            public_key: optional_env("TRACER_PUBLIC_KEY")?,
            secret_key: optional_env("TRACER_SECRET_KEY")?.map(SecretString::from),
            host: optional_env("TRACER_HOST")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub use_agent: bool,
    pub agent_mode: AgentMode,
    pub accountability: AccountabilityMode,
    pub user_facts_cache_ttl: Duration,
}

impl AgentSettings {
    fn from_env(persisted: &PersistedConfig) -> Result<Self, ConfigError> {
        let use_agent = parse_optional_env("GTD_USE_AGENT", true)?;
        let agent_mode_raw = optional_env("GTD_AGENT_MODE")?.unwrap_or_else(|| "agent".to_string());
        let agent_mode = agent_mode_raw
            .parse::<AgentMode>()
            .map_err(|e| ConfigError::InvalidValue { key: "GTD_AGENT_MODE".into(), message: e })?;
        let accountability = match persisted.accountability.as_deref() {
            Some("firm") => AccountabilityMode::Firm,
            Some("gentle") => AccountabilityMode::Gentle,
            _ => AccountabilityMode::Adaptive,
        };
        let ttl_secs = parse_optional_env("USER_FACTS_CACHE_TTL", 86_400u64)?;
        Ok(Self {
            use_agent,
            agent_mode,
            accountability,
            user_facts_cache_ttl: Duration::from_secs(ttl_secs),
        })
    }
}

/// Full assembled configuration for one process invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub paths: Paths,
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub memory: MemoryConfig,
    pub timing: TimingConfig,
    pub tracer: TracerConfig,
    pub agent: AgentSettings,
}

impl Config {
    /// Loads `.env`, the persisted `$HOME/.gtd-coach/config.json` (or the
    /// path named by `GTD_CONFIG`), then overlays environment variables —
    /// the same precedence order the teacher's `Config::from_env` uses.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let paths = Paths::new();
        let config_path = optional_env("GTD_CONFIG")?.map(PathBuf::from).unwrap_or_else(|| paths.config_file.clone());
        let persisted = PersistedConfig::load_from(&config_path);

        Ok(Self {
            llm: LlmConfig::from_env(&persisted)?,
            storage: StorageConfig::from_env(&paths)?,
            memory: MemoryConfig::from_env(&paths, &persisted)?,
            timing: TimingConfig::from_env()?,
            tracer: TracerConfig::from_env()?,
            agent: AgentSettings::from_env(&persisted)?,
            paths,
        })
    }
}

/// The subset of configuration a user can persist across invocations via
/// `gtd-coach config set/init/reset`, following the teacher's
/// `BootstrapConfig` disk-file pattern (load-or-default, never fails).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedConfig {
    #[serde(default)]
    pub lm_url: Option<String>,
    #[serde(default)]
    pub lm_model: Option<String>,
    #[serde(default)]
    pub accountability: Option<String>,
    #[serde(default)]
    pub memory_user: Option<String>,
    #[serde(default)]
    pub batch_threshold: Option<usize>,
}

impl PersistedConfig {
    pub fn load_from(path: &PathBuf) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save_to(&self, path: &PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, json)
    }

    /// Get a field by its `config get KEY` name.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "lm_url" => self.lm_url.clone(),
            "lm_model" => self.lm_model.clone(),
            "accountability" => self.accountability.clone(),
            "memory_user" => self.memory_user.clone(),
            "batch_threshold" => self.batch_threshold.map(|v| v.to_string()),
            _ => None,
        }
    }

    /// Set a field by its `config set KEY VALUE` name.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "lm_url" => self.lm_url = Some(value.to_string()),
            "lm_model" => self.lm_model = Some(value.to_string()),
            "accountability" => self.accountability = Some(value.to_string()),
            "memory_user" => self.memory_user = Some(value.to_string()),
            "batch_threshold" => {
                self.batch_threshold = Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "expected an integer".to_string(),
                })?)
            }
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "unknown config key".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn optional_env_returns_none_for_empty_string() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::set_var("_GTD_TEST_EMPTY", "") };
        assert!(optional_env("_GTD_TEST_EMPTY").unwrap().is_none());
        unsafe { std::env::remove_var("_GTD_TEST_EMPTY") };
    }

    #[test]
    fn agent_mode_parses_known_values() {
        assert_eq!("agent".parse::<AgentMode>().unwrap(), AgentMode::Agent);
        assert!("bogus".parse::<AgentMode>().is_err());
    }

    #[test]
    fn persisted_config_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut cfg = PersistedConfig::default();
        cfg.set("lm_model", "qwen-14b").unwrap();
        cfg.save_to(&path).unwrap();
        let loaded = PersistedConfig::load_from(&path);
        assert_eq!(loaded.get("lm_model").as_deref(), Some("qwen-14b"));
    }

    #[test]
    fn persisted_config_defaults_when_file_missing() {
        let loaded = PersistedConfig::load_from(&PathBuf::from("/nonexistent/gtd/config.json"));
        assert!(loaded.lm_url.is_none());
    }

    #[test]
    fn persisted_config_rejects_unknown_key() {
        let mut cfg = PersistedConfig::default();
        assert!(cfg.set("not_a_real_key", "x").is_err());
    }
}
