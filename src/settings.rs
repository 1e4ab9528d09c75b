//! Layered configuration (A1): compiled defaults, overlaid by an optional
//! TOML file, overlaid by the process environment.

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Env var naming the config file path, overriding [`Settings::default_path`].
const CONFIG_PATH_ENV: &str = "SKILLCLAW_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// libSQL database file path.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// HTTP listen address.
    #[serde(default = "default_http_bind")]
    pub http_bind: String,

    /// `pretty` or `json`; `json` is forced when `SKILLCLAW_ENV=production`.
    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub skills: SkillsSettings,

    #[serde(default)]
    pub sandbox: SandboxSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub memory: MemorySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            http_bind: default_http_bind(),
            log_format: LogFormat::default(),
            agent: AgentSettings::default(),
            skills: SkillsSettings::default(),
            sandbox: SandboxSettings::default(),
            llm: LlmSettings::default(),
            memory: MemorySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Agent Engine behavior (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Iteration bound N for a single request's reason-act loop.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
}

fn default_max_iterations() -> usize {
    10
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
        }
    }
}

/// Where the Skill Registry looks for `SKILL_MANIFEST.md` files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsSettings {
    #[serde(default = "default_skills_directory")]
    pub directory: PathBuf,
}

fn default_skills_directory() -> PathBuf {
    PathBuf::from("skills")
}

impl Default for SkillsSettings {
    fn default() -> Self {
        Self { directory: default_skills_directory() }
    }
}

/// Sandbox Gateway connection (spec §6 `SANDBOX_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    #[serde(default = "default_sandbox_host")]
    pub host: String,

    #[serde(default = "default_sandbox_port")]
    pub port: u16,

    #[serde(default = "default_sandbox_timeout_secs")]
    pub default_timeout_secs: u64,
}

fn default_sandbox_host() -> String {
    "127.0.0.1".to_string()
}

fn default_sandbox_port() -> u16 {
    8900
}

fn default_sandbox_timeout_secs() -> u64 {
    30
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            host: default_sandbox_host(),
            port: default_sandbox_port(),
            default_timeout_secs: default_sandbox_timeout_secs(),
        }
    }
}

impl SandboxSettings {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// LLM provider connection (spec §6 `LLM_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Never serialized; only ever populated from the environment.
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4.1-mini".to_string()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self { base_url: default_llm_base_url(), model: default_llm_model(), api_key: None }
    }
}

/// Memory Store retrieval gate (spec §6 "memory `K` and user-turn threshold").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    #[serde(default = "default_memory_top_k")]
    pub top_k: usize,

    #[serde(default = "default_memory_user_turn_threshold")]
    pub user_turn_threshold: usize,
}

fn default_memory_top_k() -> usize {
    20
}

fn default_memory_user_turn_threshold() -> usize {
    4
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            top_k: default_memory_top_k(),
            user_turn_threshold: default_memory_user_turn_threshold(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./skillclaw.db")
}

fn default_http_bind() -> String {
    "0.0.0.0:8787".to_string()
}

impl Settings {
    /// Default config file path, `./skillclaw.toml` unless [`CONFIG_PATH_ENV`]
    /// overrides it.
    pub fn default_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("skillclaw.toml"))
    }

    /// Load `.env`, then the TOML file at [`Settings::default_path`] (if it
    /// exists), then overlay the process environment. Environment always
    /// wins over the file; the file always wins over compiled defaults.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        let mut settings = Self::load_file(&Self::default_path());
        settings.apply_env();
        settings
    }

    fn load_file(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => toml::from_str(&data).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), error = %err, "ignoring malformed config file");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parsed("DATABASE_PATH") {
            self.database_path = v;
        }
        if let Some(v) = env_str("HTTP_BIND") {
            self.http_bind = v;
        }
        if let Some(v) = env_str("LOG_FORMAT") {
            self.log_format = match v.as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            };
        } else if env_str("SKILLCLAW_ENV").as_deref() == Some("production") {
            self.log_format = LogFormat::Json;
        }

        if let Some(v) = env_parsed("AGENT_MAX_ITERATIONS") {
            self.agent.max_iterations = v;
        }
        if let Some(v) = env_parsed("AGENT_DEFAULT_TEMPERATURE") {
            self.agent.default_temperature = v;
        }
        if let Some(v) = env_parsed("AGENT_DEFAULT_MAX_TOKENS") {
            self.agent.default_max_tokens = v;
        }

        if let Some(v) = env_parsed("SKILLS_DIRECTORY") {
            self.skills.directory = v;
        }

        if let Some(v) = env_str("SANDBOX_HOST") {
            self.sandbox.host = v;
        }
        if let Some(v) = env_parsed("SANDBOX_PORT") {
            self.sandbox.port = v;
        }
        if let Some(v) = env_parsed("SANDBOX_DEFAULT_TIMEOUT_SECS") {
            self.sandbox.default_timeout_secs = v;
        }

        if let Some(v) = env_str("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = env_str("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = env_str("LLM_API_KEY") {
            self.llm.api_key = Some(SecretString::from(v));
        }

        if let Some(v) = env_parsed("MEMORY_TOP_K") {
            self.memory.top_k = v;
        }
        if let Some(v) = env_parsed("MEMORY_USER_TURN_THRESHOLD") {
            self.memory.user_turn_threshold = v;
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_str(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests mutate process-global env vars, so they must not interleave.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_spec_values() {
        let settings = Settings::default();
        assert_eq!(settings.agent.max_iterations, 10);
        assert_eq!(settings.database_path, PathBuf::from("./skillclaw.db"));
        assert_eq!(settings.http_bind, "0.0.0.0:8787");
    }

    #[test]
    fn env_overrides_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("AGENT_MAX_ITERATIONS", "3");
        std::env::set_var("SANDBOX_PORT", "9001");
        let mut settings = Settings::default();
        settings.apply_env();
        std::env::remove_var("AGENT_MAX_ITERATIONS");
        std::env::remove_var("SANDBOX_PORT");
        assert_eq!(settings.agent.max_iterations, 3);
        assert_eq!(settings.sandbox.port, 9001);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let settings = Settings::load_file(std::path::Path::new("/nonexistent/skillclaw.toml"));
        assert_eq!(settings.agent.max_iterations, default_max_iterations());
    }

    #[test]
    fn sandbox_base_url_is_composed_from_host_and_port() {
        let sandbox = SandboxSettings { host: "sandbox.internal".to_string(), port: 9100, default_timeout_secs: 30 };
        assert_eq!(sandbox.base_url(), "http://sandbox.internal:9100");
    }

    #[test]
    fn malformed_config_file_logs_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skillclaw.toml");
        std::fs::write(&path, "not = [valid toml").unwrap();
        let settings = Settings::load_file(&path);
        assert_eq!(settings.agent.max_iterations, default_max_iterations());
    }
}
