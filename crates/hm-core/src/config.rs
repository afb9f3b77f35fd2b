//! TOML configuration: orchestrator tuning, workspace root, memory
//! location, and the agent roster.
//!
//! Every section is `#[serde(default)]` so a partial file fills in with
//! defaults; `validate()` runs on every load and save.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::ProviderKind;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from `hivemind.toml` in the process
/// working directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of agents working at once.
    pub max_concurrent: usize,
    pub dispatch_interval_ms: u64,
    pub recharge_interval_secs: u64,
    /// Cooldown applied to a rate-limited agent.
    pub rate_limit_cooldown_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            dispatch_interval_ms: 500,
            recharge_interval_secs: 30,
            rate_limit_cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Subdirectory of the process working directory all file writes and
    /// command executions are confined to.
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("workspace"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Directory holding `memory.json` and the markdown audit log.
    pub dir: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("memory"),
        }
    }
}

// ---------------------------------------------------------------------------
// AgentSpec
// ---------------------------------------------------------------------------

fn default_max_tokens() -> u32 {
    4096
}

fn default_recharge_rate() -> u32 {
    10
}

fn default_avatar() -> String {
    "robot".to_string()
}

/// One configured agent: a backend plus identity and tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub display_name: String,
    pub provider: ProviderKind,
    /// Base URL; required for the OpenAI-compatible kinds.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Env var holding the credential. Unresolved means the agent loads
    /// offline.
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub model: String,
    #[serde(default = "default_avatar")]
    pub avatar: String,
    pub role: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_recharge_rate")]
    pub energy_recharge_rate: u32,
    /// Passed through unmodified as `chat_template_kwargs` on the NIM
    /// host (e.g. `{thinking = true}`).
    #[serde(default)]
    pub chat_template_kwargs: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Default location: `hivemind.toml` next to the process working
    /// directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from("hivemind.toml")
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from disk, falling back to defaults when the file is missing
    /// or unparseable.
    pub fn load_or_default(path: &std::path::Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_concurrent == 0 {
            return Err(ConfigError::Invalid("max_concurrent must be > 0".into()));
        }
        if self.orchestrator.dispatch_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatch_interval_ms must be > 0".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.id.is_empty() {
                return Err(ConfigError::Invalid("agent id must not be empty".into()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate agent id: `{}`",
                    agent.id
                )));
            }
            if agent.model.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "agent `{}` has an empty model id",
                    agent.id
                )));
            }
            if matches!(
                agent.provider,
                ProviderKind::OpenaiCompatible | ProviderKind::Nim
            ) && agent.endpoint.is_none()
            {
                return Err(ConfigError::Invalid(format!(
                    "agent `{}` needs an endpoint for its provider",
                    agent.id
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[orchestrator]
max_concurrent = 3

[workspace]
root = "sandbox"

[[agents]]
id = "nim-coder"
display_name = "Nim Coder"
provider = "nim"
endpoint = "https://integrate.api.nvidia.com"
api_key_env = "NVIDIA_API_KEY"
model = "qwen/qwen3-coder-480b-a35b-instruct"
role = "coder"
chat_template_kwargs = { enable_thinking = true, clear_thinking = false }

[[agents]]
id = "claude-reviewer"
display_name = "Claude Reviewer"
provider = "anthropic"
api_key_env = "ANTHROPIC_API_KEY"
model = "claude-sonnet-4-20250514"
role = "reviewer"
max_tokens = 8192
"#;

    #[test]
    fn parse_sample() {
        let cfg: Config = toml::from_str(SAMPLE).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.orchestrator.max_concurrent, 3);
        // unspecified fields fall back to defaults
        assert_eq!(cfg.orchestrator.dispatch_interval_ms, 500);
        assert_eq!(cfg.workspace.root, PathBuf::from("sandbox"));
        assert_eq!(cfg.memory.dir, PathBuf::from("memory"));

        assert_eq!(cfg.agents.len(), 2);
        let nim = &cfg.agents[0];
        assert_eq!(nim.provider, ProviderKind::Nim);
        assert_eq!(nim.max_tokens, 4096);
        assert_eq!(nim.energy_recharge_rate, 10);
        let kwargs = nim.chat_template_kwargs.as_ref().unwrap();
        assert_eq!(kwargs["enable_thinking"], serde_json::json!(true));
        assert_eq!(kwargs["clear_thinking"], serde_json::json!(false));

        let claude = &cfg.agents[1];
        assert_eq!(claude.provider, ProviderKind::Anthropic);
        assert_eq!(claude.max_tokens, 8192);
        assert!(claude.endpoint.is_none());
    }

    #[test]
    fn empty_config_is_valid() {
        let cfg: Config = toml::from_str("").unwrap();
        cfg.validate().unwrap();
        assert!(cfg.agents.is_empty());
        assert_eq!(cfg.orchestrator.max_concurrent, 5);
    }

    #[test]
    fn duplicate_agent_id_rejected() {
        let text = r#"
[[agents]]
id = "a"
display_name = "A"
provider = "mock"
model = "m"
role = "coder"

[[agents]]
id = "a"
display_name = "A2"
provider = "mock"
model = "m"
role = "coder"
"#;
        let cfg: Config = toml::from_str(text).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn openai_compatible_requires_endpoint() {
        let text = r#"
[[agents]]
id = "local"
display_name = "Local"
provider = "openai_compatible"
model = "m"
role = "coder"
"#;
        let cfg: Config = toml::from_str(text).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let cfg: Config = toml::from_str("[orchestrator]\nmax_concurrent = 0\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_or_default_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(&dir.path().join("nope.toml"));
        assert_eq!(cfg.orchestrator.max_concurrent, 5);
    }

    #[test]
    fn load_roundtrip_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hivemind.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.agents.len(), 2);
    }
}
