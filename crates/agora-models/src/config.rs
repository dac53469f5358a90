use serde::{Deserialize, Serialize};

use crate::agent_message::Role;

/// Top-level configuration for AGORA.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgoraConfig {
    pub agents: AgentsConfig,
    pub workflow: WorkflowConfig,
    pub debate: DebateConfig,
    pub memory: MemoryConfig,
    pub log: LogConfig,
}

/// Configuration for the agent invocation layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsConfig {
    /// Model for analysts, debaters and the trader.
    pub quick_model: String,
    /// Model for the managers, judges and reflector.
    pub deep_model: String,
    /// Per-call timeout in seconds.
    pub call_timeout_seconds: u64,
    /// Attempts per call, including the first, for transient failures.
    pub max_attempts: u32,
    /// First retry delay in milliseconds; doubles on every further retry.
    pub retry_base_delay_ms: u64,
    /// Analyst roles taking part in the fan-out.
    pub analysts: Vec<AnalystConfig>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        let analyst = |role| AnalystConfig {
            role,
            model: None,
            enabled: true,
        };
        Self {
            quick_model: "claude-3-5-haiku-latest".to_string(),
            deep_model: "claude-sonnet-4-5-20250929".to_string(),
            call_timeout_seconds: 60,
            max_attempts: 3,
            retry_base_delay_ms: 500,
            analysts: Role::ANALYSTS.into_iter().map(analyst).collect(),
        }
    }
}

impl AgentsConfig {
    pub fn enabled_analysts(&self) -> impl Iterator<Item = &AnalystConfig> {
        self.analysts.iter().filter(|a| a.enabled)
    }
}

/// Configuration for a single analyst.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalystConfig {
    pub role: Role,
    /// Override model for this analyst. Falls back to `AgentsConfig::quick_model`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Wall-clock budget for one whole run in seconds.
    pub run_timeout_seconds: u64,
    /// Escalate any analyst failure to a stage failure.
    pub require_all_analysts: bool,
    /// Directory where finished run records are written as JSON.
    pub results_dir: Option<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            run_timeout_seconds: 900,
            require_all_analysts: false,
            results_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebateConfig {
    /// Round ceiling for the bull/bear debate.
    pub research_max_rounds: u32,
    /// Round ceiling for the risk debate.
    pub risk_max_rounds: u32,
    /// Ask the convergence judge after each non-final round.
    pub convergence_check: bool,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            research_max_rounds: 2,
            risk_max_rounds: 1,
            convergence_check: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    /// SQLite file for the reflection log. `None` keeps memories in process.
    pub sqlite_path: Option<String>,
    /// Past reflections injected into a run's prompts.
    pub recall_k: usize,
    /// Maximum tickers held in the hot recall cache.
    pub cache_capacity: u64,
    pub cache_ttl_seconds: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            recall_k: 3,
            cache_capacity: 1_000,
            cache_ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Also write JSON lines to this file.
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_agora_config() {
        let config = AgoraConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AgoraConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn default_config_has_four_analysts() {
        let agents = AgentsConfig::default();
        assert_eq!(agents.analysts.len(), 4);
        assert_eq!(agents.enabled_analysts().count(), 4);
    }

    #[test]
    fn debate_defaults() {
        let debate = DebateConfig::default();
        assert_eq!(debate.research_max_rounds, 2);
        assert_eq!(debate.risk_max_rounds, 1);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config: AgoraConfig = toml::from_str("").unwrap();
        assert_eq!(config, AgoraConfig::default());
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
[agents]
quick_model = "claude-3-5-haiku-latest"
call_timeout_seconds = 20

[[agents.analysts]]
role = "market_analyst"

[[agents.analysts]]
role = "news_analyst"
enabled = false

[workflow]
require_all_analysts = true
results_dir = "/tmp/agora-runs"

[debate]
research_max_rounds = 3

[memory]
sqlite_path = "/tmp/agora.db"
"#;

        let config: AgoraConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agents.call_timeout_seconds, 20);
        assert_eq!(config.agents.max_attempts, 3);
        assert_eq!(config.agents.analysts.len(), 2);
        assert!(config.agents.analysts[0].enabled);
        assert!(!config.agents.analysts[1].enabled);
        assert_eq!(config.agents.enabled_analysts().count(), 1);
        assert!(config.workflow.require_all_analysts);
        assert_eq!(config.debate.research_max_rounds, 3);
        assert_eq!(config.debate.risk_max_rounds, 1);
        assert_eq!(config.memory.sqlite_path.as_deref(), Some("/tmp/agora.db"));
        assert_eq!(config.log.level, "info");
    }
}
