//! AGORA - multi-agent trading deliberation engine
//!
//! Analyst, researcher, trader, risk and manager roles deliberate over a
//! ticker on a shared blackboard and produce a BUY, SELL or HOLD signal.
//! Every run is reflected on, and the lessons are fed back into later runs
//! for the same ticker.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use agora::agents::{Orchestrator, RunService, Reasoner, ClaudeReasoner};
//! use agora::memory::{MemoryStore, SqliteStore, CachedStore};
//! use agora::models::{AgoraConfig, RunState, Signal, WorkflowRun};
//! ```

pub use agora_agents as agents;
pub use agora_memory as memory;
pub use agora_models as models;

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agora_agents::{static_analysts, ClaudeReasoner, Orchestrator};
use agora_memory::{CachedStore, InMemoryStore, MemoryStore, SqliteStore};
use agora_models::{AgoraConfig, LogConfig, MemoryConfig, Role, WorkflowRun};
use anyhow::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Read a TOML config. A missing file yields the defaults.
pub fn load_config(path: &Path) -> anyhow::Result<AgoraConfig> {
    if !path.exists() {
        return Ok(AgoraConfig::default());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Human-readable logs on stderr, plus JSON lines to `log.file` when set.
/// `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level: {}", config.level))?;

    let json_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = Path::new(path).parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory for {path}"))?;
            }
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {path}"))?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(json_layer)
        .try_init()
        .context("Failed to initialise tracing")
}

/// SQLite behind a hot recall cache when a path is configured, otherwise an
/// in-process log that lives as long as the process.
pub fn build_memory(config: &MemoryConfig) -> anyhow::Result<Arc<dyn MemoryStore>> {
    let store: Arc<dyn MemoryStore> = match &config.sqlite_path {
        Some(path) => {
            if let Some(parent) = Path::new(path).parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory for {path}"))?;
            }
            let sqlite = SqliteStore::open(path)
                .with_context(|| format!("Failed to open memory store: {path}"))?;
            Arc::new(CachedStore::new(
                sqlite,
                config.recall_k,
                config.cache_capacity,
                Duration::from_secs(config.cache_ttl_seconds),
            ))
        }
        None => Arc::new(InMemoryStore::new()),
    };
    Ok(store)
}

/// Load a feeds file: a JSON object keyed by analyst role name.
pub fn load_feeds(path: Option<&Path>) -> anyhow::Result<serde_json::Value> {
    let Some(path) = path else {
        return Ok(serde_json::Value::Null);
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read feeds: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse feeds: {}", path.display()))
}

/// Build an Orchestrator from configuration, driving the Claude CLI.
pub fn build_orchestrator(
    config: &AgoraConfig,
    feeds: &serde_json::Value,
) -> anyhow::Result<Orchestrator> {
    let roles: Vec<Role> = config.agents.enabled_analysts().map(|a| a.role).collect();
    let analysts = static_analysts(&roles, feeds).context("Invalid feeds")?;
    let memory = build_memory(&config.memory)?;
    let reasoner = Arc::new(ClaudeReasoner::from_config(&config.agents));
    Orchestrator::new(reasoner, analysts, memory, config.clone())
        .context("Failed to build stage graph")
}

/// Write the full run record as pretty JSON under `dir`.
pub fn write_run_record(dir: &Path, run: &WorkflowRun) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create results directory: {}", dir.display()))?;
    let path = dir.join(format!(
        "{}_{}_{}.json",
        run.ticker(),
        run.as_of(),
        run.run_id()
    ));
    let json = serde_json::to_string_pretty(run)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_models::RunState;
    use chrono::NaiveDate;
    use uuid::Uuid;

    #[test]
    fn missing_config_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AgoraConfig::default());
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agora.toml");
        fs::write(
            &path,
            "[debate]\nresearch_max_rounds = 4\n\n[memory]\nrecall_k = 0\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.debate.research_max_rounds, 4);
        assert_eq!(config.memory.recall_k, 0);
        assert_eq!(config.workflow.run_timeout_seconds, 900);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agora.toml");
        fs::write(&path, "[debate\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[tokio::test]
    async fn sqlite_memory_persists_across_builds() {
        let dir = tempfile::tempdir().unwrap();
        let config = MemoryConfig {
            sqlite_path: Some(dir.path().join("mem/agora.db").to_string_lossy().into_owned()),
            ..MemoryConfig::default()
        };
        let store = build_memory(&config).unwrap();
        assert!(store.get("NVDA", 3).await.unwrap().is_empty());
        assert!(dir.path().join("mem/agora.db").exists());
    }

    #[test]
    fn feeds_must_name_analyst_roles() {
        let config = AgoraConfig::default();
        let feeds = serde_json::json!({"trader": {}});
        assert!(build_orchestrator(&config, &feeds).is_err());
        assert!(build_orchestrator(&config, &serde_json::Value::Null).is_ok());
    }

    #[test]
    fn run_record_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let run = WorkflowRun::new(
            Uuid::new_v4(),
            "NVDA",
            NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            serde_json::json!({}),
        );
        let path = write_run_record(&dir.path().join("runs"), &run).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let parsed: WorkflowRun = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.run_id(), run.run_id());
        assert_eq!(parsed.state(), RunState::Pending);
    }
}
