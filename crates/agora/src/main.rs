use std::path::{Path, PathBuf};
use std::sync::Arc;

use agora_agents::RunService;
use agora_memory::MemoryStore;
use agora_models::{Outcome, RunState};
use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "agora", about = "Multi-agent trading deliberation engine")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/agora.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deliberate over a ticker and print the decision
    Run {
        #[arg(short, long)]
        ticker: String,

        /// Analysis date (YYYY-MM-DD)
        #[arg(short, long)]
        date: NaiveDate,

        /// JSON file of pre-fetched data keyed by analyst role
        #[arg(short, long)]
        feeds: Option<PathBuf>,

        /// Extra JSON context handed to every stage
        #[arg(long)]
        context: Option<String>,

        /// Pretty-print the output JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Show stored reflections for a ticker, most recent first
    Recall {
        #[arg(short, long)]
        ticker: String,

        #[arg(short, default_value_t = 5)]
        k: usize,
    },

    /// Record the realized return of a past decision
    Outcome {
        #[arg(short, long)]
        ticker: String,

        #[arg(long)]
        run_id: Uuid,

        /// Realized return as a fraction, e.g. 0.034
        #[arg(long = "return", allow_hyphen_values = true)]
        realized_return: Decimal,

        #[arg(long)]
        note: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = agora::load_config(&cli.config)?;
    agora::init_tracing(&config.log)?;
    if !cli.config.exists() {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Command::Run {
            ticker,
            date,
            feeds,
            context,
            pretty,
        } => {
            let feeds = agora::load_feeds(feeds.as_deref())?;
            let context = match context {
                Some(raw) => serde_json::from_str(&raw).context("Failed to parse --context JSON")?,
                None => serde_json::json!({}),
            };
            let orchestrator =
                agora::build_orchestrator(&config, &feeds).context("Failed to build orchestrator")?;
            let service = RunService::new(Arc::new(orchestrator));

            let run_id = service.start_run(&ticker, date, context).await;
            let state = service.wait(run_id).await?;
            let run = service.snapshot(run_id).await?;

            if let Some(dir) = &config.workflow.results_dir {
                let path = agora::write_run_record(Path::new(dir), &run)?;
                info!(%run_id, path = %path.display(), "Run record written");
            }

            let output = match service.result(run_id).await {
                Ok(outcome) => serde_json::json!({
                    "run_id": run_id,
                    "state": state,
                    "decision": outcome.decision,
                    "signal": outcome.signal,
                }),
                Err(_) => serde_json::json!({
                    "run_id": run_id,
                    "state": state,
                    "failure": run.failure(),
                    "last_completed_stage": run.last_completed_stage(),
                }),
            };
            print_json(&output, pretty)?;
            if state != RunState::Done {
                bail!("Run {run_id} ended in {state}");
            }
        }

        Command::Recall { ticker, k } => {
            require_persistent(&config)?;
            let memory = agora::build_memory(&config.memory)?;
            let records = memory
                .get(&ticker, k)
                .await
                .with_context(|| format!("Failed to recall reflections for {ticker}"))?;
            print_json(&serde_json::to_value(&records)?, true)?;
        }

        Command::Outcome {
            ticker,
            run_id,
            realized_return,
            note,
        } => {
            require_persistent(&config)?;
            let orchestrator = agora::build_orchestrator(&config, &serde_json::Value::Null)
                .context("Failed to build orchestrator")?;
            let outcome = Outcome {
                realized_return,
                note,
                observed_at: Utc::now(),
            };
            let record = orchestrator
                .reflector()
                .record_outcome(&ticker, run_id, outcome)
                .await
                .with_context(|| format!("Failed to record outcome for run {run_id}"))?;
            print_json(&serde_json::to_value(&record)?, true)?;
        }
    }

    Ok(())
}

fn require_persistent(config: &agora_models::AgoraConfig) -> Result<()> {
    if config.memory.sqlite_path.is_none() {
        bail!("memory.sqlite_path is not set; reflections only persist in a SQLite store");
    }
    Ok(())
}

fn print_json(value: &serde_json::Value, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}
