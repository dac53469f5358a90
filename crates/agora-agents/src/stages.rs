//! Stage handlers. Each reads the blackboard of a run and returns the fields
//! it wants written; the orchestrator commits them after checking ownership.

use std::sync::Arc;

use agora_models::{
    AgentMessage, AgoraConfig, AuditLevel, DebateKind, DebateStatus, Decision, Field, FieldValue,
    RiskAssessment, RiskOpinion, Role, StageKind, WorkflowRun,
};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::debate::{DebateController, StopCondition};
use crate::error::StageError;
use crate::feeds::Analyst;
use crate::invoker::AgentInvoker;
use crate::parser::parse_trade_proposal;
use crate::prompts;
use crate::reflection::Reflector;
use crate::signal;

const RESEARCHERS: [Role; 2] = [Role::BullResearcher, Role::BearResearcher];
const RISK_PANEL: [Role; 3] = [Role::RiskyAnalyst, Role::SafeAnalyst, Role::NeutralAnalyst];

/// Everything a stage handler may use besides the run itself.
pub(crate) struct StageEnv<'a> {
    pub invoker: &'a AgentInvoker,
    pub debates: &'a DebateController,
    pub stop: &'a dyn StopCondition,
    pub analysts: &'a [Analyst],
    pub reflector: &'a Reflector,
    pub config: &'a AgoraConfig,
    /// Recalled reflections, read-only for the whole run.
    pub memories: &'a serde_json::Value,
}

#[derive(Debug, Default)]
pub(crate) struct StageOutput {
    pub writes: Vec<(Field, FieldValue)>,
    pub debate_status: Option<DebateStatus>,
    pub notes: Vec<(AuditLevel, String)>,
}

impl StageOutput {
    fn write(&mut self, field: Field, value: FieldValue) {
        self.writes.push((field, value));
    }

    fn note(&mut self, level: AuditLevel, message: impl Into<String>) {
        self.notes.push((level, message.into()));
    }
}

pub(crate) async fn run_stage(
    kind: StageKind,
    env: &StageEnv<'_>,
    run: &WorkflowRun,
) -> Result<StageOutput, StageError> {
    match kind {
        StageKind::Analysts => analysts(env, run).await,
        StageKind::ResearchDebate => research_debate(env, run).await,
        StageKind::ResearchManager => research_manager(env, run).await,
        StageKind::Trader => trader(env, run).await,
        StageKind::RiskDebate => risk_debate(env, run).await,
        StageKind::PortfolioManager => portfolio_manager(env, run).await,
        StageKind::SignalExtraction => signal_extraction(run),
        StageKind::Reflection => reflection(env, run).await,
    }
}

async fn ask(
    env: &StageEnv<'_>,
    role: Role,
    prompt: &str,
    context: &serde_json::Value,
) -> Result<AgentMessage, StageError> {
    env.invoker
        .invoke(role, None, prompt, context)
        .await
        .map_err(|source| StageError::Invocation { role, source })
}

fn debate_note(kind: DebateKind, status: Option<DebateStatus>, rounds: u32) -> String {
    match status {
        Some(DebateStatus::Converged { round }) => {
            format!("{kind} debate converged after round {round}")
        }
        _ => format!("{kind} debate reached its ceiling of {rounds} round(s) without converging"),
    }
}

/// Fan out one task per analyst over a shared snapshot of the run inputs.
async fn analysts(env: &StageEnv<'_>, run: &WorkflowRun) -> Result<StageOutput, StageError> {
    let snapshot = Arc::new(serde_json::json!({
        "ticker": run.ticker(),
        "as_of": run.as_of(),
        "context": run.initial_context(),
        "memories": env.memories,
    }));
    let require_all = env.config.workflow.require_all_analysts;

    let mut tasks = JoinSet::new();
    for analyst in env.analysts.iter().cloned() {
        let invoker = env.invoker.clone();
        let snapshot = Arc::clone(&snapshot);
        let ticker = run.ticker().to_string();
        let as_of = run.as_of();
        tasks.spawn(async move {
            let role = analyst.role;
            let result: Result<AgentMessage, StageError> = async {
                let data = analyst
                    .feed
                    .fetch(&ticker, as_of)
                    .await
                    .map_err(|source| StageError::Feed { role, source })?;
                let context = serde_json::json!({ "input": &*snapshot, "data": data });
                let prompt = prompts::analyst_task(role, &ticker, &as_of.to_string());
                invoker
                    .invoke(role, None, &prompt, &context)
                    .await
                    .map_err(|source| StageError::Invocation { role, source })
            }
            .await;
            (role, result)
        });
    }

    let mut output = StageOutput::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((role, Ok(message))) => match role.report_field() {
                Some(field) => {
                    info!(run_id = %run.run_id(), %role, "Analyst report ready");
                    output.write(field, FieldValue::Text(message.content().to_string()));
                }
                None => {
                    warn!(%role, "Role has no report field, ignoring its output");
                    output.note(AuditLevel::Warning, format!("{role} is not an analyst role"));
                }
            },
            Ok((role, Err(e))) => {
                if require_all {
                    tasks.abort_all();
                    return Err(e);
                }
                warn!(run_id = %run.run_id(), %role, error = %e, "Analyst failed, continuing without it");
                output.note(AuditLevel::Warning, format!("{role} degraded: {e}"));
            }
            Err(e) => {
                if require_all {
                    tasks.abort_all();
                    return Err(StageError::TaskAborted(e.to_string()));
                }
                error!(run_id = %run.run_id(), error = %e, "Analyst task aborted");
                output.note(AuditLevel::Warning, format!("analyst task aborted: {e}"));
            }
        }
    }

    if output.writes.is_empty() {
        return Err(StageError::NoAnalystReports);
    }
    Ok(output)
}

async fn research_debate(env: &StageEnv<'_>, run: &WorkflowRun) -> Result<StageOutput, StageError> {
    let reports = run.blackboard().analyst_reports();
    if reports.is_empty() {
        return Err(StageError::NoAnalystReports);
    }
    let shared = serde_json::json!({
        "ticker": run.ticker(),
        "as_of": run.as_of(),
        "context": run.initial_context(),
        "reports": reports,
        "memories": env.memories,
    });
    let max_rounds = env.config.debate.research_max_rounds;
    let debate = env
        .debates
        .debate(DebateKind::Research, &RESEARCHERS, &shared, max_rounds, env.stop)
        .await?;

    let last_word = |role| {
        debate
            .last_from(role)
            .map(|m| m.content().to_string())
            .unwrap_or_default()
    };
    let mut output = StageOutput::default();
    output.write(Field::BullCase, FieldValue::Text(last_word(Role::BullResearcher)));
    output.write(Field::BearCase, FieldValue::Text(last_word(Role::BearResearcher)));
    output.debate_status = debate.status();
    output.note(
        AuditLevel::Info,
        debate_note(DebateKind::Research, debate.status(), max_rounds),
    );
    output.write(Field::ResearchDebate, FieldValue::Debate(debate));
    Ok(output)
}

async fn research_manager(env: &StageEnv<'_>, run: &WorkflowRun) -> Result<StageOutput, StageError> {
    let board = run.blackboard();
    let debate = board.require_debate(Field::ResearchDebate)?;
    let context = serde_json::json!({
        "ticker": run.ticker(),
        "as_of": run.as_of(),
        "reports": board.analyst_reports(),
        "bull_case": board.require_text(Field::BullCase)?,
        "bear_case": board.require_text(Field::BearCase)?,
        "transcript": debate.transcript(),
        "debate_status": debate.status(),
        "memories": env.memories,
    });
    let message = ask(env, Role::ResearchManager, &prompts::research_manager_task(run.ticker()), &context).await?;

    let mut output = StageOutput::default();
    output.write(Field::ResearchSummary, FieldValue::Text(message.content().to_string()));
    Ok(output)
}

async fn trader(env: &StageEnv<'_>, run: &WorkflowRun) -> Result<StageOutput, StageError> {
    let board = run.blackboard();
    let context = serde_json::json!({
        "ticker": run.ticker(),
        "as_of": run.as_of(),
        "research_summary": board.require_text(Field::ResearchSummary)?,
        "reports": board.analyst_reports(),
    });
    let message = ask(env, Role::Trader, &prompts::trader_task(run.ticker()), &context).await?;
    let proposal = parse_trade_proposal(message.content())?;
    info!(
        run_id = %run.run_id(),
        action = %proposal.action,
        conviction = %proposal.conviction,
        "Trade proposed"
    );

    let mut output = StageOutput::default();
    output.write(Field::TradeProposal, FieldValue::Proposal(proposal));
    Ok(output)
}

async fn risk_debate(env: &StageEnv<'_>, run: &WorkflowRun) -> Result<StageOutput, StageError> {
    let board = run.blackboard();
    let proposal = board.require_proposal()?;
    let summary = board.require_text(Field::ResearchSummary)?;
    let shared = serde_json::json!({
        "ticker": run.ticker(),
        "as_of": run.as_of(),
        "trade_proposal": proposal,
        "research_summary": summary,
        "reports": board.analyst_reports(),
    });
    let max_rounds = env.config.debate.risk_max_rounds;
    let debate = env
        .debates
        .debate(DebateKind::Risk, &RISK_PANEL, &shared, max_rounds, env.stop)
        .await?;

    let perspectives: Vec<RiskOpinion> = RISK_PANEL
        .iter()
        .filter_map(|role| {
            debate.last_from(*role).map(|m| RiskOpinion {
                role: *role,
                opinion: m.content().to_string(),
            })
        })
        .collect();
    let context = serde_json::json!({
        "ticker": run.ticker(),
        "trade_proposal": proposal,
        "perspectives": perspectives,
        "transcript": debate.transcript(),
    });
    let verdict = ask(env, Role::RiskJudge, &prompts::risk_judge_task(run.ticker()), &context).await?;

    let status = debate.status().unwrap_or(DebateStatus::NotConverged);
    let mut output = StageOutput::default();
    output.debate_status = Some(status);
    output.note(AuditLevel::Info, debate_note(DebateKind::Risk, Some(status), max_rounds));
    output.write(
        Field::RiskAssessment,
        FieldValue::Risk(RiskAssessment {
            perspectives,
            verdict: verdict.content().to_string(),
            debate_status: status,
        }),
    );
    output.write(Field::RiskDebate, FieldValue::Debate(debate));
    Ok(output)
}

async fn portfolio_manager(env: &StageEnv<'_>, run: &WorkflowRun) -> Result<StageOutput, StageError> {
    let board = run.blackboard();
    let context = serde_json::json!({
        "ticker": run.ticker(),
        "as_of": run.as_of(),
        "research_summary": board.require_text(Field::ResearchSummary)?,
        "trade_proposal": board.require_proposal()?,
        "risk_assessment": board.require_risk()?,
        "reports": board.analyst_reports(),
        "memories": env.memories,
    });
    let message = ask(
        env,
        Role::PortfolioManager,
        &prompts::portfolio_manager_task(run.ticker()),
        &context,
    )
    .await?;

    let text = message.content().to_string();
    let recommendation = signal::verdict_line(&text).filter(|v| !v.is_empty());
    let mut output = StageOutput::default();
    output.write(Field::FinalDecision, FieldValue::Decision(Decision::new(text, recommendation)));
    Ok(output)
}

fn signal_extraction(run: &WorkflowRun) -> Result<StageOutput, StageError> {
    let decision = run.blackboard().require_decision()?;
    let extraction = signal::extract_detailed(&decision.text);

    let mut output = StageOutput::default();
    if extraction.is_fallback() {
        warn!(run_id = %run.run_id(), status = ?extraction.status, "Signal extraction fell back to HOLD");
        output.note(
            AuditLevel::Warning,
            format!("signal extraction fell back to HOLD ({:?})", extraction.status),
        );
    }
    info!(run_id = %run.run_id(), signal = %extraction.signal, "Signal extracted");
    output.write(Field::Signal, FieldValue::Signal(extraction.signal));
    Ok(output)
}

/// A failed store write is reported, never fatal: the decision stands.
async fn reflection(env: &StageEnv<'_>, run: &WorkflowRun) -> Result<StageOutput, StageError> {
    let record = env.reflector.reflect(run).await?;
    let mut output = StageOutput::default();
    output.write(Field::Reflection, FieldValue::Text(record.lesson.clone()));

    if let Err(e) = env.reflector.store().put(record).await {
        error!(run_id = %run.run_id(), error = %e, "Failed to store reflection");
        output.note(AuditLevel::Error, format!("reflection not stored: {e}"));
    }
    Ok(output)
}
