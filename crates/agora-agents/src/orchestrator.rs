use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agora_memory::MemoryStore;
use agora_models::{
    AgoraConfig, AuditLevel, BlackboardError, DebateStatus, RunOutcome, RunState, StageKind,
    WorkflowRun,
};
use chrono::NaiveDate;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::debate::{BoundOnly, ConvergenceJudge, DebateController, StopCondition};
use crate::error::{GraphError, StageError, WorkflowError};
use crate::feeds::Analyst;
use crate::graph::StageGraph;
use crate::invoker::{AgentInvoker, Reasoner};
use crate::reflection::Reflector;
use crate::stages::{run_stage, StageEnv};

/// Drives one deliberation run through the stage graph.
pub struct Orchestrator {
    invoker: AgentInvoker,
    debates: DebateController,
    stop: Arc<dyn StopCondition>,
    analysts: Vec<Analyst>,
    reflector: Reflector,
    graph: StageGraph,
    config: AgoraConfig,
}

impl Orchestrator {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        analysts: Vec<Analyst>,
        memory: Arc<dyn MemoryStore>,
        config: AgoraConfig,
    ) -> Result<Self, GraphError> {
        let graph = StageGraph::standard()?;
        let mut roles = BTreeSet::new();
        if let Some(dup) = analysts.iter().find(|a| !roles.insert(a.role)) {
            return Err(GraphError::DuplicateAnalyst(dup.role));
        }
        let invoker = AgentInvoker::from_config(reasoner, &config.agents);
        let stop: Arc<dyn StopCondition> = if config.debate.convergence_check {
            Arc::new(ConvergenceJudge::new(invoker.clone()))
        } else {
            Arc::new(BoundOnly)
        };
        Ok(Self {
            debates: DebateController::new(invoker.clone()),
            reflector: Reflector::new(invoker.clone(), memory),
            graph,
            invoker,
            stop,
            analysts,
            config,
        })
    }

    /// Replace the debate stop condition.
    pub fn with_stop_condition(mut self, stop: Arc<dyn StopCondition>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_graph(mut self, graph: StageGraph) -> Self {
        self.graph = graph;
        self
    }

    pub fn config(&self) -> &AgoraConfig {
        &self.config
    }

    pub fn reflector(&self) -> &Reflector {
        &self.reflector
    }

    /// Run the whole pipeline for `ticker` as of `as_of`.
    pub async fn run(
        &self,
        run_id: Uuid,
        ticker: &str,
        as_of: NaiveDate,
        initial_context: serde_json::Value,
    ) -> Result<RunOutcome, WorkflowError> {
        let mut run = WorkflowRun::new(run_id, ticker, as_of, initial_context);
        let (progress, _) = watch::channel(run.state());
        self.execute(&mut run, &CancellationToken::new(), &progress)
            .await
    }

    /// Execute `run` in place, leaving it DONE or FAILED with its audit trail.
    ///
    /// Each non-terminal state is published on `progress` as it is entered.
    /// Terminal states are left for the caller to publish once it has stored
    /// the finished run.
    pub async fn execute(
        &self,
        run: &mut WorkflowRun,
        cancel: &CancellationToken,
        progress: &watch::Sender<RunState>,
    ) -> Result<RunOutcome, WorkflowError> {
        let run_id = run.run_id();
        let budget = Duration::from_secs(self.config.workflow.run_timeout_seconds);
        let start = Instant::now();
        info!(%run_id, ticker = %run.ticker(), as_of = %run.as_of(), "Starting run");

        let driven = tokio::select! {
            result = tokio::time::timeout(budget, self.drive(run, progress)) => Some(result),
            _ = cancel.cancelled() => None,
        };

        match driven {
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(e))) => return Err(e),
            Some(Err(_)) => {
                let last_completed = run.last_completed_stage();
                error!(%run_id, budget_secs = budget.as_secs(), state = %run.state(), "Run timed out");
                run.fail(
                    None,
                    format!("run exceeded its {budget:?} budget in state {}", run.state()),
                );
                return Err(WorkflowError::WorkflowTimeout {
                    run_id,
                    budget,
                    last_completed,
                });
            }
            None => {
                let last_completed = run.last_completed_stage();
                warn!(%run_id, state = %run.state(), "Run cancelled");
                run.fail(None, format!("run cancelled in state {}", run.state()));
                return Err(WorkflowError::Cancelled {
                    run_id,
                    last_completed,
                });
            }
        }

        let Some(outcome) = run.outcome() else {
            let state = run.state();
            run.fail(None, format!("run ended in {state} without a decision and signal"));
            return Err(WorkflowError::Graph {
                run_id,
                source: GraphError::Incomplete(state),
            });
        };
        if let Err(e) = run.advance(RunState::Done) {
            run.fail(None, e.to_string());
            return Err(WorkflowError::Graph {
                run_id,
                source: GraphError::Incomplete(run.state()),
            });
        }

        info!(
            %run_id,
            signal = %outcome.signal,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Run complete"
        );
        Ok(outcome)
    }

    /// Past reflections for the run's ticker. Failure degrades to none.
    async fn recall(&self, run: &mut WorkflowRun) -> serde_json::Value {
        let k = self.config.memory.recall_k;
        if k == 0 {
            return serde_json::Value::Array(Vec::new());
        }
        match self.reflector.recall(run.ticker(), k).await {
            Ok(records) => {
                info!(run_id = %run.run_id(), recalled = records.len(), "Recalled past reflections");
                serde_json::Value::Array(records.iter().map(|r| r.as_context()).collect())
            }
            Err(e) => {
                warn!(run_id = %run.run_id(), error = %e, "Memory recall failed, continuing without");
                run.record(None, AuditLevel::Warning, format!("memory recall failed: {e}"));
                serde_json::Value::Array(Vec::new())
            }
        }
    }

    /// Walk the graph: a stage becomes ready once every predecessor has
    /// fired an edge into it.
    async fn drive(
        &self,
        run: &mut WorkflowRun,
        progress: &watch::Sender<RunState>,
    ) -> Result<(), WorkflowError> {
        let memories = self.recall(run).await;
        let env = StageEnv {
            invoker: &self.invoker,
            debates: &self.debates,
            stop: self.stop.as_ref(),
            analysts: &self.analysts,
            reflector: &self.reflector,
            config: &self.config,
            memories: &memories,
        };

        let mut fired: BTreeMap<StageKind, BTreeSet<StageKind>> = BTreeMap::new();
        let mut executed: BTreeSet<StageKind> = BTreeSet::new();
        let mut ready = VecDeque::from([self.graph.entry()]);

        while let Some(stage) = ready.pop_front() {
            let status = match self.execute_stage(stage, &env, run, progress).await {
                Ok(status) => status,
                Err(source) => {
                    let last_completed = run.last_completed_stage();
                    error!(run_id = %run.run_id(), %stage, error = %source, "Stage failed");
                    run.fail(Some(stage), source.to_string());
                    return Err(WorkflowError::StageFailure {
                        run_id: run.run_id(),
                        stage,
                        last_completed,
                        source,
                    });
                }
            };
            executed.insert(stage);

            for target in self.graph.fire(stage, status) {
                let sources = fired.entry(target).or_default();
                sources.insert(stage);
                if self.graph.predecessors(target) == Some(&*sources) {
                    ready.push_back(target);
                }
            }
        }

        if let Some(stalled) = self.graph.order().iter().find(|s| !executed.contains(*s)) {
            run.fail(Some(*stalled), format!("stage {stalled} never became ready"));
            return Err(WorkflowError::Graph {
                run_id: run.run_id(),
                source: GraphError::Stalled(*stalled),
            });
        }
        Ok(())
    }

    async fn execute_stage(
        &self,
        stage: StageKind,
        env: &StageEnv<'_>,
        run: &mut WorkflowRun,
        progress: &watch::Sender<RunState>,
    ) -> Result<Option<DebateStatus>, StageError> {
        run.advance(stage.state())?;
        progress.send_replace(run.state());
        for field in stage.requires() {
            if !run.blackboard().contains(*field) {
                return Err(BlackboardError::Missing(*field).into());
            }
        }

        let start = Instant::now();
        info!(run_id = %run.run_id(), %stage, state = %run.state(), "Stage started");
        run.record(Some(stage), AuditLevel::Info, "started");

        let output = run_stage(stage, env, run).await?;

        for (level, message) in output.notes {
            run.record(Some(stage), level, message);
        }
        let board = run.blackboard_mut()?;
        for (field, value) in output.writes {
            if !stage.owns(field) {
                return Err(StageError::NotOwned { stage, field });
            }
            board.write(field, value)?;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        run.complete_stage(stage);
        run.record(
            Some(stage),
            AuditLevel::Info,
            format!("completed in {elapsed_ms}ms"),
        );
        info!(run_id = %run.run_id(), %stage, elapsed_ms, "Stage completed");
        Ok(output.debate_status)
    }
}
