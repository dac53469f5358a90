use std::time::Duration;

use agora_models::{BlackboardError, Field, Role, RunError, RunState, StageKind, TurnError};
use thiserror::Error;
use uuid::Uuid;

/// Failure of one reasoning collaborator call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    /// Network hiccup, rate limit, non-zero CLI exit. Worth retrying.
    #[error("Transient invocation failure: {0}")]
    Transient(String),

    /// Refused or malformed request. Retrying will not help.
    #[error("Permanent invocation failure: {0}")]
    Permanent(String),

    #[error("Agent timed out after {0:?}")]
    Timeout(Duration),
}

impl InvocationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, InvocationError::Transient(_) | InvocationError::Timeout(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Data feed unavailable: {0}")]
    Unavailable(String),

    #[error("Data feed returned malformed data: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Agent response parse error: {0}")]
pub struct ParseError(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DebateError {
    #[error("Invalid debate arguments: {0}")]
    InvalidArguments(String),

    #[error("{role} failed during debate: {source}")]
    Invocation {
        role: Role,
        #[source]
        source: InvocationError,
    },

    #[error("Debate turn rejected: {0}")]
    Turn(#[from] TurnError),
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("{role} invocation failed: {source}")]
    Invocation {
        role: Role,
        #[source]
        source: InvocationError,
    },

    #[error("{role} data feed failed: {source}")]
    Feed {
        role: Role,
        #[source]
        source: FeedError,
    },

    #[error("Analyst task aborted: {0}")]
    TaskAborted(String),

    #[error("No analyst produced a report")]
    NoAnalystReports,

    #[error(transparent)]
    Blackboard(#[from] BlackboardError),

    #[error(transparent)]
    Debate(#[from] DebateError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("Stage {stage} does not own field {field}")]
    NotOwned { stage: StageKind, field: Field },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Stage graph contains a cycle through {0:?}")]
    Cycle(Vec<StageKind>),

    #[error("Stage {0} declared twice")]
    DuplicateNode(StageKind),

    #[error("Edge references undeclared stage {0}")]
    UnknownNode(StageKind),

    #[error("Edge {from} -> {to} goes back in the run lifecycle")]
    Backwards { from: StageKind, to: StageKind },

    #[error("Stage graph must have exactly one entry stage, found {0}")]
    Entry(usize),

    #[error("Analyst role {0} configured twice")]
    DuplicateAnalyst(Role),

    #[error("Stage {0} never became ready")]
    Stalled(StageKind),

    #[error("Graph finished in state {0} without a decision and signal")]
    Incomplete(RunState),
}

/// Failures surfaced to the caller of a run.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Run {run_id} failed in stage {stage} (last completed: {last_completed:?}): {source}")]
    StageFailure {
        run_id: Uuid,
        stage: StageKind,
        last_completed: Option<StageKind>,
        #[source]
        source: StageError,
    },

    #[error("Run {run_id} exceeded its {budget:?} budget (last completed: {last_completed:?})")]
    WorkflowTimeout {
        run_id: Uuid,
        budget: Duration,
        last_completed: Option<StageKind>,
    },

    #[error("Run {run_id} was cancelled (last completed: {last_completed:?})")]
    Cancelled {
        run_id: Uuid,
        last_completed: Option<StageKind>,
    },

    #[error("Run {run_id}: {source}")]
    Graph {
        run_id: Uuid,
        #[source]
        source: GraphError,
    },
}

impl WorkflowError {
    pub fn run_id(&self) -> Uuid {
        match self {
            WorkflowError::StageFailure { run_id, .. }
            | WorkflowError::WorkflowTimeout { run_id, .. }
            | WorkflowError::Cancelled { run_id, .. }
            | WorkflowError::Graph { run_id, .. } => *run_id,
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Unknown run {0}")]
    UnknownRun(Uuid),

    #[error("Run {run_id} has not finished (state {state})")]
    NotFinished { run_id: Uuid, state: RunState },

    #[error("Run {run_id} failed: {reason}")]
    Failed { run_id: Uuid, reason: String },
}
