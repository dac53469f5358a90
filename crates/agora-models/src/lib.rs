pub mod agent_message;
pub mod blackboard;
pub mod config;
pub mod debate;
pub mod decision;
pub mod reflection;
pub mod run;
pub mod stage;

pub use agent_message::{AgentMessage, ModelTier, Role};
pub use blackboard::{Blackboard, BlackboardError, Field, FieldValue, ValueKind};
pub use config::{
    AgentsConfig, AgoraConfig, AnalystConfig, DebateConfig, LogConfig, MemoryConfig,
    WorkflowConfig,
};
pub use debate::{DebateKind, DebateRound, DebateStatus, TurnError};
pub use decision::{Decision, RiskAssessment, RiskOpinion, RunOutcome, Signal, TradeProposal};
pub use reflection::{Outcome, ReflectionRecord};
pub use run::{AuditEvent, AuditLevel, RunError, RunState, WorkflowRun};
pub use stage::StageKind;
