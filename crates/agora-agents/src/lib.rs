pub mod claude_cli;
pub mod debate;
pub mod error;
pub mod feeds;
pub mod graph;
pub mod invoker;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod reflection;
pub mod service;
pub mod signal;
mod stages;

pub mod test_support;

pub use debate::{BoundOnly, ConvergenceJudge, DebateController, StopCondition};
pub use error::{
    DebateError, FeedError, GraphError, InvocationError, ParseError, ServiceError, StageError,
    WorkflowError,
};
pub use feeds::{static_analysts, Analyst, DataFeed, StaticFeed};
pub use graph::{Edge, EdgeGuard, StageGraph};
pub use invoker::{AgentInvoker, ClaudeReasoner, Reasoner, RetryPolicy};
pub use orchestrator::Orchestrator;
pub use reflection::Reflector;
pub use service::RunService;
