use agora_models::{DebateKind, DebateRound, DebateStatus, Role};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::DebateError;
use crate::invoker::AgentInvoker;
use crate::parser::parse_convergence_verdict;
use crate::prompts;

/// Decides, after a full non-final cycle, whether a debate may stop early.
#[async_trait]
pub trait StopCondition: Send + Sync {
    async fn should_stop(&self, debate: &DebateRound, shared: &serde_json::Value) -> bool;
}

/// Never stops early: every debate runs to its round ceiling.
pub struct BoundOnly;

#[async_trait]
impl StopCondition for BoundOnly {
    async fn should_stop(&self, _debate: &DebateRound, _shared: &serde_json::Value) -> bool {
        false
    }
}

/// Asks the convergence judge role. A failed call or an unreadable verdict
/// counts as not converged.
pub struct ConvergenceJudge {
    invoker: AgentInvoker,
}

impl ConvergenceJudge {
    pub fn new(invoker: AgentInvoker) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl StopCondition for ConvergenceJudge {
    async fn should_stop(&self, debate: &DebateRound, _shared: &serde_json::Value) -> bool {
        let rounds = debate.rounds_completed();
        let context = serde_json::json!({
            "kind": debate.kind(),
            "rounds_completed": rounds,
            "max_rounds": debate.max_rounds(),
            "transcript": debate.transcript(),
            "last_round": debate.last_cycle(),
        });
        let prompt = prompts::convergence_task(debate.kind(), rounds);

        let reply = match self
            .invoker
            .invoke(Role::ConvergenceJudge, None, &prompt, &context)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(kind = %debate.kind(), error = %e, "Convergence judge failed, continuing debate");
                return false;
            }
        };

        match parse_convergence_verdict(reply.content()) {
            Ok(verdict) => {
                debug!(kind = %debate.kind(), rounds, converged = verdict.converged, reason = %verdict.reason, "Convergence verdict");
                verdict.converged
            }
            Err(e) => {
                warn!(kind = %debate.kind(), error = %e, "Unreadable convergence verdict, continuing debate");
                false
            }
        }
    }
}

/// Runs bounded, strictly alternating debates between roles.
pub struct DebateController {
    invoker: AgentInvoker,
}

impl DebateController {
    pub fn new(invoker: AgentInvoker) -> Self {
        Self { invoker }
    }

    /// Run a debate to completion.
    ///
    /// Each turn sees the shared context plus every prior message. After each
    /// full cycle the debate ends at `max_rounds`, or earlier when `stop` says
    /// so. The stop condition is never consulted after the final round.
    pub async fn debate(
        &self,
        kind: DebateKind,
        participants: &[Role],
        shared: &serde_json::Value,
        max_rounds: u32,
        stop: &dyn StopCondition,
    ) -> Result<DebateRound, DebateError> {
        if participants.len() < 2 {
            return Err(DebateError::InvalidArguments(format!(
                "{kind} debate needs at least two participants, got {}",
                participants.len()
            )));
        }
        if max_rounds == 0 {
            return Err(DebateError::InvalidArguments(format!(
                "{kind} debate needs at least one round"
            )));
        }
        for (i, role) in participants.iter().enumerate() {
            if participants[..i].contains(role) {
                return Err(DebateError::InvalidArguments(format!(
                    "{role} listed twice in {kind} debate"
                )));
            }
        }

        let mut debate = DebateRound::new(kind, participants.to_vec(), max_rounds);
        let status = loop {
            let round = debate.current_round();
            for &role in participants {
                let context = serde_json::json!({
                    "shared": shared,
                    "round": round,
                    "max_rounds": max_rounds,
                    "transcript": debate.transcript(),
                    "messages": debate.messages(),
                });
                let prompt = prompts::debate_turn(kind, role, round, max_rounds);
                let message = self
                    .invoker
                    .invoke(role, Some(round), &prompt, &context)
                    .await
                    .map_err(|source| DebateError::Invocation { role, source })?;
                debate.append(message)?;
            }

            if round >= max_rounds {
                break DebateStatus::NotConverged;
            }
            if stop.should_stop(&debate, shared).await {
                break DebateStatus::Converged { round };
            }
        };

        debate.finish(status);
        info!(
            %kind,
            rounds = debate.rounds_completed(),
            max_rounds,
            converged = debate.is_converged(),
            "Debate finished"
        );
        Ok(debate)
    }
}
