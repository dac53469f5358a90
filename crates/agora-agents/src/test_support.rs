//! Scripted collaborators for exercising the workflow without the Claude CLI.
//!
//! `ScriptedReasoner` keeps a queue of steps per role. Each call pops the next
//! step for its role; once a queue is empty the role falls back to a canned
//! happy-path reply, so tests only script the turns they care about.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use agora_models::Role;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{FeedError, InvocationError};
use crate::feeds::DataFeed;
use crate::invoker::Reasoner;

#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    Transient(String),
    Permanent(String),
    /// Reply after a delay.
    Delay(Duration, String),
    /// Never reply within any reasonable test timeout.
    Hang,
}

/// One recorded call to the reasoner.
#[derive(Debug, Clone)]
pub struct Call {
    pub role: Role,
    pub prompt: String,
    pub context: serde_json::Value,
}

#[derive(Default)]
pub struct ScriptedReasoner {
    scripts: Mutex<HashMap<Role, VecDeque<Step>>>,
    calls: Mutex<Vec<Call>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(self, role: Role, step: Step) -> Self {
        lock(&self.scripts).entry(role).or_default().push_back(step);
        self
    }

    pub fn reply(self, role: Role, text: impl Into<String>) -> Self {
        self.step(role, Step::Reply(text.into()))
    }

    pub fn transient(self, role: Role, reason: impl Into<String>) -> Self {
        self.step(role, Step::Transient(reason.into()))
    }

    pub fn permanent(self, role: Role, reason: impl Into<String>) -> Self {
        self.step(role, Step::Permanent(reason.into()))
    }

    pub fn delay(self, role: Role, delay: Duration, text: impl Into<String>) -> Self {
        self.step(role, Step::Delay(delay, text.into()))
    }

    pub fn hang(self, role: Role) -> Self {
        self.step(role, Step::Hang)
    }

    /// Script the convergence judge's verdicts, in order.
    pub fn verdicts(mut self, verdicts: &[bool]) -> Self {
        for converged in verdicts {
            self = self.reply(Role::ConvergenceJudge, converged_json(*converged));
        }
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, role: Role) -> usize {
        lock(&self.calls).iter().filter(|c| c.role == role).count()
    }

    /// Roles in the order they were called.
    pub fn call_order(&self) -> Vec<Role> {
        lock(&self.calls).iter().map(|c| c.role).collect()
    }
}

fn converged_json(converged: bool) -> String {
    serde_json::json!({
        "converged": converged,
        "reason": if converged { "no new arguments" } else { "positions still moving" },
    })
    .to_string()
}

/// Canned reply used once a role's script runs out.
pub fn default_reply(role: Role) -> String {
    match role {
        Role::MarketAnalyst => "Price above the 50-day SMA, RSI 58, MACD positive.".to_string(),
        Role::SocialAnalyst => "Sentiment mildly positive, discussion volume steady.".to_string(),
        Role::NewsAnalyst => "No material headlines; sector news neutral.".to_string(),
        Role::FundamentalsAnalyst => "Revenue growth 12% YoY, margins stable.".to_string(),
        Role::BullResearcher => "Growth and momentum justify a position.".to_string(),
        Role::BearResearcher => "Valuation already prices in the growth.".to_string(),
        Role::ResearchManager => "Plan: hold off until a better entry.".to_string(),
        Role::Trader => serde_json::json!({
            "action": "HOLD",
            "conviction": "0.5",
            "position_size_pct": "0",
            "rationale": "Wait for confirmation",
        })
        .to_string(),
        Role::RiskyAnalyst => "Waiting forfeits upside.".to_string(),
        Role::SafeAnalyst => "Waiting preserves capital.".to_string(),
        Role::NeutralAnalyst => "A small starter position splits the difference.".to_string(),
        Role::RiskJudge => "Keep exposure small.".to_string(),
        Role::PortfolioManager => "Balanced picture.\nFinal Recommendation: HOLD".to_string(),
        Role::ConvergenceJudge => converged_json(false),
        Role::Reflector => "Patience was reasonable given mixed signals.".to_string(),
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn invoke(
        &self,
        role: Role,
        prompt: &str,
        context: &serde_json::Value,
    ) -> Result<String, InvocationError> {
        lock(&self.calls).push(Call {
            role,
            prompt: prompt.to_string(),
            context: context.clone(),
        });
        let step = lock(&self.scripts)
            .get_mut(&role)
            .and_then(VecDeque::pop_front);

        match step {
            None => Ok(default_reply(role)),
            Some(Step::Reply(text)) => Ok(text),
            Some(Step::Transient(reason)) => Err(InvocationError::Transient(reason)),
            Some(Step::Permanent(reason)) => Err(InvocationError::Permanent(reason)),
            Some(Step::Delay(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(InvocationError::Timeout(Duration::from_secs(3600)))
            }
        }
    }
}

/// A feed that always fails.
pub struct FailingFeed {
    pub reason: String,
}

impl FailingFeed {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl DataFeed for FailingFeed {
    async fn fetch(&self, _ticker: &str, _as_of: NaiveDate) -> Result<serde_json::Value, FeedError> {
        Err(FeedError::Unavailable(self.reason.clone()))
    }
}
