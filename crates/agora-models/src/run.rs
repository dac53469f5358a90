use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::blackboard::Blackboard;
use crate::decision::RunOutcome;
use crate::stage::StageKind;

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Pending,
    Analyzing,
    DebatingResearch,
    Trading,
    DebatingRisk,
    Deciding,
    ExtractingSignal,
    Reflecting,
    Done,
    Failed,
}

impl RunState {
    fn ordinal(&self) -> Option<u8> {
        match self {
            RunState::Pending => Some(0),
            RunState::Analyzing => Some(1),
            RunState::DebatingResearch => Some(2),
            RunState::Trading => Some(3),
            RunState::DebatingRisk => Some(4),
            RunState::Deciding => Some(5),
            RunState::ExtractingSignal => Some(6),
            RunState::Reflecting => Some(7),
            RunState::Done => Some(8),
            RunState::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Only the immediate successor is allowed, plus `Failed` from any live state.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == RunState::Failed {
            return true;
        }
        match (self.ordinal(), next.ordinal()) {
            (Some(from), Some(to)) => to == from + 1,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Pending => "PENDING",
            RunState::Analyzing => "ANALYZING",
            RunState::DebatingResearch => "DEBATING_RESEARCH",
            RunState::Trading => "TRADING",
            RunState::DebatingRisk => "DEBATING_RISK",
            RunState::Deciding => "DECIDING",
            RunState::ExtractingSignal => "EXTRACTING_SIGNAL",
            RunState::Reflecting => "REFLECTING",
            RunState::Done => "DONE",
            RunState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: RunState, to: RunState },

    #[error("run {0} is finalized")]
    Finalized(Uuid),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
}

/// One line of a run's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub stage: Option<StageKind>,
    pub level: AuditLevel,
    pub message: String,
}

/// A single deliberation run: identity, state, blackboard and audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowRun {
    run_id: Uuid,
    ticker: String,
    as_of: NaiveDate,
    /// Caller-supplied context, visible to every stage.
    initial_context: serde_json::Value,
    state: RunState,
    blackboard: Blackboard,
    completed_stages: Vec<StageKind>,
    audit: Vec<AuditEvent>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    failure: Option<String>,
}

impl WorkflowRun {
    pub fn new(
        run_id: Uuid,
        ticker: impl Into<String>,
        as_of: NaiveDate,
        initial_context: serde_json::Value,
    ) -> Self {
        Self {
            run_id,
            ticker: ticker.into(),
            as_of,
            initial_context,
            state: RunState::Pending,
            blackboard: Blackboard::new(),
            completed_stages: Vec::new(),
            audit: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            failure: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn initial_context(&self) -> &serde_json::Value {
        &self.initial_context
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    /// Mutable blackboard access. Rejected once the run is finalized.
    pub fn blackboard_mut(&mut self) -> Result<&mut Blackboard, RunError> {
        if self.state.is_terminal() {
            return Err(RunError::Finalized(self.run_id));
        }
        Ok(&mut self.blackboard)
    }

    pub fn completed_stages(&self) -> &[StageKind] {
        &self.completed_stages
    }

    pub fn last_completed_stage(&self) -> Option<StageKind> {
        self.completed_stages.last().copied()
    }

    pub fn audit(&self) -> &[AuditEvent] {
        &self.audit
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Move to `next`. Re-entering the current state is a no-op, since
    /// consecutive stages may share a state.
    pub fn advance(&mut self, next: RunState) -> Result<(), RunError> {
        if next == self.state && !self.state.is_terminal() {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(RunError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
            self.blackboard.seal();
        }
        Ok(())
    }

    /// Mark the run failed, keeping the partial blackboard for audit.
    pub fn fail(&mut self, stage: Option<StageKind>, reason: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        let reason = reason.into();
        self.record(stage, AuditLevel::Error, reason.clone());
        self.failure = Some(reason);
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
        self.blackboard.seal();
    }

    pub fn complete_stage(&mut self, stage: StageKind) {
        self.completed_stages.push(stage);
    }

    pub fn record(&mut self, stage: Option<StageKind>, level: AuditLevel, message: impl Into<String>) {
        self.audit.push(AuditEvent {
            at: Utc::now(),
            stage,
            level,
            message: message.into(),
        });
    }

    /// Decision and signal, available once both are on the blackboard.
    pub fn outcome(&self) -> Option<RunOutcome> {
        let decision = self.blackboard.require_decision().ok()?.clone();
        let signal = self.blackboard.require_signal().ok()?;
        Some(RunOutcome { decision, signal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::{Field, FieldValue};
    use crate::decision::{Decision, Signal};

    fn run() -> WorkflowRun {
        WorkflowRun::new(
            Uuid::new_v4(),
            "NVDA",
            NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            serde_json::json!({}),
        )
    }

    #[test]
    fn walks_the_happy_path() {
        let mut run = run();
        for state in [
            RunState::Analyzing,
            RunState::DebatingResearch,
            RunState::DebatingResearch,
            RunState::Trading,
            RunState::DebatingRisk,
            RunState::Deciding,
            RunState::ExtractingSignal,
            RunState::Reflecting,
            RunState::Done,
        ] {
            run.advance(state).unwrap();
        }
        assert_eq!(run.state(), RunState::Done);
        assert!(run.finished_at().is_some());
        assert!(run.blackboard().is_sealed());
    }

    #[test]
    fn rejects_skips_and_revisits() {
        let mut run = run();
        assert!(run.advance(RunState::Trading).is_err());
        run.advance(RunState::Analyzing).unwrap();
        run.advance(RunState::DebatingResearch).unwrap();
        assert_eq!(
            run.advance(RunState::Analyzing).unwrap_err(),
            RunError::IllegalTransition {
                from: RunState::DebatingResearch,
                to: RunState::Analyzing
            }
        );
    }

    #[test]
    fn failed_reachable_from_any_live_state() {
        assert!(RunState::Pending.can_transition_to(RunState::Failed));
        assert!(RunState::Reflecting.can_transition_to(RunState::Failed));
        assert!(!RunState::Done.can_transition_to(RunState::Failed));
    }

    #[test]
    fn fail_keeps_partial_blackboard() {
        let mut run = run();
        run.advance(RunState::Analyzing).unwrap();
        run.blackboard_mut()
            .unwrap()
            .write(Field::NewsReport, FieldValue::Text("headline".into()))
            .unwrap();
        run.fail(Some(StageKind::ResearchDebate), "collaborator refused");

        assert_eq!(run.state(), RunState::Failed);
        assert_eq!(run.failure(), Some("collaborator refused"));
        assert_eq!(run.blackboard().text(Field::NewsReport), Some("headline"));
        assert!(run.blackboard_mut().is_err());
        assert_eq!(run.audit().last().unwrap().level, AuditLevel::Error);
    }

    #[test]
    fn outcome_requires_decision_and_signal() {
        let mut run = run();
        run.advance(RunState::Analyzing).unwrap();
        assert!(run.outcome().is_none());
        let board = run.blackboard_mut().unwrap();
        board
            .write(
                Field::FinalDecision,
                FieldValue::Decision(Decision::new("Final Recommendation: BUY", None)),
            )
            .unwrap();
        assert!(run.outcome().is_none());
        run.blackboard_mut()
            .unwrap()
            .write(Field::Signal, FieldValue::Signal(Signal::Buy))
            .unwrap();
        assert_eq!(run.outcome().unwrap().signal, Signal::Buy);
    }

    #[test]
    fn state_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&RunState::DebatingRisk).unwrap(),
            "\"DEBATING_RISK\""
        );
        assert_eq!(RunState::ExtractingSignal.to_string(), "EXTRACTING_SIGNAL");
    }
}
