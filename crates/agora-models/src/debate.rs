use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent_message::{AgentMessage, Role};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DebateKind {
    /// Bull vs. bear over the analyst reports.
    Research,
    /// Risky vs. safe vs. neutral over the trader's proposal.
    Risk,
}

impl std::fmt::Display for DebateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DebateKind::Research => f.write_str("research"),
            DebateKind::Risk => f.write_str("risk"),
        }
    }
}

/// How a debate loop ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DebateStatus {
    /// The convergence evaluator judged positions stable after `round`.
    Converged { round: u32 },
    /// The round ceiling was reached first. Soft status, not an error.
    NotConverged,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    #[error("out of turn: expected {expected}, got {got}")]
    OutOfTurn { expected: Role, got: Role },

    #[error("message tagged round {got:?}, current round is {expected}")]
    RoundMismatch { expected: u32, got: Option<u32> },

    #[error("round limit of {0} reached")]
    RoundLimit(u32),

    #[error("debate already finished")]
    Finished,
}

/// The ordered transcript of one debate loop.
///
/// Messages can only be appended, in strict participant order, and never
/// beyond `max_rounds` full cycles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebateRound {
    kind: DebateKind,
    participants: Vec<Role>,
    max_rounds: u32,
    messages: Vec<AgentMessage>,
    status: Option<DebateStatus>,
}

impl DebateRound {
    pub fn new(kind: DebateKind, participants: Vec<Role>, max_rounds: u32) -> Self {
        Self {
            kind,
            participants,
            max_rounds,
            messages: Vec::new(),
            status: None,
        }
    }

    pub fn kind(&self) -> DebateKind {
        self.kind
    }

    pub fn participants(&self) -> &[Role] {
        &self.participants
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn messages(&self) -> &[AgentMessage] {
        &self.messages
    }

    /// `None` while the loop is still running.
    pub fn status(&self) -> Option<DebateStatus> {
        self.status
    }

    pub fn is_converged(&self) -> bool {
        matches!(self.status, Some(DebateStatus::Converged { .. }))
    }

    /// Number of full cycles in which every participant has spoken.
    pub fn rounds_completed(&self) -> u32 {
        if self.participants.is_empty() {
            return 0;
        }
        (self.messages.len() / self.participants.len()) as u32
    }

    /// The round the next message belongs to (1-based).
    pub fn current_round(&self) -> u32 {
        self.rounds_completed() + 1
    }

    pub fn next_speaker(&self) -> Option<Role> {
        if self.participants.is_empty() {
            return None;
        }
        Some(self.participants[self.messages.len() % self.participants.len()])
    }

    /// True once the last message of a full cycle has been appended.
    pub fn at_cycle_boundary(&self) -> bool {
        !self.messages.is_empty()
            && !self.participants.is_empty()
            && self.messages.len() % self.participants.len() == 0
    }

    pub fn append(&mut self, message: AgentMessage) -> Result<(), TurnError> {
        if self.status.is_some() {
            return Err(TurnError::Finished);
        }
        let round = self.current_round();
        if round > self.max_rounds {
            return Err(TurnError::RoundLimit(self.max_rounds));
        }
        let expected = self.next_speaker().ok_or(TurnError::Finished)?;
        if message.role() != expected {
            return Err(TurnError::OutOfTurn {
                expected,
                got: message.role(),
            });
        }
        if message.round() != Some(round) {
            return Err(TurnError::RoundMismatch {
                expected: round,
                got: message.round(),
            });
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn finish(&mut self, status: DebateStatus) {
        self.status = Some(status);
    }

    /// The most recent message from `role`.
    pub fn last_from(&self, role: Role) -> Option<&AgentMessage> {
        self.messages.iter().rev().find(|m| m.role() == role)
    }

    /// Messages of the latest completed cycle, in speaking order.
    pub fn last_cycle(&self) -> &[AgentMessage] {
        let n = self.participants.len();
        if n == 0 || self.messages.len() < n {
            return &self.messages;
        }
        let complete = self.messages.len() - self.messages.len() % n;
        &self.messages[complete - n..complete]
    }

    /// Full transcript, one `role: content` line per turn.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(AgentMessage::transcript_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
