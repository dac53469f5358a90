use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::debate::DebateRound;
use crate::decision::{Decision, RiskAssessment, Signal, TradeProposal};

/// Names of the artifacts a run accumulates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    TechnicalReport,
    SentimentReport,
    NewsReport,
    FundamentalsReport,
    ResearchDebate,
    BullCase,
    BearCase,
    ResearchSummary,
    TradeProposal,
    RiskDebate,
    RiskAssessment,
    FinalDecision,
    Signal,
    Reflection,
}

impl Field {
    pub const ANALYST_REPORTS: [Field; 4] = [
        Field::TechnicalReport,
        Field::SentimentReport,
        Field::NewsReport,
        Field::FundamentalsReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::TechnicalReport => "technical_report",
            Field::SentimentReport => "sentiment_report",
            Field::NewsReport => "news_report",
            Field::FundamentalsReport => "fundamentals_report",
            Field::ResearchDebate => "research_debate",
            Field::BullCase => "bull_case",
            Field::BearCase => "bear_case",
            Field::ResearchSummary => "research_summary",
            Field::TradeProposal => "trade_proposal",
            Field::RiskDebate => "risk_debate",
            Field::RiskAssessment => "risk_assessment",
            Field::FinalDecision => "final_decision",
            Field::Signal => "signal",
            Field::Reflection => "reflection",
        }
    }

    fn expected_kind(&self) -> ValueKind {
        match self {
            Field::ResearchDebate | Field::RiskDebate => ValueKind::Debate,
            Field::TradeProposal => ValueKind::Proposal,
            Field::RiskAssessment => ValueKind::Risk,
            Field::FinalDecision => ValueKind::Decision,
            Field::Signal => ValueKind::Signal,
            _ => ValueKind::Text,
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Debate,
    Proposal,
    Risk,
    Decision,
    Signal,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueKind::Text => "text",
            ValueKind::Debate => "debate",
            ValueKind::Proposal => "trade proposal",
            ValueKind::Risk => "risk assessment",
            ValueKind::Decision => "decision",
            ValueKind::Signal => "signal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Debate(DebateRound),
    Proposal(TradeProposal),
    Risk(RiskAssessment),
    Decision(Decision),
    Signal(Signal),
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Text(_) => ValueKind::Text,
            FieldValue::Debate(_) => ValueKind::Debate,
            FieldValue::Proposal(_) => ValueKind::Proposal,
            FieldValue::Risk(_) => ValueKind::Risk,
            FieldValue::Decision(_) => ValueKind::Decision,
            FieldValue::Signal(_) => ValueKind::Signal,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlackboardError {
    #[error("field already written: {0}")]
    AlreadyWritten(Field),

    #[error("required field missing: {0}")]
    Missing(Field),

    #[error("field {field} holds a {expected}, got a {actual}")]
    WrongKind {
        field: Field,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("blackboard is sealed, cannot write {0}")]
    Sealed(Field),
}

/// Per-run shared state. Each field is written at most once.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Blackboard {
    fields: BTreeMap<Field, FieldValue>,
    sealed: bool,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, field: Field, value: FieldValue) -> Result<(), BlackboardError> {
        if self.sealed {
            return Err(BlackboardError::Sealed(field));
        }
        let expected = field.expected_kind();
        if value.kind() != expected {
            return Err(BlackboardError::WrongKind {
                field,
                expected,
                actual: value.kind(),
            });
        }
        if self.fields.contains_key(&field) {
            return Err(BlackboardError::AlreadyWritten(field));
        }
        self.fields.insert(field, value);
        Ok(())
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn written(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Freeze the blackboard once its run is finalized.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn require(&self, field: Field) -> Result<&FieldValue, BlackboardError> {
        self.fields.get(&field).ok_or(BlackboardError::Missing(field))
    }

    fn wrong_kind(field: Field, value: &FieldValue) -> BlackboardError {
        BlackboardError::WrongKind {
            field,
            expected: field.expected_kind(),
            actual: value.kind(),
        }
    }

    /// Text value of a field if present.
    pub fn text(&self, field: Field) -> Option<&str> {
        match self.fields.get(&field) {
            Some(FieldValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn require_text(&self, field: Field) -> Result<&str, BlackboardError> {
        match self.require(field)? {
            FieldValue::Text(text) => Ok(text),
            other => Err(Self::wrong_kind(field, other)),
        }
    }

    pub fn require_debate(&self, field: Field) -> Result<&DebateRound, BlackboardError> {
        match self.require(field)? {
            FieldValue::Debate(debate) => Ok(debate),
            other => Err(Self::wrong_kind(field, other)),
        }
    }

    pub fn require_proposal(&self) -> Result<&TradeProposal, BlackboardError> {
        match self.require(Field::TradeProposal)? {
            FieldValue::Proposal(p) => Ok(p),
            other => Err(Self::wrong_kind(Field::TradeProposal, other)),
        }
    }

    pub fn require_risk(&self) -> Result<&RiskAssessment, BlackboardError> {
        match self.require(Field::RiskAssessment)? {
            FieldValue::Risk(r) => Ok(r),
            other => Err(Self::wrong_kind(Field::RiskAssessment, other)),
        }
    }

    pub fn require_decision(&self) -> Result<&Decision, BlackboardError> {
        match self.require(Field::FinalDecision)? {
            FieldValue::Decision(d) => Ok(d),
            other => Err(Self::wrong_kind(Field::FinalDecision, other)),
        }
    }

    pub fn require_signal(&self) -> Result<Signal, BlackboardError> {
        match self.require(Field::Signal)? {
            FieldValue::Signal(s) => Ok(*s),
            other => Err(Self::wrong_kind(Field::Signal, other)),
        }
    }

    /// Analyst reports that were produced, keyed by field name.
    pub fn analyst_reports(&self) -> serde_json::Map<String, serde_json::Value> {
        Field::ANALYST_REPORTS
            .iter()
            .filter_map(|f| {
                self.text(*f)
                    .map(|t| (f.as_str().to_string(), serde_json::Value::String(t.to_string())))
            })
            .collect()
    }
}
