use serde::{Deserialize, Serialize};

use crate::blackboard::Field;
use crate::run::RunState;

/// The closed set of stages a deliberation run is built from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Analysts,
    ResearchDebate,
    ResearchManager,
    Trader,
    RiskDebate,
    PortfolioManager,
    SignalExtraction,
    Reflection,
}

impl StageKind {
    /// Stages in their canonical pipeline order.
    pub const PIPELINE: [StageKind; 8] = [
        StageKind::Analysts,
        StageKind::ResearchDebate,
        StageKind::ResearchManager,
        StageKind::Trader,
        StageKind::RiskDebate,
        StageKind::PortfolioManager,
        StageKind::SignalExtraction,
        StageKind::Reflection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Analysts => "analysts",
            StageKind::ResearchDebate => "research_debate",
            StageKind::ResearchManager => "research_manager",
            StageKind::Trader => "trader",
            StageKind::RiskDebate => "risk_debate",
            StageKind::PortfolioManager => "portfolio_manager",
            StageKind::SignalExtraction => "signal_extraction",
            StageKind::Reflection => "reflection",
        }
    }

    /// Run state while this stage executes.
    pub fn state(&self) -> RunState {
        match self {
            StageKind::Analysts => RunState::Analyzing,
            StageKind::ResearchDebate | StageKind::ResearchManager => RunState::DebatingResearch,
            StageKind::Trader => RunState::Trading,
            StageKind::RiskDebate => RunState::DebatingRisk,
            StageKind::PortfolioManager => RunState::Deciding,
            StageKind::SignalExtraction => RunState::ExtractingSignal,
            StageKind::Reflection => RunState::Reflecting,
        }
    }

    /// Fields that must be on the blackboard before the stage may start.
    pub fn requires(&self) -> &'static [Field] {
        match self {
            StageKind::Analysts | StageKind::ResearchDebate => &[],
            StageKind::ResearchManager => {
                &[Field::ResearchDebate, Field::BullCase, Field::BearCase]
            }
            StageKind::Trader => &[Field::ResearchSummary],
            StageKind::RiskDebate => &[Field::TradeProposal, Field::ResearchSummary],
            StageKind::PortfolioManager => &[
                Field::ResearchSummary,
                Field::TradeProposal,
                Field::RiskAssessment,
            ],
            StageKind::SignalExtraction => &[Field::FinalDecision],
            StageKind::Reflection => &[Field::FinalDecision, Field::Signal],
        }
    }

    /// Fields this stage owns. No other stage may write them.
    pub fn writes(&self) -> &'static [Field] {
        match self {
            StageKind::Analysts => &Field::ANALYST_REPORTS,
            StageKind::ResearchDebate => &[Field::ResearchDebate, Field::BullCase, Field::BearCase],
            StageKind::ResearchManager => &[Field::ResearchSummary],
            StageKind::Trader => &[Field::TradeProposal],
            StageKind::RiskDebate => &[Field::RiskDebate, Field::RiskAssessment],
            StageKind::PortfolioManager => &[Field::FinalDecision],
            StageKind::SignalExtraction => &[Field::Signal],
            StageKind::Reflection => &[Field::Reflection],
        }
    }

    pub fn owns(&self, field: Field) -> bool {
        self.writes().contains(&field)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_field_has_exactly_one_owner() {
        let mut seen = HashSet::new();
        for stage in StageKind::PIPELINE {
            for field in stage.writes() {
                assert!(seen.insert(*field), "{field} owned twice");
            }
        }
        assert_eq!(seen.len(), 14);
    }

    #[test]
    fn requirements_are_written_by_earlier_stages() {
        let mut available: HashSet<Field> = HashSet::new();
        for stage in StageKind::PIPELINE {
            for field in stage.requires() {
                assert!(available.contains(field), "{stage} requires unwritten {field}");
            }
            available.extend(stage.writes().iter().copied());
        }
    }

    #[test]
    fn pipeline_states_never_go_backwards() {
        let states: Vec<RunState> = StageKind::PIPELINE.iter().map(|s| s.state()).collect();
        for pair in states.windows(2) {
            assert!(pair[0] == pair[1] || pair[0].can_transition_to(pair[1]));
        }
    }
}
