use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blackboard::Field;

/// Every agent role that takes part in a deliberation run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    MarketAnalyst,
    SocialAnalyst,
    NewsAnalyst,
    FundamentalsAnalyst,
    BullResearcher,
    BearResearcher,
    ResearchManager,
    Trader,
    RiskyAnalyst,
    SafeAnalyst,
    NeutralAnalyst,
    RiskJudge,
    PortfolioManager,
    ConvergenceJudge,
    Reflector,
}

/// Which model class a role runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Fast, cheap model for data digestion and debate turns.
    Quick,
    /// Stronger model for synthesis and judgement.
    Deep,
}

impl Role {
    pub const ANALYSTS: [Role; 4] = [
        Role::MarketAnalyst,
        Role::SocialAnalyst,
        Role::NewsAnalyst,
        Role::FundamentalsAnalyst,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::MarketAnalyst => "market_analyst",
            Role::SocialAnalyst => "social_analyst",
            Role::NewsAnalyst => "news_analyst",
            Role::FundamentalsAnalyst => "fundamentals_analyst",
            Role::BullResearcher => "bull_researcher",
            Role::BearResearcher => "bear_researcher",
            Role::ResearchManager => "research_manager",
            Role::Trader => "trader",
            Role::RiskyAnalyst => "risky_analyst",
            Role::SafeAnalyst => "safe_analyst",
            Role::NeutralAnalyst => "neutral_analyst",
            Role::RiskJudge => "risk_judge",
            Role::PortfolioManager => "portfolio_manager",
            Role::ConvergenceJudge => "convergence_judge",
            Role::Reflector => "reflector",
        }
    }

    pub fn is_analyst(&self) -> bool {
        self.report_field().is_some()
    }

    /// Blackboard field an analyst role reports into.
    pub fn report_field(&self) -> Option<Field> {
        match self {
            Role::MarketAnalyst => Some(Field::TechnicalReport),
            Role::SocialAnalyst => Some(Field::SentimentReport),
            Role::NewsAnalyst => Some(Field::NewsReport),
            Role::FundamentalsAnalyst => Some(Field::FundamentalsReport),
            _ => None,
        }
    }

    pub fn tier(&self) -> ModelTier {
        match self {
            Role::ResearchManager
            | Role::RiskJudge
            | Role::PortfolioManager
            | Role::Reflector => ModelTier::Deep,
            _ => ModelTier::Quick,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role-tagged message produced by one agent invocation.
///
/// Fields are private: a message never changes after the invoker creates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessage {
    role: Role,
    /// 1-based debate round, `None` outside a debate loop.
    round: Option<u32>,
    content: String,
    timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(role: Role, round: Option<u32>, content: impl Into<String>) -> Self {
        Self {
            role,
            round,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn round(&self) -> Option<u32> {
        self.round
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// `"bull_researcher: <content>"`, the form debate transcripts are rendered in.
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.role, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Role::PortfolioManager).unwrap(),
            "\"portfolio_manager\""
        );
        let parsed: Role = serde_json::from_str("\"bear_researcher\"").unwrap();
        assert_eq!(parsed, Role::BearResearcher);
    }

    #[test]
    fn display_matches_serde_name() {
        for role in Role::ANALYSTS {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json.trim_matches('"'), role.to_string());
        }
    }

    #[test]
    fn only_analysts_have_report_fields() {
        assert_eq!(
            Role::MarketAnalyst.report_field(),
            Some(Field::TechnicalReport)
        );
        assert!(Role::NewsAnalyst.is_analyst());
        assert!(!Role::Trader.is_analyst());
        assert!(Role::BullResearcher.report_field().is_none());
    }

    #[test]
    fn managers_run_on_deep_tier() {
        assert_eq!(Role::PortfolioManager.tier(), ModelTier::Deep);
        assert_eq!(Role::ResearchManager.tier(), ModelTier::Deep);
        assert_eq!(Role::BullResearcher.tier(), ModelTier::Quick);
        assert_eq!(Role::ConvergenceJudge.tier(), ModelTier::Quick);
    }

    #[test]
    fn transcript_line_is_role_tagged() {
        let msg = AgentMessage::new(Role::BullResearcher, Some(1), "Margins are expanding");
        assert_eq!(msg.transcript_line(), "bull_researcher: Margins are expanding");
        assert_eq!(msg.round(), Some(1));
    }
}
