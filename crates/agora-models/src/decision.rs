use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::agent_message::Role;
use crate::debate::DebateStatus;

/// The bounded trading signal derived from a portfolio manager decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    #[serde(alias = "buy", alias = "Buy")]
    Buy,
    #[serde(alias = "sell", alias = "Sell")]
    Sell,
    #[serde(alias = "hold", alias = "Hold")]
    Hold,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::Hold => "HOLD",
        }
    }

    /// Case-insensitive match of a single word.
    pub fn from_keyword(word: &str) -> Option<Self> {
        if word.eq_ignore_ascii_case("buy") {
            Some(Signal::Buy)
        } else if word.eq_ignore_ascii_case("sell") {
            Some(Signal::Sell)
        } else if word.eq_ignore_ascii_case("hold") {
            Some(Signal::Hold)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured recommendation produced by the trader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeProposal {
    pub action: Signal,
    /// 0.0 to 1.0 conviction in the proposed action.
    pub conviction: Decimal,
    /// Suggested position size as a percentage of the portfolio.
    #[serde(default)]
    pub position_size_pct: Option<Decimal>,
    pub rationale: String,
}

/// One risk perspective's closing argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskOpinion {
    pub role: Role,
    pub opinion: String,
}

/// Outcome of the risk debate, consumed by the portfolio manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub perspectives: Vec<RiskOpinion>,
    /// The risk judge's synthesized verdict.
    pub verdict: String,
    pub debate_status: DebateStatus,
}

impl RiskAssessment {
    pub fn opinion_of(&self, role: Role) -> Option<&str> {
        self.perspectives
            .iter()
            .find(|p| p.role == role)
            .map(|p| p.opinion.as_str())
    }
}

/// The portfolio manager's decision. Never modified once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    /// Full free-form rationale as returned by the manager.
    pub text: String,
    /// The anchored verdict line, when the manager wrote one.
    pub recommendation: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(text: impl Into<String>, recommendation: Option<String>) -> Self {
        Self {
            text: text.into(),
            recommendation,
            decided_at: Utc::now(),
        }
    }
}

/// What a finished run hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunOutcome {
    pub decision: Decision,
    pub signal: Signal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signal_serializes_uppercase_and_accepts_lowercase() {
        assert_eq!(serde_json::to_string(&Signal::Sell).unwrap(), "\"SELL\"");
        let parsed: Signal = serde_json::from_str("\"buy\"").unwrap();
        assert_eq!(parsed, Signal::Buy);
    }

    #[test]
    fn keyword_matching_ignores_case() {
        assert_eq!(Signal::from_keyword("Hold"), Some(Signal::Hold));
        assert_eq!(Signal::from_keyword("SELL"), Some(Signal::Sell));
        assert_eq!(Signal::from_keyword("buyback"), None);
    }

    #[test]
    fn trade_proposal_from_trader_json() {
        let json = r#"{
            "action": "buy",
            "conviction": "0.70",
            "position_size_pct": "5",
            "rationale": "Momentum plus improving margins"
        }"#;
        let proposal: TradeProposal = serde_json::from_str(json).unwrap();
        assert_eq!(proposal.action, Signal::Buy);
        assert_eq!(proposal.conviction, dec!(0.70));
        assert_eq!(proposal.position_size_pct, Some(dec!(5)));
    }

    #[test]
    fn trade_proposal_size_is_optional() {
        let json = r#"{"action": "HOLD", "conviction": "0.4", "rationale": "mixed"}"#;
        let proposal: TradeProposal = serde_json::from_str(json).unwrap();
        assert!(proposal.position_size_pct.is_none());
    }

    #[test]
    fn risk_assessment_lookup_by_role() {
        let assessment = RiskAssessment {
            perspectives: vec![
                RiskOpinion {
                    role: Role::RiskyAnalyst,
                    opinion: "Size up".to_string(),
                },
                RiskOpinion {
                    role: Role::SafeAnalyst,
                    opinion: "Halve it".to_string(),
                },
            ],
            verdict: "Moderate size".to_string(),
            debate_status: DebateStatus::NotConverged,
        };
        assert_eq!(assessment.opinion_of(Role::SafeAnalyst), Some("Halve it"));
        assert!(assessment.opinion_of(Role::NeutralAnalyst).is_none());
    }
}
