use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::{Decision, Signal};

/// A later-observed market outcome for a past decision, supplied out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outcome {
    /// Realized return over the holding period as a fraction (0.034 = +3.4%).
    pub realized_return: Decimal,
    pub note: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Post-hoc lesson for one finished run. Append-only: records are updated
/// with outcomes but never removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReflectionRecord {
    pub ticker: String,
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub decision: Decision,
    pub signal: Signal,
    /// Digest of the analyst reports the decision was made on.
    pub situation: String,
    pub outcome: Option<Outcome>,
    pub lesson: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReflectionRecord {
    /// Was the signal right in hindsight? `None` until an outcome arrives.
    pub fn was_correct(&self) -> Option<bool> {
        let outcome = self.outcome.as_ref()?;
        Some(match self.signal {
            Signal::Buy => outcome.realized_return > Decimal::ZERO,
            Signal::Sell => outcome.realized_return < Decimal::ZERO,
            Signal::Hold => outcome.realized_return.abs() < Decimal::new(2, 2),
        })
    }

    /// Compact form injected into later prompts.
    pub fn as_context(&self) -> serde_json::Value {
        serde_json::json!({
            "as_of": self.as_of,
            "signal": self.signal,
            "lesson": self.lesson,
            "realized_return": self.outcome.as_ref().map(|o| o.realized_return),
            "correct": self.was_correct(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(signal: Signal, realized: Option<Decimal>) -> ReflectionRecord {
        let now = Utc::now();
        ReflectionRecord {
            ticker: "AAPL".to_string(),
            run_id: Uuid::new_v4(),
            as_of: NaiveDate::from_ymd_opt(2026, 2, 2).unwrap(),
            decision: Decision::new("Final Recommendation: BUY", None),
            signal,
            situation: "technical_report: RSI 28".to_string(),
            outcome: realized.map(|r| Outcome {
                realized_return: r,
                note: None,
                observed_at: now,
            }),
            lesson: "Oversold bounces worked".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn correctness_depends_on_signal_direction() {
        assert_eq!(record(Signal::Buy, Some(dec!(0.05))).was_correct(), Some(true));
        assert_eq!(record(Signal::Sell, Some(dec!(0.05))).was_correct(), Some(false));
        assert_eq!(record(Signal::Hold, Some(dec!(0.01))).was_correct(), Some(true));
        assert_eq!(record(Signal::Hold, Some(dec!(-0.04))).was_correct(), Some(false));
        assert_eq!(record(Signal::Buy, None).was_correct(), None);
    }

    #[test]
    fn context_form_is_compact() {
        let ctx = record(Signal::Sell, Some(dec!(-0.03))).as_context();
        assert_eq!(ctx["signal"], "SELL");
        assert_eq!(ctx["correct"], true);
        assert_eq!(ctx["realized_return"], "-0.03");
        assert!(ctx.get("situation").is_none());
    }

    #[test]
    fn roundtrip_record() {
        let rec = record(Signal::Buy, Some(dec!(0.034)));
        let json = serde_json::to_string(&rec).unwrap();
        let back: ReflectionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }
}
