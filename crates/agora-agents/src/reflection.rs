use std::sync::Arc;

use agora_memory::{MemoryError, MemoryStore};
use agora_models::{Blackboard, BlackboardError, Field, Outcome, ReflectionRecord, Role, WorkflowRun};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::invoker::AgentInvoker;
use crate::prompts;

/// Turns finished runs into lessons and serves them back to later runs.
pub struct Reflector {
    invoker: AgentInvoker,
    store: Arc<dyn MemoryStore>,
}

impl Reflector {
    pub fn new(invoker: AgentInvoker, store: Arc<dyn MemoryStore>) -> Self {
        Self { invoker, store }
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// Up to `k` past reflections for `ticker`, most recent first.
    pub async fn recall(&self, ticker: &str, k: usize) -> Result<Vec<ReflectionRecord>, MemoryError> {
        self.store.get(ticker, k).await
    }

    /// Build the reflection record for a run holding a decision and a signal.
    ///
    /// The lesson comes from the reflector role; when that call fails a
    /// deterministic lesson is used instead.
    pub async fn reflect(&self, run: &WorkflowRun) -> Result<ReflectionRecord, BlackboardError> {
        let board = run.blackboard();
        let decision = board.require_decision()?.clone();
        let signal = board.require_signal()?;
        let now = Utc::now();

        let mut record = ReflectionRecord {
            ticker: run.ticker().to_string(),
            run_id: run.run_id(),
            as_of: run.as_of(),
            decision,
            signal,
            situation: situation_digest(board),
            outcome: None,
            lesson: String::new(),
            created_at: now,
            updated_at: now,
        };

        let context = serde_json::json!({
            "ticker": record.ticker,
            "as_of": record.as_of,
            "situation": record.situation,
            "research_summary": board.text(Field::ResearchSummary),
            "trade_proposal": board.require_proposal().ok(),
            "risk_verdict": board.require_risk().ok().map(|r| r.verdict.as_str()),
            "decision": record.decision.text,
            "signal": record.signal,
        });
        record.lesson = match self
            .invoker
            .invoke(Role::Reflector, None, &prompts::reflection_task(run.ticker()), &context)
            .await
        {
            Ok(message) => message.content().to_string(),
            Err(e) => {
                warn!(run_id = %run.run_id(), error = %e, "Reflector failed, using fallback lesson");
                fallback_lesson(&record)
            }
        };
        Ok(record)
    }

    /// Attach a later-observed outcome to a stored reflection and re-derive
    /// its lesson in light of it.
    pub async fn record_outcome(
        &self,
        ticker: &str,
        run_id: Uuid,
        outcome: Outcome,
    ) -> Result<ReflectionRecord, MemoryError> {
        let updated = self
            .store
            .record_outcome(ticker, run_id, outcome.clone(), None)
            .await?;

        let context = serde_json::json!({
            "ticker": updated.ticker,
            "as_of": updated.as_of,
            "situation": updated.situation,
            "decision": updated.decision.text,
            "signal": updated.signal,
            "previous_lesson": updated.lesson,
            "outcome": updated.outcome,
            "correct": updated.was_correct(),
        });
        let lesson = match self
            .invoker
            .invoke(Role::Reflector, None, &prompts::reflection_task(ticker), &context)
            .await
        {
            Ok(message) => message.content().to_string(),
            Err(e) => {
                warn!(%run_id, error = %e, "Reflector failed on outcome, using fallback lesson");
                fallback_lesson(&updated)
            }
        };

        let record = self
            .store
            .record_outcome(ticker, run_id, outcome, Some(lesson))
            .await?;
        info!(ticker, %run_id, correct = ?record.was_correct(), "Outcome recorded");
        Ok(record)
    }
}

/// The analyst reports a decision was made on, one `field: report` block each.
pub fn situation_digest(board: &Blackboard) -> String {
    Field::ANALYST_REPORTS
        .iter()
        .filter_map(|field| board.text(*field).map(|text| format!("{field}: {text}")))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Lesson used when the reflector cannot be reached.
pub fn fallback_lesson(record: &ReflectionRecord) -> String {
    let verdict = record
        .decision
        .recommendation
        .as_deref()
        .unwrap_or("no explicit recommendation");
    let head = format!(
        "{} on {} as of {} ({verdict}).",
        record.signal, record.ticker, record.as_of
    );
    match (&record.outcome, record.was_correct()) {
        (Some(outcome), Some(true)) => format!(
            "{head} Realized return {} confirmed the call; weight similar setups the same way.",
            outcome.realized_return
        ),
        (Some(outcome), _) => format!(
            "{head} Realized return {} went against the call; discount similar setups.",
            outcome.realized_return
        ),
        (None, _) => format!("{head} Outcome not yet observed."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::RetryPolicy;
    use crate::test_support::ScriptedReasoner;
    use agora_memory::InMemoryStore;
    use agora_models::{Decision, FieldValue, RunState, Signal};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn reflector(reasoner: ScriptedReasoner) -> Reflector {
        let invoker = AgentInvoker::new(
            Arc::new(reasoner),
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
            },
            Duration::from_secs(1),
        );
        Reflector::new(invoker, Arc::new(InMemoryStore::new()))
    }

    fn decided_run() -> WorkflowRun {
        let mut run = WorkflowRun::new(
            Uuid::new_v4(),
            "NVDA",
            NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            serde_json::json!({}),
        );
        run.advance(RunState::Analyzing).unwrap();
        let board = run.blackboard_mut().unwrap();
        board
            .write(Field::TechnicalReport, FieldValue::Text("RSI 71".into()))
            .unwrap();
        board
            .write(
                Field::FinalDecision,
                FieldValue::Decision(Decision::new(
                    "Overbought.\nFinal Recommendation: SELL",
                    Some("SELL".to_string()),
                )),
            )
            .unwrap();
        board.write(Field::Signal, FieldValue::Signal(Signal::Sell)).unwrap();
        run
    }

    #[tokio::test]
    async fn reflect_uses_reflector_lesson() {
        let reflector = reflector(ScriptedReasoner::new().reply(Role::Reflector, "Trim into strength."));
        let record = reflector.reflect(&decided_run()).await.unwrap();
        assert_eq!(record.lesson, "Trim into strength.");
        assert_eq!(record.signal, Signal::Sell);
        assert_eq!(record.situation, "technical_report: RSI 71");
        assert!(record.outcome.is_none());
    }

    #[tokio::test]
    async fn reflect_falls_back_when_reflector_fails() {
        let reflector = reflector(ScriptedReasoner::new().permanent(Role::Reflector, "refused"));
        let record = reflector.reflect(&decided_run()).await.unwrap();
        assert!(record.lesson.starts_with("SELL on NVDA as of 2026-01-05 (SELL)."));
        assert!(record.lesson.ends_with("Outcome not yet observed."));
    }

    #[tokio::test]
    async fn reflect_requires_a_decision() {
        let reflector = reflector(ScriptedReasoner::new());
        let run = WorkflowRun::new(
            Uuid::new_v4(),
            "NVDA",
            NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            serde_json::json!({}),
        );
        let err = reflector.reflect(&run).await.unwrap_err();
        assert_eq!(err, BlackboardError::Missing(Field::FinalDecision));
    }

    #[tokio::test]
    async fn outcome_rederives_the_lesson() {
        let reflector = reflector(
            ScriptedReasoner::new()
                .reply(Role::Reflector, "first lesson")
                .reply(Role::Reflector, "The sell was vindicated."),
        );
        let run = decided_run();
        let record = reflector.reflect(&run).await.unwrap();
        reflector.store().put(record).await.unwrap();

        let outcome = Outcome {
            realized_return: dec!(-0.06),
            note: Some("guidance cut".to_string()),
            observed_at: Utc::now(),
        };
        let updated = reflector
            .record_outcome("NVDA", run.run_id(), outcome)
            .await
            .unwrap();
        assert_eq!(updated.lesson, "The sell was vindicated.");
        assert_eq!(updated.was_correct(), Some(true));

        let recalled = reflector.recall("NVDA", 3).await.unwrap();
        assert_eq!(recalled.len(), 1);
        assert_eq!(recalled[0].lesson, "The sell was vindicated.");
    }

    #[tokio::test]
    async fn outcome_fallback_mentions_the_return() {
        let reflector = reflector(
            ScriptedReasoner::new()
                .reply(Role::Reflector, "first lesson")
                .permanent(Role::Reflector, "refused"),
        );
        let run = decided_run();
        let record = reflector.reflect(&run).await.unwrap();
        reflector.store().put(record).await.unwrap();

        let outcome = Outcome {
            realized_return: dec!(0.04),
            note: None,
            observed_at: Utc::now(),
        };
        let updated = reflector
            .record_outcome("NVDA", run.run_id(), outcome)
            .await
            .unwrap();
        assert!(updated.lesson.contains("0.04 went against the call"));
    }

    #[tokio::test]
    async fn outcome_for_unknown_run_fails() {
        let reflector = reflector(ScriptedReasoner::new());
        let outcome = Outcome {
            realized_return: dec!(0.01),
            note: None,
            observed_at: Utc::now(),
        };
        let err = reflector
            .record_outcome("NVDA", Uuid::new_v4(), outcome)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { .. }));
    }
}
