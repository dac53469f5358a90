use std::collections::HashMap;
use std::sync::Arc;

use agora_models::{RunOutcome, RunState, WorkflowRun};
use chrono::NaiveDate;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::orchestrator::Orchestrator;

struct Finished {
    run: WorkflowRun,
    result: Result<RunOutcome, String>,
}

struct RunSlot {
    state: watch::Receiver<RunState>,
    cancel: CancellationToken,
    finished: Option<Finished>,
}

/// Runs deliberations in the background and answers status queries.
///
/// A run's terminal state is published only after its result is stored, so a
/// caller that observes `DONE` or `FAILED` can always fetch the result.
#[derive(Clone)]
pub struct RunService {
    orchestrator: Arc<Orchestrator>,
    runs: Arc<RwLock<HashMap<Uuid, RunSlot>>>,
}

impl RunService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a run and return its id immediately.
    pub async fn start_run(
        &self,
        ticker: &str,
        as_of: NaiveDate,
        initial_context: serde_json::Value,
    ) -> Uuid {
        let run_id = Uuid::new_v4();
        let (progress, state) = watch::channel(RunState::Pending);
        let cancel = CancellationToken::new();
        self.runs.write().await.insert(
            run_id,
            RunSlot {
                state,
                cancel: cancel.clone(),
                finished: None,
            },
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        let runs = Arc::clone(&self.runs);
        let mut run = WorkflowRun::new(run_id, ticker, as_of, initial_context);
        tokio::spawn(async move {
            let result = orchestrator
                .execute(&mut run, &cancel, &progress)
                .await
                .map_err(|e| e.to_string());
            let state = run.state();
            if let Some(slot) = runs.write().await.get_mut(&run_id) {
                slot.finished = Some(Finished { run, result });
            }
            progress.send_replace(state);
        });

        info!(%run_id, ticker, "Run started");
        run_id
    }

    /// Current state. Never blocks on the run itself.
    pub async fn status(&self, run_id: Uuid) -> Result<RunState, ServiceError> {
        let runs = self.runs.read().await;
        let slot = runs.get(&run_id).ok_or(ServiceError::UnknownRun(run_id))?;
        let state = *slot.state.borrow();
        Ok(state)
    }

    /// Decision and signal of a run that reached `DONE`.
    pub async fn result(&self, run_id: Uuid) -> Result<RunOutcome, ServiceError> {
        let runs = self.runs.read().await;
        let slot = runs.get(&run_id).ok_or(ServiceError::UnknownRun(run_id))?;
        match &slot.finished {
            Some(Finished { result: Ok(outcome), .. }) => Ok(outcome.clone()),
            Some(Finished { result: Err(reason), .. }) => Err(ServiceError::Failed {
                run_id,
                reason: reason.clone(),
            }),
            None => Err(ServiceError::NotFinished {
                run_id,
                state: *slot.state.borrow(),
            }),
        }
    }

    /// Full record of a finished run: blackboard, audit trail, failure.
    pub async fn snapshot(&self, run_id: Uuid) -> Result<WorkflowRun, ServiceError> {
        let runs = self.runs.read().await;
        let slot = runs.get(&run_id).ok_or(ServiceError::UnknownRun(run_id))?;
        match &slot.finished {
            Some(finished) => Ok(finished.run.clone()),
            None => Err(ServiceError::NotFinished {
                run_id,
                state: *slot.state.borrow(),
            }),
        }
    }

    /// Ask a live run to stop. Cancelling a finished run does nothing.
    pub async fn cancel(&self, run_id: Uuid) -> Result<(), ServiceError> {
        let runs = self.runs.read().await;
        let slot = runs.get(&run_id).ok_or(ServiceError::UnknownRun(run_id))?;
        if slot.finished.is_none() {
            warn!(%run_id, "Cancelling run");
            slot.cancel.cancel();
        }
        Ok(())
    }

    /// Drop a finished run and hand back its record. Live runs stay tracked.
    pub async fn forget(&self, run_id: Uuid) -> Result<WorkflowRun, ServiceError> {
        let mut runs = self.runs.write().await;
        let slot = runs.get(&run_id).ok_or(ServiceError::UnknownRun(run_id))?;
        if slot.finished.is_none() {
            return Err(ServiceError::NotFinished {
                run_id,
                state: *slot.state.borrow(),
            });
        }
        let finished = runs
            .remove(&run_id)
            .and_then(|slot| slot.finished)
            .ok_or(ServiceError::UnknownRun(run_id))?;
        info!(%run_id, tracked = runs.len(), "Run forgotten");
        Ok(finished.run)
    }

    pub async fn tracked(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Wait until the run reaches a terminal state and return it.
    pub async fn wait(&self, run_id: Uuid) -> Result<RunState, ServiceError> {
        let mut state = {
            let runs = self.runs.read().await;
            let slot = runs.get(&run_id).ok_or(ServiceError::UnknownRun(run_id))?;
            slot.state.clone()
        };
        let reached = state
            .wait_for(|s| s.is_terminal())
            .await
            .map(|s| *s)
            .ok();
        Ok(reached.unwrap_or_else(|| *state.borrow()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::{Analyst, StaticFeed};
    use crate::test_support::ScriptedReasoner;
    use agora_memory::InMemoryStore;
    use agora_models::{AgoraConfig, Role, Signal};
    use std::time::Duration;

    fn service(reasoner: ScriptedReasoner) -> RunService {
        let mut config = AgoraConfig::default();
        config.agents.retry_base_delay_ms = 1;
        let analysts = vec![Analyst::new(
            Role::MarketAnalyst,
            Arc::new(StaticFeed::empty()),
        )];
        let orchestrator = Orchestrator::new(
            Arc::new(reasoner),
            analysts,
            Arc::new(InMemoryStore::new()),
            config,
        )
        .unwrap();
        RunService::new(Arc::new(orchestrator))
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    #[tokio::test]
    async fn finished_run_exposes_result_and_snapshot() {
        let service = service(ScriptedReasoner::new());
        let run_id = service.start_run("AAPL", as_of(), serde_json::json!({})).await;

        assert_eq!(service.wait(run_id).await.unwrap(), RunState::Done);
        assert_eq!(service.status(run_id).await.unwrap(), RunState::Done);
        let outcome = service.result(run_id).await.unwrap();
        assert_eq!(outcome.signal, Signal::Hold);

        let snapshot = service.snapshot(run_id).await.unwrap();
        assert_eq!(snapshot.ticker(), "AAPL");
        assert!(snapshot.blackboard().is_sealed());
    }

    #[tokio::test]
    async fn live_run_is_not_finished() {
        let service = service(ScriptedReasoner::new().delay(
            Role::MarketAnalyst,
            Duration::from_millis(300),
            "slow report",
        ));
        let run_id = service.start_run("AAPL", as_of(), serde_json::json!({})).await;

        let err = service.result(run_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFinished { .. }));
        let err = service.snapshot(run_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFinished { .. }));

        service.wait(run_id).await.unwrap();
        assert!(service.result(run_id).await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_run_fails() {
        let service = service(ScriptedReasoner::new().hang(Role::MarketAnalyst));
        let run_id = service.start_run("AAPL", as_of(), serde_json::json!({})).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        service.cancel(run_id).await.unwrap();
        assert_eq!(service.wait(run_id).await.unwrap(), RunState::Failed);

        let err = service.result(run_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Failed { .. }));
        let snapshot = service.snapshot(run_id).await.unwrap();
        assert!(snapshot.failure().is_some_and(|r| r.contains("cancelled")));
    }

    #[tokio::test]
    async fn forgetting_releases_finished_runs_only() {
        let service = service(ScriptedReasoner::new().delay(
            Role::MarketAnalyst,
            Duration::from_millis(300),
            "slow report",
        ));
        let run_id = service.start_run("AAPL", as_of(), serde_json::json!({})).await;
        assert!(matches!(
            service.forget(run_id).await,
            Err(ServiceError::NotFinished { .. })
        ));
        assert_eq!(service.tracked().await, 1);

        service.wait(run_id).await.unwrap();
        let record = service.forget(run_id).await.unwrap();
        assert_eq!(record.run_id(), run_id);
        assert_eq!(record.state(), RunState::Done);
        assert_eq!(service.tracked().await, 0);
        assert!(matches!(
            service.status(run_id).await,
            Err(ServiceError::UnknownRun(_))
        ));
    }

    #[tokio::test]
    async fn unknown_run_is_rejected() {
        let service = service(ScriptedReasoner::new());
        let id = Uuid::new_v4();
        assert!(matches!(
            service.status(id).await,
            Err(ServiceError::UnknownRun(_))
        ));
        assert!(matches!(service.cancel(id).await, Err(ServiceError::UnknownRun(_))));
        assert!(matches!(service.wait(id).await, Err(ServiceError::UnknownRun(_))));
        assert!(matches!(service.forget(id).await, Err(ServiceError::UnknownRun(_))));
    }
}
