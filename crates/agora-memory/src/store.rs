use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use agora_models::reflection::{Outcome, ReflectionRecord};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock as TickerLock;
use uuid::Uuid;

use crate::error::MemoryError;

/// Keyed, append-only log of past decisions and the lessons drawn from them.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Up to `k` records for `ticker`, most recent first.
    async fn get(&self, ticker: &str, k: usize) -> Result<Vec<ReflectionRecord>, MemoryError>;

    /// Append a record. A second record for the same run is rejected.
    async fn put(&self, record: ReflectionRecord) -> Result<(), MemoryError>;

    /// Attach a later-observed outcome, optionally replacing the lesson.
    async fn record_outcome(
        &self,
        ticker: &str,
        run_id: Uuid,
        outcome: Outcome,
        lesson: Option<String>,
    ) -> Result<ReflectionRecord, MemoryError>;
}

type TickerLog = Arc<TickerLock<Vec<ReflectionRecord>>>;

/// Process-local store. Writes for one ticker are serialized by that ticker's
/// lock; reads for it proceed concurrently.
#[derive(Default)]
pub struct InMemoryStore {
    tickers: RwLock<HashMap<String, TickerLog>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing_log(&self, ticker: &str) -> Result<Option<TickerLog>, MemoryError> {
        let tickers = self
            .tickers
            .read()
            .map_err(|e| MemoryError::Unavailable(format!("ticker map poisoned: {e}")))?;
        Ok(tickers.get(ticker).cloned())
    }

    fn log_or_insert(&self, ticker: &str) -> Result<TickerLog, MemoryError> {
        if let Some(log) = self.existing_log(ticker)? {
            return Ok(log);
        }
        let mut tickers = self
            .tickers
            .write()
            .map_err(|e| MemoryError::Unavailable(format!("ticker map poisoned: {e}")))?;
        Ok(tickers.entry(ticker.to_string()).or_default().clone())
    }
}

/// Most recent first. Records created at the same instant keep reverse
/// insertion order.
pub(crate) fn most_recent(records: &[ReflectionRecord], k: usize) -> Vec<ReflectionRecord> {
    let mut newest: Vec<&ReflectionRecord> = records.iter().rev().collect();
    newest.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    newest.into_iter().take(k).cloned().collect()
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get(&self, ticker: &str, k: usize) -> Result<Vec<ReflectionRecord>, MemoryError> {
        let Some(log) = self.existing_log(ticker)? else {
            return Ok(Vec::new());
        };
        let records = log.read().await;
        Ok(most_recent(&records, k))
    }

    async fn put(&self, record: ReflectionRecord) -> Result<(), MemoryError> {
        let log = self.log_or_insert(&record.ticker)?;
        let mut records = log.write().await;
        if records.iter().any(|r| r.run_id == record.run_id) {
            return Err(MemoryError::Duplicate(record.run_id));
        }
        records.push(record);
        Ok(())
    }

    async fn record_outcome(
        &self,
        ticker: &str,
        run_id: Uuid,
        outcome: Outcome,
        lesson: Option<String>,
    ) -> Result<ReflectionRecord, MemoryError> {
        let not_found = || MemoryError::NotFound {
            ticker: ticker.to_string(),
            run_id,
        };
        let log = self.existing_log(ticker)?.ok_or_else(not_found)?;
        let mut records = log.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(not_found)?;
        record.outcome = Some(outcome);
        if let Some(lesson) = lesson {
            record.lesson = lesson;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}
