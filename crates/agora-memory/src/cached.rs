use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use agora_models::reflection::{Outcome, ReflectionRecord};
use async_trait::async_trait;
use moka::future::Cache;
use tracing::debug;
use uuid::Uuid;

use crate::error::MemoryError;
use crate::store::MemoryStore;

/// Read-through recall cache: moka (hot) then the backing store.
///
/// Each ticker caches its `depth` most recent records. Requests for more than
/// that bypass the cache unless the ticker has fewer records than `depth`.
/// Every write bumps the ticker's write generation and invalidates its entry.
/// A read only promotes its result if no write to that ticker landed while
/// it was in flight.
pub struct CachedStore<S> {
    inner: S,
    hot: Cache<String, Arc<Vec<ReflectionRecord>>>,
    depth: usize,
    generations: Mutex<HashMap<String, u64>>,
}

impl<S: MemoryStore> CachedStore<S> {
    pub fn new(inner: S, depth: usize, max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            hot: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            depth,
            generations: Mutex::new(HashMap::new()),
        }
    }

    fn generation(&self, ticker: &str) -> u64 {
        let generations = self.generations.lock().unwrap_or_else(PoisonError::into_inner);
        generations.get(ticker).copied().unwrap_or(0)
    }

    /// Must run after the write commits and before the entry is invalidated.
    fn bump(&self, ticker: &str) {
        let mut generations = self.generations.lock().unwrap_or_else(PoisonError::into_inner);
        *generations.entry(ticker.to_string()).or_insert(0) += 1;
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn hot_cache_size(&self) -> u64 {
        self.hot.entry_count()
    }
}

#[async_trait]
impl<S: MemoryStore> MemoryStore for CachedStore<S> {
    async fn get(&self, ticker: &str, k: usize) -> Result<Vec<ReflectionRecord>, MemoryError> {
        if let Some(records) = self.hot.get(ticker).await {
            if k <= records.len() || records.len() < self.depth {
                return Ok(records.iter().take(k).cloned().collect());
            }
        }
        if k > self.depth {
            return self.inner.get(ticker, k).await;
        }

        let seen = self.generation(ticker);
        let records = Arc::new(self.inner.get(ticker, self.depth).await?);
        if self.generation(ticker) != seen {
            debug!(ticker, "Write landed during recall, not caching");
            return Ok(records.iter().take(k).cloned().collect());
        }
        self.hot.insert(ticker.to_string(), records.clone()).await;
        // A write that bumped after the check above may have invalidated
        // before our insert.
        if self.generation(ticker) != seen {
            self.hot.invalidate(ticker).await;
        } else {
            debug!(ticker, cached = records.len(), "Promoted recall to hot cache");
        }
        Ok(records.iter().take(k).cloned().collect())
    }

    async fn put(&self, record: ReflectionRecord) -> Result<(), MemoryError> {
        let ticker = record.ticker.clone();
        let result = self.inner.put(record).await;
        self.bump(&ticker);
        self.hot.invalidate(&ticker).await;
        result
    }

    async fn record_outcome(
        &self,
        ticker: &str,
        run_id: Uuid,
        outcome: Outcome,
        lesson: Option<String>,
    ) -> Result<ReflectionRecord, MemoryError> {
        let result = self
            .inner
            .record_outcome(ticker, run_id, outcome, lesson)
            .await;
        self.bump(ticker);
        self.hot.invalidate(ticker).await;
        result
    }
}
