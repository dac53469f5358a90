use std::sync::{Mutex, MutexGuard};

use agora_models::reflection::{Outcome, ReflectionRecord};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::error::MemoryError;
use crate::store::MemoryStore;

const REFLECTIONS_DDL: &str = "
CREATE TABLE IF NOT EXISTS reflections (
    ticker        TEXT NOT NULL,
    run_id        TEXT NOT NULL,
    as_of         TEXT NOT NULL,
    record_json   TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (ticker, run_id)
);
CREATE INDEX IF NOT EXISTS idx_reflections_recency
    ON reflections (ticker, created_at_ms DESC);
";

/// SQLite-backed reflection log.
///
/// `rusqlite::Connection` is not `Sync`, so access goes through a `Mutex`.
/// Statements are short and never held across an await point.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` in WAL mode.
    pub fn open(path: &str) -> Result<Self, MemoryError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; \
             PRAGMA synchronous=NORMAL; \
             PRAGMA busy_timeout=5000;",
        )?;
        conn.execute_batch(REFLECTIONS_DDL)?;
        debug!(path, "Opened reflection store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database with the schema applied. Used by tests.
    pub fn open_in_memory() -> Result<Self, MemoryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(REFLECTIONS_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, MemoryError> {
        self.conn
            .lock()
            .map_err(|e| MemoryError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    fn recent(&self, ticker: &str, k: usize) -> Result<Vec<ReflectionRecord>, MemoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT record_json FROM reflections WHERE ticker = ?1 \
             ORDER BY created_at_ms DESC, rowid DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(k).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(rusqlite::params![ticker, limit], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(MemoryError::from))
            .collect()
    }

    fn insert(&self, record: &ReflectionRecord) -> Result<(), MemoryError> {
        let json = serde_json::to_string(record)?;
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO reflections \
             (ticker, run_id, as_of, record_json, created_at_ms, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                record.ticker,
                record.run_id.to_string(),
                record.as_of.to_string(),
                json,
                record.created_at.timestamp_millis(),
                record.updated_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(MemoryError::Duplicate(record.run_id))
            }
            Err(e) => Err(MemoryError::Sqlite(e)),
        }
    }

    fn update_outcome(
        &self,
        ticker: &str,
        run_id: Uuid,
        outcome: Outcome,
        lesson: Option<String>,
    ) -> Result<ReflectionRecord, MemoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let json: Option<String> = tx
            .query_row(
                "SELECT record_json FROM reflections WHERE ticker = ?1 AND run_id = ?2",
                rusqlite::params![ticker, run_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let json = json.ok_or_else(|| MemoryError::NotFound {
            ticker: ticker.to_string(),
            run_id,
        })?;

        let mut record: ReflectionRecord = serde_json::from_str(&json)?;
        record.outcome = Some(outcome);
        if let Some(lesson) = lesson {
            record.lesson = lesson;
        }
        record.updated_at = Utc::now();

        tx.execute(
            "UPDATE reflections SET record_json = ?1, updated_at = ?2 \
             WHERE ticker = ?3 AND run_id = ?4",
            rusqlite::params![
                serde_json::to_string(&record)?,
                record.updated_at.to_rfc3339(),
                ticker,
                run_id.to_string(),
            ],
        )?;
        tx.commit()?;
        Ok(record)
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn get(&self, ticker: &str, k: usize) -> Result<Vec<ReflectionRecord>, MemoryError> {
        self.recent(ticker, k)
    }

    async fn put(&self, record: ReflectionRecord) -> Result<(), MemoryError> {
        self.insert(&record)
    }

    async fn record_outcome(
        &self,
        ticker: &str,
        run_id: Uuid,
        outcome: Outcome,
        lesson: Option<String>,
    ) -> Result<ReflectionRecord, MemoryError> {
        self.update_outcome(ticker, run_id, outcome, lesson)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::make_record;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn put_then_get_most_recent_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(make_record("NVDA", 20, "older")).await.unwrap();
        store.put(make_record("NVDA", 2, "newer")).await.unwrap();
        store.put(make_record("MSFT", 0, "elsewhere")).await.unwrap();

        let recalled = store.get("NVDA", 5).await.unwrap();
        assert_eq!(recalled.len(), 2);
        assert_eq!(recalled[0].lesson, "newer");
        assert_eq!(recalled[1].lesson, "older");

        assert_eq!(store.get("NVDA", 1).await.unwrap().len(), 1);
        assert!(store.get("NVDA", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_put_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = make_record("NVDA", 0, "once");
        store.put(record.clone()).await.unwrap();
        let err = store.put(record).await.unwrap_err();
        assert!(matches!(err, MemoryError::Duplicate(_)));
    }

    #[tokio::test]
    async fn outcome_update_persists() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = make_record("NVDA", 0, "before");
        store.put(record.clone()).await.unwrap();

        let outcome = Outcome {
            realized_return: dec!(-0.05),
            note: None,
            observed_at: Utc::now(),
        };
        store
            .record_outcome("NVDA", record.run_id, outcome, None)
            .await
            .unwrap();

        let recalled = store.get("NVDA", 1).await.unwrap();
        assert_eq!(recalled[0].lesson, "before");
        assert_eq!(recalled[0].was_correct(), Some(false));
    }

    #[tokio::test]
    async fn outcome_for_missing_run_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let outcome = Outcome {
            realized_return: dec!(0.01),
            note: None,
            observed_at: Utc::now(),
        };
        let err = store
            .record_outcome("NVDA", Uuid::new_v4(), outcome, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reflections.db");
        let path = path.to_str().unwrap();

        let record = make_record("AMD", 0, "persisted");
        {
            let store = SqliteStore::open(path).unwrap();
            store.put(record.clone()).await.unwrap();
        }
        let store = SqliteStore::open(path).unwrap();
        let recalled = store.get("AMD", 3).await.unwrap();
        assert_eq!(recalled, vec![record]);
    }
}
