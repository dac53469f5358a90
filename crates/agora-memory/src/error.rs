use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No reflection for run {run_id} under ticker {ticker}")]
    NotFound { ticker: String, run_id: Uuid },

    #[error("Reflection for run {0} already stored")]
    Duplicate(Uuid),

    #[error("Memory store not available: {0}")]
    Unavailable(String),
}
