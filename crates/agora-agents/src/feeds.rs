use std::sync::Arc;

use agora_models::Role;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::FeedError;

/// Read-only market data source behind one analyst role.
#[async_trait]
pub trait DataFeed: Send + Sync {
    async fn fetch(&self, ticker: &str, as_of: NaiveDate) -> Result<serde_json::Value, FeedError>;
}

/// Serves pre-fetched JSON.
pub struct StaticFeed {
    data: serde_json::Value,
}

impl StaticFeed {
    pub fn new(data: serde_json::Value) -> Self {
        Self { data }
    }

    pub fn empty() -> Self {
        Self::new(serde_json::Value::Object(serde_json::Map::new()))
    }
}

#[async_trait]
impl DataFeed for StaticFeed {
    async fn fetch(&self, _ticker: &str, _as_of: NaiveDate) -> Result<serde_json::Value, FeedError> {
        Ok(self.data.clone())
    }
}

/// An analyst role bound to its data feed.
#[derive(Clone)]
pub struct Analyst {
    pub role: Role,
    pub feed: Arc<dyn DataFeed>,
}

impl Analyst {
    pub fn new(role: Role, feed: Arc<dyn DataFeed>) -> Self {
        Self { role, feed }
    }
}

/// Build one static feed per role from a JSON object keyed by role name,
/// e.g. `{"market_analyst": {...}, "news_analyst": {...}}`. Roles absent from
/// the object get an empty feed.
pub fn static_analysts(roles: &[Role], feeds: &serde_json::Value) -> Result<Vec<Analyst>, FeedError> {
    let map = match feeds {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => return Ok(roles.iter().map(|r| empty_analyst(*r)).collect()),
        other => {
            return Err(FeedError::Malformed(format!(
                "feeds must be a JSON object keyed by role, got {}",
                json_type(other)
            )))
        }
    };

    for key in map.keys() {
        if serde_json::from_value::<Role>(serde_json::Value::String(key.clone()))
            .map(|r| !r.is_analyst())
            .unwrap_or(true)
        {
            return Err(FeedError::Malformed(format!("unknown analyst role: {key}")));
        }
    }

    Ok(roles
        .iter()
        .map(|role| match map.get(role.as_str()) {
            Some(data) => Analyst::new(*role, Arc::new(StaticFeed::new(data.clone()))),
            None => empty_analyst(*role),
        })
        .collect())
}

fn empty_analyst(role: Role) -> Analyst {
    Analyst::new(role, Arc::new(StaticFeed::empty()))
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
