pub mod cached;
pub mod error;
pub mod sqlite;
pub mod store;

pub use cached::CachedStore;
pub use error::MemoryError;
pub use sqlite::SqliteStore;
pub use store::{InMemoryStore, MemoryStore};
