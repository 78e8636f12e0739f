//! SQLite storage.

pub mod checkpoint;
pub mod pool;

pub use checkpoint::SqliteCheckpointStore;
pub use pool::DatabasePool;
