pub mod memory_store;
pub mod sqlite_store;

pub use memory_store::InMemoryLineageStore;
pub use sqlite_store::SqliteLineageStore;
