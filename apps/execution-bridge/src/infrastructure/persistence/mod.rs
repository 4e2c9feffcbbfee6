//! Persistence Adapters
//!
//! Implementations of the `IntentStore` repository trait.

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryIntentStore;
pub use sqlite::SqliteIntentStore;
