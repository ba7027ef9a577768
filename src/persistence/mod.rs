//! Persistence Module
//!
//! Durable storage that survives restarts, kept separate from the in-memory store.
//! The store decides freshness; this tier only seeds a cold cache.

mod adapter;
mod file;
mod tier;

pub use adapter::{MemoryPersistence, NoopPersistence, PersistenceAdapter};
pub use file::FilePersistence;
pub use tier::{DurableRecord, DurableTier};
