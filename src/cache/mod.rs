//! Cache Module
//!
//! Provides the in-memory entry store with TTL expiration, staleness checks
//! and priority-ordered eviction.

mod entry;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

use std::sync::Arc;

use tokio::sync::RwLock;

// Re-export public types
pub use entry::{estimate_size, CacheEntry};
pub use stats::CacheStats;
pub use store::{CacheStore, SetOptions, SweepReport};

/// Store handle shared by every component of one cache context.
pub type SharedStore = Arc<RwLock<CacheStore>>;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Wraps a store for sharing across components and tasks.
pub fn shared(store: CacheStore) -> SharedStore {
    Arc::new(RwLock::new(store))
}
