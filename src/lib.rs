//! Tiered Cache - in-memory and durable caching for data-heavy clients
//!
//! A TTL/priority entry store, a best-effort durable mirror, page and form
//! state, visibility-gated refresh and a de-duplicating request cache, all
//! sharing one explicitly constructed store.

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod page_state;
pub mod persistence;
pub mod policy;
pub mod request;
pub mod tasks;
pub mod visibility;

pub use cache::{CacheStats, CacheStore, SetOptions, SharedStore};
pub use config::Config;
pub use context::{CacheContext, MaintenanceReport};
pub use error::{CacheError, FetchError, Result};
pub use policy::{PolicyDescriptor, PolicyRegistry, Priority};
pub use request::{RequestCache, RequestOptions};
pub use tasks::spawn_cleanup_task;
