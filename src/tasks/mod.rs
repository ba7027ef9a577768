//! Background Tasks Module
//!
//! Contains background tasks that run for the lifetime of a cache context.
//!
//! # Tasks
//! - Maintenance: sweeps expired entries, enforces budgets and trims page
//!   state at the configured interval

mod cleanup;

pub use cleanup::spawn_cleanup_task;
