//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL, priority and size metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::Priority;

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Key the entry is stored under
    pub key: String,
    /// The stored value
    pub value: Value,
    /// Creation / last-write timestamp (Unix milliseconds)
    pub timestamp: u64,
    /// Time to live in milliseconds
    pub ttl_ms: u64,
    /// Eviction tier
    pub priority: Priority,
    /// Estimated size in bytes, computed once at construction
    pub size: usize,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a fully-initialized entry. Nothing about it changes after insertion.
    ///
    /// # Arguments
    /// * `key` - Key the entry is stored under
    /// * `value` - The value to store
    /// * `timestamp` - Write time in Unix milliseconds
    /// * `ttl_ms` - Time to live in milliseconds
    /// * `priority` - Eviction tier
    pub fn new(
        key: impl Into<String>,
        value: Value,
        timestamp: u64,
        ttl_ms: u64,
        priority: Priority,
    ) -> Self {
        let size = estimate_size(&value);
        Self {
            key: key.into(),
            value,
            timestamp,
            ttl_ms,
            priority,
            size,
        }
    }

    // == Age ==
    /// Milliseconds since the entry was written. A timestamp in the future counts as age zero.
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// Boundary condition: expired once `now - timestamp >= ttl`, so a zero
    /// TTL is expired immediately.
    pub fn is_expired(&self, now: u64) -> bool {
        self.age_ms(now) >= self.ttl_ms
    }

    // == Is Stale ==
    /// Checks if the entry is at least `stale_ms` old. Independent of the TTL.
    pub fn is_stale(&self, now: u64, stale_ms: u64) -> bool {
        self.age_ms(now) >= stale_ms
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self, now: u64) -> u64 {
        self.ttl_ms.saturating_sub(self.age_ms(now))
    }
}

// == Utility Functions ==
/// Approximate in-memory footprint: serialized length times two.
pub fn estimate_size(value: &Value) -> usize {
    serde_json::to_string(value)
        .map(|s| s.len() * 2)
        .unwrap_or(0)
}
