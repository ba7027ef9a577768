//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with TTL expiration and
//! priority/age eviction against count and byte budgets.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheEntry, CacheStats, MAX_KEY_LENGTH};
use crate::clock::{system_clock, SharedClock};
use crate::config::{Config, DEFAULT_MAX_BYTES};
use crate::error::{CacheError, Result};
use crate::policy::{PolicyRegistry, Priority};

// == Set Options ==
/// Per-write overrides. Unset fields fall back to policy, then defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    pub ttl_ms: Option<u64>,
    pub priority: Option<Priority>,
}

impl SetOptions {
    pub fn ttl(ttl_ms: u64) -> Self {
        Self {
            ttl_ms: Some(ttl_ms),
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

// == Sweep Report ==
/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
}

// == Cache Store ==
/// Main cache storage with TTL support and priority-ordered eviction.
#[derive(Debug)]
pub struct CacheStore {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// Performance statistics
    stats: CacheStats,
    /// Entry-count budget
    max_entries: usize,
    /// Estimated byte budget
    max_bytes: usize,
    /// Default TTL in milliseconds for entries without explicit TTL or policy
    default_ttl_ms: u64,
    /// Running total of estimated entry sizes
    total_bytes: usize,
    clock: SharedClock,
    policies: Option<Arc<PolicyRegistry>>,
}

impl CacheStore {
    // == Constructor ==
    /// Creates a new CacheStore with specified capacity and default TTL.
    ///
    /// # Arguments
    /// * `max_entries` - Maximum number of entries the cache can hold
    /// * `default_ttl_ms` - Default TTL in milliseconds
    pub fn new(max_entries: usize, default_ttl_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::new(),
            max_entries,
            max_bytes: DEFAULT_MAX_BYTES,
            default_ttl_ms,
            total_bytes: 0,
            clock: system_clock(),
            policies: None,
        }
    }

    /// Creates a store sized from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_entries, config.default_ttl_ms).with_max_bytes(config.max_bytes)
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Resolve default TTL and priority from a policy registry.
    pub fn with_policies(mut self, policies: Arc<PolicyRegistry>) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Current time according to the store's clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    // == Set ==
    /// Stores a value, overwriting any existing entry unconditionally.
    ///
    /// TTL and priority come from `options`, then the matching policy, then
    /// the store defaults. If the entry count exceeds the budget, other
    /// entries are evicted lowest priority, oldest first.
    ///
    /// # Arguments
    /// * `key` - The key to store
    /// * `value` - The value to store
    /// * `options` - Optional TTL / priority overrides
    pub fn set(&mut self, key: impl Into<String>, value: Value, options: SetOptions) -> Result<()> {
        let key = key.into();
        validate_key(&key)?;

        let policy = self.policies.as_ref().map(|p| p.get_policy(&key));
        let ttl_ms = options
            .ttl_ms
            .or_else(|| policy.as_ref().map(|p| p.ttl_ms))
            .unwrap_or(self.default_ttl_ms);
        let priority = options
            .priority
            .or_else(|| policy.as_ref().map(|p| p.priority))
            .unwrap_or_default();

        // Build the entry completely before it becomes visible
        let entry = CacheEntry::new(key.clone(), value, self.now_ms(), ttl_ms, priority);
        self.total_bytes += entry.size;
        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            self.total_bytes -= previous.size;
        }

        while self.entries.len() > self.max_entries {
            if !self.evict_one(Some(&key)) {
                break;
            }
        }

        self.refresh_totals();
        Ok(())
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// Returns None if the key is absent or expired. Expired entries are
    /// removed and counted as misses.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let now = self.now_ms();
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                self.remove_entry(key);
                self.stats.record_expirations(1);
                self.stats.record_miss();
                None
            }
            Some(entry) => {
                let value = entry.value.clone();
                self.stats.record_hit();
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Peek ==
    /// Returns an unexpired entry with its metadata without touching statistics.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        let now = self.now_ms();
        self.entries.get(key).filter(|entry| !entry.is_expired(now))
    }

    // == Delete ==
    /// Removes an entry by key. Idempotent; returns whether anything was removed.
    pub fn delete(&mut self, key: &str) -> bool {
        let removed = self.remove_entry(key);
        self.refresh_totals();
        removed
    }

    // == Clear ==
    /// Removes every entry, or only those whose key contains `pattern`.
    ///
    /// Returns the number of entries removed.
    pub fn clear(&mut self, pattern: Option<&str>) -> usize {
        let removed = match pattern {
            None => {
                let count = self.entries.len();
                self.entries.clear();
                self.total_bytes = 0;
                count
            }
            Some(pattern) => {
                let keys = self.keys_matching(pattern);
                for key in &keys {
                    self.remove_entry(key);
                }
                keys.len()
            }
        };

        self.refresh_totals();
        removed
    }

    // == Is Stale ==
    /// True when the entry is at least `stale_ms` old, or absent/expired.
    pub fn is_stale(&self, key: &str, stale_ms: u64) -> bool {
        let now = self.now_ms();
        self.peek(key)
            .map(|entry| entry.is_stale(now, stale_ms))
            .unwrap_or(true)
    }

    // == Sweep ==
    /// Removes expired entries, then evicts until under both budgets.
    pub fn sweep(&mut self) -> SweepReport {
        let now = self.now_ms();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove_entry(key);
        }
        self.stats.record_expirations(expired_keys.len());

        let mut evicted = 0;
        while self.over_budget() && self.evict_one(None) {
            evicted += 1;
        }

        self.refresh_totals();
        let report = SweepReport {
            expired: expired_keys.len(),
            evicted,
        };
        debug!(?report, entries = self.entries.len(), "Cache sweep finished");
        report
    }

    /// Keys containing `pattern`, expired or not.
    pub fn keys_matching(&self, pattern: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|key| key.contains(pattern))
            .cloned()
            .collect()
    }

    /// Unexpired entries whose key starts with `prefix`.
    pub fn entries_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a CacheEntry> + 'a {
        let now = self.now_ms();
        self.entries
            .values()
            .filter(move |entry| entry.key.starts_with(prefix) && !entry.is_expired(now))
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_totals(self.entries.len(), self.total_bytes);
        stats
    }

    /// Current estimated size of all entries.
    pub fn estimated_bytes(&self) -> usize {
        self.total_bytes
    }

    // == Length ==
    /// Returns the current number of entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn over_budget(&self) -> bool {
        self.entries.len() > self.max_entries || self.total_bytes > self.max_bytes
    }

    /// Evicts the lowest-priority, oldest entry other than `protect`.
    fn evict_one(&mut self, protect: Option<&str>) -> bool {
        let victim = self
            .entries
            .values()
            .filter(|entry| Some(entry.key.as_str()) != protect)
            .min_by(|a, b| {
                (a.priority, a.timestamp, &a.key).cmp(&(b.priority, b.timestamp, &b.key))
            })
            .map(|entry| entry.key.clone());

        match victim {
            Some(key) => {
                debug!(key = %key, "Evicting cache entry");
                self.remove_entry(&key);
                self.stats.record_eviction();
                true
            }
            None => false,
        }
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.total_bytes -= entry.size;
                true
            }
            None => false,
        }
    }

    fn refresh_totals(&mut self) {
        self.stats.set_totals(self.entries.len(), self.total_bytes);
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidRequest(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}
