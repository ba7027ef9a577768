//! Configuration Module
//!
//! Handles loading and managing engine configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default TTL for entries without a matching policy (5 minutes)
pub const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

/// Default entry-count budget for the in-memory store
pub const DEFAULT_MAX_SIZE: usize = 100;

/// Default lifetime and cleanup age limit of page state (24 hours)
pub const DEFAULT_PAGE_STATE_MAX_AGE_MS: u64 = 24 * 60 * 60 * 1000;

/// Default byte budget for the in-memory store (5 MiB, estimated)
pub const DEFAULT_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Engine configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries the in-memory store keeps after a sweep
    pub max_entries: usize,
    /// Estimated byte budget for the in-memory store
    pub max_bytes: usize,
    /// Default TTL in milliseconds for entries without explicit TTL
    pub default_ttl_ms: u64,
    /// Background sweep interval in milliseconds
    pub cleanup_interval_ms: u64,
    /// Page states older than this are dropped by the cleanup sweep
    pub page_state_max_age_ms: u64,
    /// Maximum number of page states kept by the cleanup sweep
    pub page_state_max_entries: usize,
    /// Visibility transitions closer together than this are coalesced
    pub visibility_throttle_ms: u64,
    /// Root directory of the file-backed durable tier
    pub persistence_dir: PathBuf,
    /// Optional JSON policy table replacing the built-in one
    pub policy_file: Option<PathBuf>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` - Entry budget (default: 100)
    /// - `MAX_BYTES` - Estimated byte budget (default: 5 MiB)
    /// - `DEFAULT_TTL_MS` - Default TTL (default: 300000)
    /// - `CLEANUP_INTERVAL_MS` - Sweep frequency (default: 600000)
    /// - `PAGE_STATE_MAX_AGE_MS` - Page state age limit (default: 24h)
    /// - `PAGE_STATE_MAX_ENTRIES` - Page state count limit (default: 50)
    /// - `VISIBILITY_THROTTLE_MS` - Transition throttle (default: 1000)
    /// - `PERSISTENCE_DIR` - Durable tier directory (default: .cache/tiered_cache)
    /// - `POLICY_FILE` - JSON policy table (default: built-in table)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: parse_var("MAX_ENTRIES").unwrap_or(defaults.max_entries),
            max_bytes: parse_var("MAX_BYTES").unwrap_or(defaults.max_bytes),
            default_ttl_ms: parse_var("DEFAULT_TTL_MS").unwrap_or(defaults.default_ttl_ms),
            cleanup_interval_ms: parse_var("CLEANUP_INTERVAL_MS")
                .unwrap_or(defaults.cleanup_interval_ms),
            page_state_max_age_ms: parse_var("PAGE_STATE_MAX_AGE_MS")
                .unwrap_or(defaults.page_state_max_age_ms),
            page_state_max_entries: parse_var("PAGE_STATE_MAX_ENTRIES")
                .unwrap_or(defaults.page_state_max_entries),
            visibility_throttle_ms: parse_var("VISIBILITY_THROTTLE_MS")
                .unwrap_or(defaults.visibility_throttle_ms),
            persistence_dir: env::var("PERSISTENCE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.persistence_dir),
            policy_file: env::var("POLICY_FILE").ok().map(PathBuf::from),
        }
    }

    /// Sweep interval as a Duration.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Visibility throttle as a Duration.
    pub fn visibility_throttle(&self) -> Duration {
        Duration::from_millis(self.visibility_throttle_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_SIZE,
            max_bytes: DEFAULT_MAX_BYTES,
            default_ttl_ms: DEFAULT_TTL_MS,
            cleanup_interval_ms: 10 * 60 * 1000,
            page_state_max_age_ms: DEFAULT_PAGE_STATE_MAX_AGE_MS,
            page_state_max_entries: 50,
            visibility_throttle_ms: 1000,
            persistence_dir: PathBuf::from(".cache/tiered_cache"),
            policy_file: None,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
