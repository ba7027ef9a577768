//! Policy Registry Module
//!
//! Static table mapping resource keys to TTL, persistence, refresh and priority.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_TTL_MS;
use crate::error::{CacheError, Result};
use crate::policy::Priority;

/// Namespace prefixes stripped from cache keys before policy matching.
pub const KEY_NAMESPACES: [&str; 4] = ["page_state_", "tab_backup_", "form_", "data_"];

const MINUTE: u64 = 60 * 1000;
const HOUR: u64 = 60 * MINUTE;

// resource, ttl, persist, refresh interval (0 = none)
const BUILTIN_POLICIES: &[(&str, u64, bool, u64)] = &[
    ("dashboard", 2 * MINUTE, true, 5 * MINUTE),
    ("orders", 3 * MINUTE, true, 2 * MINUTE),
    ("customers", 10 * MINUTE, true, 0),
    ("products", 15 * MINUTE, true, 0),
    ("inventory", 2 * MINUTE, false, MINUTE),
    ("warehouse", 5 * MINUTE, true, 0),
    ("procurement", 10 * MINUTE, true, 0),
    ("reports", 30 * MINUTE, false, 0),
    ("settings", HOUR, true, 0),
    ("order_form", 24 * HOUR, true, 0),
    ("customer_form", 24 * HOUR, true, 0),
    ("product_form", 24 * HOUR, true, 0),
];

const BUILTIN_PRIORITIES: &[(&str, Priority)] = &[
    ("orders", Priority::Critical),
    ("inventory", Priority::Critical),
    ("order_form", Priority::Critical),
    ("dashboard", Priority::High),
    ("customers", Priority::High),
    ("products", Priority::High),
    ("customer_form", Priority::High),
    ("product_form", Priority::High),
    ("warehouse", Priority::Medium),
    ("procurement", Priority::Medium),
    ("reports", Priority::Low),
    ("settings", Priority::Low),
];

// == Policy Descriptor ==
/// Caching policy for one logical resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDescriptor {
    pub resource_key: String,
    pub ttl_ms: u64,
    #[serde(default)]
    pub persist: bool,
    #[serde(default)]
    pub auto_refresh: bool,
    #[serde(default)]
    pub refresh_interval_ms: u64,
    #[serde(default)]
    pub priority: Priority,
}

impl PolicyDescriptor {
    /// Policy applied to keys that match no table entry.
    pub fn fallback(resource_key: impl Into<String>, ttl_ms: u64) -> Self {
        Self {
            resource_key: resource_key.into(),
            ttl_ms,
            persist: false,
            auto_refresh: false,
            refresh_interval_ms: 0,
            priority: Priority::Medium,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Refresh period, present only when auto refresh is enabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.auto_refresh && self.refresh_interval_ms > 0)
            .then(|| Duration::from_millis(self.refresh_interval_ms))
    }
}

// == Policy Table (serialized form) ==
#[derive(Debug, Deserialize)]
struct PolicyTable {
    #[serde(default)]
    default_ttl_ms: Option<u64>,
    #[serde(default)]
    policies: Vec<PolicyDescriptor>,
    #[serde(default)]
    priorities: HashMap<String, Priority>,
}

// == Policy Registry ==
/// Read-only lookup over the policy table. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<String, PolicyDescriptor>,
    priorities: HashMap<String, Priority>,
    default_ttl_ms: u64,
}

impl PolicyRegistry {
    /// Registry with the built-in ERP table.
    pub fn builtin() -> Self {
        let priorities: HashMap<String, Priority> = BUILTIN_PRIORITIES
            .iter()
            .map(|(key, priority)| (key.to_string(), *priority))
            .collect();

        let policies = BUILTIN_POLICIES
            .iter()
            .map(|&(key, ttl_ms, persist, refresh_ms)| PolicyDescriptor {
                resource_key: key.to_string(),
                ttl_ms,
                persist,
                auto_refresh: refresh_ms > 0,
                refresh_interval_ms: refresh_ms,
                priority: Priority::Medium,
            })
            .collect();

        Self::from_parts(policies, priorities, DEFAULT_TTL_MS)
    }

    /// Registry with no policies: every key gets the defaults.
    pub fn empty(default_ttl_ms: u64) -> Self {
        Self::from_parts(Vec::new(), HashMap::new(), default_ttl_ms)
    }

    /// Parses a deployment policy table.
    ///
    /// ```json
    /// { "default_ttl_ms": 60000,
    ///   "policies": [{ "resource_key": "orders", "ttl_ms": 1000, "persist": true }],
    ///   "priorities": { "orders": "critical" } }
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let table: PolicyTable = serde_json::from_str(json)?;
        if let Some(bad) = table.policies.iter().find(|p| p.resource_key.is_empty()) {
            return Err(CacheError::Config(format!(
                "policy with empty resource key (ttl {}ms)",
                bad.ttl_ms
            )));
        }
        Ok(Self::from_parts(
            table.policies,
            table.priorities,
            table.default_ttl_ms.unwrap_or(DEFAULT_TTL_MS),
        ))
    }

    /// Policies take their priority from the priority table; a priority set
    /// explicitly on a descriptor wins only when the table has no entry.
    fn from_parts(
        policies: Vec<PolicyDescriptor>,
        priorities: HashMap<String, Priority>,
        default_ttl_ms: u64,
    ) -> Self {
        let policies = policies
            .into_iter()
            .map(|mut policy| {
                if let Some(priority) = priorities.get(&policy.resource_key) {
                    policy.priority = *priority;
                }
                (policy.resource_key.clone(), policy)
            })
            .collect();

        Self {
            policies,
            priorities,
            default_ttl_ms,
        }
    }

    // == Get Policy ==
    /// Resolves the policy for a resource or cache key.
    ///
    /// Namespace prefixes (`data_`, `page_state_`, ...) are stripped, then the
    /// longest policy key that prefixes the remainder wins. Unmatched keys get
    /// the default policy.
    pub fn get_policy(&self, resource_key: &str) -> PolicyDescriptor {
        let name = strip_namespace(resource_key);
        match longest_prefix(self.policies.keys(), name) {
            Some(matched) => self.policies[matched].clone(),
            None => {
                let mut fallback = PolicyDescriptor::fallback(name, self.default_ttl_ms);
                fallback.priority = self.get_priority(name);
                fallback
            }
        }
    }

    // == Get Priority ==
    /// Table-driven priority lookup, MEDIUM when unmapped.
    pub fn get_priority(&self, data_type: &str) -> Priority {
        let name = strip_namespace(data_type);
        longest_prefix(self.priorities.keys(), name)
            .map(|matched| self.priorities[matched])
            .unwrap_or_default()
    }

    /// TTL applied when no policy matches.
    pub fn default_ttl_ms(&self) -> u64 {
        self.default_ttl_ms
    }

    /// Policies that ask for a background refresh timer.
    pub fn auto_refresh_policies(&self) -> Vec<&PolicyDescriptor> {
        let mut refreshing: Vec<_> = self
            .policies
            .values()
            .filter(|p| p.refresh_interval().is_some())
            .collect();
        refreshing.sort_by(|a, b| a.resource_key.cmp(&b.resource_key));
        refreshing
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn strip_namespace(key: &str) -> &str {
    KEY_NAMESPACES
        .iter()
        .find_map(|ns| key.strip_prefix(ns))
        .unwrap_or(key)
}

fn longest_prefix<'a>(candidates: impl Iterator<Item = &'a String>, name: &str) -> Option<&'a String> {
    candidates
        .filter(|candidate| name.starts_with(candidate.as_str()))
        .max_by_key(|candidate| candidate.len())
}
