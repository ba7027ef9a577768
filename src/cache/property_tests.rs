//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check store invariants over arbitrary operation sequences.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::{CacheStore, SetOptions};
use crate::clock::{Clock, ManualClock};
use crate::policy::Priority;

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 100;
const TEST_DEFAULT_TTL: u64 = 300_000;

// == Strategies ==
/// Generates valid cache keys (non-empty, within length limit)
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,64}"
}

/// Generates JSON payloads of a few shapes
fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-zA-Z0-9 ]{1,64}".prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        prop::collection::vec(any::<u16>(), 0..8).prop_map(|v| json!(v)),
    ]
}

fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Medium),
        Just(Priority::High),
        Just(Priority::Critical),
    ]
}

/// Generates a sequence of cache operations for testing
#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: Value },
    Get { key: String },
    Delete { key: String },
    Advance { ms: u64 },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (valid_key_strategy(), value_strategy()).prop_map(|(key, value)| CacheOp::Set { key, value }),
        valid_key_strategy().prop_map(|key| CacheOp::Get { key }),
        valid_key_strategy().prop_map(|key| CacheOp::Delete { key }),
        (0u64..2_000).prop_map(|ms| CacheOp::Advance { ms }),
    ]
}

fn manual_store(max_entries: usize) -> (CacheStore, ManualClock) {
    let clock = ManualClock::new(0);
    let store = CacheStore::new(max_entries, TEST_DEFAULT_TTL).with_clock(Arc::new(clock.clone()));
    (store, clock)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Statistics: hits and misses match what get() reported.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        let (mut store, clock) = manual_store(TEST_MAX_ENTRIES);
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Set { key, value } => {
                    store.set(key, value, SetOptions::default()).unwrap();
                }
                CacheOp::Get { key } => match store.get(&key) {
                    Some(_) => expected_hits += 1,
                    None => expected_misses += 1,
                },
                CacheOp::Delete { key } => {
                    store.delete(&key);
                }
                CacheOp::Advance { ms } => clock.advance(ms),
            }
        }

        let stats = store.stats();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.total_entries, store.len(), "Total entries mismatch");
    }

    // Expiration: get returns the value iff now - timestamp < ttl.
    #[test]
    fn prop_expiration_boundary(
        key in valid_key_strategy(),
        value in value_strategy(),
        ttl in 0u64..10_000,
        elapsed in 0u64..20_000
    ) {
        let (mut store, clock) = manual_store(TEST_MAX_ENTRIES);

        store.set(key.clone(), value.clone(), SetOptions::ttl(ttl)).unwrap();
        clock.advance(elapsed);

        let got = store.get(&key);
        if elapsed >= ttl {
            prop_assert_eq!(got, None);
        } else {
            prop_assert_eq!(got, Some(value));
        }
    }

    // Overwrite: the second write wins and only one entry exists.
    #[test]
    fn prop_overwrite_semantics(
        key in valid_key_strategy(),
        value1 in value_strategy(),
        value2 in value_strategy(),
        gap in 0u64..1_000
    ) {
        let (mut store, clock) = manual_store(TEST_MAX_ENTRIES);

        store.set(key.clone(), value1, SetOptions::default()).unwrap();
        clock.advance(gap);
        store.set(key.clone(), value2.clone(), SetOptions::default()).unwrap();

        prop_assert_eq!(store.peek(&key).map(|e| e.timestamp), Some(gap));
        prop_assert_eq!(store.get(&key), Some(value2), "Overwrite should return new value");
        prop_assert_eq!(store.len(), 1, "Should have exactly one entry after overwrite");
    }

    // Capacity: the entry count never exceeds the budget.
    #[test]
    fn prop_capacity_enforcement(
        entries in prop::collection::vec((valid_key_strategy(), value_strategy(), priority_strategy()), 1..200)
    ) {
        let max_entries = 50;
        let (mut store, clock) = manual_store(max_entries);

        for (key, value, priority) in entries {
            store.set(key, value, SetOptions::default().with_priority(priority)).unwrap();
            clock.advance(1);
            prop_assert!(
                store.len() <= max_entries,
                "Cache size {} exceeds max {}",
                store.len(),
                max_entries
            );
        }
    }

    // Byte accounting: the running total equals the sum of entry sizes.
    #[test]
    fn prop_byte_accounting(ops in prop::collection::vec(cache_op_strategy(), 1..80)) {
        let (mut store, clock) = manual_store(20);

        for op in ops {
            match op {
                CacheOp::Set { key, value } => {
                    store.set(key, value, SetOptions::ttl(1_500)).unwrap();
                }
                CacheOp::Get { key } => {
                    store.get(&key);
                }
                CacheOp::Delete { key } => {
                    store.delete(&key);
                }
                CacheOp::Advance { ms } => {
                    clock.advance(ms);
                    store.sweep();
                }
            }
        }

        store.sweep();
        let summed: usize = store.entries_with_prefix("").map(|e| e.size).sum();
        prop_assert_eq!(store.estimated_bytes(), summed);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Eviction order: the newest write survives, and the other survivors are
    // exactly the highest (priority, timestamp) entries written before it.
    #[test]
    fn prop_priority_eviction_order(
        entries in prop::collection::vec((valid_key_strategy(), priority_strategy()), 5..30),
        capacity in 2usize..5
    ) {
        let mut unique: Vec<(String, Priority)> = Vec::new();
        for (key, priority) in entries {
            if !unique.iter().any(|(k, _)| *k == key) {
                unique.push((key, priority));
            }
        }
        prop_assume!(unique.len() > capacity);

        let (mut store, clock) = manual_store(capacity);
        let mut written: Vec<(Priority, u64, String)> = Vec::new();
        for (key, priority) in &unique {
            store.set(key.clone(), json!(1), SetOptions::default().with_priority(*priority)).unwrap();
            written.push((*priority, clock.now_ms(), key.clone()));
            clock.advance(1);
        }

        let (_, _, last) = written.pop().unwrap();
        written.sort();
        let mut expected: HashSet<String> = written
            .iter()
            .rev()
            .take(capacity - 1)
            .map(|(_, _, key)| key.clone())
            .collect();
        expected.insert(last);

        let survivors: HashSet<String> = unique
            .iter()
            .filter(|(key, _)| store.peek(key).is_some())
            .map(|(key, _)| key.clone())
            .collect();

        prop_assert_eq!(store.len(), capacity);
        prop_assert_eq!(survivors, expected);
    }
}

// == Additional Unit Tests for Edge Cases ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_on_empty_store() {
        let (mut store, _) = manual_store(TEST_MAX_ENTRIES);
        let report = store.sweep();
        assert_eq!(report.expired, 0);
        assert_eq!(report.evicted, 0);
    }
}
