//! Durable Tier Module
//!
//! Wraps a persistence adapter with TTL-stamped records, ordered background
//! writes and error containment. Nothing here ever returns an error to the
//! caller; failures are logged and treated as a miss or a no-op.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::persistence::PersistenceAdapter;

// == Durable Record ==
/// What is written to the adapter: the value plus the metadata needed to
/// decide whether it can still be trusted after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRecord {
    pub value: Value,
    pub timestamp: u64,
    pub ttl_ms: u64,
}

impl DurableRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.timestamp) >= self.ttl_ms
    }
}

enum WriteOp {
    Save { key: String, record: DurableRecord },
    Remove { key: String },
    Flush(oneshot::Sender<()>),
}

// == Durable Tier ==
/// Best-effort durable mirror of the in-memory store.
///
/// Mirrored writes are queued to a single writer task so they reach the
/// adapter in the order they were issued.
#[derive(Debug, Clone)]
pub struct DurableTier {
    adapter: Arc<dyn PersistenceAdapter>,
    clock: SharedClock,
    writes: mpsc::UnboundedSender<WriteOp>,
}

impl DurableTier {
    /// Creates the tier and spawns its writer task. Must be called inside a tokio runtime.
    pub fn new(adapter: Arc<dyn PersistenceAdapter>, clock: SharedClock) -> Self {
        let (writes, queue) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(adapter.clone(), queue));
        Self {
            adapter,
            clock,
            writes,
        }
    }

    pub fn adapter(&self) -> Arc<dyn PersistenceAdapter> {
        self.adapter.clone()
    }

    // == Mirror ==
    /// Queues a save and returns immediately.
    pub fn mirror(&self, key: impl Into<String>, value: Value, ttl_ms: u64) {
        let record = DurableRecord {
            value,
            timestamp: self.clock.now_ms(),
            ttl_ms,
        };
        self.enqueue(WriteOp::Save {
            key: key.into(),
            record,
        });
    }

    /// Queues a removal and returns immediately.
    pub fn forget_later(&self, key: impl Into<String>) {
        self.enqueue(WriteOp::Remove { key: key.into() });
    }

    // == Flush ==
    /// Waits until every write queued so far has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.writes.send(WriteOp::Flush(done)).is_err() {
            warn!("Durable writer is gone; nothing to flush");
            return;
        }
        let _ = wait.await;
    }

    // == Store ==
    /// Saves immediately and waits for the adapter. Errors are logged.
    pub async fn store(&self, key: &str, value: Value, ttl_ms: u64) {
        let record = DurableRecord {
            value,
            timestamp: self.clock.now_ms(),
            ttl_ms,
        };
        self.flush().await;
        save_record(self.adapter.as_ref(), key, &record).await;
    }

    // == Restore ==
    /// Loads a record if present and unexpired. Expired or unreadable records
    /// are removed and reported as a miss.
    pub async fn restore(&self, key: &str) -> Option<DurableRecord> {
        self.flush().await;

        let raw = match self.adapter.load(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key = %key, error = %err, "Durable load failed; continuing from memory");
                return None;
            }
        };

        let record: DurableRecord = match serde_json::from_value(raw) {
            Ok(record) => record,
            Err(err) => {
                warn!(key = %key, error = %err, "Discarding malformed durable record");
                self.forget(key).await;
                return None;
            }
        };

        if record.is_expired(self.clock.now_ms()) {
            debug!(key = %key, "Durable record expired");
            self.forget(key).await;
            return None;
        }
        Some(record)
    }

    // == Forget ==
    /// Removes one key from durable storage.
    pub async fn forget(&self, key: &str) {
        self.flush().await;
        if let Err(err) = self.adapter.remove(key).await {
            warn!(key = %key, error = %err, "Durable remove failed");
        }
    }

    /// Removes every durable key containing `pattern`. Returns how many were removed.
    pub async fn forget_matching(&self, pattern: &str) -> usize {
        self.flush().await;
        let keys = match self.adapter.keys().await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(pattern = %pattern, error = %err, "Durable key listing failed");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys.iter().filter(|key| key.contains(pattern)) {
            match self.adapter.remove(key).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(key = %key, error = %err, "Durable remove failed"),
            }
        }
        removed
    }

    /// Durable keys starting with `prefix`.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.flush().await;
        match self.adapter.keys().await {
            Ok(keys) => keys.into_iter().filter(|key| key.starts_with(prefix)).collect(),
            Err(err) => {
                warn!(error = %err, "Durable key listing failed");
                Vec::new()
            }
        }
    }

    /// Wipes durable storage.
    pub async fn clear(&self) {
        self.flush().await;
        if let Err(err) = self.adapter.clear_all().await {
            warn!(error = %err, "Durable clear failed");
        }
    }

    fn enqueue(&self, op: WriteOp) {
        if self.writes.send(op).is_err() {
            warn!("Durable writer is gone; dropping write");
        }
    }
}

async fn save_record(adapter: &dyn PersistenceAdapter, key: &str, record: &DurableRecord) {
    let value = match serde_json::to_value(record) {
        Ok(value) => value,
        Err(err) => {
            warn!(key = %key, error = %err, "Durable record not serializable");
            return;
        }
    };
    if let Err(err) = adapter.save(key, &value).await {
        warn!(key = %key, error = %err, "Durable save failed; value kept in memory only");
    }
}

async fn run_writer(adapter: Arc<dyn PersistenceAdapter>, mut queue: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = queue.recv().await {
        match op {
            WriteOp::Save { key, record } => save_record(adapter.as_ref(), &key, &record).await,
            WriteOp::Remove { key } => {
                if let Err(err) = adapter.remove(&key).await {
                    warn!(key = %key, error = %err, "Durable remove failed");
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Durable writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{CacheError, Result};
    use crate::persistence::MemoryPersistence;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Debug)]
    struct BrokenDisk;

    #[async_trait]
    impl PersistenceAdapter for BrokenDisk {
        async fn save(&self, _key: &str, _value: &Value) -> Result<()> {
            Err(CacheError::Persistence("disk full".to_string()))
        }
        async fn load(&self, _key: &str) -> Result<Option<Value>> {
            Err(CacheError::Persistence("disk gone".to_string()))
        }
        async fn remove(&self, _key: &str) -> Result<()> {
            Err(CacheError::Persistence("disk gone".to_string()))
        }
        async fn clear_all(&self) -> Result<()> {
            Err(CacheError::Persistence("disk gone".to_string()))
        }
        async fn keys(&self) -> Result<Vec<String>> {
            Err(CacheError::Persistence("disk gone".to_string()))
        }
    }

    fn tier(adapter: Arc<dyn PersistenceAdapter>) -> (DurableTier, ManualClock) {
        let clock = ManualClock::new(10_000);
        (DurableTier::new(adapter, Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_mirror_then_restore() {
        let (tier, _) = tier(Arc::new(MemoryPersistence::new()));

        tier.mirror("k", json!("first"), 60_000);
        tier.mirror("k", json!("second"), 60_000);

        let record = tier.restore("k").await.unwrap();
        assert_eq!(record.value, json!("second"), "Queued writes apply in order");
        assert_eq!(record.timestamp, 10_000);
    }

    #[tokio::test]
    async fn test_restore_checks_ttl() {
        let backing = MemoryPersistence::new();
        let (tier, clock) = tier(Arc::new(backing.clone()));

        tier.store("k", json!(1), 1_000).await;
        clock.advance(1_000);

        assert!(tier.restore("k").await.is_none());
        assert!(backing.is_empty(), "Expired record should be removed");
    }

    #[tokio::test]
    async fn test_malformed_record_is_a_miss() {
        let backing = MemoryPersistence::new();
        backing.save("k", &json!("not a record")).await.unwrap();
        let (tier, _) = tier(Arc::new(backing.clone()));

        assert!(tier.restore("k").await.is_none());
        assert!(backing.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_contained() {
        let (tier, _) = tier(Arc::new(BrokenDisk));

        tier.mirror("k", json!(1), 1_000);
        tier.store("k", json!(1), 1_000).await;
        tier.forget("k").await;
        tier.clear().await;

        assert!(tier.restore("k").await.is_none());
        assert_eq!(tier.forget_matching("k").await, 0);
    }

    #[tokio::test]
    async fn test_forget_matching() {
        let (tier, _) = tier(Arc::new(MemoryPersistence::new()));

        tier.mirror("data_orders_1", json!(1), 60_000);
        tier.mirror("data_orders_2", json!(2), 60_000);
        tier.mirror("data_customers_1", json!(3), 60_000);

        assert_eq!(tier.forget_matching("orders").await, 2);
        assert!(tier.restore("data_customers_1").await.is_some());
        assert_eq!(tier.keys_with_prefix("data_").await, vec!["data_customers_1".to_string()]);
    }
}
