//! Persistence Adapter Module
//!
//! The durable storage boundary and its in-process implementations.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CacheError, Result};

// == Persistence Adapter ==
/// Durable keyed storage that survives process restarts.
///
/// Implementations may fail freely; callers treat every error as non-fatal.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync + Debug {
    async fn save(&self, key: &str, value: &Value) -> Result<()>;

    async fn load(&self, key: &str) -> Result<Option<Value>>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn clear_all(&self) -> Result<()>;

    /// Every key currently stored.
    async fn keys(&self) -> Result<Vec<String>>;
}

// == Memory Persistence ==
/// Process-local "durable" storage. Clones share the same backing map, so a
/// fresh cache built over a clone sees what the previous one wrote.
#[derive(Debug, Default, Clone)]
pub struct MemoryPersistence {
    documents: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.documents
            .lock()
            .map_err(|_| CacheError::Persistence("memory backing poisoned".to_string()))
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryPersistence {
    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        // Serialize up front so unrepresentable payloads fail at save time
        let document = serde_json::to_string(value)?;
        self.lock()?.insert(key.to_string(), document);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let document = self.lock()?.get(key).cloned();
        match document {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

// == Noop Persistence ==
/// Durability disabled: saves vanish, loads always miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPersistence;

#[async_trait]
impl PersistenceAdapter for NoopPersistence {
    async fn save(&self, _key: &str, _value: &Value) -> Result<()> {
        Ok(())
    }

    async fn load(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_roundtrip_and_remove() {
        let adapter = MemoryPersistence::new();

        adapter.save("k", &json!({"a": 1})).await.unwrap();
        assert_eq!(adapter.load("k").await.unwrap(), Some(json!({"a": 1})));

        adapter.remove("k").await.unwrap();
        adapter.remove("k").await.unwrap();
        assert_eq!(adapter.load("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_clones_share_backing() {
        let first = MemoryPersistence::new();
        let second = first.clone();

        first.save("shared", &json!(true)).await.unwrap();
        assert_eq!(second.load("shared").await.unwrap(), Some(json!(true)));

        second.clear_all().await.unwrap();
        assert!(first.is_empty());
    }

    #[tokio::test]
    async fn test_noop_never_stores() {
        let adapter = NoopPersistence;
        adapter.save("k", &json!(1)).await.unwrap();
        assert_eq!(adapter.load("k").await.unwrap(), None);
        assert!(adapter.keys().await.unwrap().is_empty());
    }
}
