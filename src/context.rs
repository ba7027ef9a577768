//! Cache Context Module
//!
//! Builds one store and hands the same instance to every component.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::cache::{shared, CacheStats, CacheStore, SharedStore, SweepReport};
use crate::clock::{system_clock, SharedClock};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::page_state::PageStateManager;
use crate::persistence::{DurableTier, MemoryPersistence, PersistenceAdapter};
use crate::policy::PolicyRegistry;
use crate::request::RequestCache;
use crate::visibility::{SignalSource, VisibilityController, VisibilityOptions};

/// Result of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub evicted: usize,
    pub page_states_removed: usize,
}

impl From<SweepReport> for MaintenanceReport {
    fn from(report: SweepReport) -> Self {
        Self {
            expired: report.expired,
            evicted: report.evicted,
            page_states_removed: 0,
        }
    }
}

// == Cache Context ==
/// Everything a host needs, wired to a single shared store.
///
/// Cloning is cheap; clones share all state.
#[derive(Debug, Clone)]
pub struct CacheContext {
    config: Arc<Config>,
    clock: SharedClock,
    policies: Arc<PolicyRegistry>,
    store: SharedStore,
    durable: DurableTier,
    page_state: PageStateManager,
    requests: RequestCache,
}

impl CacheContext {
    /// Creates a context from configuration. Loads `policy_file` when set,
    /// otherwise uses the built-in policy table.
    ///
    /// Must be called inside a tokio runtime.
    pub fn from_config(config: Config, adapter: Arc<dyn PersistenceAdapter>) -> Result<Self> {
        let policies = match &config.policy_file {
            Some(path) => load_policies(path)?,
            None => PolicyRegistry::builtin(),
        };
        Ok(Self::with_parts(config, adapter, policies, system_clock()))
    }

    /// Context with the built-in policies and a process-local durable tier.
    pub fn in_memory(config: Config) -> Self {
        Self::with_parts(
            config,
            Arc::new(MemoryPersistence::new()),
            PolicyRegistry::builtin(),
            system_clock(),
        )
    }

    pub fn with_parts(
        config: Config,
        adapter: Arc<dyn PersistenceAdapter>,
        policies: PolicyRegistry,
        clock: SharedClock,
    ) -> Self {
        let policies = Arc::new(policies);
        let store = shared(
            CacheStore::from_config(&config)
                .with_clock(clock.clone())
                .with_policies(policies.clone()),
        );
        let durable = DurableTier::new(adapter, clock.clone());
        let page_state = PageStateManager::new(store.clone(), policies.clone(), durable.clone())
            .with_state_ttl(config.page_state_max_age_ms);
        let requests = RequestCache::new(store.clone(), policies.clone(), durable.clone());

        info!(
            max_entries = config.max_entries,
            max_bytes = config.max_bytes,
            policies = policies.len(),
            "Cache context initialized"
        );

        Self {
            config: Arc::new(config),
            clock,
            policies,
            store,
            durable,
            page_state,
            requests,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn durable(&self) -> &DurableTier {
        &self.durable
    }

    pub fn page_state(&self) -> &PageStateManager {
        &self.page_state
    }

    pub fn requests(&self) -> &RequestCache {
        &self.requests
    }

    /// Builds a visibility controller using the configured throttle.
    pub fn visibility_controller(&self, source: &dyn SignalSource) -> VisibilityController {
        VisibilityController::register(
            source,
            VisibilityOptions::from_config(&self.config),
            self.clock.clone(),
        )
    }

    // == Maintenance ==
    /// Sweeps expired entries, enforces the budgets, then trims page state.
    pub async fn maintain(&self) -> MaintenanceReport {
        let sweep = self.store.write().await.sweep();
        let page_states_removed = self
            .page_state
            .cleanup(self.config.page_state_max_age_ms, self.config.page_state_max_entries)
            .await;

        MaintenanceReport {
            page_states_removed,
            ..MaintenanceReport::from(sweep)
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.read().await.stats()
    }

    /// Empties the store, drops in-flight fetches and wipes durable storage.
    pub async fn clear_all(&self) -> usize {
        let removed = self.requests.invalidate("").await;
        self.durable.clear().await;
        removed
    }

    /// Waits for every queued durable write.
    pub async fn flush(&self) {
        self.durable.flush().await;
    }
}

fn load_policies(path: &Path) -> Result<PolicyRegistry> {
    let json = std::fs::read_to_string(path)
        .map_err(|err| CacheError::Config(format!("cannot read {}: {}", path.display(), err)))?;
    PolicyRegistry::from_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::page_state::PageFields;
    use crate::request::RequestOptions;
    use crate::visibility::{ChannelSignalSource, VisibilityState};
    use serde_json::{json, Value};
    use std::io::Write;

    fn context(clock: &ManualClock) -> CacheContext {
        CacheContext::with_parts(
            Config::default(),
            Arc::new(MemoryPersistence::new()),
            PolicyRegistry::builtin(),
            Arc::new(clock.clone()),
        )
    }

    #[tokio::test]
    async fn test_components_share_one_store() {
        let clock = ManualClock::new(0);
        let ctx = context(&clock);

        ctx.requests()
            .request("orders", &Value::Null, RequestOptions::default(), || async { Ok(json!([1])) })
            .await
            .unwrap();
        let mut fields = PageFields::new();
        fields.insert("activeTab".into(), json!("list"));
        ctx.page_state().save_page_state("orders", fields).await.unwrap();

        assert_eq!(ctx.stats().await.total_entries, 2);
        let store = ctx.store();
        let store = store.read().await;
        assert!(store.peek("data_orders").is_some());
        assert!(store.peek("page_state_orders").is_some());
    }

    #[tokio::test]
    async fn test_maintain_sweeps_and_trims() {
        let clock = ManualClock::new(0);
        let config = Config {
            page_state_max_entries: 1,
            ..Config::default()
        };
        let ctx = CacheContext::with_parts(
            config,
            Arc::new(MemoryPersistence::new()),
            PolicyRegistry::builtin(),
            Arc::new(clock.clone()),
        );

        ctx.requests()
            .request("inventory", &Value::Null, RequestOptions::default(), || async { Ok(json!(5)) })
            .await
            .unwrap();
        for page in ["reports", "orders"] {
            ctx.page_state().save_page_state(page, PageFields::new()).await.unwrap();
            clock.advance(1);
        }

        // inventory lives 2 minutes; page state outlives it, but only one is kept
        clock.advance(3 * 60 * 1000);
        assert_eq!(
            ctx.maintain().await,
            MaintenanceReport { expired: 1, evicted: 0, page_states_removed: 1 }
        );
        assert!(ctx.page_state().peek_page_state("reports").await.is_none());
        assert!(ctx.page_state().peek_page_state("orders").await.is_some());

        // Page state expires at the configured age limit
        clock.advance(ctx.config().page_state_max_age_ms);
        assert_eq!(
            ctx.maintain().await,
            MaintenanceReport { expired: 1, evicted: 0, page_states_removed: 0 }
        );
        assert!(ctx.store().read().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_wipes_both_tiers() {
        let backing = MemoryPersistence::new();
        let ctx = CacheContext::with_parts(
            Config::default(),
            Arc::new(backing.clone()),
            PolicyRegistry::builtin(),
            Arc::new(ManualClock::new(0)),
        );

        ctx.requests()
            .request("customers", &Value::Null, RequestOptions::default(), || async { Ok(json!("c")) })
            .await
            .unwrap();
        ctx.flush().await;
        assert_eq!(backing.len(), 1);

        assert_eq!(ctx.clear_all().await, 1);
        assert!(backing.is_empty());
        assert!(ctx.store().read().await.is_empty());
    }

    #[tokio::test]
    async fn test_policy_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"policies": [{{"resource_key": "tickets", "ttl_ms": 1000, "persist": false, "priority": "critical"}}]}}"#
        )
        .unwrap();

        let config = Config {
            policy_file: Some(file.path().to_path_buf()),
            ..Config::default()
        };
        let ctx = CacheContext::from_config(config, Arc::new(MemoryPersistence::new())).unwrap();

        assert_eq!(ctx.policies().get_policy("data_tickets").ttl_ms, 1000);
    }

    #[tokio::test]
    async fn test_missing_policy_file_is_config_error() {
        let config = Config {
            policy_file: Some("/nonexistent/policies.json".into()),
            ..Config::default()
        };

        let err = CacheContext::from_config(config, Arc::new(MemoryPersistence::new())).unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[tokio::test]
    async fn test_visibility_controller_uses_config() {
        let ctx = context(&ManualClock::new(0));
        let (_signals, source) = ChannelSignalSource::new(VisibilityState::BACKGROUND);

        let controller = ctx.visibility_controller(&source);
        assert_eq!(controller.state(), VisibilityState::BACKGROUND);
    }
}
