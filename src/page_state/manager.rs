//! Page State Manager Module
//!
//! Keyed UI state (active tab, form snapshot, scroll position) layered over
//! the in-memory store with a durable mirror.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::cache::{SetOptions, SharedStore};
use crate::config::DEFAULT_PAGE_STATE_MAX_AGE_MS;
use crate::error::Result;
use crate::persistence::DurableTier;
use crate::policy::{PolicyDescriptor, PolicyRegistry};

pub const PAGE_STATE_PREFIX: &str = "page_state_";
pub const TAB_BACKUP_PREFIX: &str = "tab_backup_";
pub const FORM_PREFIX: &str = "form_";

/// Named sub-state of a page (`activeTab`, `formData`, `scrollPosition`, `lastSaved`).
pub type PageFields = Map<String, Value>;

pub const ACTIVE_TAB: &str = "activeTab";
pub const FORM_DATA: &str = "formData";
pub const LAST_SAVED: &str = "lastSaved";

pub fn page_state_key(page_key: &str) -> String {
    format!("{}{}", PAGE_STATE_PREFIX, page_key)
}

pub fn tab_backup_key(page_key: &str) -> String {
    format!("{}{}", TAB_BACKUP_PREFIX, page_key)
}

pub fn form_key(form: &str) -> String {
    format!("{}{}", FORM_PREFIX, form)
}

// == Page State Manager ==
/// Reads and merges page state. Cheap to clone; clones share everything.
///
/// Page state and tab backups live for `state_ttl_ms` regardless of the
/// resource's data TTL; persistence and priority still follow the resource.
#[derive(Debug, Clone)]
pub struct PageStateManager {
    store: SharedStore,
    policies: Arc<PolicyRegistry>,
    durable: DurableTier,
    state_ttl_ms: u64,
}

impl PageStateManager {
    pub fn new(store: SharedStore, policies: Arc<PolicyRegistry>, durable: DurableTier) -> Self {
        Self {
            store,
            policies,
            durable,
            state_ttl_ms: DEFAULT_PAGE_STATE_MAX_AGE_MS,
        }
    }

    /// Lifetime of page state and tab backups, normally the cleanup age limit.
    pub fn with_state_ttl(mut self, state_ttl_ms: u64) -> Self {
        self.state_ttl_ms = state_ttl_ms;
        self
    }

    // == Save Page State ==
    /// Shallow-merges `partial` into the page's fields and stamps `lastSaved`.
    ///
    /// Writes through to the store; mirrors to the durable tier when the
    /// page's policy persists. Returns the merged fields.
    ///
    /// The durable copy is looked up before the store lock is taken; the
    /// merge itself reads and writes under one write guard, so concurrent
    /// saves of the same page never lose each other's fields.
    pub async fn save_page_state(&self, page_key: &str, partial: PageFields) -> Result<PageFields> {
        let key = page_state_key(page_key);
        let policy = self.policies.get_policy(&key);

        let seed = match self.peek_page_state(page_key).await {
            Some(_) => None,
            None => self
                .durable
                .restore(&key)
                .await
                .and_then(|record| record.value.as_object().cloned()),
        };

        let (fields, value) = {
            let mut store = self.store.write().await;
            let mut fields = store
                .peek(&key)
                .and_then(|entry| entry.value.as_object().cloned())
                .or(seed)
                .unwrap_or_default();
            fields.extend(partial);
            fields.insert(LAST_SAVED.to_string(), json!(store.now_ms()));
            let value = Value::Object(fields.clone());
            store.set(key.clone(), value.clone(), self.state_options(&policy))?;
            (fields, value)
        };

        if policy.persist {
            self.durable.mirror(key, value, self.state_ttl_ms);
        }
        Ok(fields)
    }

    // == Peek Page State ==
    /// In-memory page state only.
    pub async fn peek_page_state(&self, page_key: &str) -> Option<PageFields> {
        let store = self.store.read().await;
        store
            .peek(&page_state_key(page_key))
            .and_then(|entry| entry.value.as_object().cloned())
    }

    // == Get Page State ==
    /// In-memory page state, falling back to the durable copy. A durable hit
    /// is written back to the store with its remaining TTL.
    pub async fn get_page_state(&self, page_key: &str) -> Option<PageFields> {
        if let Some(fields) = self.peek_page_state(page_key).await {
            return Some(fields);
        }

        let key = page_state_key(page_key);
        let value = self.rehydrate(&key).await?;
        value.as_object().cloned()
    }

    /// Removes the page's state from both tiers, including the tab backup.
    pub async fn clear_page_state(&self, page_key: &str) {
        let key = page_state_key(page_key);
        let backup = tab_backup_key(page_key);
        {
            let mut store = self.store.write().await;
            store.delete(&key);
        }
        self.durable.forget(&key).await;
        self.durable.forget(&backup).await;
    }

    // == Persistent Tab State ==
    /// Active tab: page state, then the durable backup key, then `default`.
    pub async fn active_tab(&self, page_key: &str, default: &str) -> String {
        if let Some(tab) = self
            .get_page_state(page_key)
            .await
            .and_then(|fields| fields.get(ACTIVE_TAB).and_then(Value::as_str).map(str::to_string))
        {
            return tab;
        }

        self.durable
            .restore(&tab_backup_key(page_key))
            .await
            .and_then(|record| record.value.as_str().map(str::to_string))
            .unwrap_or_else(|| default.to_string())
    }

    /// Records the active tab in page state and in the durable backup key.
    pub async fn set_active_tab(&self, page_key: &str, tab: &str) -> Result<()> {
        let mut partial = PageFields::new();
        partial.insert(ACTIVE_TAB.to_string(), json!(tab));
        self.save_page_state(page_key, partial).await?;

        self.durable.mirror(tab_backup_key(page_key), json!(tab), self.state_ttl_ms);
        Ok(())
    }

    // == Form Drafts ==
    /// Stores a form snapshot under `form_<form>` with the form's policy.
    pub async fn save_form_draft(&self, form: &str, data: Value) -> Result<()> {
        let key = form_key(form);
        let policy = self.policies.get_policy(&key);

        let value = {
            let mut store = self.store.write().await;
            let value = json!({ FORM_DATA: data, LAST_SAVED: store.now_ms() });
            store.set(key.clone(), value.clone(), policy_options(&policy))?;
            value
        };

        if policy.persist {
            self.durable.mirror(key.clone(), value, policy.ttl_ms);
        }
        debug!(form = %form, "Form draft saved");
        Ok(())
    }

    /// Last saved form snapshot, from memory or the durable tier.
    pub async fn load_form_draft(&self, form: &str) -> Option<Value> {
        let key = form_key(form);
        let in_memory = {
            let store = self.store.read().await;
            store.peek(&key).map(|entry| entry.value.clone())
        };
        let value = match in_memory {
            Some(value) => value,
            None => self.rehydrate(&key).await?,
        };
        value.get(FORM_DATA).cloned()
    }

    /// Drops a form snapshot from both tiers, e.g. after a successful submit.
    pub async fn discard_form_draft(&self, form: &str) {
        let key = form_key(form);
        {
            let mut store = self.store.write().await;
            store.delete(&key);
        }
        self.durable.forget(&key).await;
    }

    // == Cleanup ==
    /// Drops page states older than `max_age_ms`, then the oldest beyond
    /// `max_entries`. Removed keys are also dropped from the durable tier.
    /// Returns how many page states were removed.
    pub async fn cleanup(&self, max_age_ms: u64, max_entries: usize) -> usize {
        let removed: Vec<String> = {
            let mut store = self.store.write().await;
            let now = store.now_ms();

            let mut pages: Vec<(String, u64)> = store
                .entries_with_prefix(PAGE_STATE_PREFIX)
                .map(|entry| {
                    let saved = entry
                        .value
                        .get(LAST_SAVED)
                        .and_then(Value::as_u64)
                        .unwrap_or(entry.timestamp);
                    (entry.key.clone(), saved)
                })
                .collect();
            // Newest first
            pages.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

            let doomed: Vec<String> = pages
                .iter()
                .enumerate()
                .filter(|(rank, (_, saved))| now.saturating_sub(*saved) > max_age_ms || *rank >= max_entries)
                .map(|(_, (key, _))| key.clone())
                .collect();

            for key in &doomed {
                store.delete(key);
            }
            doomed
        };

        for key in &removed {
            self.durable.forget_later(key.clone());
        }
        if !removed.is_empty() {
            info!(removed = removed.len(), "Page state cleanup");
        }
        removed.len()
    }

    /// Waits for queued durable writes, e.g. before shutdown.
    pub async fn flush(&self) {
        self.durable.flush().await;
    }

    /// Loads a durable record and writes it back into the store with its
    /// remaining TTL. A value written to the store meanwhile wins.
    async fn rehydrate(&self, key: &str) -> Option<Value> {
        let record = self.durable.restore(key).await?;
        let mut store = self.store.write().await;
        if let Some(current) = store.peek(key) {
            return Some(current.value.clone());
        }
        let remaining = record.ttl_ms.saturating_sub(store.now_ms().saturating_sub(record.timestamp));
        let priority = self.policies.get_priority(key);
        if let Err(err) = store.set(
            key.to_string(),
            record.value.clone(),
            SetOptions::ttl(remaining).with_priority(priority),
        ) {
            debug!(key = %key, error = %err, "Could not rehydrate durable value");
        }
        Some(record.value)
    }

    fn state_options(&self, policy: &PolicyDescriptor) -> SetOptions {
        SetOptions::ttl(self.state_ttl_ms).with_priority(policy.priority)
    }
}

fn policy_options(policy: &PolicyDescriptor) -> SetOptions {
    SetOptions::ttl(policy.ttl_ms).with_priority(policy.priority)
}
