//! Request Cache Module
//!
//! Caches the results of async fetches keyed by resource and parameters,
//! with at most one fetch in flight per key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{abortable, AbortHandle, Abortable, Aborted, BoxFuture, Shared};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{SetOptions, SharedStore};
use crate::error::{CacheError, FetchError, Result};
use crate::persistence::DurableTier;
use crate::policy::{PolicyDescriptor, PolicyRegistry, Priority};
use crate::request::key::request_key;
use crate::request::Subscription;

type SharedFetch = Shared<BoxFuture<'static, std::result::Result<Value, FetchError>>>;

// == Request Options ==
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// TTL override; the resource policy applies otherwise
    pub ttl_ms: Option<u64>,
    /// Age at which a cached value is refreshed in the background; half the TTL otherwise
    pub stale_ms: Option<u64>,
    /// Fetch deadline; running past it cancels the fetch
    pub timeout: Option<Duration>,
    /// Skip the cache and fetch
    pub force: bool,
}

impl RequestOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn with_stale(mut self, stale_ms: u64) -> Self {
        self.stale_ms = Some(stale_ms);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// == Data Source ==
/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Fetched just now
    Network,
    /// Cached and fresh
    CacheFresh,
    /// Cached but stale; a background refresh was started
    CacheStale,
    /// Seeded from the durable tier; a background refresh was started
    Durable,
}

/// A value plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub value: Value,
    pub source: DataSource,
}

struct InFlight {
    id: u64,
    fetch: SharedFetch,
    abort: AbortHandle,
    cancelled: Arc<AtomicBool>,
    /// Callers awaiting the result plus subscriptions tracking it
    waiters: usize,
}

impl InFlight {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.abort.abort();
    }
}

/// Resolved write parameters for one key.
#[derive(Debug, Clone, Copy)]
struct WritePlan {
    ttl_ms: u64,
    priority: Priority,
    persist: bool,
    timeout: Option<Duration>,
}

impl WritePlan {
    fn new(policy: &PolicyDescriptor, options: &RequestOptions) -> Self {
        Self {
            ttl_ms: options.ttl_ms.unwrap_or(policy.ttl_ms),
            priority: policy.priority,
            persist: policy.persist,
            timeout: options.timeout,
        }
    }
}

/// A subscription's hold on one in-flight fetch.
#[derive(Debug)]
pub(crate) struct Tracked {
    key: String,
    id: u64,
    /// Detaches the subscription's own wait without touching the fetch
    wait: Option<AbortHandle>,
}

/// Slot a subscription uses to remember the fetch it is waiting on.
pub(crate) type Tracker = Mutex<Option<Tracked>>;

/// Who `begin` registers on the fetch.
enum Waiter<'a> {
    /// Background refresh that nobody awaits
    Detached,
    /// Plain caller awaiting the result
    Caller,
    /// Subscription slot, with the handle that detaches its wait if it awaits
    Tracked(&'a Tracker, Option<AbortHandle>),
}

impl<'a> Waiter<'a> {
    fn background(tracker: Option<&'a Tracker>) -> Self {
        match tracker {
            Some(slot) => Waiter::Tracked(slot, None),
            None => Waiter::Detached,
        }
    }
}

/// Counts a plain caller as a waiter until its future finishes or is dropped.
struct WaiterGuard<'a> {
    inner: &'a Inner,
    key: String,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.inner.leave(&self.key, self.id);
    }
}

struct Inner {
    store: SharedStore,
    policies: Arc<PolicyRegistry>,
    durable: DurableTier,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_id: AtomicU64,
    fetches_started: AtomicU64,
}

// == Request Cache ==
/// Cheap to clone; clones share the same in-flight table.
#[derive(Clone)]
pub struct RequestCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("in_flight", &self.in_flight_count())
            .field("fetches_started", &self.fetches_started())
            .finish()
    }
}

impl RequestCache {
    pub fn new(store: SharedStore, policies: Arc<PolicyRegistry>, durable: DurableTier) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                policies,
                durable,
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                fetches_started: AtomicU64::new(0),
            }),
        }
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.inner.policies
    }

    // == Request ==
    /// Returns the value for `resource` + `params`, fetching on a miss.
    ///
    /// Fresh hits never call `fetcher`. Stale hits return immediately and
    /// refresh in the background. Concurrent calls for the same key share a
    /// single fetch. `fetcher` should only build the future; it is called
    /// while the in-flight table is locked.
    pub async fn request<F, Fut>(
        &self,
        resource: &str,
        params: &Value,
        options: RequestOptions,
        fetcher: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, FetchError>> + Send + 'static,
    {
        self.load(resource, params, options, fetcher)
            .await
            .map(|fetched| fetched.value)
    }

    /// Same as [`request`](Self::request), deserializing the value.
    pub async fn request_as<T, F, Fut>(
        &self,
        resource: &str,
        params: &Value,
        options: RequestOptions,
        fetcher: F,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, FetchError>> + Send + 'static,
    {
        let value = self.request(resource, params, options, fetcher).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Same as [`request`](Self::request), also reporting where the value came from.
    pub async fn load<F, Fut>(
        &self,
        resource: &str,
        params: &Value,
        options: RequestOptions,
        fetcher: F,
    ) -> Result<Fetched>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, FetchError>> + Send + 'static,
    {
        self.load_tracked(resource, params, options, fetcher, None).await
    }

    pub(crate) async fn load_tracked<F, Fut>(
        &self,
        resource: &str,
        params: &Value,
        options: RequestOptions,
        fetcher: F,
        tracker: Option<&Tracker>,
    ) -> Result<Fetched>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, FetchError>> + Send + 'static,
    {
        let key = request_key(resource, params);
        let policy = self.inner.policies.get_policy(&key);
        let plan = WritePlan::new(&policy, &options);

        if !options.force {
            let stale_ms = options.stale_ms.unwrap_or(plan.ttl_ms / 2);
            let cached = {
                let mut store = self.inner.store.write().await;
                let hit = store.get(&key);
                hit.map(|value| (value, store.is_stale(&key, stale_ms)))
            };

            match cached {
                Some((value, false)) => {
                    return Ok(Fetched {
                        value,
                        source: DataSource::CacheFresh,
                    })
                }
                Some((value, true)) => {
                    debug!(key = %key, "Serving stale value, refreshing in background");
                    self.begin(&key, plan, fetcher, Waiter::background(tracker));
                    return Ok(Fetched {
                        value,
                        source: DataSource::CacheStale,
                    });
                }
                None => {}
            }

            if plan.persist {
                if let Some(value) = self.seed_from_durable(&key, plan).await {
                    debug!(key = %key, "Seeded from durable tier, refreshing in background");
                    self.begin(&key, plan, fetcher, Waiter::background(tracker));
                    return Ok(Fetched {
                        value,
                        source: DataSource::Durable,
                    });
                }
            }
        }

        let value = match tracker {
            Some(slot) => {
                let (handle, registration) = AbortHandle::new_pair();
                let (fetch, _) = self.begin(&key, plan, fetcher, Waiter::Tracked(slot, Some(handle)));
                match Abortable::new(fetch, registration).await {
                    Ok(result) => result?,
                    Err(Aborted) => return Err(CacheError::Cancelled),
                }
            }
            None => {
                let (fetch, id) = self.begin(&key, plan, fetcher, Waiter::Caller);
                let _waiter = WaiterGuard {
                    inner: &self.inner,
                    key: key.clone(),
                    id,
                };
                fetch.await?
            }
        };
        Ok(Fetched {
            value,
            source: DataSource::Network,
        })
    }

    // == Invalidate ==
    /// Forces the next read of every key containing `pattern` to miss:
    /// cancels matching fetches and clears both tiers. Returns the number of
    /// in-memory entries removed.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let cancelled: Vec<String> = {
            let mut table = self.lock_in_flight();
            let keys: Vec<String> = table.keys().filter(|k| k.contains(pattern)).cloned().collect();
            for key in &keys {
                if let Some(flight) = table.remove(key) {
                    flight.cancel();
                }
            }
            keys
        };

        let removed = self.inner.store.write().await.clear(Some(pattern));
        let durable_removed = self.inner.durable.forget_matching(pattern).await;
        debug!(
            pattern = %pattern,
            removed,
            durable_removed,
            cancelled = cancelled.len(),
            "Invalidated cached requests"
        );
        removed
    }

    /// Drops a subscription's hold on fetch `id` for `key`. Its own wait
    /// resolves to `Cancelled`; the fetch itself is cancelled only when
    /// nobody else is waiting on it. Returns whether the fetch was still
    /// running.
    pub(crate) fn release(&self, tracked: Tracked) -> bool {
        if let Some(wait) = &tracked.wait {
            wait.abort();
        }
        let mut table = self.lock_in_flight();
        let remaining = match table.get_mut(&tracked.key) {
            Some(flight) if flight.id == tracked.id => {
                flight.waiters = flight.waiters.saturating_sub(1);
                flight.waiters
            }
            _ => return false,
        };
        if remaining == 0 {
            if let Some(flight) = table.remove(&tracked.key) {
                flight.cancel();
                debug!(key = %tracked.key, "Cancelled superseded fetch");
            }
        } else {
            debug!(key = %tracked.key, remaining, "Superseded waiter detached; fetch continues");
        }
        true
    }

    /// Cancels the in-flight fetch for `resource` + `params`, if any. Callers
    /// waiting on it resolve to `Cancelled` and its result is never cached.
    pub fn cancel(&self, resource: &str, params: &Value) -> bool {
        let key = request_key(resource, params);
        match self.lock_in_flight().remove(&key) {
            Some(flight) => {
                flight.cancel();
                true
            }
            None => false,
        }
    }

    /// A handle whose each request supersedes the one before it.
    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.clone())
    }

    /// Waits for queued durable writes.
    pub async fn flush(&self) {
        self.inner.durable.flush().await;
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock_in_flight().len()
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self, key: &str) -> usize {
        self.lock_in_flight().get(key).map_or(0, |flight| flight.waiters)
    }

    /// How many fetchers have been started since creation.
    pub fn fetches_started(&self) -> u64 {
        self.inner.fetches_started.load(Ordering::SeqCst)
    }

    // == Begin ==
    /// Joins the in-flight fetch for `key` or starts one, returning it with
    /// its id. `waiter` is registered under the same lock. New fetches are
    /// driven by their own task so they complete even if every caller goes
    /// away.
    fn begin<F, Fut>(
        &self,
        key: &str,
        plan: WritePlan,
        fetcher: F,
        waiter: Waiter<'_>,
    ) -> (SharedFetch, u64)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, FetchError>> + Send + 'static,
    {
        let mut table = self.lock_in_flight();
        let joins = match waiter {
            Waiter::Detached => 0,
            _ => 1,
        };

        if let Some(existing) = table.get_mut(key) {
            existing.waiters += joins;
            let joined = (existing.fetch.clone(), existing.id);
            drop(table);
            track(waiter, key, joined.1);
            return joined;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::new(AtomicBool::new(false));
        let (fetch, abort) = abortable(fetcher());
        self.inner.fetches_started.fetch_add(1, Ordering::SeqCst);

        let inner = self.inner.clone();
        let owned_key = key.to_string();
        let flag = cancelled.clone();
        let shared = async move {
            let outcome = match plan.timeout {
                Some(limit) => match tokio::time::timeout(limit, fetch).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        debug!(key = %owned_key, ?limit, "Fetch timed out");
                        flag.store(true, Ordering::SeqCst);
                        Err(Aborted)
                    }
                },
                None => fetch.await,
            };
            let result = match outcome {
                Ok(result) => result,
                Err(Aborted) => Err(FetchError::Cancelled),
            };
            inner.complete(&owned_key, id, &flag, plan, result).await
        }
        .boxed()
        .shared();

        table.insert(
            key.to_string(),
            InFlight {
                id,
                fetch: shared.clone(),
                abort,
                cancelled,
                waiters: joins,
            },
        );
        drop(table);

        track(waiter, key, id);
        tokio::spawn(shared.clone().map(|_| ()));
        (shared, id)
    }

    async fn seed_from_durable(&self, key: &str, plan: WritePlan) -> Option<Value> {
        let record = self.inner.durable.restore(key).await?;
        let mut store = self.inner.store.write().await;
        let age = store.now_ms().saturating_sub(record.timestamp);
        let remaining = record.ttl_ms.min(plan.ttl_ms).saturating_sub(age);
        if let Err(err) = store.set(
            key.to_string(),
            record.value.clone(),
            SetOptions::ttl(remaining).with_priority(plan.priority),
        ) {
            warn!(key = %key, error = %err, "Could not seed value from durable tier");
        }
        Some(record.value)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
        self.inner.lock_in_flight()
    }
}

impl Inner {
    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn leave(&self, key: &str, id: u64) {
        if let Some(flight) = self.lock_in_flight().get_mut(key) {
            if flight.id == id {
                flight.waiters = flight.waiters.saturating_sub(1);
            }
        }
    }

    fn finish(&self, key: &str, id: u64) {
        let mut table = self.lock_in_flight();
        if table.get(key).map(|flight| flight.id) == Some(id) {
            table.remove(key);
        }
    }

    /// Writes a successful result unless the fetch was cancelled. Failures
    /// and cancellations never touch the store.
    async fn complete(
        &self,
        key: &str,
        id: u64,
        cancelled: &AtomicBool,
        plan: WritePlan,
        result: std::result::Result<Value, FetchError>,
    ) -> std::result::Result<Value, FetchError> {
        let value = match result {
            Ok(value) => value,
            Err(FetchError::Cancelled) => {
                debug!(key = %key, "Fetch cancelled; result discarded");
                self.finish(key, id);
                return Err(FetchError::Cancelled);
            }
            Err(err) => {
                warn!(key = %key, error = %err, "Fetch failed");
                self.finish(key, id);
                return Err(err);
            }
        };

        {
            let mut store = self.store.write().await;
            if cancelled.load(Ordering::SeqCst) {
                debug!(key = %key, "Fetch superseded after completion; result discarded");
                drop(store);
                self.finish(key, id);
                return Err(FetchError::Cancelled);
            }
            if let Err(err) = store.set(
                key.to_string(),
                value.clone(),
                SetOptions::ttl(plan.ttl_ms).with_priority(plan.priority),
            ) {
                warn!(key = %key, error = %err, "Fetched value not cached");
            }
        }
        self.finish(key, id);

        if plan.persist {
            self.durable.mirror(key, value.clone(), plan.ttl_ms);
        }
        Ok(value)
    }
}

fn track(waiter: Waiter<'_>, key: &str, id: u64) {
    if let Waiter::Tracked(slot, wait) = waiter {
        let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Tracked {
            key: key.to_string(),
            id,
            wait,
        });
    }
}
