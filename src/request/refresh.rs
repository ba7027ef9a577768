//! Auto Refresh
//!
//! Periodic forced refetch for resources whose policy asks for it.

use std::future::Future;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::request::{request_key, RequestCache, RequestOptions};
use crate::visibility::VisibilityState;

impl RequestCache {
    /// Spawns a task that refetches `resource` + `params` at the policy's
    /// refresh interval, skipping ticks while `visibility` reports hidden.
    ///
    /// Returns `None` when the resource has no auto-refresh policy. Abort the
    /// handle to stop refreshing.
    pub fn spawn_auto_refresh<F, Fut>(
        &self,
        resource: impl Into<String>,
        params: Value,
        fetcher: F,
        visibility: Option<watch::Receiver<VisibilityState>>,
    ) -> Option<JoinHandle<()>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        let resource = resource.into();
        let key = request_key(&resource, &params);
        let policy = self.policies().get_policy(&key);
        if !policy.auto_refresh {
            return None;
        }
        let period = policy.refresh_interval()?;

        let cache = self.clone();
        info!(key = %key, ?period, "Auto refresh scheduled");

        Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let visible = visibility.as_ref().map_or(true, |rx| rx.borrow().visible);
                if !visible {
                    debug!(key = %key, "Hidden; skipping auto refresh");
                    continue;
                }

                match cache
                    .request(&resource, &params, RequestOptions::forced(), || fetcher())
                    .await
                {
                    Ok(_) => debug!(key = %key, "Auto refresh complete"),
                    Err(err) if err.is_cancelled() => debug!(key = %key, "Auto refresh cancelled"),
                    Err(err) => warn!(key = %key, error = %err, "Auto refresh failed"),
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{shared, CacheStore};
    use crate::clock::{system_clock, SharedClock};
    use crate::persistence::{DurableTier, NoopPersistence};
    use crate::policy::PolicyRegistry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const MINUTE: Duration = Duration::from_secs(60);

    fn cache() -> RequestCache {
        let clock: SharedClock = system_clock();
        let store = shared(CacheStore::new(100, 60_000).with_clock(clock.clone()));
        RequestCache::new(
            store,
            Arc::new(PolicyRegistry::builtin()),
            DurableTier::new(Arc::new(NoopPersistence), clock),
        )
    }

    fn counting(calls: Arc<AtomicUsize>) -> impl Fn() -> futures::future::Ready<Result<Value, FetchError>> + Send + Sync + 'static {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            futures::future::ready(Ok(json!({ "refresh": n })))
        }
    }

    #[tokio::test]
    async fn test_no_policy_no_task() {
        let calls = Arc::new(AtomicUsize::new(0));
        assert!(cache()
            .spawn_auto_refresh("customers", Value::Null, counting(calls), None)
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_on_interval() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let task = cache
            .spawn_auto_refresh("inventory", Value::Null, counting(calls.clone()), None)
            .unwrap();

        tokio::time::sleep(MINUTE / 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(MINUTE * 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let latest = cache
            .request("inventory", &Value::Null, RequestOptions::default(), || async {
                Ok(json!("unexpected fetch"))
            })
            .await
            .unwrap();
        assert_eq!(latest, json!({ "refresh": 2 }));
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_ticks_are_skipped() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let (visibility, watcher) = watch::channel(VisibilityState::BACKGROUND);
        let task = cache
            .spawn_auto_refresh("dashboard", Value::Null, counting(calls.clone()), Some(watcher))
            .unwrap();

        tokio::time::sleep(MINUTE * 11).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        visibility.send_replace(VisibilityState::FOREGROUND);
        tokio::time::sleep(MINUTE * 5).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        task.abort();
    }
}
