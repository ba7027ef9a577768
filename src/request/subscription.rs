//! Request Subscription
//!
//! A component-scoped handle: starting a new request through it abandons
//! whatever the previous one was still waiting for.

use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::{FetchError, Result};
use crate::request::cache::Tracker;
use crate::request::{Fetched, RequestCache, RequestOptions};

/// Clones share the same "current request" slot.
#[derive(Debug, Clone)]
pub struct Subscription {
    cache: RequestCache,
    current: Arc<Tracker>,
}

impl Subscription {
    pub(crate) fn new(cache: RequestCache) -> Self {
        Self {
            cache,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Supersedes the previous request, then loads like [`RequestCache::load`].
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
        self.cancel();
        self.cache
            .load_tracked(resource, params, options, fetcher, Some(&self.current))
            .await
    }

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

    /// Lets go of the last fetch this subscription started or joined. A
    /// pending wait resolves to `Cancelled` and the fetch is cancelled unless
    /// another caller is still waiting on it. Returns whether the fetch was
    /// still running. Call it when the owner goes away.
    pub fn cancel(&self) -> bool {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match previous {
            Some(tracked) => self.cache.release(tracked),
            None => false,
        }
    }
}
