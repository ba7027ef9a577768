//! Pagination Module
//!
//! Accumulates successive pages of one resource into a single list.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{CacheError, FetchError, Result};
use crate::request::{RequestCache, RequestOptions, Subscription};

/// What the page fetcher is asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub page: u64,
    pub page_size: usize,
    pub params: Value,
}

#[derive(Debug)]
struct PageState {
    items: Vec<Value>,
    next_page: u64,
    has_more: bool,
    loading: bool,
    generation: u64,
}

impl PageState {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            next_page: 0,
            has_more: true,
            loading: false,
            generation: 0,
        }
    }
}

// == Paginator ==
/// Pages are fetched through the request cache, so each page is cached and
/// de-duplicated like any other request. A reset bumps the generation and
/// supersedes any page still loading from before it, which is never cached.
pub struct Paginator<F> {
    requests: Subscription,
    resource: String,
    params: Value,
    page_size: usize,
    fetcher: F,
    state: Mutex<PageState>,
}

impl<F> std::fmt::Debug for Paginator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paginator")
            .field("resource", &self.resource)
            .field("page_size", &self.page_size)
            .field("state", &*self.lock())
            .finish()
    }
}

impl<F> Paginator<F> {
    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<F, Fut> Paginator<F>
where
    F: Fn(PageRequest) -> Fut,
    Fut: Future<Output = std::result::Result<Value, FetchError>> + Send + 'static,
{
    pub fn new(
        cache: RequestCache,
        resource: impl Into<String>,
        params: Value,
        page_size: usize,
        fetcher: F,
    ) -> Self {
        Self {
            requests: cache.subscribe(),
            resource: resource.into(),
            params,
            page_size: page_size.max(1),
            fetcher,
            state: Mutex::new(PageState::new()),
        }
    }

    // == Reset ==
    /// Drops everything accumulated and loads page zero.
    pub async fn reset(&self) -> Result<Vec<Value>> {
        self.restart(RequestOptions::default()).await
    }

    /// Like [`reset`](Self::reset), but page zero bypasses the cache.
    pub async fn refresh(&self) -> Result<Vec<Value>> {
        self.restart(RequestOptions::forced()).await
    }

    // == Load More ==
    /// Appends the next page. Returns how many items were added; zero when
    /// there is nothing more or a load is already running.
    pub async fn load_more(&self) -> Result<usize> {
        let (page, generation) = {
            let mut state = self.lock();
            if !state.has_more || state.loading {
                return Ok(0);
            }
            state.loading = true;
            (state.next_page, state.generation)
        };

        let outcome = self.fetch_page(page, RequestOptions::default()).await;

        let mut state = self.lock();
        if state.generation != generation {
            debug!(resource = %self.resource, page, "Discarding page loaded before reset");
            return Err(CacheError::Cancelled);
        }
        state.loading = false;
        let items = outcome?;
        let added = items.len();
        state.has_more = added == self.page_size;
        state.next_page = page + 1;
        state.items.extend(items);
        Ok(added)
    }

    /// Everything accumulated so far.
    pub fn items(&self) -> Vec<Value> {
        self.lock().items.clone()
    }

    pub fn has_more(&self) -> bool {
        self.lock().has_more
    }

    /// Number of pages accumulated.
    pub fn pages_loaded(&self) -> u64 {
        self.lock().next_page
    }

    async fn restart(&self, options: RequestOptions) -> Result<Vec<Value>> {
        let generation = {
            let mut state = self.lock();
            let generation = state.generation + 1;
            *state = PageState {
                generation,
                loading: true,
                ..PageState::new()
            };
            generation
        };

        let outcome = self.fetch_page(0, options).await;

        let mut state = self.lock();
        if state.generation != generation {
            return Err(CacheError::Cancelled);
        }
        state.loading = false;
        let items = outcome?;
        state.has_more = items.len() == self.page_size;
        state.next_page = 1;
        state.items = items.clone();
        Ok(items)
    }

    async fn fetch_page(&self, page: u64, options: RequestOptions) -> Result<Vec<Value>> {
        let params = page_params(&self.params, page, self.page_size);
        let request = PageRequest {
            page,
            page_size: self.page_size,
            params: self.params.clone(),
        };
        let fetcher = &self.fetcher;
        let value = self
            .requests
            .request(&self.resource, &params, options, move || fetcher(request))
            .await?;

        match value {
            Value::Array(items) => Ok(items),
            other => Err(CacheError::InvalidRequest(format!(
                "page {} of {} is not a list: {}",
                page, self.resource, other
            ))),
        }
    }
}

/// Request params for one page: object params gain `page` and `pageSize`,
/// anything else is nested under `query`.
fn page_params(params: &Value, page: u64, page_size: usize) -> Value {
    match params {
        Value::Object(map) => {
            let mut map = map.clone();
            map.insert("page".to_string(), json!(page));
            map.insert("pageSize".to_string(), json!(page_size));
            Value::Object(map)
        }
        Value::Null => json!({ "page": page, "pageSize": page_size }),
        other => json!({ "page": page, "pageSize": page_size, "query": other }),
    }
}
