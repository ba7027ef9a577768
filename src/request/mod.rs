//! Request Module
//!
//! Keyed request cache: fetch de-duplication, cancellation, pagination
//! and auto refresh on top of the shared store.

mod cache;
mod key;
mod pagination;
mod refresh;
mod subscription;

pub use cache::{DataSource, Fetched, RequestCache, RequestOptions};
pub use key::{canonical_json, request_key, DATA_PREFIX};
pub use pagination::{PageRequest, Paginator};
pub use subscription::Subscription;
