//! Policy Module
//!
//! Static caching policies: TTL, persistence, refresh interval and priority per resource.

mod priority;
mod registry;

pub use priority::Priority;
pub use registry::{PolicyDescriptor, PolicyRegistry, KEY_NAMESPACES};
