//! Caches of derived GPU objects.
//!
//! - [`LifetimeCache`]: recency list with tick-based eviction, used for
//!   render passes, pipelines and CPU descriptor tables.

mod lifetime;

pub use lifetime::LifetimeCache;
