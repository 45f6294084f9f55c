//! GPU memory management for the Myth GPU layer.
//!
//! - [`arena`]: linear, buddy and free-list sub-allocators
//! - [`page`]: heap pages and their allocators
//! - [`manager`]: [`ResourceAllocationManager`], paging per usage class and
//!   deferred release through per-frame garbage queues
//! - [`backend`]: the [`HeapBackend`] capability a native backend implements

pub mod arena;
pub mod backend;
pub mod manager;
pub mod page;
mod scratch;

pub use arena::{BuddyArena, FreeListArena, LinearArena, SubAllocation, SubAllocator, create_arena};
pub use backend::{AllocationInfo, HeapBackend, ResourceDescription, ResourceDimension};
pub use manager::{MemoryStats, ResourceAllocationManager};
pub use page::{Allocation, HeapPage, PagedResourceAllocator};
pub use scratch::ScratchAllocation;
