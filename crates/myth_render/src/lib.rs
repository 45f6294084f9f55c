//! Descriptor management, lifetime caches and the command context of the
//! Myth GPU layer.
//!
//! - [`descriptor`]: staging and shader-visible descriptor heaps
//! - [`cache`]: the age-based [`LifetimeCache`]
//! - [`pipeline`]: pipeline keys, root layouts, vertex layouts, programs
//! - [`context`]: the deferred-binding [`CommandContext`]
//! - [`registry`]: [`GpuCaches`], the explicitly owned cache registry
//! - [`device`]: [`GpuDevice`], the id-based façade over all of the above
//! - [`headless`]: a recording backend without a GPU

pub mod backend;
pub mod cache;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod headless;
pub mod pipeline;
pub mod registry;

pub use backend::{
    CommandRecorder, DescriptorBackend, DescriptorHeapInfo, FenceBackend, GpuBackend, HeapBackend,
    IndexBufferView, PipelineBackend, ResourceBarrier, ResourceState, VertexBufferView,
};
pub use cache::LifetimeCache;
pub use context::{
    BoundProgram, BoundTarget, CommandContext, CommandStatus, ContextFlags, ContextState, ContextStats,
    DirtyFlags, RealizeContext,
};
pub use descriptor::view::{SamplerDescription, ViewDescription, ViewKind};
pub use descriptor::{
    DescriptorHeap, DescriptorHeapAllocationManager, DescriptorKind, DescriptorRange, DescriptorStats,
    DescriptorTable, DescriptorTableKey, HeapFlavor, TableAllocation,
};
pub use device::{DeviceStats, GpuDevice};
pub use headless::{DescriptorContent, HeadlessBackend, HeadlessCounters, RecordedCommand};
pub use registry::{CacheStats, CacheSweep, GpuCaches};
