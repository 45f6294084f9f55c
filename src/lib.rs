#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! GPU memory, descriptor and command-state management.
//!
//! This crate re-exports the workspace members:
//!
//! - [`core`]: errors, handles, usage classes and settings
//! - [`memory`]: arena sub-allocators, heap pages, the resource allocation
//!   manager
//! - [`render`]: descriptor heaps, lifetime caches, the command context and
//!   the [`GpuDevice`] façade
//!
//! Most users only need the [`prelude`].

pub use myth_core as core;
pub use myth_memory as memory;
pub use myth_render as render;

pub use myth_core::{ArenaStrategy, ErrorCode, GpuError, GpuSettings, MemoryBudget, MemoryUsageClass, Result};
pub use myth_memory::{ResourceAllocationManager, ResourceDescription};
pub use myth_render::{
    CommandContext, DescriptorHeapAllocationManager, GpuBackend, GpuDevice, HeadlessBackend, LifetimeCache,
};

pub mod prelude {
    pub use myth_core::ids::{
        ResourceId, ResourceViewId, SamplerId, ShaderProgramId, VertexLayoutId,
    };
    pub use myth_core::{ArenaStrategy, GpuError, GpuSettings, MemoryBudget, MemoryUsageClass, Result};
    pub use myth_memory::ResourceDescription;
    pub use myth_render::pipeline::{
        BindType, ResourceCounts, ShaderProgramDescription, VertexAttribute, VertexBinding, VertexLayout,
    };
    pub use myth_render::{
        ContextFlags, GpuBackend, GpuDevice, HeadlessBackend, ResourceState, SamplerDescription, ViewDescription,
    };
}
