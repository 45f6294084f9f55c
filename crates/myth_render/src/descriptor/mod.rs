//! Descriptor heaps and tables.
//!
//! A descriptor is a fixed-size record telling the GPU how to read a
//! resource. Descriptors live in heaps of one [`DescriptorKind`]:
//!
//! ```text
//!  staging (CPU only, persistent)         shader-visible (one per frame)
//!  ┌──────────────────────────┐           ┌──────────────────────────┐
//!  │ views, samplers, tables  │  upload   │ tables read by shaders   │
//!  │ free-list arena          │ ────────> │ linear arena, reset/frame│
//!  └──────────────────────────┘           └──────────────────────────┘
//! ```
//!
//! Tables are assembled in staging heaps and copied into the current
//! frame's shader-visible heap once per frame.

mod heap;
mod manager;
pub mod view;

pub use heap::{DescriptorHeap, HeapFlavor};
pub use manager::{DescriptorHeapAllocationManager, DescriptorStats, TableAllocation};

use smallvec::SmallVec;

use myth_core::ids::{CpuDescriptorHandle, GpuDescriptorHandle};

/// Kind of descriptor a heap stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorKind {
    /// Constant buffers, shader resources and unordered access views.
    CbvSrvUav,
    Sampler,
    RenderTarget,
    DepthStencil,
}

impl DescriptorKind {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [
        Self::CbvSrvUav,
        Self::Sampler,
        Self::RenderTarget,
        Self::DepthStencil,
    ];

    /// Kinds that have a shader-visible counterpart, in visible-slot order.
    pub const SHADER_VISIBLE: [Self; 2] = [Self::CbvSrvUav, Self::Sampler];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::CbvSrvUav => 0,
            Self::Sampler => 1,
            Self::RenderTarget => 2,
            Self::DepthStencil => 3,
        }
    }

    /// Slot of the kind among the shader-visible heaps.
    #[inline]
    #[must_use]
    pub const fn visible_index(self) -> Option<usize> {
        match self {
            Self::CbvSrvUav => Some(0),
            Self::Sampler => Some(1),
            Self::RenderTarget | Self::DepthStencil => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_shader_visible(self) -> bool {
        self.visible_index().is_some()
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CbvSrvUav => "CbvSrvUav",
            Self::Sampler => "Sampler",
            Self::RenderTarget => "RenderTarget",
            Self::DepthStencil => "DepthStencil",
        }
    }
}

/// A contiguous run of descriptors in one heap.
///
/// `base_gpu` is set only for tables that live in a shader-visible heap.
/// Staging tables are never bound directly; their contents reach the GPU
/// through a copy into a shader-visible table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorTable {
    pub kind: DescriptorKind,
    pub flavor: HeapFlavor,
    /// Index of the staging heap of this kind, or the frame index for
    /// shader-visible tables.
    pub heap: u32,
    /// Offset in descriptors from the start of the heap.
    pub offset: u32,
    pub count: u32,
    /// Bytes between consecutive descriptors.
    pub stride: u32,
    pub base_cpu: CpuDescriptorHandle,
    pub base_gpu: Option<GpuDescriptorHandle>,
}

impl DescriptorTable {
    /// CPU handle of descriptor `index` of the table.
    #[inline]
    #[must_use]
    pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        debug_assert!(index < self.count);
        self.base_cpu.offset(index, self.stride)
    }

    /// The whole table as a copy range.
    #[inline]
    #[must_use]
    pub fn range(&self) -> DescriptorRange {
        DescriptorRange {
            start: self.base_cpu,
            count: self.count,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_shader_visible(&self) -> bool {
        self.flavor == HeapFlavor::ShaderVisible
    }
}

/// Cache key of a staging table: its kind and the descriptors copied into
/// it, in table order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorTableKey {
    pub kind: DescriptorKind,
    pub sources: SmallVec<[CpuDescriptorHandle; 32]>,
}

impl DescriptorTableKey {
    #[must_use]
    pub fn new(kind: DescriptorKind, sources: &[CpuDescriptorHandle]) -> Self {
        Self {
            kind,
            sources: SmallVec::from_slice(sources),
        }
    }
}

/// Source or destination range of a descriptor copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub start: CpuDescriptorHandle,
    pub count: u32,
}

/// Builds copy ranges for scattered handles, merging runs that are
/// adjacent in memory.
#[must_use]
pub fn coalesce_ranges(handles: &[CpuDescriptorHandle], stride: u32) -> Vec<DescriptorRange> {
    let mut ranges: Vec<DescriptorRange> = Vec::with_capacity(handles.len());
    for &handle in handles {
        match ranges.last_mut() {
            Some(last) if last.start.offset(last.count, stride) == handle => last.count += 1,
            _ => ranges.push(DescriptorRange {
                start: handle,
                count: 1,
            }),
        }
    }
    ranges
}
