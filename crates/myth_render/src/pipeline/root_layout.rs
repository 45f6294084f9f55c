//! Root layouts (root signatures / pipeline layouts).
//!
//! Every layout has the same shape: root parameter
//! [`RESOURCE_TABLE_ROOT_INDEX`] is one descriptor table holding the
//! constant buffers, shader resources and unordered access views in that
//! order, and [`SAMPLER_TABLE_ROOT_INDEX`] is one table of samplers. Layouts
//! therefore differ only by bind type and per-class counts.

use rustc_hash::FxHashMap;

use myth_core::errors::Result;
use myth_core::ids::RootLayoutHandle;

use super::key::BindType;
use crate::backend::PipelineBackend;

pub const RESOURCE_TABLE_ROOT_INDEX: u32 = 0;
pub const SAMPLER_TABLE_ROOT_INDEX: u32 = 1;

/// Number of bindings per class a program uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceCounts {
    pub constant_buffers: u32,
    pub shader_resources: u32,
    pub unordered_access: u32,
    pub samplers: u32,
}

impl ResourceCounts {
    /// Size of the CBV/SRV/UAV table.
    #[inline]
    #[must_use]
    pub fn resource_table_size(&self) -> u32 {
        self.constant_buffers + self.shader_resources + self.unordered_access
    }
}

/// Key of a root layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootLayoutDescriptor {
    pub bind_type: BindType,
    pub counts: ResourceCounts,
}

/// Root layouts by descriptor. Layouts are few and cheap to keep, so they
/// live until teardown.
#[derive(Debug, Default)]
pub struct RootLayoutCache {
    layouts: FxHashMap<RootLayoutDescriptor, RootLayoutHandle>,
}

impl RootLayoutCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the layout for `desc`, creating it on a miss.
    pub fn get_or_create<B: PipelineBackend + ?Sized>(
        &mut self,
        backend: &B,
        desc: &RootLayoutDescriptor,
    ) -> Result<RootLayoutHandle> {
        if let Some(&handle) = self.layouts.get(desc) {
            return Ok(handle);
        }
        let handle = backend.create_root_layout(desc).inspect_err(|e| {
            log::error!("[cache] root layout creation failed for {desc:?}: {e}");
        })?;
        log::debug!("[cache] root layout {handle:?} created for {desc:?}");
        self.layouts.insert(*desc, handle);
        Ok(handle)
    }

    #[must_use]
    pub fn get(&self, desc: &RootLayoutDescriptor) -> Option<RootLayoutHandle> {
        self.layouts.get(desc).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Destroys every layout.
    pub fn clear<B: PipelineBackend + ?Sized>(&mut self, backend: &B) {
        for (_, handle) in self.layouts.drain() {
            backend.destroy_root_layout(handle);
        }
    }
}
