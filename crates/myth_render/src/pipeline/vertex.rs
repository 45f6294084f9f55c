//! Vertex input layouts.
//!
//! Layouts are registered once under an id. Pipelines are keyed on the id,
//! and the command context reads per-slot strides from here when it binds
//! vertex buffers.

use rustc_hash::FxHashMap;

use myth_core::errors::{GpuError, Result};
use myth_core::ids::VertexLayoutId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub shader_location: u32,
    /// Vertex buffer slot the attribute reads from.
    pub slot: u32,
    pub format: wgpu::VertexFormat,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBinding {
    pub slot: u32,
    /// Bytes between elements. `0` means tightly packed attributes.
    pub stride: u32,
    pub step_mode: wgpu::VertexStepMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub bindings: Vec<VertexBinding>,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Stride of the buffer bound at `slot`.
    #[must_use]
    pub fn stride(&self, slot: u32) -> Option<u32> {
        let binding = self.bindings.iter().find(|b| b.slot == slot)?;
        if binding.stride != 0 {
            return Some(binding.stride);
        }
        let packed: u64 = self
            .attributes
            .iter()
            .filter(|a| a.slot == slot)
            .map(|a| a.format.size())
            .sum();
        Some(packed as u32)
    }
}

/// Registered vertex layouts.
#[derive(Debug, Default)]
pub struct VertexLayoutRegistry {
    layouts: FxHashMap<VertexLayoutId, VertexLayout>,
}

impl VertexLayoutRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: VertexLayoutId, layout: VertexLayout) -> Result<()> {
        if self.layouts.contains_key(&id) {
            return Err(GpuError::AlreadyExists(format!("vertex layout {id:?}")));
        }
        self.layouts.insert(id, layout);
        Ok(())
    }

    pub fn unregister(&mut self, id: VertexLayoutId) -> Result<VertexLayout> {
        self.layouts
            .remove(&id)
            .ok_or_else(|| GpuError::NotFound(format!("vertex layout {id:?}")))
    }

    #[must_use]
    pub fn get(&self, id: VertexLayoutId) -> Option<&VertexLayout> {
        self.layouts.get(&id)
    }

    #[must_use]
    pub fn stride(&self, id: VertexLayoutId, slot: u32) -> Option<u32> {
        self.layouts.get(&id)?.stride(slot)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}
