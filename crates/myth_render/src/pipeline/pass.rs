//! Render pass keys.
//!
//! A render pass is identified by the ordered set of bound color target
//! views plus the depth view. The key keeps the ids inline and caches its
//! hash, so lookups on the hot path hash a single word.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use smallvec::SmallVec;

use myth_core::ids::{CpuDescriptorHandle, ResourceViewId};

use super::key::MAX_RENDER_TARGETS;

/// Bound render target set.
#[derive(Debug, Clone)]
pub struct RenderPassKey {
    colors: SmallVec<[ResourceViewId; MAX_RENDER_TARGETS]>,
    depth: Option<ResourceViewId>,
    cached_hash: u64,
}

impl RenderPassKey {
    #[must_use]
    pub fn new(colors: &[ResourceViewId], depth: Option<ResourceViewId>) -> Self {
        let mut hasher = FxHasher::default();
        colors.hash(&mut hasher);
        depth.hash(&mut hasher);
        Self {
            colors: SmallVec::from_slice(colors),
            depth,
            cached_hash: hasher.finish(),
        }
    }

    #[inline]
    #[must_use]
    pub fn colors(&self) -> &[ResourceViewId] {
        &self.colors
    }

    #[inline]
    #[must_use]
    pub fn depth(&self) -> Option<ResourceViewId> {
        self.depth
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.depth.is_none()
    }
}

impl PartialEq for RenderPassKey {
    fn eq(&self, other: &Self) -> bool {
        self.cached_hash == other.cached_hash && self.depth == other.depth && self.colors == other.colors
    }
}

impl Eq for RenderPassKey {}

impl Hash for RenderPassKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.cached_hash);
    }
}

/// What a backend needs to build a render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPassDescription {
    pub color_formats: SmallVec<[wgpu::TextureFormat; MAX_RENDER_TARGETS]>,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub color_targets: SmallVec<[CpuDescriptorHandle; MAX_RENDER_TARGETS]>,
    pub depth_target: Option<CpuDescriptorHandle>,
    pub sample_count: u32,
}
