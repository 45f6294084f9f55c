//! One level of the command context's state stack.

use smallvec::SmallVec;

use myth_core::ids::{CpuDescriptorHandle, ResourceViewId, ShaderProgramId};

use super::flags::{ContextFlags, DirtyFlags};
use crate::backend::{IndexBufferView, VertexBufferView};
use crate::pipeline::{
    BindType, GraphicsState, MAX_RENDER_TARGETS, RenderPassKey, ResourceCounts, RootLayoutDescriptor,
};

pub const MAX_CONSTANT_BUFFERS: usize = 16;
pub const MAX_SHADER_RESOURCES: usize = 64;
pub const MAX_UNORDERED_ACCESS: usize = 8;
pub const MAX_SAMPLERS: usize = 16;
pub const MAX_VERTEX_BUFFERS: usize = 16;

/// Program bound for the next draw or dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundProgram {
    pub id: ShaderProgramId,
    pub permutation: u64,
    pub bind_type: BindType,
    pub reflection: Option<ResourceCounts>,
}

/// A render target or depth view resolved by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundTarget {
    pub view: ResourceViewId,
    pub handle: CpuDescriptorHandle,
    pub format: wgpu::TextureFormat,
    pub sample_count: u32,
}

#[derive(Debug, Clone)]
pub struct ContextState {
    pub graphics: GraphicsState,
    pub program: Option<BoundProgram>,

    pub constant_buffers: [Option<CpuDescriptorHandle>; MAX_CONSTANT_BUFFERS],
    pub shader_resources: [Option<CpuDescriptorHandle>; MAX_SHADER_RESOURCES],
    pub unordered_access: [Option<CpuDescriptorHandle>; MAX_UNORDERED_ACCESS],
    pub samplers: [Option<CpuDescriptorHandle>; MAX_SAMPLERS],

    pub render_targets: SmallVec<[BoundTarget; MAX_RENDER_TARGETS]>,
    pub depth_target: Option<BoundTarget>,

    pub vertex_buffers: [Option<VertexBufferView>; MAX_VERTEX_BUFFERS],
    pub index_buffer: Option<IndexBufferView>,
    pub topology: wgpu::PrimitiveTopology,
    pub stencil_ref: u32,

    /// Render pass realized for the bound targets. Refers to a cache entry,
    /// owns nothing.
    pub render_pass: Option<RenderPassKey>,
    pub dirty: DirtyFlags,
}

impl Default for ContextState {
    fn default() -> Self {
        Self {
            graphics: GraphicsState::default(),
            program: None,
            constant_buffers: [None; MAX_CONSTANT_BUFFERS],
            shader_resources: [None; MAX_SHADER_RESOURCES],
            unordered_access: [None; MAX_UNORDERED_ACCESS],
            samplers: [None; MAX_SAMPLERS],
            render_targets: SmallVec::new(),
            depth_target: None,
            vertex_buffers: [None; MAX_VERTEX_BUFFERS],
            index_buffer: None,
            topology: wgpu::PrimitiveTopology::TriangleList,
            stencil_ref: 0,
            render_pass: None,
            dirty: DirtyFlags::all(),
        }
    }
}

/// Number of slots up to and including the last bound one.
fn bound_extent(slots: &[Option<CpuDescriptorHandle>]) -> u32 {
    slots.iter().rposition(Option::is_some).map_or(0, |i| i as u32 + 1)
}

impl ContextState {
    /// State for a nested scope. Whatever `flags` does not inherit starts
    /// from defaults. Everything is dirty, since the native command stream
    /// reflects the parent.
    #[must_use]
    pub fn inherit(&self, flags: ContextFlags) -> Self {
        let mut state = Self::default();
        if flags.contains(ContextFlags::INHERIT_PIPELINE_STATE) {
            state.graphics = self.graphics.clone();
            state.program = self.program.clone();
            state.topology = self.topology;
            state.stencil_ref = self.stencil_ref;
        }
        if flags.contains(ContextFlags::INHERIT_RESOURCES) {
            state.constant_buffers = self.constant_buffers;
            state.shader_resources = self.shader_resources;
            state.unordered_access = self.unordered_access;
            state.samplers = self.samplers;
            state.vertex_buffers = self.vertex_buffers;
            state.index_buffer = self.index_buffer;
        }
        if flags.contains(ContextFlags::INHERIT_RENDER_TARGETS) {
            state.render_targets = self.render_targets.clone();
            state.depth_target = self.depth_target;
        }
        state.sync_target_formats();
        state.dirty = DirtyFlags::all();
        state
    }

    /// Binding counts the root layout must cover: the program's reflection
    /// when present, otherwise the extent of the bound slots.
    #[must_use]
    pub fn resource_counts(&self) -> ResourceCounts {
        if let Some(counts) = self.program.as_ref().and_then(|p| p.reflection) {
            return counts;
        }
        ResourceCounts {
            constant_buffers: bound_extent(&self.constant_buffers),
            shader_resources: bound_extent(&self.shader_resources),
            unordered_access: bound_extent(&self.unordered_access),
            samplers: bound_extent(&self.samplers),
        }
    }

    #[must_use]
    pub fn root_layout_descriptor(&self, bind_type: BindType) -> RootLayoutDescriptor {
        RootLayoutDescriptor {
            bind_type,
            counts: self.resource_counts(),
        }
    }

    /// Key of the bound target set, `None` when nothing is bound.
    #[must_use]
    pub fn render_pass_key(&self) -> Option<RenderPassKey> {
        let colors: SmallVec<[ResourceViewId; MAX_RENDER_TARGETS]> =
            self.render_targets.iter().map(|t| t.view).collect();
        let key = RenderPassKey::new(&colors, self.depth_target.map(|t| t.view));
        (!key.is_empty()).then_some(key)
    }

    /// Copies formats and sample count of the bound targets into the
    /// graphics state. Returns `true` when they changed.
    pub fn sync_target_formats(&mut self) -> bool {
        let mut formats = [None; MAX_RENDER_TARGETS];
        for (slot, target) in formats.iter_mut().zip(&self.render_targets) {
            *slot = Some(target.format);
        }
        let depth = self.depth_target.map(|t| t.format);
        let samples = self
            .render_targets
            .first()
            .or(self.depth_target.as_ref())
            .map_or(1, |t| t.sample_count);

        let g = &mut self.graphics;
        let changed = g.color_formats != formats || g.depth_format != depth || g.sample_count != samples;
        g.color_formats = formats;
        g.depth_format = depth;
        g.sample_count = samples;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_follow_highest_bound_slot() {
        let mut state = ContextState::default();
        state.constant_buffers[2] = Some(CpuDescriptorHandle(64));
        state.shader_resources[0] = Some(CpuDescriptorHandle(96));
        state.samplers[5] = Some(CpuDescriptorHandle(8));
        assert_eq!(
            state.resource_counts(),
            ResourceCounts {
                constant_buffers: 3,
                shader_resources: 1,
                unordered_access: 0,
                samplers: 6,
            }
        );
    }

    #[test]
    fn test_reflection_overrides_slot_extent() {
        let mut state = ContextState::default();
        state.constant_buffers[7] = Some(CpuDescriptorHandle(64));
        let reflected = ResourceCounts {
            constant_buffers: 1,
            ..Default::default()
        };
        state.program = Some(BoundProgram {
            id: ShaderProgramId(1),
            permutation: 0,
            bind_type: BindType::Graphics,
            reflection: Some(reflected),
        });
        assert_eq!(state.resource_counts(), reflected);
    }

    #[test]
    fn test_inherit_respects_flags() {
        let mut parent = ContextState::default();
        parent.constant_buffers[0] = Some(CpuDescriptorHandle(1));
        parent.stencil_ref = 3;
        parent.dirty = DirtyFlags::empty();

        let child = parent.inherit(ContextFlags::INHERIT_RESOURCES);
        assert_eq!(child.constant_buffers[0], Some(CpuDescriptorHandle(1)));
        assert_eq!(child.stencil_ref, 0);
        assert_eq!(child.dirty, DirtyFlags::all());

        let child = parent.inherit(ContextFlags::INHERIT_PIPELINE_STATE);
        assert_eq!(child.constant_buffers[0], None);
        assert_eq!(child.stencil_ref, 3);
    }
}
