//! GPU Device
//!
//! [`GpuDevice`] ties the managers together behind id-based calls:
//!
//! ```text
//!  GpuDevice<B>
//!  ├── backend              B: GpuBackend
//!  ├── memory               ResourceAllocationManager  (heap pages, garbage)
//!  ├── descriptors          DescriptorHeapAllocationManager
//!  ├── caches               GpuCaches (pipelines, passes, tables, registries)
//!  ├── context              CommandContext
//!  └── views / samplers     slot maps of staging descriptors
//! ```
//!
//! # Frame loop
//!
//! ```text
//!  begin_frame:  wait for the slot's fence -> release its garbage
//!                -> reset its visible heaps -> tick caches -> begin recording
//!  ...binds and draws...
//!  end_frame:    upload descriptor tables -> end recording -> submit
//!                -> signal the slot's fence
//! ```
//!
//! A frame slot is reused every `buffer_count` frames. Its fence guarantees
//! the GPU finished the frame that last used it before anything queued on
//! that slot is released.

use slotmap::{SecondaryMap, SlotMap};
use smallvec::SmallVec;

use myth_core::errors::{GpuError, Result, precondition};
use myth_core::ids::{NativeResource, ResourceId, ResourceViewId, SamplerId, ShaderProgramId, VertexLayoutId};
use myth_core::memory::{MemoryBudget, MemoryUsageClass};
use myth_core::settings::GpuSettings;
use myth_memory::{MemoryStats, ResourceAllocationManager, ResourceDescription, ScratchAllocation};

use crate::backend::{GpuBackend, IndexBufferView, ResourceState, VertexBufferView};
use crate::context::{BoundProgram, BoundTarget, CommandContext, ContextFlags, ContextStats, RealizeContext};
use crate::descriptor::view::{SamplerDescription, ViewDescription, ViewKind};
use crate::descriptor::{DescriptorHeapAllocationManager, DescriptorKind, DescriptorStats, DescriptorTable};
use crate::pipeline::{
    GraphicsState, MAX_RENDER_TARGETS, PipelineBlobCache, ProgramEntry, ShaderProgramDescription, VertexLayout,
};
use crate::registry::{CacheStats, GpuCaches};

#[derive(Debug, Clone, Copy)]
struct ViewRecord {
    resource: ResourceId,
    desc: ViewDescription,
    sample_count: u32,
    table: DescriptorTable,
}

/// Snapshot of every subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStats {
    pub frame_number: u64,
    pub memory: [MemoryStats; MemoryUsageClass::COUNT],
    pub pending_releases: usize,
    pub descriptors: DescriptorStats,
    pub caches: CacheStats,
    pub context: ContextStats,
    pub views: usize,
    pub samplers: usize,
}

pub struct GpuDevice<B: GpuBackend> {
    backend: B,
    memory: ResourceAllocationManager,
    descriptors: DescriptorHeapAllocationManager,
    caches: GpuCaches,
    context: CommandContext,

    resources: SecondaryMap<ResourceId, ResourceDescription>,
    views: SlotMap<ResourceViewId, ViewRecord>,
    samplers: SlotMap<SamplerId, DescriptorTable>,

    /// Fence value that completes the frame last recorded on each slot.
    frame_fences: Vec<u64>,
    frame_number: u64,
    frame_index: usize,
    in_frame: bool,
    released: bool,
}

impl<B: GpuBackend> GpuDevice<B> {
    pub fn new(backend: B, settings: &GpuSettings) -> Result<Self> {
        settings.validate()?;
        let descriptors = DescriptorHeapAllocationManager::new(&backend, settings)?;
        let buffer_count = settings.buffered_frames() as usize;
        log::info!("[device] created with {buffer_count} buffered frames");
        Ok(Self {
            memory: ResourceAllocationManager::new(settings),
            descriptors,
            caches: GpuCaches::new(settings),
            context: CommandContext::new(),
            resources: SecondaryMap::new(),
            views: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            frame_fences: vec![0; buffer_count],
            frame_number: 0,
            frame_index: 0,
            in_frame: false,
            released: false,
            backend,
        })
    }

    // ========================================================================
    // Frame loop
    // ========================================================================

    /// Enters the next frame slot and opens its command buffer. Returns the
    /// slot index.
    pub fn begin_frame(&mut self) -> Result<usize> {
        if self.in_frame {
            return Err(precondition("begin_frame inside a frame"));
        }
        if self.released {
            return Err(precondition("begin_frame after teardown"));
        }
        let slot = (self.frame_number % self.frame_fences.len() as u64) as usize;

        let fence = self.frame_fences[slot];
        if fence > self.backend.completed_fence_value() {
            log::trace!("[device] frame slot {slot} waits for fence {fence}");
            self.backend.wait_for_fence(fence)?;
        }

        self.memory.update(&self.backend, slot)?;
        self.descriptors.begin_frame(slot);
        self.caches.tick(&self.backend, &self.descriptors);
        self.context.reset();
        self.context.begin(&mut self.backend, slot)?;

        self.frame_index = slot;
        self.in_frame = true;
        Ok(slot)
    }

    /// Uploads the frame's descriptor tables, submits and fences the slot.
    pub fn end_frame(&mut self) -> Result<()> {
        if !self.in_frame {
            return Err(precondition("end_frame outside a frame"));
        }
        let copies = self.descriptors.upload(&self.backend, self.frame_index);
        self.context.end(&mut self.backend)?;
        self.in_frame = false;
        self.backend.submit()?;
        self.frame_fences[self.frame_index] = self.backend.signal_fence()?;
        log::trace!(
            "[device] frame {} submitted on slot {} ({copies} descriptor copies)",
            self.frame_number,
            self.frame_index
        );
        self.frame_number += 1;
        Ok(())
    }

    /// Blocks until every submitted frame completed.
    pub fn wait_idle(&mut self) -> Result<()> {
        let last = self.frame_fences.iter().copied().max().unwrap_or(0);
        if last > self.backend.completed_fence_value() {
            self.backend.wait_for_fence(last)?;
        }
        Ok(())
    }

    // ========================================================================
    // Resources
    // ========================================================================

    pub fn allocate_resource(&mut self, desc: &ResourceDescription, usage: MemoryUsageClass) -> Result<ResourceId> {
        let id = self.memory.allocate(&self.backend, desc, usage)?;
        self.resources.insert(id, desc.clone());
        Ok(id)
    }

    /// Frees a resource, either right away or once the GPU is done with the
    /// current frame.
    pub fn free_resource(&mut self, id: ResourceId, immediate: bool) -> Result<()> {
        if let Some((_, view)) = self.views.iter().find(|(_, view)| view.resource == id) {
            log::warn!("[device] resource {id:?} freed while its {:?} view is alive", view.desc.kind);
        }
        self.memory.free(&self.backend, id, immediate)?;
        self.resources.remove(id);
        Ok(())
    }

    pub fn reserve_memory(&self, budget: &MemoryBudget) -> Result<()> {
        self.memory.reserve_memory(&self.backend, budget)
    }

    pub fn allocate_scratch(&self, size_bytes: u64, alignment: u64) -> Result<ScratchAllocation> {
        self.memory.allocate_scratch(&self.backend, size_bytes, alignment)
    }

    // ========================================================================
    // Views & samplers
    // ========================================================================

    /// Writes a view of a live resource into a staging descriptor.
    pub fn create_view(&mut self, resource: ResourceId, desc: &ViewDescription) -> Result<ResourceViewId> {
        if !self.memory.is_live(resource) {
            return Err(GpuError::NotFound(format!("resource {resource:?}")));
        }
        let native = self
            .memory
            .native_resource(resource)
            .ok_or_else(|| GpuError::NotFound(format!("resource {resource:?}")))?;
        let sample_count = self.resources.get(resource).map_or(1, |d| d.sample_count);

        let table = self
            .descriptors
            .allocate_staging(&self.backend, desc.kind.descriptor_kind(), 1)?;
        self.backend.write_view(table.base_cpu, native, desc);
        Ok(self.views.insert(ViewRecord {
            resource,
            desc: *desc,
            sample_count,
            table,
        }))
    }

    pub fn destroy_view(&mut self, id: ResourceViewId) -> Result<()> {
        let view = self
            .views
            .remove(id)
            .ok_or_else(|| GpuError::NotFound(format!("view {id:?}")))?;
        self.caches.invalidate_descriptor_tables();
        self.descriptors.free(&view.table)
    }

    pub fn create_sampler(&mut self, desc: &SamplerDescription) -> Result<SamplerId> {
        let table = self
            .descriptors
            .allocate_staging(&self.backend, DescriptorKind::Sampler, 1)?;
        self.backend.write_sampler(table.base_cpu, desc);
        Ok(self.samplers.insert(table))
    }

    pub fn destroy_sampler(&mut self, id: SamplerId) -> Result<()> {
        let table = self
            .samplers
            .remove(id)
            .ok_or_else(|| GpuError::NotFound(format!("sampler {id:?}")))?;
        self.caches.invalidate_descriptor_tables();
        self.descriptors.free(&table)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    pub fn register_vertex_layout(&mut self, id: VertexLayoutId, layout: VertexLayout) -> Result<()> {
        self.caches.vertex_layouts.register(id, layout)
    }

    pub fn unregister_vertex_layout(&mut self, id: VertexLayoutId) -> Result<()> {
        self.caches.vertex_layouts.unregister(id).map(drop)
    }

    pub fn register_program(
        &mut self,
        id: ShaderProgramId,
        permutation: u64,
        desc: ShaderProgramDescription,
    ) -> Result<()> {
        self.caches.programs.register(id, permutation, desc)
    }

    /// Registers a static table of programs.
    pub fn register_programs(&mut self, entries: &[ProgramEntry]) -> Result<usize> {
        self.caches.programs.register_all(entries)
    }

    pub fn unregister_program(&mut self, id: ShaderProgramId, permutation: u64) -> Result<()> {
        self.caches.programs.unregister(id, permutation).map(drop)
    }

    /// Serialized pipeline blobs, for loading at the next start.
    pub fn save_pipeline_cache(&self) -> Result<Vec<u8>> {
        self.caches.pipeline_blobs.to_bytes()
    }

    pub fn load_pipeline_cache(&mut self, bytes: &[u8]) -> Result<usize> {
        self.caches.pipeline_blobs = PipelineBlobCache::from_bytes(bytes)?;
        Ok(self.caches.pipeline_blobs.len())
    }

    // ========================================================================
    // Binding
    // ========================================================================

    fn view_of_kind(&self, id: ResourceViewId, kind: ViewKind) -> Result<&ViewRecord> {
        let view = self
            .views
            .get(id)
            .ok_or_else(|| GpuError::NotFound(format!("view {id:?}")))?;
        if view.desc.kind != kind {
            return Err(precondition(format!(
                "{:?} view {id:?} bound as {kind:?}",
                view.desc.kind
            )));
        }
        Ok(view)
    }

    fn bound_target(&self, id: ResourceViewId, kind: ViewKind) -> Result<BoundTarget> {
        let view = self.view_of_kind(id, kind)?;
        let format = view
            .desc
            .format
            .ok_or_else(|| precondition(format!("{kind:?} view {id:?} has no format")))?;
        Ok(BoundTarget {
            view: id,
            handle: view.table.base_cpu,
            format,
            sample_count: view.sample_count,
        })
    }

    fn native_of(&self, id: ResourceId) -> Result<NativeResource> {
        self.memory
            .native_resource(id)
            .ok_or_else(|| GpuError::NotFound(format!("resource {id:?}")))
    }

    pub fn bind_constant_buffer(&mut self, slot: u32, view: ResourceViewId) -> Result<()> {
        let handle = self.view_of_kind(view, ViewKind::ConstantBuffer)?.table.base_cpu;
        self.context.bind_constant_buffer(slot, handle)
    }

    pub fn bind_shader_resource(&mut self, slot: u32, view: ResourceViewId) -> Result<()> {
        let handle = self.view_of_kind(view, ViewKind::ShaderResource)?.table.base_cpu;
        self.context.bind_shader_resource(slot, handle)
    }

    pub fn bind_unordered_access(&mut self, slot: u32, view: ResourceViewId) -> Result<()> {
        let handle = self.view_of_kind(view, ViewKind::UnorderedAccess)?.table.base_cpu;
        self.context.bind_unordered_access(slot, handle)
    }

    pub fn bind_sampler(&mut self, slot: u32, sampler: SamplerId) -> Result<()> {
        let handle = self
            .samplers
            .get(sampler)
            .ok_or_else(|| GpuError::NotFound(format!("sampler {sampler:?}")))?
            .base_cpu;
        self.context.bind_sampler(slot, handle)
    }

    pub fn bind_render_targets(&mut self, colors: &[ResourceViewId], depth: Option<ResourceViewId>) -> Result<()> {
        let colors = colors
            .iter()
            .map(|&id| self.bound_target(id, ViewKind::RenderTarget))
            .collect::<Result<SmallVec<[BoundTarget; MAX_RENDER_TARGETS]>>>()?;
        let depth = depth
            .map(|id| self.bound_target(id, ViewKind::DepthStencil))
            .transpose()?;
        self.context.bind_render_targets(&colors, depth)
    }

    /// Binds `[offset, offset + size)` of a buffer to a vertex slot. The
    /// stride comes from the input layout.
    pub fn bind_vertex_buffer(&mut self, slot: u32, buffer: ResourceId, offset: u64, size_bytes: u64) -> Result<()> {
        let view = VertexBufferView {
            resource: self.native_of(buffer)?,
            offset,
            size_bytes,
            stride: 0,
        };
        self.context.bind_vertex_buffers(slot, &[view])
    }

    pub fn bind_index_buffer(
        &mut self,
        buffer: ResourceId,
        offset: u64,
        size_bytes: u64,
        format: wgpu::IndexFormat,
    ) -> Result<()> {
        let view = IndexBufferView {
            resource: self.native_of(buffer)?,
            offset,
            size_bytes,
            format,
        };
        self.context.bind_index_buffer(Some(view))
    }

    pub fn unbind_index_buffer(&mut self) -> Result<()> {
        self.context.bind_index_buffer(None)
    }

    /// Binds a registered program permutation.
    pub fn bind_program(&mut self, id: ShaderProgramId, permutation: u64) -> Result<()> {
        let desc = self.caches.programs.get(id, permutation).ok_or_else(|| {
            GpuError::NotFound(format!("shader program {id:?} permutation {permutation:#x}"))
        })?;
        let program = BoundProgram {
            id,
            permutation,
            bind_type: desc.bind_type,
            reflection: desc.reflection,
        };
        self.context.bind_program(program)
    }

    pub fn set_input_layout(&mut self, layout: Option<VertexLayoutId>) -> Result<()> {
        if let Some(id) = layout
            && self.caches.vertex_layouts.get(id).is_none()
        {
            return Err(GpuError::NotFound(format!("vertex layout {id:?}")));
        }
        self.context.set_input_layout(layout)
    }

    pub fn set_topology(&mut self, topology: wgpu::PrimitiveTopology) -> Result<()> {
        self.context.set_topology(topology)
    }

    pub fn set_stencil_reference(&mut self, reference: u32) -> Result<()> {
        self.context.set_stencil_reference(reference)
    }

    pub fn set_pipeline_state(&mut self, edit: impl FnOnce(&mut GraphicsState)) -> Result<()> {
        self.context.set_pipeline_state(edit)
    }

    pub fn clear_resource_binds(&mut self) {
        self.context.clear_resource_binds();
    }

    pub fn push_state(&mut self, flags: ContextFlags) {
        self.context.push_state(flags);
    }

    pub fn pop_state(&mut self) -> Result<()> {
        self.context.pop_state()
    }

    pub fn transition(&mut self, resource: ResourceId, before: ResourceState, after: ResourceState) -> Result<()> {
        let native = self.native_of(resource)?;
        self.context.transition(native, before, after)
    }

    // ========================================================================
    // Work
    // ========================================================================

    pub fn draw_instanced(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        let mut rc = RealizeContext {
            backend: &mut self.backend,
            descriptors: &self.descriptors,
            caches: &mut self.caches,
        };
        self.context
            .draw_instanced(&mut rc, vertex_count, instance_count, first_vertex, first_instance)
    }

    pub fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<()> {
        let mut rc = RealizeContext {
            backend: &mut self.backend,
            descriptors: &self.descriptors,
            caches: &mut self.caches,
        };
        self.context.draw_indexed_instanced(
            &mut rc,
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        )
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        let mut rc = RealizeContext {
            backend: &mut self.backend,
            descriptors: &self.descriptors,
            caches: &mut self.caches,
        };
        self.context.dispatch(&mut rc, x, y, z)
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Waits for the GPU and releases every object the device created.
    ///
    /// Runs once; later calls do nothing. A failure to free one object is
    /// logged and the rest is still released; the first error is returned.
    pub fn teardown(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        if self.in_frame {
            log::warn!("[device] teardown inside frame {}", self.frame_number);
            self.in_frame = false;
        }
        self.wait_idle()?;
        self.released = true;

        self.caches.teardown(&self.backend, &self.descriptors);
        let mut first_error = None;
        let tables = self
            .views
            .drain()
            .map(|(_, view)| view.table)
            .chain(self.samplers.drain().map(|(_, table)| table));
        for table in tables {
            if let Err(e) = self.descriptors.free(&table) {
                log::warn!("[device] descriptor table {:?} not freed at teardown: {e}", table.base_cpu);
                first_error.get_or_insert(e);
            }
        }
        self.descriptors.release(&self.backend);
        self.resources.clear();
        if let Err(e) = self.memory.release(&self.backend) {
            log::error!("[device] memory release failed: {e}");
            first_error.get_or_insert(e);
        }
        log::info!("[device] released after {} frames", self.frame_number);
        first_error.map_or(Ok(()), Err)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    #[must_use]
    pub fn memory(&self) -> &ResourceAllocationManager {
        &self.memory
    }

    #[inline]
    #[must_use]
    pub fn descriptors(&self) -> &DescriptorHeapAllocationManager {
        &self.descriptors
    }

    #[inline]
    #[must_use]
    pub fn caches(&self) -> &GpuCaches {
        &self.caches
    }

    #[inline]
    #[must_use]
    pub fn context(&self) -> &CommandContext {
        &self.context
    }

    /// Staging descriptor of a view.
    #[must_use]
    pub fn view_table(&self, id: ResourceViewId) -> Option<DescriptorTable> {
        self.views.get(id).map(|v| v.table)
    }

    #[must_use]
    pub fn sampler_table(&self, id: SamplerId) -> Option<DescriptorTable> {
        self.samplers.get(id).copied()
    }

    #[inline]
    #[must_use]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    #[inline]
    #[must_use]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            frame_number: self.frame_number,
            memory: MemoryUsageClass::ALL.map(|usage| self.memory.stats(usage)),
            pending_releases: self.memory.pending_release_count(),
            descriptors: self.descriptors.stats(),
            caches: self.caches.stats(),
            context: self.context.stats(),
            views: self.views.len(),
            samplers: self.samplers.len(),
        }
    }
}

impl<B: GpuBackend> Drop for GpuDevice<B> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            log::error!("[device] teardown on drop failed: {e}");
        }
    }
}
