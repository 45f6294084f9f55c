//! Command Context State Machine
//!
//! Bind calls only record what the next draw needs and raise
//! [`DirtyFlags`]. Native work happens in one place, [`CommandContext::flush`],
//! right before a draw or dispatch:
//!
//! ```text
//!  bind_* ──> ContextState (top of stack) ── dirty flags ──┐
//!                                                          v
//!  draw / dispatch ──> flush:
//!      1. resource barriers
//!      2. render pass          (lifetime cache, keyed by bound targets)
//!      3. root layout          (may dirty pipeline + descriptors)
//!      4. descriptor tables    (staging table cache -> visible heap)
//!      5. pipeline             (lifetime cache, keyed by full descriptor)
//!      6. stencil ref, topology
//!      7. vertex / index buffers
//!      8. clear dirty flags
//! ```
//!
//! Redundant binds between two draws therefore cost nothing on the native
//! side, and the order of bind calls never matters.

mod flags;
mod state;

pub use flags::{ContextFlags, DirtyFlags};
pub use state::{
    BoundProgram, BoundTarget, ContextState, MAX_CONSTANT_BUFFERS, MAX_SAMPLERS, MAX_SHADER_RESOURCES,
    MAX_UNORDERED_ACCESS, MAX_VERTEX_BUFFERS,
};

use smallvec::SmallVec;

use myth_core::errors::{GpuError, Result, precondition};
use myth_core::ids::{
    CpuDescriptorHandle, GpuDescriptorHandle, NativeResource, PipelineHandle, RenderPassHandle, RootLayoutHandle,
    VertexLayoutId,
};

use crate::backend::{
    CommandRecorder, DescriptorBackend, IndexBufferView, PipelineBackend, ResourceBarrier, ResourceState,
    VertexBufferView,
};
use crate::descriptor::{DescriptorHeapAllocationManager, DescriptorKind, DescriptorTableKey, coalesce_ranges};
use crate::pipeline::{
    BindType, GraphicsState, IndexStripCut, MAX_RENDER_TARGETS, PipelineDescriptor, PipelineKind,
    RESOURCE_TABLE_ROOT_INDEX, RenderPassDescription, RootLayoutDescriptor, SAMPLER_TABLE_ROOT_INDEX, TopologyClass,
};
use crate::registry::GpuCaches;

/// Status of the underlying command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandStatus {
    #[default]
    Idle,
    /// The frame slot was reclaimed; recording may start.
    Reset,
    Recording,
}

/// Everything a flush may touch besides the context itself.
pub struct RealizeContext<'a, B: ?Sized> {
    pub backend: &'a mut B,
    pub descriptors: &'a DescriptorHeapAllocationManager,
    pub caches: &'a mut GpuCaches,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub flushes: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub dropped: u64,
}

/// What the native command stream currently has bound.
#[derive(Debug, Default)]
struct NativeBindings {
    root_layouts: [Option<(RootLayoutHandle, RootLayoutDescriptor)>; 2],
    pipeline: Option<PipelineHandle>,
    render_pass: Option<RenderPassHandle>,
}

const fn bind_index(bind_type: BindType) -> usize {
    match bind_type {
        BindType::Graphics => 0,
        BindType::Compute => 1,
    }
}

#[derive(Debug, Default)]
pub struct CommandContext {
    current: ContextState,
    /// Parents of `current`, innermost last.
    stack: Vec<ContextState>,
    status: CommandStatus,
    barriers: Vec<ResourceBarrier>,
    native: NativeBindings,
    frame_index: usize,
    stats: ContextStats,
}

impl CommandContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Recording lifecycle
    // ========================================================================

    /// Marks the frame slot as reclaimed by the GPU.
    pub fn reset(&mut self) {
        if self.status != CommandStatus::Recording {
            self.status = CommandStatus::Reset;
        }
    }

    /// Starts recording. The context starts from a default, fully dirty state.
    pub fn begin<R: CommandRecorder + ?Sized>(&mut self, recorder: &mut R, frame_index: usize) -> Result<()> {
        if self.status == CommandStatus::Recording {
            return Err(precondition("begin while already recording"));
        }
        recorder.begin_recording(frame_index)?;
        self.current = ContextState::default();
        self.stack.clear();
        self.barriers.clear();
        self.native = NativeBindings::default();
        self.frame_index = frame_index;
        self.status = CommandStatus::Recording;
        log::trace!("[context] recording frame {frame_index}");
        Ok(())
    }

    /// Flushes pending barriers and closes the command buffer.
    pub fn end<R: CommandRecorder + ?Sized>(&mut self, recorder: &mut R) -> Result<()> {
        self.ensure_recording("end")?;
        if !self.stack.is_empty() {
            return Err(precondition(format!("{} pushed states never popped", self.stack.len())));
        }
        self.flush_barriers(recorder);
        recorder.end_recording()?;
        self.status = CommandStatus::Idle;
        Ok(())
    }

    // ========================================================================
    // State stack
    // ========================================================================

    /// Opens a nested scope whose state copies what `flags` selects from the
    /// current one.
    pub fn push_state(&mut self, flags: ContextFlags) {
        let child = self.current.inherit(flags);
        self.stack.push(std::mem::replace(&mut self.current, child));
    }

    /// Closes the innermost scope and restores its parent.
    pub fn pop_state(&mut self) -> Result<()> {
        let Some(parent) = self.stack.pop() else {
            return Err(precondition("pop_state without matching push_state"));
        };
        self.current = parent;
        self.current.dirty = DirtyFlags::all();
        Ok(())
    }

    // ========================================================================
    // Bind API
    // ========================================================================

    pub fn bind_constant_buffer(&mut self, slot: u32, handle: CpuDescriptorHandle) -> Result<()> {
        self.ensure_recording("bind_constant_buffer")?;
        let changed = bind_slot(&mut self.current.constant_buffers, slot, handle, "constant buffer")?;
        self.mark_if(changed, DirtyFlags::DESCRIPTORS);
        Ok(())
    }

    pub fn bind_shader_resource(&mut self, slot: u32, handle: CpuDescriptorHandle) -> Result<()> {
        self.ensure_recording("bind_shader_resource")?;
        let changed = bind_slot(&mut self.current.shader_resources, slot, handle, "shader resource")?;
        self.mark_if(changed, DirtyFlags::DESCRIPTORS);
        Ok(())
    }

    pub fn bind_unordered_access(&mut self, slot: u32, handle: CpuDescriptorHandle) -> Result<()> {
        self.ensure_recording("bind_unordered_access")?;
        let changed = bind_slot(&mut self.current.unordered_access, slot, handle, "unordered access")?;
        self.mark_if(changed, DirtyFlags::DESCRIPTORS);
        Ok(())
    }

    pub fn bind_sampler(&mut self, slot: u32, handle: CpuDescriptorHandle) -> Result<()> {
        self.ensure_recording("bind_sampler")?;
        let changed = bind_slot(&mut self.current.samplers, slot, handle, "sampler")?;
        self.mark_if(changed, DirtyFlags::SAMPLER_DESCRIPTORS);
        Ok(())
    }

    /// Binds color targets and an optional depth target.
    ///
    /// The pipeline is dirtied only when formats or sample count change.
    pub fn bind_render_targets(&mut self, colors: &[BoundTarget], depth: Option<BoundTarget>) -> Result<()> {
        self.ensure_recording("bind_render_targets")?;
        if colors.len() > MAX_RENDER_TARGETS {
            return Err(precondition(format!(
                "{} render targets bound, at most {MAX_RENDER_TARGETS} supported",
                colors.len()
            )));
        }
        let state = &mut self.current;
        if state.render_targets.as_slice() == colors && state.depth_target == depth {
            return Ok(());
        }
        state.render_targets = SmallVec::from_slice(colors);
        state.depth_target = depth;
        state.dirty |= DirtyFlags::RENDER_TARGETS;
        if state.sync_target_formats() {
            state.dirty |= DirtyFlags::PIPELINE;
        }
        Ok(())
    }

    pub fn bind_vertex_buffers(&mut self, first_slot: u32, views: &[VertexBufferView]) -> Result<()> {
        self.ensure_recording("bind_vertex_buffers")?;
        let first = first_slot as usize;
        if first + views.len() > MAX_VERTEX_BUFFERS {
            return Err(precondition(format!(
                "vertex buffer slots {first}..{} out of range",
                first + views.len()
            )));
        }
        let slots = &mut self.current.vertex_buffers[first..first + views.len()];
        let mut changed = false;
        for (slot, view) in slots.iter_mut().zip(views) {
            changed |= *slot != Some(*view);
            *slot = Some(*view);
        }
        self.mark_if(changed, DirtyFlags::VERTEX_BUFFERS);
        Ok(())
    }

    /// Binds or unbinds the index buffer. A change of index format on strip
    /// topologies changes the strip-cut value and dirties the pipeline.
    pub fn bind_index_buffer(&mut self, view: Option<IndexBufferView>) -> Result<()> {
        self.ensure_recording("bind_index_buffer")?;
        if self.current.index_buffer == view {
            return Ok(());
        }
        self.current.index_buffer = view;
        self.current.dirty |= DirtyFlags::INDEX_BUFFER;
        self.sync_strip_cut();
        Ok(())
    }

    /// Sets the primitive topology. The pipeline is dirtied only when the
    /// topology class changes.
    pub fn set_topology(&mut self, topology: wgpu::PrimitiveTopology) -> Result<()> {
        self.ensure_recording("set_topology")?;
        let state = &mut self.current;
        if state.topology == topology {
            return Ok(());
        }
        state.topology = topology;
        state.dirty |= DirtyFlags::TOPOLOGY;
        let class = TopologyClass::from(topology);
        if state.graphics.topology_class != class {
            state.graphics.topology_class = class;
            state.dirty |= DirtyFlags::PIPELINE;
        }
        self.sync_strip_cut();
        Ok(())
    }

    pub fn set_stencil_reference(&mut self, reference: u32) -> Result<()> {
        self.ensure_recording("set_stencil_reference")?;
        let changed = self.current.stencil_ref != reference;
        self.current.stencil_ref = reference;
        self.mark_if(changed, DirtyFlags::STENCIL_REF);
        Ok(())
    }

    /// Selects the vertex input layout. Strides are re-read at the next flush.
    pub fn set_input_layout(&mut self, layout: Option<VertexLayoutId>) -> Result<()> {
        self.ensure_recording("set_input_layout")?;
        let changed = self.current.graphics.input_layout != layout;
        self.current.graphics.input_layout = layout;
        self.mark_if(changed, DirtyFlags::PIPELINE | DirtyFlags::VERTEX_BUFFERS);
        Ok(())
    }

    pub fn bind_program(&mut self, program: BoundProgram) -> Result<()> {
        self.ensure_recording("bind_program")?;
        let changed = self.current.program.as_ref() != Some(&program);
        self.current.program = Some(program);
        self.mark_if(
            changed,
            DirtyFlags::PIPELINE
                | DirtyFlags::ROOT_SIGNATURE
                | DirtyFlags::DESCRIPTORS
                | DirtyFlags::SAMPLER_DESCRIPTORS,
        );
        Ok(())
    }

    /// Applies partial edits to the graphics pipeline state.
    pub fn set_pipeline_state(&mut self, edit: impl FnOnce(&mut GraphicsState)) -> Result<()> {
        self.ensure_recording("set_pipeline_state")?;
        let before = self.current.graphics.clone();
        edit(&mut self.current.graphics);
        let changed = self.current.graphics != before;
        self.mark_if(changed, DirtyFlags::PIPELINE);
        Ok(())
    }

    /// Unbinds every descriptor slot and every vertex and index buffer.
    pub fn clear_resource_binds(&mut self) {
        let state = &mut self.current;
        state.constant_buffers = [None; MAX_CONSTANT_BUFFERS];
        state.shader_resources = [None; MAX_SHADER_RESOURCES];
        state.unordered_access = [None; MAX_UNORDERED_ACCESS];
        state.samplers = [None; MAX_SAMPLERS];
        state.vertex_buffers = [None; MAX_VERTEX_BUFFERS];
        state.index_buffer = None;
        state.dirty |= DirtyFlags::DESCRIPTORS
            | DirtyFlags::SAMPLER_DESCRIPTORS
            | DirtyFlags::VERTEX_BUFFERS
            | DirtyFlags::INDEX_BUFFER;
        self.sync_strip_cut();
    }

    /// Queues a resource state transition for the next flush.
    pub fn transition(&mut self, resource: NativeResource, before: ResourceState, after: ResourceState) -> Result<()> {
        self.ensure_recording("transition")?;
        if before != after {
            self.barriers.push(ResourceBarrier {
                resource,
                before,
                after,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Draws
    // ========================================================================

    pub fn draw_instanced<B>(
        &mut self,
        rc: &mut RealizeContext<'_, B>,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()>
    where
        B: DescriptorBackend + PipelineBackend + CommandRecorder + ?Sized,
    {
        self.flush_or_drop(rc, BindType::Graphics, "draw")?;
        rc.backend
            .draw_instanced(vertex_count, instance_count, first_vertex, first_instance);
        self.stats.draws += 1;
        Ok(())
    }

    pub fn draw_indexed_instanced<B>(
        &mut self,
        rc: &mut RealizeContext<'_, B>,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<()>
    where
        B: DescriptorBackend + PipelineBackend + CommandRecorder + ?Sized,
    {
        if self.current.index_buffer.is_none() {
            return Err(precondition("indexed draw without an index buffer"));
        }
        self.flush_or_drop(rc, BindType::Graphics, "indexed draw")?;
        rc.backend
            .draw_indexed_instanced(index_count, instance_count, first_index, base_vertex, first_instance);
        self.stats.draws += 1;
        Ok(())
    }

    pub fn dispatch<B>(&mut self, rc: &mut RealizeContext<'_, B>, x: u32, y: u32, z: u32) -> Result<()>
    where
        B: DescriptorBackend + PipelineBackend + CommandRecorder + ?Sized,
    {
        self.flush_or_drop(rc, BindType::Compute, "dispatch")?;
        rc.backend.dispatch(x, y, z);
        self.stats.dispatches += 1;
        Ok(())
    }

    fn flush_or_drop<B>(&mut self, rc: &mut RealizeContext<'_, B>, bind_type: BindType, what: &str) -> Result<()>
    where
        B: DescriptorBackend + PipelineBackend + CommandRecorder + ?Sized,
    {
        if let Err(e) = self.flush(rc, bind_type) {
            self.stats.dropped += 1;
            log::error!("[context] {what} dropped in frame {}: {e}", self.frame_index);
            return Err(e);
        }
        Ok(())
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Realizes every dirty piece of state on the native command stream.
    pub fn flush<B>(&mut self, rc: &mut RealizeContext<'_, B>, bind_type: BindType) -> Result<()>
    where
        B: DescriptorBackend + PipelineBackend + CommandRecorder + ?Sized,
    {
        self.ensure_recording("flush")?;
        let Some(program) = self.current.program.clone() else {
            return Err(precondition("no shader program bound"));
        };
        if program.bind_type != bind_type {
            return Err(precondition(format!(
                "{bind_type:?} work issued with a {:?} program",
                program.bind_type
            )));
        }

        self.flush_barriers(&mut *rc.backend);

        let graphics = bind_type == BindType::Graphics;
        if graphics && self.current.dirty.contains(DirtyFlags::RENDER_TARGETS) {
            self.realize_render_pass(rc)?;
        }
        if self
            .current
            .dirty
            .intersects(DirtyFlags::ROOT_SIGNATURE | DirtyFlags::DESCRIPTORS | DirtyFlags::SAMPLER_DESCRIPTORS)
        {
            self.realize_root_layout(rc, bind_type)?;
        }
        if self
            .current
            .dirty
            .intersects(DirtyFlags::DESCRIPTORS | DirtyFlags::SAMPLER_DESCRIPTORS)
        {
            self.realize_descriptor_tables(rc, bind_type)?;
        }
        if self.current.dirty.contains(DirtyFlags::PIPELINE) {
            self.realize_pipeline(rc, &program, bind_type)?;
        }

        if graphics {
            let dirty = self.current.dirty;
            if dirty.contains(DirtyFlags::STENCIL_REF) {
                rc.backend.set_stencil_reference(self.current.stencil_ref);
            }
            if dirty.contains(DirtyFlags::TOPOLOGY) {
                rc.backend.set_primitive_topology(self.current.topology);
            }
            if dirty.contains(DirtyFlags::VERTEX_BUFFERS) {
                self.realize_vertex_buffers(rc);
            }
            if dirty.contains(DirtyFlags::INDEX_BUFFER)
                && let Some(view) = &self.current.index_buffer
            {
                rc.backend.set_index_buffer(view);
            }
            self.current.dirty = DirtyFlags::empty();
        } else {
            self.current.dirty.remove(DirtyFlags::COMPUTE);
        }

        self.stats.flushes += 1;
        Ok(())
    }

    fn flush_barriers<R: CommandRecorder + ?Sized>(&mut self, recorder: &mut R) {
        if !self.barriers.is_empty() {
            recorder.resource_barriers(&self.barriers);
            self.barriers.clear();
        }
    }

    fn realize_render_pass<B>(&mut self, rc: &mut RealizeContext<'_, B>) -> Result<()>
    where
        B: PipelineBackend + CommandRecorder + ?Sized,
    {
        let Some(key) = self.current.render_pass_key() else {
            self.current.render_pass = None;
            return Ok(());
        };

        let handle = match rc.caches.render_passes.refer(&key).copied() {
            Some(handle) => handle,
            None => {
                let state = &self.current;
                let desc = RenderPassDescription {
                    color_formats: state.render_targets.iter().map(|t| t.format).collect(),
                    depth_format: state.depth_target.map(|t| t.format),
                    color_targets: state.render_targets.iter().map(|t| t.handle).collect(),
                    depth_target: state.depth_target.map(|t| t.handle),
                    sample_count: state.graphics.sample_count,
                };
                let handle = rc.backend.create_render_pass(&desc).inspect_err(|e| {
                    log::error!("[context] render pass creation failed: {e}");
                })?;
                rc.caches.render_passes.insert(key.clone(), handle)?;
                handle
            }
        };

        if self.native.render_pass != Some(handle) {
            rc.backend.set_render_pass(handle);
            self.native.render_pass = Some(handle);
        }
        self.current.render_pass = Some(key);
        Ok(())
    }

    fn realize_root_layout<B>(&mut self, rc: &mut RealizeContext<'_, B>, bind_type: BindType) -> Result<()>
    where
        B: PipelineBackend + CommandRecorder + ?Sized,
    {
        let desc = self.current.root_layout_descriptor(bind_type);
        let handle = rc.caches.root_layouts.get_or_create(&*rc.backend, &desc)?;
        let bound = &mut self.native.root_layouts[bind_index(bind_type)];
        if bound.map(|(current, _)| current) != Some(handle) {
            rc.backend.set_root_layout(bind_type, handle);
            *bound = Some((handle, desc));
            // Tables bound under the old layout are gone and the pipeline
            // was compiled against it.
            self.current.dirty |=
                DirtyFlags::PIPELINE | DirtyFlags::DESCRIPTORS | DirtyFlags::SAMPLER_DESCRIPTORS;
        }
        self.current.dirty.remove(DirtyFlags::ROOT_SIGNATURE);
        Ok(())
    }

    fn realize_descriptor_tables<B>(&mut self, rc: &mut RealizeContext<'_, B>, bind_type: BindType) -> Result<()>
    where
        B: DescriptorBackend + CommandRecorder + ?Sized,
    {
        let counts = self.current.resource_counts();
        let dirty = self.current.dirty;

        if dirty.contains(DirtyFlags::DESCRIPTORS) && counts.resource_table_size() > 0 {
            let null = null_descriptor(rc.descriptors, DescriptorKind::CbvSrvUav)?;
            let state = &self.current;
            let mut handles: SmallVec<[CpuDescriptorHandle; 32]> = SmallVec::new();
            gather(&mut handles, &state.constant_buffers, counts.constant_buffers, null);
            gather(&mut handles, &state.shader_resources, counts.shader_resources, null);
            gather(&mut handles, &state.unordered_access, counts.unordered_access, null);
            let table = realize_table(rc, DescriptorKind::CbvSrvUav, &handles)?;
            rc.backend
                .set_descriptor_table(bind_type, RESOURCE_TABLE_ROOT_INDEX, table);
        }
        self.current.dirty.remove(DirtyFlags::DESCRIPTORS);

        if dirty.contains(DirtyFlags::SAMPLER_DESCRIPTORS) && counts.samplers > 0 {
            let null = null_descriptor(rc.descriptors, DescriptorKind::Sampler)?;
            let mut handles: SmallVec<[CpuDescriptorHandle; 32]> = SmallVec::new();
            gather(&mut handles, &self.current.samplers, counts.samplers, null);
            let table = realize_table(rc, DescriptorKind::Sampler, &handles)?;
            rc.backend
                .set_descriptor_table(bind_type, SAMPLER_TABLE_ROOT_INDEX, table);
        }
        self.current.dirty.remove(DirtyFlags::SAMPLER_DESCRIPTORS);
        Ok(())
    }

    fn realize_pipeline<B>(
        &mut self,
        rc: &mut RealizeContext<'_, B>,
        program: &BoundProgram,
        bind_type: BindType,
    ) -> Result<()>
    where
        B: PipelineBackend + CommandRecorder + ?Sized,
    {
        let Some((root_layout, layout)) = self.native.root_layouts[bind_index(bind_type)] else {
            return Err(precondition("pipeline realized before its root layout"));
        };
        let desc = PipelineDescriptor {
            program: program.id,
            permutation: program.permutation,
            root_layout,
            kind: match bind_type {
                BindType::Graphics => PipelineKind::Graphics(self.current.graphics.clone()),
                BindType::Compute => PipelineKind::Compute,
            },
        };
        let handle = match rc.caches.pipelines.refer(&desc).copied() {
            Some(handle) => handle,
            None => {
                let blob_key = desc.blob_key(&layout);
                let blob = rc.caches.pipeline_blobs.get(blob_key);
                let had_blob = blob.is_some();
                let handle = rc.backend.create_pipeline(&desc, blob).inspect_err(|e| {
                    log::error!("[context] pipeline creation failed for {:?}: {e}", program.id);
                })?;
                if !had_blob && let Some(fresh) = rc.backend.pipeline_blob(handle) {
                    rc.caches.pipeline_blobs.insert(blob_key, fresh);
                }
                log::debug!(
                    "[context] pipeline {handle:?} built for {:?} (blob {blob_key:#018x}, cached: {had_blob})",
                    program.id
                );
                rc.caches.pipelines.insert(desc, handle)?;
                handle
            }
        };

        if self.native.pipeline != Some(handle) {
            rc.backend.set_pipeline(handle);
            self.native.pipeline = Some(handle);
        }
        self.current.dirty.remove(DirtyFlags::PIPELINE);
        Ok(())
    }

    fn realize_vertex_buffers<B>(&self, rc: &mut RealizeContext<'_, B>)
    where
        B: CommandRecorder + ?Sized,
    {
        let layout = self.current.graphics.input_layout;
        let mut run: SmallVec<[VertexBufferView; MAX_VERTEX_BUFFERS]> = SmallVec::new();
        let mut run_start = 0;
        for (slot, view) in self.current.vertex_buffers.iter().enumerate() {
            match view {
                Some(view) => {
                    if run.is_empty() {
                        run_start = slot as u32;
                    }
                    let mut view = *view;
                    if let Some(stride) = layout.and_then(|id| rc.caches.vertex_layouts.stride(id, slot as u32)) {
                        view.stride = stride;
                    }
                    run.push(view);
                }
                None if !run.is_empty() => {
                    rc.backend.set_vertex_buffers(run_start, &run);
                    run.clear();
                }
                None => {}
            }
        }
        if !run.is_empty() {
            rc.backend.set_vertex_buffers(run_start, &run);
        }
    }

    // ========================================================================
    // Helpers & queries
    // ========================================================================

    fn ensure_recording(&self, what: &str) -> Result<()> {
        if self.status != CommandStatus::Recording {
            return Err(precondition(format!("{what} called while {:?}", self.status)));
        }
        Ok(())
    }

    #[inline]
    fn mark_if(&mut self, changed: bool, flags: DirtyFlags) {
        if changed {
            self.current.dirty |= flags;
        }
    }

    fn sync_strip_cut(&mut self) {
        let state = &mut self.current;
        let cut = IndexStripCut::for_draw(state.topology, state.index_buffer.map(|v| v.format));
        if state.graphics.strip_cut != cut {
            state.graphics.strip_cut = cut;
            state.dirty |= DirtyFlags::PIPELINE;
        }
    }

    #[inline]
    #[must_use]
    pub fn status(&self) -> CommandStatus {
        self.status
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> &ContextState {
        &self.current
    }

    #[inline]
    #[must_use]
    pub fn dirty(&self) -> DirtyFlags {
        self.current.dirty
    }

    /// Number of pushed scopes.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    #[inline]
    #[must_use]
    pub fn pending_barriers(&self) -> usize {
        self.barriers.len()
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> ContextStats {
        self.stats
    }
}

fn bind_slot(
    slots: &mut [Option<CpuDescriptorHandle>],
    slot: u32,
    handle: CpuDescriptorHandle,
    what: &str,
) -> Result<bool> {
    let len = slots.len();
    let Some(entry) = slots.get_mut(slot as usize) else {
        return Err(precondition(format!("{what} slot {slot} out of range (max {len})")));
    };
    let changed = *entry != Some(handle);
    *entry = Some(handle);
    Ok(changed)
}

/// Appends `count` handles from `slots`, filling unbound ones with `null`.
fn gather(
    out: &mut SmallVec<[CpuDescriptorHandle; 32]>,
    slots: &[Option<CpuDescriptorHandle>],
    count: u32,
    null: CpuDescriptorHandle,
) {
    out.extend((0..count as usize).map(|i| slots.get(i).copied().flatten().unwrap_or(null)));
}

fn null_descriptor(descriptors: &DescriptorHeapAllocationManager, kind: DescriptorKind) -> Result<CpuDescriptorHandle> {
    descriptors
        .null_descriptor(kind)
        .ok_or_else(|| GpuError::failed("context", "descriptor heaps were released"))
}

/// Assembles a staging table holding `handles` (reusing a cached one when
/// the same handles were assembled before) and stages it for the current
/// frame's visible heap.
fn realize_table<B>(
    rc: &mut RealizeContext<'_, B>,
    kind: DescriptorKind,
    handles: &[CpuDescriptorHandle],
) -> Result<GpuDescriptorHandle>
where
    B: DescriptorBackend + ?Sized,
{
    let key = DescriptorTableKey::new(kind, handles);
    let staging = match rc.caches.descriptor_tables.refer(&key).copied() {
        Some(table) => table,
        None => {
            let count = handles.len() as u32;
            let table = rc.descriptors.allocate_staging(&*rc.backend, kind, count)?;
            let sources = coalesce_ranges(handles, rc.descriptors.stride(kind));
            rc.backend.copy_descriptors(kind, table.base_cpu, count, &sources);
            rc.caches.descriptor_tables.insert(key, table)?;
            table
        }
    };

    let visible = rc.descriptors.reserve_visible(&staging)?;
    visible
        .base_gpu
        .ok_or_else(|| GpuError::failed("context", "visible table without a GPU handle"))
}
