//! Headless Backend
//!
//! A [`GpuBackend`](crate::backend::GpuBackend) without a GPU. Every native
//! call is counted, recorded commands are kept in order, and descriptor
//! writes and copies are mirrored into a CPU-side table so that tests can
//! check what a shader-visible heap would hold after upload.
//!
//! # Fences
//!
//! Signaled fence values complete only when waited on or when
//! [`HeadlessBackend::complete_all`] is called, which makes it possible to
//! observe the frame-pacing wait of the device.
//!
//! # Failure injection
//!
//! [`HeadlessBackend::fail_heap_pages`] makes every subsequent heap page
//! creation fail with [`GpuError::Failed`].

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use myth_core::errors::{GpuError, Result};
use myth_core::ids::{
    CpuDescriptorHandle, DescriptorHeapHandle, GpuDescriptorHandle, HeapHandle, NativeResource, PipelineHandle,
    RenderPassHandle, RootLayoutHandle,
};
use myth_core::memory::MemoryUsageClass;
use myth_memory::{AllocationInfo, ResourceDescription, ResourceDimension};

use crate::backend::{
    CommandRecorder, DescriptorBackend, DescriptorHeapInfo, FenceBackend, HeapBackend, IndexBufferView,
    PipelineBackend, ResourceBarrier, VertexBufferView,
};
use crate::descriptor::view::{SamplerDescription, ViewDescription, ViewKind};
use crate::descriptor::{DescriptorKind, DescriptorRange};
use crate::pipeline::{BindType, PipelineDescriptor, RenderPassDescription, RootLayoutDescriptor};

/// Bytes between descriptors in every headless heap.
pub const HEADLESS_DESCRIPTOR_STRIDE: u32 = 32;

/// Native call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessCounters {
    pub heap_pages_created: u64,
    pub heap_pages_destroyed: u64,
    pub resources_created: u64,
    pub resources_released: u64,
    pub descriptor_heaps_created: u64,
    pub descriptor_heaps_destroyed: u64,
    pub descriptor_copies: u64,
    pub root_layouts_created: u64,
    pub root_layouts_destroyed: u64,
    pub pipelines_created: u64,
    /// Pipelines created with a cached blob.
    pub pipelines_from_blob: u64,
    pub pipelines_destroyed: u64,
    pub render_passes_created: u64,
    pub render_passes_destroyed: u64,
    pub submits: u64,
    pub fence_waits: u64,
}

/// What a descriptor slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorContent {
    Null(DescriptorKind),
    View { resource: NativeResource, kind: ViewKind },
    Sampler,
}

/// A command recorded between `begin_recording` and `end_recording`.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Begin { frame_index: usize },
    End,
    Barriers(Vec<ResourceBarrier>),
    SetRootLayout(BindType, RootLayoutHandle),
    SetDescriptorTable { bind_type: BindType, root_index: u32, table: GpuDescriptorHandle },
    SetRenderPass(RenderPassHandle),
    SetPipeline(PipelineHandle),
    SetStencilReference(u32),
    SetTopology(wgpu::PrimitiveTopology),
    SetVertexBuffers { first_slot: u32, views: Vec<VertexBufferView> },
    SetIndexBuffer(IndexBufferView),
    Draw { vertex_count: u32, instance_count: u32 },
    DrawIndexed { index_count: u32, instance_count: u32 },
    Dispatch { x: u32, y: u32, z: u32 },
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_handle: u64,
    next_descriptor_address: u64,
    counters: HeadlessCounters,
    fail_heap_pages: bool,
    descriptors: FxHashMap<u64, DescriptorContent>,
    blobs: FxHashMap<PipelineHandle, Vec<u8>>,
}

impl HeadlessState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// Recording backend for tests and tools.
#[derive(Debug)]
pub struct HeadlessBackend {
    state: Mutex<HeadlessState>,
    commands: Vec<RecordedCommand>,
    recording: bool,
    buffer_alignment: u64,
    texture_alignment: u64,
    pipeline_blobs: bool,
    fence_signaled: u64,
    fence_completed: u64,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeadlessState {
                next_descriptor_address: 0x1_0000,
                ..Default::default()
            }),
            commands: Vec::new(),
            recording: false,
            buffer_alignment: 256,
            texture_alignment: 64 * 1024,
            pipeline_blobs: false,
            fence_signaled: 0,
            fence_completed: 0,
        }
    }

    /// Overrides the placement alignment reported for buffers and textures.
    #[must_use]
    pub fn with_alignments(mut self, buffer: u64, texture: u64) -> Self {
        self.buffer_alignment = buffer;
        self.texture_alignment = texture;
        self
    }

    /// Makes `pipeline_blob` return a serialized form of each pipeline.
    #[must_use]
    pub fn with_pipeline_blobs(mut self) -> Self {
        self.pipeline_blobs = true;
        self
    }

    /// Makes heap page creation fail from now on.
    pub fn fail_heap_pages(&self, fail: bool) {
        self.state.lock().fail_heap_pages = fail;
    }

    #[must_use]
    pub fn counters(&self) -> HeadlessCounters {
        self.state.lock().counters
    }

    #[must_use]
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Forgets the recorded commands.
    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Content of the descriptor at `handle`.
    #[must_use]
    pub fn descriptor(&self, handle: CpuDescriptorHandle) -> Option<DescriptorContent> {
        self.state.lock().descriptors.get(&handle.0).copied()
    }

    /// Content of the descriptor at a GPU address. Visible heaps alias their
    /// CPU and GPU addresses.
    #[must_use]
    pub fn visible_descriptor(&self, handle: GpuDescriptorHandle) -> Option<DescriptorContent> {
        self.descriptor(CpuDescriptorHandle(handle.0))
    }

    /// Lets the GPU catch up with every signaled fence value.
    pub fn complete_all(&mut self) {
        self.fence_completed = self.fence_signaled;
    }

    fn record(&mut self, command: RecordedCommand) {
        debug_assert!(self.recording, "{command:?} recorded outside of begin/end");
        self.commands.push(command);
    }
}

impl HeapBackend for HeadlessBackend {
    fn allocation_info(&self, desc: &ResourceDescription, _usage: MemoryUsageClass) -> AllocationInfo {
        let alignment = match desc.dimension {
            ResourceDimension::Buffer => self.buffer_alignment,
            _ if desc.sample_count > 1 => self.texture_alignment.max(4 * 1024 * 1024),
            _ => self.texture_alignment,
        };
        AllocationInfo {
            size_bytes: desc.packed_size_bytes().max(1),
            alignment,
        }
    }

    fn create_heap_page(&self, size_bytes: u64, usage: MemoryUsageClass) -> Result<HeapHandle> {
        let mut state = self.state.lock();
        if state.fail_heap_pages {
            return Err(GpuError::failed(
                "headless",
                format!("heap page of {size_bytes} bytes ({usage:?}) rejected"),
            ));
        }
        state.counters.heap_pages_created += 1;
        Ok(HeapHandle(state.handle()))
    }

    fn destroy_heap_page(&self, _heap: HeapHandle) {
        self.state.lock().counters.heap_pages_destroyed += 1;
    }

    fn create_placed_resource(
        &self,
        _heap: HeapHandle,
        _offset: u64,
        _desc: &ResourceDescription,
    ) -> Result<NativeResource> {
        let mut state = self.state.lock();
        state.counters.resources_created += 1;
        Ok(NativeResource(state.handle()))
    }

    fn release_resource(&self, _resource: NativeResource) {
        self.state.lock().counters.resources_released += 1;
    }
}

impl DescriptorBackend for HeadlessBackend {
    fn create_descriptor_heap(
        &self,
        _kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo> {
        let mut state = self.state.lock();
        state.counters.descriptor_heaps_created += 1;
        let base = state.next_descriptor_address;
        // Leave a gap so adjacent heaps never look contiguous.
        state.next_descriptor_address += (u64::from(capacity) + 16) * u64::from(HEADLESS_DESCRIPTOR_STRIDE);
        Ok(DescriptorHeapInfo {
            handle: DescriptorHeapHandle(state.handle()),
            stride: HEADLESS_DESCRIPTOR_STRIDE,
            cpu_base: CpuDescriptorHandle(base),
            gpu_base: shader_visible.then_some(GpuDescriptorHandle(base)),
        })
    }

    fn destroy_descriptor_heap(&self, _heap: DescriptorHeapHandle) {
        self.state.lock().counters.descriptor_heaps_destroyed += 1;
    }

    fn copy_descriptors(
        &self,
        _kind: DescriptorKind,
        dst: CpuDescriptorHandle,
        dst_count: u32,
        sources: &[DescriptorRange],
    ) {
        let mut state = self.state.lock();
        state.counters.descriptor_copies += 1;
        debug_assert_eq!(sources.iter().map(|r| r.count).sum::<u32>(), dst_count);

        let mut written = 0;
        for range in sources {
            for i in 0..range.count {
                let src = range.start.offset(i, HEADLESS_DESCRIPTOR_STRIDE).0;
                let target = dst.offset(written, HEADLESS_DESCRIPTOR_STRIDE).0;
                match state.descriptors.get(&src).copied() {
                    Some(content) => {
                        state.descriptors.insert(target, content);
                    }
                    None => {
                        state.descriptors.remove(&target);
                    }
                }
                written += 1;
            }
        }
    }

    fn write_null_descriptor(&self, kind: DescriptorKind, dst: CpuDescriptorHandle) {
        self.state
            .lock()
            .descriptors
            .insert(dst.0, DescriptorContent::Null(kind));
    }

    fn write_view(&self, dst: CpuDescriptorHandle, resource: NativeResource, view: &ViewDescription) {
        self.state.lock().descriptors.insert(
            dst.0,
            DescriptorContent::View {
                resource,
                kind: view.kind,
            },
        );
    }

    fn write_sampler(&self, dst: CpuDescriptorHandle, _sampler: &SamplerDescription) {
        self.state
            .lock()
            .descriptors
            .insert(dst.0, DescriptorContent::Sampler);
    }
}

impl PipelineBackend for HeadlessBackend {
    fn create_root_layout(&self, _desc: &RootLayoutDescriptor) -> Result<RootLayoutHandle> {
        let mut state = self.state.lock();
        state.counters.root_layouts_created += 1;
        Ok(RootLayoutHandle(state.handle()))
    }

    fn destroy_root_layout(&self, _layout: RootLayoutHandle) {
        self.state.lock().counters.root_layouts_destroyed += 1;
    }

    fn create_pipeline(&self, desc: &PipelineDescriptor, cached_blob: Option<&[u8]>) -> Result<PipelineHandle> {
        let mut state = self.state.lock();
        state.counters.pipelines_created += 1;
        if cached_blob.is_some() {
            state.counters.pipelines_from_blob += 1;
        }
        let handle = PipelineHandle(state.handle());
        if self.pipeline_blobs {
            let blob = match cached_blob {
                Some(blob) => blob.to_vec(),
                None => desc.content_hash().to_le_bytes().to_vec(),
            };
            state.blobs.insert(handle, blob);
        }
        Ok(handle)
    }

    fn pipeline_blob(&self, pipeline: PipelineHandle) -> Option<Vec<u8>> {
        self.state.lock().blobs.get(&pipeline).cloned()
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        let mut state = self.state.lock();
        state.counters.pipelines_destroyed += 1;
        state.blobs.remove(&pipeline);
    }

    fn create_render_pass(&self, _desc: &RenderPassDescription) -> Result<RenderPassHandle> {
        let mut state = self.state.lock();
        state.counters.render_passes_created += 1;
        Ok(RenderPassHandle(state.handle()))
    }

    fn destroy_render_pass(&self, _pass: RenderPassHandle) {
        self.state.lock().counters.render_passes_destroyed += 1;
    }
}

impl CommandRecorder for HeadlessBackend {
    fn begin_recording(&mut self, frame_index: usize) -> Result<()> {
        if self.recording {
            return Err(GpuError::failed("headless", "command list is already open"));
        }
        self.recording = true;
        self.record(RecordedCommand::Begin { frame_index });
        Ok(())
    }

    fn end_recording(&mut self) -> Result<()> {
        if !self.recording {
            return Err(GpuError::failed("headless", "command list is not open"));
        }
        self.record(RecordedCommand::End);
        self.recording = false;
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        if self.recording {
            return Err(GpuError::failed("headless", "submit of an open command list"));
        }
        self.state.get_mut().counters.submits += 1;
        Ok(())
    }

    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]) {
        self.record(RecordedCommand::Barriers(barriers.to_vec()));
    }

    fn set_root_layout(&mut self, bind_type: BindType, layout: RootLayoutHandle) {
        self.record(RecordedCommand::SetRootLayout(bind_type, layout));
    }

    fn set_descriptor_table(&mut self, bind_type: BindType, root_index: u32, table: GpuDescriptorHandle) {
        self.record(RecordedCommand::SetDescriptorTable {
            bind_type,
            root_index,
            table,
        });
    }

    fn set_render_pass(&mut self, pass: RenderPassHandle) {
        self.record(RecordedCommand::SetRenderPass(pass));
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.record(RecordedCommand::SetPipeline(pipeline));
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        self.record(RecordedCommand::SetStencilReference(reference));
    }

    fn set_primitive_topology(&mut self, topology: wgpu::PrimitiveTopology) {
        self.record(RecordedCommand::SetTopology(topology));
    }

    fn set_vertex_buffers(&mut self, first_slot: u32, views: &[VertexBufferView]) {
        self.record(RecordedCommand::SetVertexBuffers {
            first_slot,
            views: views.to_vec(),
        });
    }

    fn set_index_buffer(&mut self, view: &IndexBufferView) {
        self.record(RecordedCommand::SetIndexBuffer(*view));
    }

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.record(RecordedCommand::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _base_vertex: i32,
        _first_instance: u32,
    ) {
        self.record(RecordedCommand::DrawIndexed {
            index_count,
            instance_count,
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record(RecordedCommand::Dispatch { x, y, z });
    }
}

impl FenceBackend for HeadlessBackend {
    fn signal_fence(&mut self) -> Result<u64> {
        self.fence_signaled += 1;
        Ok(self.fence_signaled)
    }

    fn completed_fence_value(&self) -> u64 {
        self.fence_completed
    }

    fn wait_for_fence(&mut self, value: u64) -> Result<()> {
        if value > self.fence_signaled {
            return Err(GpuError::failed(
                "headless",
                format!("wait for fence {value} that was never signaled"),
            ));
        }
        self.state.get_mut().counters.fence_waits += 1;
        self.fence_completed = self.fence_completed.max(value);
        Ok(())
    }
}
