//! Backend capabilities.
//!
//! A native backend implements one trait per concern. The managers ask only
//! for the capability they use:
//!
//! | Trait                  | Used by                                   |
//! |------------------------|-------------------------------------------|
//! | [`HeapBackend`]        | resource allocation manager               |
//! | [`DescriptorBackend`]  | descriptor heap allocation manager        |
//! | [`PipelineBackend`]    | root layout, pipeline and pass caches     |
//! | [`CommandRecorder`]    | command context flush and draws           |
//! | [`FenceBackend`]       | frame pacing in the device                |
//!
//! [`GpuBackend`] is implemented for every type that has all five.

use myth_core::errors::Result;
use myth_core::ids::{
    CpuDescriptorHandle, DescriptorHeapHandle, GpuDescriptorHandle, NativeResource, PipelineHandle,
    RenderPassHandle, RootLayoutHandle,
};
pub use myth_memory::HeapBackend;

use crate::descriptor::view::{SamplerDescription, ViewDescription};
use crate::descriptor::{DescriptorKind, DescriptorRange};
use crate::pipeline::{BindType, PipelineDescriptor, RenderPassDescription, RootLayoutDescriptor};

// ─── Native-facing values ─────────────────────────────────────────────────────

/// A descriptor heap created by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapInfo {
    pub handle: DescriptorHeapHandle,
    /// Bytes between consecutive descriptors.
    pub stride: u32,
    pub cpu_base: CpuDescriptorHandle,
    /// Present for shader-visible heaps only.
    pub gpu_base: Option<GpuDescriptorHandle>,
}

/// Usage state of a resource for barrier tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    VertexAndConstantBuffer,
    IndexBuffer,
    RenderTarget,
    UnorderedAccess,
    DepthWrite,
    DepthRead,
    ShaderResource,
    CopySource,
    CopyDest,
    Present,
}

/// A queued resource state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceBarrier {
    pub resource: NativeResource,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// A bound vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBufferView {
    pub resource: NativeResource,
    pub offset: u64,
    pub size_bytes: u64,
    /// Filled from the input layout when the context flushes.
    pub stride: u32,
}

/// A bound index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexBufferView {
    pub resource: NativeResource,
    pub offset: u64,
    pub size_bytes: u64,
    pub format: wgpu::IndexFormat,
}

// ─── Capabilities ─────────────────────────────────────────────────────────────

/// Descriptor heap capability.
pub trait DescriptorBackend {
    fn create_descriptor_heap(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo>;

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapHandle);

    /// Copies `sources`, in order, into the `dst_count` descriptors starting
    /// at `dst`. The source counts add up to `dst_count`.
    fn copy_descriptors(
        &self,
        kind: DescriptorKind,
        dst: CpuDescriptorHandle,
        dst_count: u32,
        sources: &[DescriptorRange],
    );

    /// Writes a descriptor that reads as zero.
    fn write_null_descriptor(&self, kind: DescriptorKind, dst: CpuDescriptorHandle);

    fn write_view(&self, dst: CpuDescriptorHandle, resource: NativeResource, view: &ViewDescription);

    fn write_sampler(&self, dst: CpuDescriptorHandle, sampler: &SamplerDescription);
}

/// Pipeline, layout and render pass capability.
pub trait PipelineBackend {
    fn create_root_layout(&self, desc: &RootLayoutDescriptor) -> Result<RootLayoutHandle>;

    fn destroy_root_layout(&self, layout: RootLayoutHandle);

    /// Builds a pipeline. `cached_blob` is what
    /// [`pipeline_blob`](Self::pipeline_blob) returned for an identical
    /// descriptor earlier, if anything.
    fn create_pipeline(&self, desc: &PipelineDescriptor, cached_blob: Option<&[u8]>) -> Result<PipelineHandle>;

    /// Serialized form of a compiled pipeline, when the backend supports it.
    fn pipeline_blob(&self, _pipeline: PipelineHandle) -> Option<Vec<u8>> {
        None
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    fn create_render_pass(&self, desc: &RenderPassDescription) -> Result<RenderPassHandle>;

    fn destroy_render_pass(&self, pass: RenderPassHandle);
}

/// Command recording capability.
pub trait CommandRecorder {
    fn begin_recording(&mut self, frame_index: usize) -> Result<()>;

    fn end_recording(&mut self) -> Result<()>;

    /// Submits the recorded commands.
    fn submit(&mut self) -> Result<()>;

    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]);

    fn set_root_layout(&mut self, bind_type: BindType, layout: RootLayoutHandle);

    fn set_descriptor_table(&mut self, bind_type: BindType, root_index: u32, table: GpuDescriptorHandle);

    fn set_render_pass(&mut self, pass: RenderPassHandle);

    fn set_pipeline(&mut self, pipeline: PipelineHandle);

    fn set_stencil_reference(&mut self, reference: u32);

    fn set_primitive_topology(&mut self, topology: wgpu::PrimitiveTopology);

    fn set_vertex_buffers(&mut self, first_slot: u32, views: &[VertexBufferView]);

    fn set_index_buffer(&mut self, view: &IndexBufferView);

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);

    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    );

    fn dispatch(&mut self, x: u32, y: u32, z: u32);
}

/// GPU completion tracking.
pub trait FenceBackend {
    /// Signals the next fence value after the last submission and returns it.
    fn signal_fence(&mut self) -> Result<u64>;

    /// Highest fence value the GPU has reached.
    fn completed_fence_value(&self) -> u64;

    /// Blocks until the GPU reaches `value`.
    fn wait_for_fence(&mut self, value: u64) -> Result<()>;
}

/// A backend with every capability the device needs.
pub trait GpuBackend: HeapBackend + DescriptorBackend + PipelineBackend + CommandRecorder + FenceBackend {}

impl<T> GpuBackend for T where T: HeapBackend + DescriptorBackend + PipelineBackend + CommandRecorder + FenceBackend {}
