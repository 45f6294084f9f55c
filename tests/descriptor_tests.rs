//! Descriptor Integration Tests
//!
//! Tests for:
//! - DescriptorHeap: capacity bound, no partial allocation, reset
//! - Manager: staging growth, visible reservation rollback, null descriptors
//! - Upload: staged contents land in the frame's visible heap

use myth_gpu::core::errors::GpuError;
use myth_gpu::core::ids::NativeResource;
use myth_gpu::core::settings::{DescriptorSettings, GpuSettings};
use myth_gpu::render::backend::DescriptorBackend;
use myth_gpu::render::descriptor::view::{SamplerDescription, ViewDescription, ViewKind};
use myth_gpu::render::descriptor::{DescriptorHeap, DescriptorHeapAllocationManager, DescriptorKind, HeapFlavor};
use myth_gpu::render::{DescriptorContent, HeadlessBackend};

fn settings(descriptors: DescriptorSettings) -> GpuSettings {
    GpuSettings {
        buffer_count: 2,
        descriptors,
        ..Default::default()
    }
}

fn small() -> DescriptorSettings {
    DescriptorSettings {
        staging_cbv_srv_uav: 16,
        staging_samplers: 16,
        staging_render_targets: 4,
        staging_depth_stencils: 4,
        visible_cbv_srv_uav: 32,
        visible_samplers: 8,
    }
}

fn setup(descriptors: DescriptorSettings) -> (HeadlessBackend, DescriptorHeapAllocationManager) {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = HeadlessBackend::new();
    let manager = DescriptorHeapAllocationManager::new(&backend, &settings(descriptors)).unwrap();
    (backend, manager)
}

// ============================================================================
// DescriptorHeap
// ============================================================================

#[test]
fn heap_oversized_request_leaves_heap_unchanged() {
    let backend = HeadlessBackend::new();
    let info = backend
        .create_descriptor_heap(DescriptorKind::CbvSrvUav, 16, true)
        .unwrap();
    let mut heap = DescriptorHeap::new(DescriptorKind::CbvSrvUav, HeapFlavor::ShaderVisible, 0, 16, info);

    heap.allocate(8).unwrap();
    assert_eq!(heap.remaining(), 8);

    let err = heap.allocate(10).unwrap_err();
    assert_eq!(
        err,
        GpuError::DescriptorHeapExhausted {
            kind: "CbvSrvUav",
            requested: 10,
            remaining: 8,
        }
    );
    assert_eq!(heap.used(), 8);
    assert_eq!(heap.remaining(), 8);

    // The remaining 8 are still usable in one piece.
    let table = heap.allocate(8).unwrap();
    assert_eq!(table.offset, 8);
    assert_eq!(heap.remaining(), 0);
}

#[test]
fn heap_tables_carry_cpu_and_gpu_addresses() {
    let backend = HeadlessBackend::new();
    let info = backend.create_descriptor_heap(DescriptorKind::Sampler, 8, true).unwrap();
    let mut heap = DescriptorHeap::new(DescriptorKind::Sampler, HeapFlavor::ShaderVisible, 1, 8, info);

    heap.allocate(3).unwrap();
    let table = heap.allocate(2).unwrap();
    assert_eq!(table.heap, 1);
    assert_eq!(table.base_cpu, info.cpu_base.offset(3, info.stride));
    assert_eq!(table.base_gpu, info.gpu_base.map(|g| g.offset(3, info.stride)));
    assert_eq!(table.cpu_handle(1), info.cpu_base.offset(4, info.stride));

    heap.reset();
    assert_eq!(heap.used(), 0);
    assert_eq!(heap.allocate(1).unwrap().offset, 0);
}

#[test]
fn heap_staging_tables_are_reused_after_free() {
    let backend = HeadlessBackend::new();
    let info = backend
        .create_descriptor_heap(DescriptorKind::RenderTarget, 4, false)
        .unwrap();
    let mut heap = DescriptorHeap::new(DescriptorKind::RenderTarget, HeapFlavor::Staging, 0, 4, info);

    let a = heap.allocate(2).unwrap();
    heap.allocate(2).unwrap();
    assert!(heap.allocate(1).is_err());
    assert_eq!(a.base_gpu, None);

    heap.free(&a).unwrap();
    assert_eq!(heap.allocate(2).unwrap().offset, a.offset);
}

// ============================================================================
// Manager
// ============================================================================

#[test]
fn manager_creates_null_descriptors_for_every_kind() {
    let (backend, mut manager) = setup(small());
    for kind in DescriptorKind::ALL {
        let handle = manager.null_descriptor(kind).unwrap();
        assert_eq!(backend.descriptor(handle), Some(DescriptorContent::Null(kind)));
    }
    manager.release(&backend);
    assert_eq!(manager.null_descriptor(DescriptorKind::Sampler), None);
}

#[test]
fn manager_staging_grows_by_one_heap() {
    let (backend, mut manager) = setup(small());
    let before = manager.stats().staging_heaps[DescriptorKind::RenderTarget.index()];

    // One of the four descriptors holds the null descriptor.
    manager.allocate_staging(&backend, DescriptorKind::RenderTarget, 3).unwrap();
    assert_eq!(
        manager.stats().staging_heaps[DescriptorKind::RenderTarget.index()],
        before
    );

    let table = manager.allocate_staging(&backend, DescriptorKind::RenderTarget, 2).unwrap();
    assert_eq!(table.heap, 1);
    assert_eq!(
        manager.stats().staging_heaps[DescriptorKind::RenderTarget.index()],
        before + 1
    );
    manager.release(&backend);
}

#[test]
fn manager_visible_exhaustion_rolls_back_staging() {
    let (backend, mut manager) = setup(small());
    let before = manager.stats();

    // Eight visible samplers per frame; ten cannot fit.
    let err = manager.allocate(&backend, DescriptorKind::Sampler, 10).unwrap_err();
    assert!(matches!(
        err,
        GpuError::DescriptorHeapExhausted {
            requested: 10,
            remaining: 8,
            ..
        }
    ));
    assert_eq!(manager.stats(), before);
    manager.release(&backend);
}

#[test]
fn manager_non_visible_kinds_have_no_visible_range() {
    let (backend, mut manager) = setup(small());
    let allocation = manager.allocate(&backend, DescriptorKind::DepthStencil, 1).unwrap();
    assert_eq!(allocation.visible, None);
    assert!(!allocation.staging.is_shader_visible());

    let allocation = manager.allocate(&backend, DescriptorKind::CbvSrvUav, 4).unwrap();
    let visible = allocation.visible.unwrap();
    assert!(visible.is_shader_visible());
    assert_eq!(visible.count, 4);
    assert!(visible.base_gpu.is_some());
    manager.release(&backend);
}

#[test]
fn manager_rejects_freeing_visible_tables() {
    let (backend, mut manager) = setup(small());
    let allocation = manager.allocate(&backend, DescriptorKind::CbvSrvUav, 1).unwrap();
    manager.free(&allocation.staging).unwrap();

    #[cfg(not(debug_assertions))]
    {
        let visible = allocation.visible.unwrap();
        assert!(matches!(manager.free(&visible), Err(GpuError::Precondition(_))));
    }
    manager.release(&backend);
}

// ============================================================================
// Upload
// ============================================================================

#[test]
fn upload_copies_staged_tables_into_visible_heap() {
    let (backend, mut manager) = setup(small());
    manager.begin_frame(0);

    let staging = manager.allocate_staging(&backend, DescriptorKind::CbvSrvUav, 2).unwrap();
    backend.write_view(
        staging.cpu_handle(0),
        NativeResource(7),
        &ViewDescription::constant_buffer(0, 256),
    );
    backend.write_view(
        staging.cpu_handle(1),
        NativeResource(8),
        &ViewDescription::shader_resource(wgpu::TextureFormat::Rgba8Unorm),
    );
    let sampler = manager.allocate_staging(&backend, DescriptorKind::Sampler, 1).unwrap();
    backend.write_sampler(sampler.base_cpu, &SamplerDescription::default());

    let first = manager.reserve_visible(&staging).unwrap();
    let second = manager.reserve_visible(&staging).unwrap();
    let samplers = manager.reserve_visible(&sampler).unwrap();
    assert_eq!(second.offset, first.offset + 2);
    assert_eq!(manager.stats().pending_copies, 3);

    let copies_before = backend.counters().descriptor_copies;
    assert_eq!(manager.upload(&backend, 0), 2);
    assert_eq!(backend.counters().descriptor_copies - copies_before, 2);
    assert_eq!(manager.stats().pending_copies, 0);

    let gpu = second.base_gpu.unwrap();
    assert_eq!(
        backend.visible_descriptor(gpu),
        Some(DescriptorContent::View {
            resource: NativeResource(7),
            kind: ViewKind::ConstantBuffer,
        })
    );
    assert_eq!(
        backend.visible_descriptor(gpu.offset(1, second.stride)),
        Some(DescriptorContent::View {
            resource: NativeResource(8),
            kind: ViewKind::ShaderResource,
        })
    );
    assert_eq!(
        backend.visible_descriptor(samplers.base_gpu.unwrap()),
        Some(DescriptorContent::Sampler)
    );
    manager.release(&backend);
}

#[test]
fn begin_frame_switches_visible_heaps() {
    let (backend, mut manager) = setup(small());
    manager.begin_frame(0);
    let staging = manager.allocate_staging(&backend, DescriptorKind::CbvSrvUav, 4).unwrap();
    let in_frame_0 = manager.reserve_visible(&staging).unwrap();
    manager.upload(&backend, 0);

    manager.begin_frame(1);
    assert_eq!(manager.frame_index(), 1);
    assert_eq!(manager.stats().visible_used[0], 0);
    let in_frame_1 = manager.reserve_visible(&staging).unwrap();
    assert_eq!(in_frame_1.heap, 1);
    assert_ne!(in_frame_1.base_gpu, in_frame_0.base_gpu);
    manager.upload(&backend, 1);

    // Slot 0 comes around again and starts empty.
    manager.begin_frame(2);
    assert_eq!(manager.frame_index(), 0);
    assert_eq!(manager.stats().visible_used[0], 0);
    assert_eq!(manager.reserve_visible(&staging).unwrap().offset, 0);
    manager.release(&backend);
}

#[test]
fn release_destroys_every_heap() {
    let (backend, mut manager) = setup(small());
    manager.allocate_staging(&backend, DescriptorKind::DepthStencil, 4).unwrap();
    manager.release(&backend);

    let counters = backend.counters();
    // Four staging kinds, one grown heap, two visible heaps per frame.
    assert_eq!(counters.descriptor_heaps_created, 4 + 1 + 2 * 2);
    assert_eq!(counters.descriptor_heaps_destroyed, counters.descriptor_heaps_created);
}
