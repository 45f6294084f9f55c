//! Device Integration Tests
//!
//! Tests for:
//! - Paging, render pass caching, deferred release and descriptor
//!   exhaustion driven through the frame loop
//! - Per-slot fence waits
//! - View and sampler lifecycle
//! - Pipeline blob persistence across creation orders
//! - Cache eviction against frames in flight
//! - Teardown releasing every native object

use myth_gpu::core::errors::GpuError;
use myth_gpu::core::ids::{ResourceViewId, ShaderProgramId, VertexLayoutId};
use myth_gpu::core::memory::{ArenaStrategy, MemoryUsageClass};
use myth_gpu::core::settings::{ArenaStrategies, DescriptorSettings, GpuSettings};
use myth_gpu::memory::ResourceDescription;
use myth_gpu::render::descriptor::view::{SamplerDescription, ViewDescription, ViewKind};
use myth_gpu::render::pipeline::{BindType, ProgramEntry, ResourceCounts, ShaderProgramDescription};
use myth_gpu::render::{DescriptorContent, FenceBackend, GpuDevice, HeadlessBackend, RecordedCommand};

const KB: u64 = 1024;
const MESH: ShaderProgramId = ShaderProgramId(1);
const BLUR: ShaderProgramId = ShaderProgramId(2);

fn mesh_program() -> ShaderProgramDescription {
    ShaderProgramDescription {
        name: "mesh".into(),
        bind_type: BindType::Graphics,
        reflection: None,
    }
}

fn blur_program() -> ShaderProgramDescription {
    ShaderProgramDescription {
        name: "blur".into(),
        bind_type: BindType::Compute,
        reflection: None,
    }
}

const PROGRAMS: &[ProgramEntry] = &[
    ProgramEntry {
        id: MESH,
        permutation: 0,
        build: mesh_program,
    },
    ProgramEntry {
        id: BLUR,
        permutation: 0,
        build: blur_program,
    },
];

fn device_with(backend: HeadlessBackend, settings: GpuSettings) -> GpuDevice<HeadlessBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut device = GpuDevice::new(backend, &settings).unwrap();
    assert_eq!(device.register_programs(PROGRAMS).unwrap(), 2);
    device
}

fn device(buffer_count: u32) -> GpuDevice<HeadlessBackend> {
    device_with(
        HeadlessBackend::new(),
        GpuSettings {
            buffer_count,
            ..Default::default()
        },
    )
}

fn color_target(device: &mut GpuDevice<HeadlessBackend>) -> ResourceViewId {
    let format = wgpu::TextureFormat::Rgba8Unorm;
    let texture = device
        .allocate_resource(&ResourceDescription::texture_2d(64, 64, format), MemoryUsageClass::GpuOnly)
        .unwrap();
    device
        .create_view(texture, &ViewDescription::render_target(format))
        .unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn device_small_resources_page_together() {
    let mut device = device_with(
        HeadlessBackend::new(),
        GpuSettings {
            buffer_count: 2,
            default_page_size_bytes: 4 * KB,
            ..Default::default()
        },
    );
    device.begin_frame().unwrap();

    for _ in 0..3 {
        device
            .allocate_resource(&ResourceDescription::buffer(KB), MemoryUsageClass::GpuOnly)
            .unwrap();
    }
    let gpu_only = MemoryUsageClass::GpuOnly.index();
    assert_eq!(device.stats().memory[gpu_only].page_count, 1);

    device
        .allocate_resource(&ResourceDescription::buffer(2 * KB), MemoryUsageClass::GpuOnly)
        .unwrap();
    let stats = device.stats();
    assert_eq!(stats.memory[gpu_only].page_count, 2);
    assert_eq!(stats.memory[gpu_only].used_bytes, 5 * KB);
    assert_eq!(stats.memory[MemoryUsageClass::CpuToGpu.index()].page_count, 0);

    device.end_frame().unwrap();
}

#[test]
fn device_render_pass_is_reused_for_the_same_targets() {
    let mut device = device(2);
    let a = color_target(&mut device);
    let b = color_target(&mut device);
    let c = color_target(&mut device);

    device.begin_frame().unwrap();
    device.bind_program(MESH, 0).unwrap();

    device.bind_render_targets(&[a, b], None).unwrap();
    device.draw_instanced(3, 1, 0, 0).unwrap();
    device.bind_render_targets(&[a, b], None).unwrap();
    device.draw_instanced(3, 1, 0, 0).unwrap();
    assert_eq!(device.backend().counters().render_passes_created, 1);

    device.bind_render_targets(&[c], None).unwrap();
    device.draw_instanced(3, 1, 0, 0).unwrap();
    device.bind_render_targets(&[a, b], None).unwrap();
    device.draw_instanced(3, 1, 0, 0).unwrap();
    device.end_frame().unwrap();

    assert_eq!(device.backend().counters().render_passes_created, 2);
    assert_eq!(device.stats().caches.render_passes, 2);
    let passes_set = device
        .backend()
        .commands()
        .iter()
        .filter(|c| matches!(c, RecordedCommand::SetRenderPass(_)))
        .count();
    assert_eq!(passes_set, 3);
}

#[test]
fn device_deferred_free_waits_for_every_frame_slot() {
    let mut device = device(3);

    device.begin_frame().unwrap();
    let buffer = device
        .allocate_resource(&ResourceDescription::buffer(4 * KB), MemoryUsageClass::CpuToGpu)
        .unwrap();
    device.free_resource(buffer, false).unwrap();
    assert!(device.memory().is_pending_release(buffer));
    device.end_frame().unwrap();

    for _ in 1..3 {
        device.begin_frame().unwrap();
        assert!(device.memory().is_pending_release(buffer));
        assert_eq!(device.backend().counters().resources_released, 0);
        device.end_frame().unwrap();
    }

    // The slot that freed it comes around again.
    assert_eq!(device.begin_frame().unwrap(), 0);
    assert!(!device.memory().is_pending_release(buffer));
    assert!(device.memory().allocation(buffer).is_none());
    assert_eq!(device.backend().counters().resources_released, 1);
    assert_eq!(device.stats().pending_releases, 0);
    device.end_frame().unwrap();
}

#[test]
fn device_descriptor_exhaustion_is_recoverable() {
    let mut device = device_with(
        HeadlessBackend::new(),
        GpuSettings {
            buffer_count: 2,
            descriptors: DescriptorSettings {
                visible_cbv_srv_uav: 8,
                ..Default::default()
            },
            ..Default::default()
        },
    );
    let wide = ShaderProgramId(10);
    let narrow = ShaderProgramId(11);
    for (id, constant_buffers) in [(wide, 10), (narrow, 8)] {
        device
            .register_program(
                id,
                0,
                ShaderProgramDescription {
                    name: format!("cb{constant_buffers}"),
                    bind_type: BindType::Graphics,
                    reflection: Some(ResourceCounts {
                        constant_buffers,
                        ..Default::default()
                    }),
                },
            )
            .unwrap();
    }

    device.begin_frame().unwrap();
    device.bind_program(wide, 0).unwrap();
    let err = device.draw_instanced(3, 1, 0, 0).unwrap_err();
    assert_eq!(
        err,
        GpuError::DescriptorHeapExhausted {
            kind: "CbvSrvUav",
            requested: 10,
            remaining: 8,
        }
    );
    assert_eq!(device.stats().descriptors.visible_used[0], 0);

    device.bind_program(narrow, 0).unwrap();
    device.draw_instanced(3, 1, 0, 0).unwrap();
    assert_eq!(device.stats().descriptors.visible_used[0], 8);
    device.end_frame().unwrap();

    // The next frame slot starts with an empty visible heap.
    device.begin_frame().unwrap();
    assert_eq!(device.stats().descriptors.visible_used[0], 0);
    device.end_frame().unwrap();
}

// ============================================================================
// Frame loop
// ============================================================================

#[test]
fn device_waits_only_for_unfinished_slots() {
    let mut device = device(2);
    for _ in 0..4 {
        device.begin_frame().unwrap();
        device.end_frame().unwrap();
    }
    // Frames 2 and 3 reuse slots whose work never completed.
    assert_eq!(device.backend().counters().fence_waits, 2);
    assert_eq!(device.backend().counters().submits, 4);

    device.backend_mut().complete_all();
    device.begin_frame().unwrap();
    device.end_frame().unwrap();
    assert_eq!(device.backend().counters().fence_waits, 2);
    assert_eq!(device.frame_number(), 5);
}

#[test]
fn device_frame_records_begin_and_end() {
    let mut device = device(2);
    let slot = device.begin_frame().unwrap();
    device.bind_program(BLUR, 0).unwrap();
    device.dispatch(4, 4, 1).unwrap();
    device.end_frame().unwrap();

    let commands = device.backend().commands();
    assert_eq!(commands.first(), Some(&RecordedCommand::Begin { frame_index: slot }));
    assert_eq!(commands.last(), Some(&RecordedCommand::End));
    assert!(commands.contains(&RecordedCommand::Dispatch { x: 4, y: 4, z: 1 }));
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "begin_frame inside a frame")]
fn device_nested_begin_frame_panics() {
    let mut device = device(2);
    device.begin_frame().unwrap();
    let _ = device.begin_frame();
}

#[test]
fn device_rejects_invalid_settings() {
    let settings = GpuSettings {
        default_page_size_bytes: 3 * KB,
        arena_strategy: ArenaStrategies::uniform(ArenaStrategy::Buddy),
        ..Default::default()
    };
    let err = GpuDevice::new(HeadlessBackend::new(), &settings).err().unwrap();
    assert!(matches!(err, GpuError::Precondition(_)));

    let settings = GpuSettings {
        buffer_count: 3,
        pipeline_max_age: 1,
        ..Default::default()
    };
    let err = GpuDevice::new(HeadlessBackend::new(), &settings).err().unwrap();
    assert!(matches!(err, GpuError::Precondition(ref msg) if msg.contains("pipeline_max_age")));
}

#[test]
fn device_pipelines_outlive_the_frames_using_them() {
    let mut device = device_with(
        HeadlessBackend::new(),
        GpuSettings {
            buffer_count: 3,
            pipeline_max_age: 3,
            ..Default::default()
        },
    );
    device.begin_frame().unwrap();
    device.bind_program(BLUR, 0).unwrap();
    device.dispatch(1, 1, 1).unwrap();
    device.end_frame().unwrap();

    // Frames 1 and 2 leave the pipeline unused while frame 0 is in flight.
    for _ in 1..3 {
        device.begin_frame().unwrap();
        assert_eq!(device.backend().counters().pipelines_destroyed, 0);
        device.end_frame().unwrap();
    }
    assert_eq!(device.backend().completed_fence_value(), 0);

    // Frame 3 reuses slot 0, so frame 0 has completed before the eviction.
    device.begin_frame().unwrap();
    assert!(device.backend().completed_fence_value() >= 1);
    assert_eq!(device.backend().counters().pipelines_destroyed, 1);
    device.end_frame().unwrap();
}

// ============================================================================
// Views & registration
// ============================================================================

#[test]
fn device_views_describe_their_resource() {
    let mut device = device(2);
    let buffer = device
        .allocate_resource(&ResourceDescription::buffer(KB), MemoryUsageClass::CpuToGpu)
        .unwrap();
    let view = device
        .create_view(buffer, &ViewDescription::constant_buffer(0, 256))
        .unwrap();

    let table = device.view_table(view).unwrap();
    assert_eq!(
        device.backend().descriptor(table.base_cpu),
        Some(DescriptorContent::View {
            resource: device.memory().native_resource(buffer).unwrap(),
            kind: ViewKind::ConstantBuffer,
        })
    );
    assert_eq!(device.stats().views, 1);

    device.destroy_view(view).unwrap();
    assert!(matches!(device.destroy_view(view), Err(GpuError::NotFound(_))));
    assert_eq!(device.view_table(view), None);

    device.free_resource(buffer, true).unwrap();
    let err = device
        .create_view(buffer, &ViewDescription::constant_buffer(0, 256))
        .unwrap_err();
    assert!(matches!(err, GpuError::NotFound(_)));
}

#[test]
fn device_destroying_a_view_drops_cached_tables() {
    let mut device = device(2);
    let buffer = device
        .allocate_resource(&ResourceDescription::buffer(KB), MemoryUsageClass::CpuToGpu)
        .unwrap();
    let view = device
        .create_view(buffer, &ViewDescription::constant_buffer(0, 256))
        .unwrap();

    device.begin_frame().unwrap();
    device.bind_program(MESH, 0).unwrap();
    device.bind_constant_buffer(0, view).unwrap();
    device.draw_instanced(3, 1, 0, 0).unwrap();
    device.end_frame().unwrap();
    assert_eq!(device.stats().caches.descriptor_tables, 1);

    device.destroy_view(view).unwrap();
    assert_eq!(device.stats().caches.descriptor_tables, 0);
}

#[test]
fn device_samplers_occupy_staging_descriptors() {
    let mut device = device(2);
    let sampler = device.create_sampler(&SamplerDescription::default()).unwrap();
    let table = device.sampler_table(sampler).unwrap();
    assert_eq!(device.backend().descriptor(table.base_cpu), Some(DescriptorContent::Sampler));

    device.begin_frame().unwrap();
    device.bind_program(MESH, 0).unwrap();
    device.bind_sampler(0, sampler).unwrap();
    device.draw_instanced(3, 1, 0, 0).unwrap();
    device.end_frame().unwrap();
    assert_eq!(device.stats().samplers, 1);

    device.destroy_sampler(sampler).unwrap();
    assert!(matches!(device.bind_sampler(0, sampler), Err(GpuError::NotFound(_))));
}

#[test]
fn device_unknown_names_are_not_found() {
    let mut device = device(2);
    assert!(matches!(
        device.bind_program(ShaderProgramId(99), 0),
        Err(GpuError::NotFound(_))
    ));
    assert!(matches!(
        device.set_input_layout(Some(VertexLayoutId(7))),
        Err(GpuError::NotFound(_))
    ));
    assert!(matches!(
        device.register_programs(PROGRAMS),
        Err(GpuError::AlreadyExists(_))
    ));
}

#[test]
fn device_pipeline_blobs_survive_a_restart() -> anyhow::Result<()> {
    let mut first = device_with(
        HeadlessBackend::new().with_pipeline_blobs(),
        GpuSettings::default(),
    );
    first.begin_frame()?;
    first.bind_program(BLUR, 0)?;
    first.dispatch(1, 1, 1)?;
    first.end_frame()?;
    let bytes = first.save_pipeline_cache()?;
    assert_eq!(first.stats().caches.pipeline_blobs, 1);

    let mut second = device_with(
        HeadlessBackend::new().with_pipeline_blobs(),
        GpuSettings::default(),
    );
    assert_eq!(second.load_pipeline_cache(&bytes)?, 1);
    second.begin_frame()?;
    second.bind_program(BLUR, 0)?;
    second.dispatch(1, 1, 1)?;
    second.end_frame()?;
    assert_eq!(second.stats().caches.pipeline_blobs, 1);
    assert_eq!(second.backend().counters().pipelines_created, 1);
    assert_eq!(second.backend().counters().pipelines_from_blob, 1);
    Ok(())
}

#[test]
fn device_pipeline_blobs_match_across_creation_orders() -> anyhow::Result<()> {
    let mut first = device_with(
        HeadlessBackend::new().with_pipeline_blobs(),
        GpuSettings::default(),
    );
    first.begin_frame()?;
    first.bind_program(BLUR, 0)?;
    first.dispatch(1, 1, 1)?;
    first.end_frame()?;
    let bytes = first.save_pipeline_cache()?;

    // The graphics layout is created first here, so every native handle
    // differs from the first run.
    let mut second = device_with(
        HeadlessBackend::new().with_pipeline_blobs(),
        GpuSettings::default(),
    );
    assert_eq!(second.load_pipeline_cache(&bytes)?, 1);
    second.begin_frame()?;
    second.bind_program(MESH, 0)?;
    second.draw_instanced(3, 1, 0, 0)?;
    second.bind_program(BLUR, 0)?;
    second.dispatch(1, 1, 1)?;
    second.end_frame()?;

    let counters = second.backend().counters();
    assert_eq!(counters.pipelines_created, 2);
    assert_eq!(counters.pipelines_from_blob, 1);
    assert_eq!(second.stats().caches.pipeline_blobs, 2);
    Ok(())
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn device_teardown_releases_every_native_object() -> anyhow::Result<()> {
    let mut device = device(2);
    let target = color_target(&mut device);
    let buffer = device.allocate_resource(&ResourceDescription::buffer(KB), MemoryUsageClass::CpuToGpu)?;
    let cb = device.create_view(buffer, &ViewDescription::constant_buffer(0, 256))?;
    device.create_sampler(&SamplerDescription::default())?;

    device.begin_frame()?;
    device.allocate_scratch(512, 256)?;
    device.bind_program(MESH, 0)?;
    device.bind_render_targets(&[target], None)?;
    device.bind_constant_buffer(0, cb)?;
    device.draw_instanced(3, 1, 0, 0)?;
    device.bind_program(BLUR, 0)?;
    device.dispatch(1, 1, 1)?;
    device.end_frame()?;

    device.teardown()?;
    device.teardown()?;

    let c = device.backend().counters();
    assert!(c.pipelines_created > 0 && c.render_passes_created > 0);
    assert_eq!(c.heap_pages_created, c.heap_pages_destroyed);
    assert_eq!(c.resources_created, c.resources_released);
    assert_eq!(c.descriptor_heaps_created, c.descriptor_heaps_destroyed);
    assert_eq!(c.root_layouts_created, c.root_layouts_destroyed);
    assert_eq!(c.pipelines_created, c.pipelines_destroyed);
    assert_eq!(c.render_passes_created, c.render_passes_destroyed);
    Ok(())
}

// Freeing a table twice panics in debug builds.
#[test]
#[cfg(not(debug_assertions))]
fn device_teardown_continues_past_a_failed_free() {
    let mut device = device(2);
    let buffer = device
        .allocate_resource(&ResourceDescription::buffer(KB), MemoryUsageClass::CpuToGpu)
        .unwrap();
    let view = device
        .create_view(buffer, &ViewDescription::constant_buffer(0, 256))
        .unwrap();
    device.create_sampler(&SamplerDescription::default()).unwrap();
    let table = device.view_table(view).unwrap();
    device.descriptors().free(&table).unwrap();

    assert!(device.teardown().is_err());
    let c = device.backend().counters();
    assert_eq!(c.descriptor_heaps_created, c.descriptor_heaps_destroyed);
    assert_eq!(c.heap_pages_created, c.heap_pages_destroyed);
    assert_eq!(c.resources_created, c.resources_released);
}
