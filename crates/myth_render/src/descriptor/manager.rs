//! Descriptor Heap Allocation Manager
//!
//! Owns the persistent staging heaps of every kind and, for each buffered
//! frame, one shader-visible heap per visible kind.
//!
//! ```text
//!  staging[CbvSrvUav]  heap #0 [####..##....]  heap #1 [##..........]
//!  staging[Sampler]    heap #0 [#...........]
//!  visible[frame 0]    CbvSrvUav [######......]  Sampler [##..........]
//!  visible[frame 1]    CbvSrvUav [............]  Sampler [............]
//! ```
//!
//! Reserving a visible range records which staging range must land there.
//! [`upload`](DescriptorHeapAllocationManager::upload) performs every
//! recorded copy of a frame with one backend call per kind.

use parking_lot::Mutex;

use myth_core::errors::{GpuError, Result, precondition};
use myth_core::ids::CpuDescriptorHandle;
use myth_core::settings::{DescriptorSettings, GpuSettings};

use super::heap::{DescriptorHeap, HeapFlavor};
use super::{DescriptorKind, DescriptorRange, DescriptorTable};
use crate::backend::DescriptorBackend;

/// Result of [`DescriptorHeapAllocationManager::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableAllocation {
    /// Table in the staging heap, written by the CPU.
    pub staging: DescriptorTable,
    /// Range reserved in the current frame's visible heap, for kinds that
    /// have one.
    pub visible: Option<DescriptorTable>,
}

/// Usage snapshot of every heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorStats {
    pub staging_heaps: [usize; DescriptorKind::COUNT],
    pub staging_used: [u32; DescriptorKind::COUNT],
    pub staging_capacity: [u32; DescriptorKind::COUNT],
    /// Usage of the current frame's visible heaps, in visible-slot order.
    pub visible_used: [u32; 2],
    pub visible_capacity: [u32; 2],
    pub pending_copies: usize,
}

#[derive(Debug, Clone, Copy)]
struct PendingCopy {
    source: DescriptorRange,
    dst_offset: u32,
}

#[derive(Debug)]
struct StagingPool {
    kind: DescriptorKind,
    heap_capacity: u32,
    heaps: Vec<DescriptorHeap>,
}

impl StagingPool {
    fn append_heap<B: DescriptorBackend + ?Sized>(&mut self, backend: &B, capacity: u32) -> Result<()> {
        let info = backend
            .create_descriptor_heap(self.kind, capacity, false)
            .map_err(|e| {
                log::error!("[descriptors] staging {} heap creation failed: {e}", self.kind.name());
                e
            })?;
        let index = self.heaps.len() as u32;
        self.heaps
            .push(DescriptorHeap::new(self.kind, HeapFlavor::Staging, index, capacity, info));
        log::info!(
            "[descriptors] staging {} heap #{index} created ({capacity} descriptors)",
            self.kind.name()
        );
        Ok(())
    }

    fn allocate<B: DescriptorBackend + ?Sized>(&mut self, backend: &B, count: u32) -> Result<DescriptorTable> {
        for heap in &mut self.heaps {
            match heap.allocate(count) {
                Ok(table) => return Ok(table),
                Err(GpuError::DescriptorHeapExhausted { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.append_heap(backend, count.max(self.heap_capacity))?;
        match self.heaps.last_mut() {
            Some(heap) => heap.allocate(count),
            None => Err(GpuError::failed("descriptors", "no staging heap after growth")),
        }
    }
}

#[derive(Debug)]
struct FrameHeaps {
    /// One heap per shader-visible kind.
    heaps: Vec<DescriptorHeap>,
    pending: [Vec<PendingCopy>; 2],
}

#[derive(Debug)]
struct DescriptorState {
    staging: Vec<StagingPool>,
    frames: Vec<FrameHeaps>,
    frame_index: usize,
    null_descriptors: [Option<DescriptorTable>; DescriptorKind::COUNT],
}

impl DescriptorState {
    fn reserve_visible(&mut self, staging: &DescriptorTable) -> Result<DescriptorTable> {
        let Some(slot) = staging.kind.visible_index() else {
            return Err(precondition(format!(
                "{} descriptors have no shader-visible heap",
                staging.kind.name()
            )));
        };
        if staging.is_shader_visible() {
            return Err(precondition("source table is already shader-visible"));
        }

        let frame = &mut self.frames[self.frame_index];
        let visible = frame.heaps[slot].allocate(staging.count).inspect_err(|e| {
            log::warn!("[descriptors] frame {} visible heap: {e}", self.frame_index);
        })?;
        frame.pending[slot].push(PendingCopy {
            source: staging.range(),
            dst_offset: visible.offset,
        });
        Ok(visible)
    }
}

/// Staging and per-frame shader-visible descriptor heaps.
///
/// `allocate`, `allocate_staging`, `reserve_visible` and `free` take `&self`
/// and serialize on an internal mutex. `begin_frame`, `upload`, `reset` and
/// `release` take `&mut self` and belong to the recording thread.
#[derive(Debug)]
pub struct DescriptorHeapAllocationManager {
    state: Mutex<DescriptorState>,
}

impl DescriptorHeapAllocationManager {
    /// Creates one staging heap per kind, the per-frame visible heaps and a
    /// null descriptor per kind.
    pub fn new<B: DescriptorBackend + ?Sized>(backend: &B, settings: &GpuSettings) -> Result<Self> {
        let d: &DescriptorSettings = &settings.descriptors;
        let mut staging = Vec::with_capacity(DescriptorKind::COUNT);
        for kind in DescriptorKind::ALL {
            let heap_capacity = match kind {
                DescriptorKind::CbvSrvUav => d.staging_cbv_srv_uav,
                DescriptorKind::Sampler => d.staging_samplers,
                DescriptorKind::RenderTarget => d.staging_render_targets,
                DescriptorKind::DepthStencil => d.staging_depth_stencils,
            };
            let mut pool = StagingPool {
                kind,
                heap_capacity,
                heaps: Vec::new(),
            };
            pool.append_heap(backend, heap_capacity)?;
            staging.push(pool);
        }

        let frame_count = settings.buffered_frames();
        let mut frames = Vec::with_capacity(frame_count as usize);
        for frame in 0..frame_count {
            let mut heaps = Vec::with_capacity(2);
            for kind in DescriptorKind::SHADER_VISIBLE {
                let capacity = match kind {
                    DescriptorKind::Sampler => d.visible_samplers,
                    _ => d.visible_cbv_srv_uav,
                };
                let info = backend.create_descriptor_heap(kind, capacity, true).map_err(|e| {
                    log::error!("[descriptors] visible {} heap creation failed: {e}", kind.name());
                    e
                })?;
                heaps.push(DescriptorHeap::new(kind, HeapFlavor::ShaderVisible, frame, capacity, info));
            }
            frames.push(FrameHeaps {
                heaps,
                pending: [Vec::new(), Vec::new()],
            });
        }

        let mut null_descriptors = [None; DescriptorKind::COUNT];
        for kind in DescriptorKind::ALL {
            let table = staging[kind.index()].allocate(backend, 1)?;
            backend.write_null_descriptor(kind, table.base_cpu);
            null_descriptors[kind.index()] = Some(table);
        }

        log::debug!("[descriptors] initialized for {frame_count} buffered frames");
        Ok(Self {
            state: Mutex::new(DescriptorState {
                staging,
                frames,
                frame_index: 0,
                null_descriptors,
            }),
        })
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocates a staging table and, for shader-visible kinds, reserves the
    /// matching range in the current frame's visible heap.
    ///
    /// On failure nothing stays allocated.
    pub fn allocate<B: DescriptorBackend + ?Sized>(
        &self,
        backend: &B,
        kind: DescriptorKind,
        count: u32,
    ) -> Result<TableAllocation> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let staging = state.staging[kind.index()].allocate(backend, count)?;
        if !kind.is_shader_visible() {
            return Ok(TableAllocation { staging, visible: None });
        }

        match state.reserve_visible(&staging) {
            Ok(visible) => Ok(TableAllocation {
                staging,
                visible: Some(visible),
            }),
            Err(e) => {
                let pool = &mut state.staging[kind.index()];
                if let Some(heap) = pool.heaps.get_mut(staging.heap as usize) {
                    heap.free(&staging)?;
                }
                Err(e)
            }
        }
    }

    /// Allocates a persistent staging table, growing the kind by one heap
    /// when every existing heap is full.
    pub fn allocate_staging<B: DescriptorBackend + ?Sized>(
        &self,
        backend: &B,
        kind: DescriptorKind,
        count: u32,
    ) -> Result<DescriptorTable> {
        self.state.lock().staging[kind.index()].allocate(backend, count)
    }

    /// Reserves a range of the current frame's visible heap that will
    /// receive a copy of `staging` at upload.
    pub fn reserve_visible(&self, staging: &DescriptorTable) -> Result<DescriptorTable> {
        self.state.lock().reserve_visible(staging)
    }

    /// Returns a staging table to its heap.
    pub fn free(&self, table: &DescriptorTable) -> Result<()> {
        if table.is_shader_visible() {
            return Err(precondition("shader-visible tables are reclaimed by reset"));
        }
        let mut state = self.state.lock();
        match state.staging[table.kind.index()].heaps.get_mut(table.heap as usize) {
            Some(heap) => heap.free(table),
            None => Err(GpuError::NotFound(format!(
                "staging {} heap #{}",
                table.kind.name(),
                table.heap
            ))),
        }
    }

    /// Descriptor that fills unbound slots of a kind.
    #[must_use]
    pub fn null_descriptor(&self, kind: DescriptorKind) -> Option<CpuDescriptorHandle> {
        self.state.lock().null_descriptors[kind.index()].map(|t| t.base_cpu)
    }

    /// Descriptor stride of the staging heaps of a kind.
    #[must_use]
    pub fn stride(&self, kind: DescriptorKind) -> u32 {
        self.state.lock().staging[kind.index()]
            .heaps
            .first()
            .map_or(0, DescriptorHeap::stride)
    }

    // ========================================================================
    // Frame maintenance
    // ========================================================================

    /// Makes `frame_index` current and clears its visible heaps.
    pub fn begin_frame(&mut self, frame_index: usize) {
        let state = self.state.get_mut();
        state.frame_index = frame_index % state.frames.len();
        let current = state.frame_index;
        self.reset(current);
    }

    /// Clears the visible heaps of one frame. Staging heaps are untouched.
    pub fn reset(&mut self, frame_index: usize) {
        let state = self.state.get_mut();
        let Some(frame) = state.frames.get_mut(frame_index) else {
            return;
        };
        for heap in &mut frame.heaps {
            heap.reset();
        }
        for pending in &mut frame.pending {
            if !pending.is_empty() {
                log::warn!(
                    "[descriptors] frame {frame_index}: dropping {} copies that were never uploaded",
                    pending.len()
                );
                pending.clear();
            }
        }
    }

    /// Copies every staged range recorded for `frame_index` into its visible
    /// heap, one backend call per kind. Returns the number of calls issued.
    pub fn upload<B: DescriptorBackend + ?Sized>(&mut self, backend: &B, frame_index: usize) -> usize {
        let state = self.state.get_mut();
        let Some(frame) = state.frames.get_mut(frame_index) else {
            return 0;
        };

        let mut calls = 0;
        for kind in DescriptorKind::SHADER_VISIBLE {
            let Some(slot) = kind.visible_index() else {
                continue;
            };
            let pending = std::mem::take(&mut frame.pending[slot]);
            let Some(first) = pending.first() else {
                continue;
            };

            // Visible heaps are linear, so the recorded ranges are contiguous.
            let dst_offset = first.dst_offset;
            let dst_count: u32 = pending.iter().map(|p| p.source.count).sum();
            debug_assert!(
                pending
                    .iter()
                    .scan(dst_offset, |next, p| {
                        let ok = p.dst_offset == *next;
                        *next += p.source.count;
                        Some(ok)
                    })
                    .all(|ok| ok)
            );

            let sources: Vec<DescriptorRange> = pending.iter().map(|p| p.source).collect();
            let dst = frame.heaps[slot].cpu_handle(dst_offset);
            backend.copy_descriptors(kind, dst, dst_count, &sources);
            calls += 1;
        }
        calls
    }

    /// Destroys every heap.
    pub fn release<B: DescriptorBackend + ?Sized>(&mut self, backend: &B) {
        let state = self.state.get_mut();
        for pool in &mut state.staging {
            for heap in pool.heaps.drain(..) {
                backend.destroy_descriptor_heap(heap.handle());
            }
        }
        for frame in state.frames.drain(..) {
            for heap in frame.heaps {
                backend.destroy_descriptor_heap(heap.handle());
            }
        }
        state.null_descriptors = [None; DescriptorKind::COUNT];
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn frame_index(&self) -> usize {
        self.state.lock().frame_index
    }

    #[must_use]
    pub fn stats(&self) -> DescriptorStats {
        let state = self.state.lock();
        let mut stats = DescriptorStats::default();
        for pool in &state.staging {
            let i = pool.kind.index();
            stats.staging_heaps[i] = pool.heaps.len();
            stats.staging_used[i] = pool.heaps.iter().map(DescriptorHeap::used).sum();
            stats.staging_capacity[i] = pool.heaps.iter().map(DescriptorHeap::capacity).sum();
        }
        if let Some(frame) = state.frames.get(state.frame_index) {
            for (slot, heap) in frame.heaps.iter().enumerate() {
                stats.visible_used[slot] = heap.used();
                stats.visible_capacity[slot] = heap.capacity();
            }
            stats.pending_copies = frame.pending.iter().map(Vec::len).sum();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use parking_lot::Mutex;

    use myth_core::ids::{DescriptorHeapHandle, GpuDescriptorHandle, NativeResource};

    use super::*;
    use crate::backend::DescriptorHeapInfo;
    use crate::descriptor::view::{SamplerDescription, ViewDescription};

    #[derive(Default)]
    struct TestDescriptors {
        next_heap: AtomicU64,
        copies: Mutex<Vec<(DescriptorKind, CpuDescriptorHandle, u32, Vec<DescriptorRange>)>>,
        nulls: AtomicU64,
    }

    impl DescriptorBackend for TestDescriptors {
        fn create_descriptor_heap(
            &self,
            _kind: DescriptorKind,
            _capacity: u32,
            shader_visible: bool,
        ) -> Result<DescriptorHeapInfo> {
            let id = self.next_heap.fetch_add(1, Ordering::Relaxed) + 1;
            Ok(DescriptorHeapInfo {
                handle: DescriptorHeapHandle(id),
                stride: 32,
                cpu_base: CpuDescriptorHandle(id << 32),
                gpu_base: shader_visible.then_some(GpuDescriptorHandle(id << 32)),
            })
        }

        fn destroy_descriptor_heap(&self, _heap: DescriptorHeapHandle) {}

        fn copy_descriptors(
            &self,
            kind: DescriptorKind,
            dst: CpuDescriptorHandle,
            dst_count: u32,
            sources: &[DescriptorRange],
        ) {
            self.copies.lock().push((kind, dst, dst_count, sources.to_vec()));
        }

        fn write_null_descriptor(&self, _kind: DescriptorKind, _dst: CpuDescriptorHandle) {
            self.nulls.fetch_add(1, Ordering::Relaxed);
        }

        fn write_view(&self, _dst: CpuDescriptorHandle, _resource: NativeResource, _view: &ViewDescription) {}

        fn write_sampler(&self, _dst: CpuDescriptorHandle, _sampler: &SamplerDescription) {}
    }

    fn small_settings() -> GpuSettings {
        GpuSettings {
            buffer_count: 2,
            descriptors: DescriptorSettings {
                staging_cbv_srv_uav: 16,
                staging_samplers: 8,
                staging_render_targets: 4,
                staging_depth_stencils: 2,
                visible_cbv_srv_uav: 32,
                visible_samplers: 8,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_init_writes_one_null_descriptor_per_kind() {
        let backend = TestDescriptors::default();
        let manager = DescriptorHeapAllocationManager::new(&backend, &small_settings()).unwrap();
        assert_eq!(backend.nulls.load(Ordering::Relaxed), 4);
        for kind in DescriptorKind::ALL {
            assert!(manager.null_descriptor(kind).is_some());
        }
        assert_eq!(manager.stats().staging_used, [1, 1, 1, 1]);
    }

    #[test]
    fn test_allocate_reserves_visible_range_for_visible_kinds() {
        let backend = TestDescriptors::default();
        let manager = DescriptorHeapAllocationManager::new(&backend, &small_settings()).unwrap();

        let srv = manager.allocate(&backend, DescriptorKind::CbvSrvUav, 4).unwrap();
        assert!(srv.visible.is_some_and(|t| t.base_gpu.is_some()));

        let rtv = manager.allocate(&backend, DescriptorKind::RenderTarget, 1).unwrap();
        assert!(rtv.visible.is_none());
        assert_eq!(manager.stats().pending_copies, 1);
    }

    #[test]
    fn test_upload_issues_one_copy_per_kind() {
        let backend = TestDescriptors::default();
        let mut manager = DescriptorHeapAllocationManager::new(&backend, &small_settings()).unwrap();

        let a = manager.allocate(&backend, DescriptorKind::CbvSrvUav, 3).unwrap();
        let b = manager.allocate(&backend, DescriptorKind::CbvSrvUav, 2).unwrap();
        manager.allocate(&backend, DescriptorKind::Sampler, 1).unwrap();

        assert_eq!(manager.upload(&backend, 0), 2);
        let copies = backend.copies.lock();
        let (kind, dst, count, sources) = &copies[0];
        assert_eq!(*kind, DescriptorKind::CbvSrvUav);
        assert_eq!(*dst, a.visible.unwrap().base_cpu);
        assert_eq!(*count, 5);
        assert_eq!(sources, &vec![a.staging.range(), b.staging.range()]);
        drop(copies);

        assert_eq!(manager.upload(&backend, 0), 0, "pending copies are consumed");
    }

    #[test]
    fn test_staging_grows_by_appending_heaps() {
        let backend = TestDescriptors::default();
        let manager = DescriptorHeapAllocationManager::new(&backend, &small_settings()).unwrap();
        manager.allocate_staging(&backend, DescriptorKind::DepthStencil, 1).unwrap();
        let grown = manager.allocate_staging(&backend, DescriptorKind::DepthStencil, 1).unwrap();
        assert_eq!(grown.heap, 1);
        assert_eq!(manager.stats().staging_heaps[DescriptorKind::DepthStencil.index()], 2);
    }

    #[test]
    fn test_visible_exhaustion_is_surfaced_and_rolls_back() {
        let backend = TestDescriptors::default();
        let mut settings = small_settings();
        settings.descriptors.staging_samplers = 32;
        let manager = DescriptorHeapAllocationManager::new(&backend, &settings).unwrap();
        manager.allocate(&backend, DescriptorKind::Sampler, 7).unwrap();
        let before = manager.stats();

        let err = manager.allocate(&backend, DescriptorKind::Sampler, 2).unwrap_err();
        assert!(matches!(err, GpuError::DescriptorHeapExhausted { remaining: 1, .. }));
        assert_eq!(manager.stats(), before);
    }

    #[test]
    fn test_begin_frame_resets_only_that_frame() {
        let backend = TestDescriptors::default();
        let mut manager = DescriptorHeapAllocationManager::new(&backend, &small_settings()).unwrap();
        manager.allocate(&backend, DescriptorKind::CbvSrvUav, 10).unwrap();
        manager.upload(&backend, 0);

        manager.begin_frame(1);
        assert_eq!(manager.stats().visible_used[0], 0);
        manager.allocate(&backend, DescriptorKind::CbvSrvUav, 4).unwrap();
        manager.upload(&backend, 1);

        manager.begin_frame(0);
        assert_eq!(manager.stats().visible_used[0], 0);
        // Staging tables survive frame resets.
        assert_eq!(manager.stats().staging_used[0], 1 + 10 + 4);
    }

    #[test]
    fn test_free_returns_staging_slots() {
        let backend = TestDescriptors::default();
        let manager = DescriptorHeapAllocationManager::new(&backend, &small_settings()).unwrap();
        let t = manager.allocate_staging(&backend, DescriptorKind::RenderTarget, 2).unwrap();
        manager.free(&t).unwrap();
        assert_eq!(manager.stats().staging_used[DescriptorKind::RenderTarget.index()], 1);
    }
}
