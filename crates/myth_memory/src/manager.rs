//! Resource Allocation Manager
//!
//! Routes placement requests to a growable list of heap pages per
//! [`MemoryUsageClass`] and defers frees until the GPU can no longer be
//! using the memory.
//!
//! # Paging
//!
//! ```text
//!  GpuOnly   [page 0: ####....] [page 1: ########] [page 2: ##......]  <- newest
//!  CpuToGpu  [page 0: #.......]
//! ```
//!
//! Requests go to the newest page of their class. When it cannot fit the
//! request a page of `max(request, default_page_size)` is appended and the
//! request is retried once. Pages are never shrunk or merged.
//!
//! # Deferred release
//!
//! A non-immediate free lands in the garbage queue of the current frame
//! slot. [`ResourceAllocationManager::update`] is called at the start of each
//! frame with the slot being entered and releases that slot's queue, which
//! was filled `buffer_count` frames ago.

use parking_lot::Mutex;
use slotmap::SlotMap;
use smallvec::SmallVec;

use myth_core::errors::{GpuError, Result, precondition};
use myth_core::ids::{HeapHandle, NativeResource, ResourceId};
use myth_core::memory::{ArenaStrategy, MemoryBudget, MemoryUsageClass, align_up};
use myth_core::settings::GpuSettings;

use crate::backend::{AllocationInfo, HeapBackend, ResourceDescription};
use crate::page::{Allocation, HeapPage, PagedResourceAllocator};
use crate::scratch::{ScratchAllocation, ScratchRing};

/// Usage statistics of one memory class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub page_count: usize,
    pub reserved_bytes: u64,
    pub used_bytes: u64,
    pub allocation_count: usize,
}

#[derive(Debug)]
struct MemoryObject {
    allocation: Allocation,
    native: NativeResource,
    pending_release: bool,
}

#[derive(Debug)]
struct UsagePool {
    usage: MemoryUsageClass,
    strategy: ArenaStrategy,
    pages: Vec<PagedResourceAllocator>,
}

impl UsagePool {
    fn page_size_for(&self, bytes: u64) -> u64 {
        match self.strategy {
            ArenaStrategy::Buddy => bytes.next_power_of_two(),
            ArenaStrategy::Linear | ArenaStrategy::FreeList => bytes,
        }
    }

    fn append_page<B: HeapBackend + ?Sized>(&mut self, backend: &B, bytes: u64) -> Result<()> {
        let size_bytes = self.page_size_for(bytes);
        let usage = self.usage;
        let handle = backend.create_heap_page(size_bytes, usage).map_err(|e| {
            log::error!("[memory] {usage:?} heap page creation failed ({size_bytes} bytes): {e}");
            GpuError::failed("memory", format!("heap page creation failed: {e}"))
        })?;

        let index = self.pages.len() as u32;
        self.pages.push(PagedResourceAllocator::new(
            index,
            HeapPage {
                handle,
                size_bytes,
                usage,
            },
            self.strategy,
        ));
        log::info!("[memory] {usage:?} heap page #{index} created ({size_bytes} bytes)");
        Ok(())
    }

    fn try_newest(&mut self, info: AllocationInfo) -> Option<Result<Allocation>> {
        self.pages.last_mut().map(|page| page.allocate(info))
    }

    fn stats(&self) -> MemoryStats {
        self.pages.iter().fold(MemoryStats::default(), |mut stats, page| {
            stats.page_count += 1;
            stats.reserved_bytes += page.page().size_bytes;
            stats.used_bytes += page.used_bytes();
            stats.allocation_count += page.allocation_count();
            stats
        })
    }
}

type GarbageQueue = SmallVec<[ResourceId; 16]>;

#[derive(Debug)]
struct ManagerState {
    pools: Vec<UsagePool>,
    objects: SlotMap<ResourceId, MemoryObject>,
    garbage: Vec<GarbageQueue>,
    frame_index: usize,
    scratch: Option<ScratchRing>,
}

impl ManagerState {
    fn release_object<B: HeapBackend + ?Sized>(&mut self, backend: &B, id: ResourceId) -> Result<()> {
        let Some(object) = self.objects.remove(id) else {
            return Ok(());
        };
        backend.release_resource(object.native);

        let allocation = object.allocation;
        let pool = &mut self.pools[allocation.usage.index()];
        match pool.pages.get_mut(allocation.page_index as usize) {
            Some(page) => page.free(&allocation),
            None => Err(precondition(format!(
                "allocation refers to missing {:?} page #{}",
                allocation.usage, allocation.page_index
            ))),
        }
    }

    /// Releases every queued object. Returns the number released and the
    /// first error hit, if any.
    fn drain_queue<B: HeapBackend + ?Sized>(&mut self, backend: &B, slot: usize) -> (usize, Result<()>) {
        let queue = std::mem::take(&mut self.garbage[slot]);
        let mut result = Ok(());
        for id in &queue {
            if let Err(e) = self.release_object(backend, *id) {
                result = result.and(Err(e));
            }
        }
        (queue.len(), result)
    }

    fn drain_all<B: HeapBackend + ?Sized>(&mut self, backend: &B) -> Result<()> {
        let mut result = Ok(());
        for slot in 0..self.garbage.len() {
            let (_, slot_result) = self.drain_queue(backend, slot);
            result = result.and(slot_result);
        }
        result
    }
}

/// Paged GPU memory manager with deferred release.
///
/// `allocate`, `free` and `allocate_scratch` take `&self` and serialize on
/// an internal mutex. Per-frame maintenance (`update`, `resize_garbage`,
/// `release`) takes `&mut self` and must run on the recording thread.
#[derive(Debug)]
pub struct ResourceAllocationManager {
    default_page_size: u64,
    state: Mutex<ManagerState>,
}

impl ResourceAllocationManager {
    #[must_use]
    pub fn new(settings: &GpuSettings) -> Self {
        let buffer_count = settings.buffered_frames() as usize;
        let pools = MemoryUsageClass::ALL
            .into_iter()
            .map(|usage| UsagePool {
                usage,
                strategy: settings.arena_strategy.get(usage),
                pages: Vec::new(),
            })
            .collect();
        let scratch = (settings.scratch_page_size_bytes > 0)
            .then(|| ScratchRing::new(settings.scratch_page_size_bytes, buffer_count));

        Self {
            default_page_size: settings.default_page_size_bytes,
            state: Mutex::new(ManagerState {
                pools,
                objects: SlotMap::with_key(),
                garbage: vec![GarbageQueue::new(); buffer_count],
                frame_index: 0,
                scratch,
            }),
        }
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Places a resource in a heap page of `usage`, growing the class by one
    /// page if the newest page is full.
    ///
    /// A request fits when its aligned end is at or below the page size, so
    /// four 1 KB buffers fill a 4 KB page exactly. The class grows once the
    /// aligned end would go past the page.
    pub fn allocate<B: HeapBackend + ?Sized>(
        &self,
        backend: &B,
        desc: &ResourceDescription,
        usage: MemoryUsageClass,
    ) -> Result<ResourceId> {
        let info = backend.allocation_info(desc, usage);
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let pool = &mut state.pools[usage.index()];

        let allocation = match pool.try_newest(info) {
            Some(Ok(allocation)) => allocation,
            Some(Err(e)) if !e.is_out_of_memory() => return Err(e),
            _ => {
                let needed = align_up(info.size_bytes, info.alignment);
                pool.append_page(backend, needed.max(self.default_page_size))?;
                match pool.try_newest(info) {
                    Some(Ok(allocation)) => allocation,
                    Some(Err(e)) => {
                        log::error!(
                            "[memory] {usage:?} allocation of {} bytes failed after page growth: {e}",
                            info.size_bytes
                        );
                        return Err(GpuError::failed(
                            "memory",
                            format!("allocation of {} bytes failed after page growth", info.size_bytes),
                        ));
                    }
                    None => return Err(GpuError::failed("memory", "no page after growth")),
                }
            }
        };

        let page = &mut pool.pages[allocation.page_index as usize];
        let native = match backend.create_placed_resource(page.page().handle, allocation.base_address, desc) {
            Ok(native) => native,
            Err(e) => {
                log::error!("[memory] placed resource creation failed: {e}");
                page.free(&allocation)?;
                return Err(e);
            }
        };

        Ok(state.objects.insert(MemoryObject {
            allocation,
            native,
            pending_release: false,
        }))
    }

    /// Frees a resource.
    ///
    /// With `immediate` the memory returns to its page right away; otherwise
    /// it is queued on the current frame slot and released by the `update`
    /// call that re-enters that slot.
    pub fn free<B: HeapBackend + ?Sized>(&self, backend: &B, id: ResourceId, immediate: bool) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(object) = state.objects.get_mut(id) else {
            return Err(GpuError::NotFound(format!("resource {id:?}")));
        };
        if object.pending_release {
            return Err(precondition(format!("resource {id:?} freed twice")));
        }

        if immediate {
            state.release_object(backend, id)
        } else {
            object.pending_release = true;
            let slot = state.frame_index;
            state.garbage[slot].push(id);
            Ok(())
        }
    }

    /// Bump-allocates transient memory from the current frame's scratch page.
    pub fn allocate_scratch<B: HeapBackend + ?Sized>(
        &self,
        backend: &B,
        size_bytes: u64,
        alignment: u64,
    ) -> Result<ScratchAllocation> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let frame_index = state.frame_index;
        match &mut state.scratch {
            Some(scratch) => scratch.allocate(backend, frame_index, size_bytes, alignment),
            None => Err(precondition("scratch ring is disabled")),
        }
    }

    /// Pre-creates one page per class sized to the class budget.
    pub fn reserve_memory<B: HeapBackend + ?Sized>(&self, backend: &B, budget: &MemoryBudget) -> Result<()> {
        let mut state = self.state.lock();
        for (usage, bytes) in budget.iter() {
            state.pools[usage.index()].append_page(backend, bytes)?;
        }
        Ok(())
    }

    // ========================================================================
    // Frame maintenance
    // ========================================================================

    /// Enters frame slot `frame_index` and releases what was queued on it.
    pub fn update<B: HeapBackend + ?Sized>(&mut self, backend: &B, frame_index: usize) -> Result<()> {
        let state = self.state.get_mut();
        let slot = frame_index % state.garbage.len();
        state.frame_index = slot;

        let (released, result) = state.drain_queue(backend, slot);
        if let Some(scratch) = &mut state.scratch {
            scratch.rewind(slot);
        }
        if released > 0 {
            log::debug!("[memory] frame slot {slot}: released {released} deferred resources");
        }
        result
    }

    /// Flushes every garbage queue and switches to `buffer_count` slots.
    pub fn resize_garbage<B: HeapBackend + ?Sized>(&mut self, backend: &B, buffer_count: usize) -> Result<()> {
        let buffer_count = buffer_count.max(1);
        let state = self.state.get_mut();
        let result = state.drain_all(backend);
        state.garbage = vec![GarbageQueue::new(); buffer_count];
        state.frame_index = 0;
        if let Some(scratch) = &mut state.scratch {
            scratch.release(backend, buffer_count);
        }
        log::debug!("[memory] garbage queues resized to {buffer_count}");
        result
    }

    /// Releases everything: queued garbage, live resources, then pages.
    pub fn release<B: HeapBackend + ?Sized>(&mut self, backend: &B) -> Result<()> {
        let state = self.state.get_mut();
        let result = state.drain_all(backend);

        let live: Vec<ResourceId> = state.objects.keys().collect();
        if !live.is_empty() {
            log::warn!("[memory] releasing {} resources still alive at teardown", live.len());
        }
        for id in live {
            if let Some(object) = state.objects.remove(id) {
                backend.release_resource(object.native);
            }
        }

        for pool in &mut state.pools {
            for page in pool.pages.drain(..) {
                backend.destroy_heap_page(page.page().handle);
            }
        }
        let buffer_count = state.garbage.len();
        if let Some(scratch) = &mut state.scratch {
            scratch.release(backend, buffer_count);
        }
        result
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Placement of a resource that has not been released yet.
    #[must_use]
    pub fn allocation(&self, id: ResourceId) -> Option<Allocation> {
        self.state.lock().objects.get(id).map(|o| o.allocation)
    }

    #[must_use]
    pub fn native_resource(&self, id: ResourceId) -> Option<NativeResource> {
        self.state.lock().objects.get(id).map(|o| o.native)
    }

    /// Heap page a resource lives in.
    #[must_use]
    pub fn heap_of(&self, id: ResourceId) -> Option<HeapHandle> {
        let state = self.state.lock();
        let allocation = state.objects.get(id)?.allocation;
        state.pools[allocation.usage.index()]
            .pages
            .get(allocation.page_index as usize)
            .map(|page| page.page().handle)
    }

    /// `true` while the memory of `id` is still held, including while it
    /// waits in a garbage queue.
    #[must_use]
    pub fn is_resident(&self, id: ResourceId) -> bool {
        self.state.lock().objects.contains_key(id)
    }

    /// `true` if `id` is resident and not queued for release.
    #[must_use]
    pub fn is_live(&self, id: ResourceId) -> bool {
        self.state
            .lock()
            .objects
            .get(id)
            .is_some_and(|o| !o.pending_release)
    }

    #[must_use]
    pub fn is_pending_release(&self, id: ResourceId) -> bool {
        self.state
            .lock()
            .objects
            .get(id)
            .is_some_and(|o| o.pending_release)
    }

    #[must_use]
    pub fn pending_release_count(&self) -> usize {
        self.state.lock().garbage.iter().map(SmallVec::len).sum()
    }

    #[must_use]
    pub fn stats(&self, usage: MemoryUsageClass) -> MemoryStats {
        self.state.lock().pools[usage.index()].stats()
    }

    #[must_use]
    pub fn page_count(&self, usage: MemoryUsageClass) -> usize {
        self.state.lock().pools[usage.index()].pages.len()
    }

    #[must_use]
    pub fn frame_index(&self) -> usize {
        self.state.lock().frame_index
    }

    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.state.lock().garbage.len()
    }

    #[must_use]
    pub fn scratch_used_bytes(&self) -> u64 {
        let state = self.state.lock();
        state
            .scratch
            .as_ref()
            .map_or(0, |scratch| scratch.used_bytes(state.frame_index))
    }
}

impl Drop for ResourceAllocationManager {
    fn drop(&mut self) {
        let pages: usize = self.state.get_mut().pools.iter().map(|p| p.pages.len()).sum();
        if pages > 0 {
            log::warn!("[memory] manager dropped with {pages} heap pages not released");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use super::*;

    #[derive(Default)]
    struct TestHeaps {
        next: AtomicU64,
        pages_created: AtomicU64,
        pages_destroyed: AtomicU64,
        released: AtomicU64,
        fail_pages: AtomicBool,
    }

    impl HeapBackend for TestHeaps {
        fn allocation_info(&self, desc: &ResourceDescription, _usage: MemoryUsageClass) -> AllocationInfo {
            AllocationInfo {
                size_bytes: desc.packed_size_bytes(),
                alignment: 256,
            }
        }

        fn create_heap_page(&self, _size_bytes: u64, _usage: MemoryUsageClass) -> Result<HeapHandle> {
            if self.fail_pages.load(Ordering::Relaxed) {
                return Err(GpuError::failed("test", "heap refused"));
            }
            self.pages_created.fetch_add(1, Ordering::Relaxed);
            Ok(HeapHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1))
        }

        fn destroy_heap_page(&self, _heap: HeapHandle) {
            self.pages_destroyed.fetch_add(1, Ordering::Relaxed);
        }

        fn create_placed_resource(
            &self,
            _heap: HeapHandle,
            _offset: u64,
            _desc: &ResourceDescription,
        ) -> Result<NativeResource> {
            Ok(NativeResource(self.next.fetch_add(1, Ordering::Relaxed) + 1))
        }

        fn release_resource(&self, _resource: NativeResource) {
            self.released.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn settings(page_size: u64, buffer_count: u32) -> GpuSettings {
        GpuSettings {
            buffer_count,
            default_page_size_bytes: page_size,
            scratch_page_size_bytes: 1024,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_allocation_creates_a_page() {
        let heaps = TestHeaps::default();
        let manager = ResourceAllocationManager::new(&settings(4096, 2));
        assert_eq!(manager.page_count(MemoryUsageClass::GpuOnly), 0);

        let id = manager
            .allocate(&heaps, &ResourceDescription::buffer(1024), MemoryUsageClass::GpuOnly)
            .unwrap();
        assert_eq!(manager.page_count(MemoryUsageClass::GpuOnly), 1);
        assert_eq!(manager.allocation(id).unwrap().page_index, 0);
    }

    #[test]
    fn test_oversized_request_gets_a_page_of_its_own_size() {
        let heaps = TestHeaps::default();
        let manager = ResourceAllocationManager::new(&settings(4096, 2));
        manager
            .allocate(&heaps, &ResourceDescription::buffer(10_000), MemoryUsageClass::CpuToGpu)
            .unwrap();
        let stats = manager.stats(MemoryUsageClass::CpuToGpu);
        assert_eq!(stats.page_count, 1);
        assert_eq!(stats.reserved_bytes, align_up(10_000, 256));
    }

    #[test]
    fn test_failed_page_creation_surfaces_failed() {
        let heaps = TestHeaps::default();
        heaps.fail_pages.store(true, Ordering::Relaxed);
        let manager = ResourceAllocationManager::new(&settings(4096, 2));
        let err = manager
            .allocate(&heaps, &ResourceDescription::buffer(64), MemoryUsageClass::GpuOnly)
            .unwrap_err();
        assert_eq!(err.code(), myth_core::ErrorCode::Failed);
    }

    #[test]
    fn test_immediate_free_returns_memory() {
        let heaps = TestHeaps::default();
        let manager = ResourceAllocationManager::new(&settings(4096, 2));
        let id = manager
            .allocate(&heaps, &ResourceDescription::buffer(4096), MemoryUsageClass::GpuOnly)
            .unwrap();
        manager.free(&heaps, id, true).unwrap();
        assert!(!manager.is_resident(id));
        assert_eq!(manager.stats(MemoryUsageClass::GpuOnly).used_bytes, 0);
        assert_eq!(heaps.released.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let heaps = TestHeaps::default();
        let manager = ResourceAllocationManager::new(&settings(4096, 2));
        let id = manager
            .allocate(&heaps, &ResourceDescription::buffer(64), MemoryUsageClass::GpuOnly)
            .unwrap();
        manager.free(&heaps, id, true).unwrap();
        let err = manager.free(&heaps, id, true).unwrap_err();
        assert_eq!(err.code(), myth_core::ErrorCode::NotFound);
    }

    #[test]
    fn test_deferred_free_waits_for_slot_to_come_around() {
        let heaps = TestHeaps::default();
        let mut manager = ResourceAllocationManager::new(&settings(4096, 3));
        let id = manager
            .allocate(&heaps, &ResourceDescription::buffer(512), MemoryUsageClass::GpuOnly)
            .unwrap();

        manager.free(&heaps, id, false).unwrap();
        assert!(manager.is_pending_release(id));

        manager.update(&heaps, 1).unwrap();
        manager.update(&heaps, 2).unwrap();
        assert!(manager.is_resident(id));

        manager.update(&heaps, 0).unwrap();
        assert!(!manager.is_resident(id));
        assert_eq!(manager.pending_release_count(), 0);
    }

    #[test]
    fn test_reserve_memory_precreates_pages() {
        let heaps = TestHeaps::default();
        let manager = ResourceAllocationManager::new(&settings(4096, 2));
        let budget = MemoryBudget::new()
            .with(MemoryUsageClass::GpuOnly, 1 << 16)
            .with(MemoryUsageClass::GpuToCpu, 8192);
        manager.reserve_memory(&heaps, &budget).unwrap();

        assert_eq!(manager.stats(MemoryUsageClass::GpuOnly).reserved_bytes, 1 << 16);
        assert_eq!(manager.page_count(MemoryUsageClass::GpuToCpu), 1);
        assert_eq!(manager.page_count(MemoryUsageClass::CpuOnly), 0);

        manager
            .allocate(&heaps, &ResourceDescription::buffer(60_000), MemoryUsageClass::GpuOnly)
            .unwrap();
        assert_eq!(manager.page_count(MemoryUsageClass::GpuOnly), 1);
    }

    #[test]
    fn test_buddy_pages_are_powers_of_two() {
        let heaps = TestHeaps::default();
        let mut s = settings(3000, 2);
        s.arena_strategy.gpu_only = ArenaStrategy::Buddy;
        let manager = ResourceAllocationManager::new(&s);
        manager
            .allocate(&heaps, &ResourceDescription::buffer(100), MemoryUsageClass::GpuOnly)
            .unwrap();
        assert_eq!(manager.stats(MemoryUsageClass::GpuOnly).reserved_bytes, 4096);
    }

    #[test]
    fn test_scratch_rewinds_with_its_frame() {
        let heaps = TestHeaps::default();
        let mut manager = ResourceAllocationManager::new(&settings(4096, 2));
        let a = manager.allocate_scratch(&heaps, 600, 16).unwrap();
        assert_eq!((a.offset, a.frame_index), (0, 0));
        assert!(manager.allocate_scratch(&heaps, 600, 16).unwrap_err().is_out_of_memory());

        manager.update(&heaps, 1).unwrap();
        assert_eq!(manager.allocate_scratch(&heaps, 600, 16).unwrap().frame_index, 1);

        manager.update(&heaps, 0).unwrap();
        assert_eq!(manager.scratch_used_bytes(), 0);
        assert_eq!(manager.allocate_scratch(&heaps, 600, 16).unwrap().offset, 0);
    }

    #[test]
    fn test_release_destroys_everything() {
        let heaps = TestHeaps::default();
        let mut manager = ResourceAllocationManager::new(&settings(4096, 2));
        let a = manager
            .allocate(&heaps, &ResourceDescription::buffer(512), MemoryUsageClass::GpuOnly)
            .unwrap();
        manager
            .allocate(&heaps, &ResourceDescription::buffer(512), MemoryUsageClass::CpuOnly)
            .unwrap();
        manager.free(&heaps, a, false).unwrap();
        manager.allocate_scratch(&heaps, 64, 4).unwrap();

        manager.release(&heaps).unwrap();
        assert_eq!(heaps.released.load(Ordering::Relaxed), 2);
        assert_eq!(
            heaps.pages_created.load(Ordering::Relaxed),
            heaps.pages_destroyed.load(Ordering::Relaxed)
        );
        assert_eq!(manager.page_count(MemoryUsageClass::GpuOnly), 0);
    }

    #[test]
    fn test_resize_garbage_flushes_pending_frees() {
        let heaps = TestHeaps::default();
        let mut manager = ResourceAllocationManager::new(&settings(4096, 3));
        let id = manager
            .allocate(&heaps, &ResourceDescription::buffer(64), MemoryUsageClass::GpuOnly)
            .unwrap();
        manager.free(&heaps, id, false).unwrap();
        manager.resize_garbage(&heaps, 2).unwrap();
        assert!(!manager.is_resident(id));
        assert_eq!(manager.buffer_count(), 2);
        assert_eq!(manager.frame_index(), 0);
    }
}
