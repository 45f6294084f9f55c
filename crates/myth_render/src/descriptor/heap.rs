use myth_core::errors::{GpuError, Result, precondition};
use myth_core::ids::{CpuDescriptorHandle, DescriptorHeapHandle, GpuDescriptorHandle};
use myth_memory::arena::{FreeListArena, LinearArena, SubAllocator};

use super::{DescriptorKind, DescriptorTable};
use crate::backend::DescriptorHeapInfo;

/// Whether a heap is CPU-only or GPU-readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapFlavor {
    /// Persistent CPU heap; tables are freed individually.
    Staging,
    /// Per-frame GPU heap; tables are reclaimed by reset.
    ShaderVisible,
}

/// A fixed-capacity descriptor heap carved by an arena.
///
/// Allocation never goes past the declared capacity: a request larger than
/// what remains fails with [`GpuError::DescriptorHeapExhausted`] and leaves
/// the heap untouched.
#[derive(Debug)]
pub struct DescriptorHeap {
    kind: DescriptorKind,
    flavor: HeapFlavor,
    index: u32,
    capacity: u32,
    info: DescriptorHeapInfo,
    arena: Box<dyn SubAllocator>,
}

impl DescriptorHeap {
    /// Wraps a native heap of `capacity` descriptors.
    #[must_use]
    pub fn new(kind: DescriptorKind, flavor: HeapFlavor, index: u32, capacity: u32, info: DescriptorHeapInfo) -> Self {
        let arena: Box<dyn SubAllocator> = match flavor {
            HeapFlavor::Staging => Box::new(FreeListArena::new(u64::from(capacity))),
            HeapFlavor::ShaderVisible => Box::new(LinearArena::new(u64::from(capacity))),
        };
        Self {
            kind,
            flavor,
            index,
            capacity,
            info,
            arena,
        }
    }

    /// Carves a table of `count` contiguous descriptors.
    pub fn allocate(&mut self, count: u32) -> Result<DescriptorTable> {
        if count == 0 {
            return Err(precondition("empty descriptor table"));
        }
        let remaining = self.remaining();
        let exhausted = GpuError::DescriptorHeapExhausted {
            kind: self.kind.name(),
            requested: count,
            remaining,
        };
        if count > remaining {
            return Err(exhausted);
        }

        let range = match self.arena.allocate(u64::from(count), 1) {
            Ok(range) => range,
            // Enough descriptors in total, but no contiguous run.
            Err(e) if e.is_out_of_memory() => return Err(exhausted),
            Err(e) => return Err(e),
        };
        let offset = range.offset as u32;

        Ok(DescriptorTable {
            kind: self.kind,
            flavor: self.flavor,
            heap: self.index,
            offset,
            count,
            stride: self.info.stride,
            base_cpu: self.info.cpu_base.offset(offset, self.info.stride),
            base_gpu: self.info.gpu_base.map(|gpu| gpu.offset(offset, self.info.stride)),
        })
    }

    /// Returns a staging table's descriptors to the heap.
    pub fn free(&mut self, table: &DescriptorTable) -> Result<()> {
        if table.kind != self.kind || table.heap != self.index || table.flavor != self.flavor {
            return Err(precondition(format!(
                "table {table:?} does not belong to {} heap #{}",
                self.kind.name(),
                self.index
            )));
        }
        if self.flavor == HeapFlavor::ShaderVisible {
            return Err(precondition("shader-visible tables are reclaimed by reset"));
        }
        self.arena.free(u64::from(table.offset))
    }

    /// Forgets every table.
    pub fn reset(&mut self) {
        self.arena.reset();
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn flavor(&self) -> HeapFlavor {
        self.flavor
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    #[must_use]
    pub fn used(&self) -> u32 {
        self.arena.used() as u32
    }

    #[inline]
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.capacity - self.used()
    }

    #[inline]
    #[must_use]
    pub fn stride(&self) -> u32 {
        self.info.stride
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> DescriptorHeapHandle {
        self.info.handle
    }

    /// CPU handle of descriptor `offset`.
    #[inline]
    #[must_use]
    pub fn cpu_handle(&self, offset: u32) -> CpuDescriptorHandle {
        self.info.cpu_base.offset(offset, self.info.stride)
    }

    #[inline]
    #[must_use]
    pub fn gpu_handle(&self, offset: u32) -> Option<GpuDescriptorHandle> {
        self.info.gpu_base.map(|gpu| gpu.offset(offset, self.info.stride))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap(flavor: HeapFlavor, capacity: u32) -> DescriptorHeap {
        let info = DescriptorHeapInfo {
            handle: DescriptorHeapHandle(1),
            stride: 32,
            cpu_base: CpuDescriptorHandle(0x10_000),
            gpu_base: (flavor == HeapFlavor::ShaderVisible).then_some(GpuDescriptorHandle(0x90_000)),
        };
        DescriptorHeap::new(DescriptorKind::CbvSrvUav, flavor, 0, capacity, info)
    }

    #[test]
    fn test_tables_stay_within_capacity() {
        let mut heap = heap(HeapFlavor::Staging, 16);
        let a = heap.allocate(10).unwrap();
        let b = heap.allocate(6).unwrap();
        assert_eq!(a.offset + a.count, 10);
        assert!(b.offset + b.count <= heap.capacity());
        assert_eq!(heap.remaining(), 0);
        assert_eq!(b.base_cpu, CpuDescriptorHandle(0x10_000 + 10 * 32));
    }

    #[test]
    fn test_overflow_fails_without_partial_allocation() {
        let mut heap = heap(HeapFlavor::Staging, 16);
        heap.allocate(8).unwrap();
        let err = heap.allocate(10).unwrap_err();
        assert_eq!(
            err,
            GpuError::DescriptorHeapExhausted {
                kind: "CbvSrvUav",
                requested: 10,
                remaining: 8
            }
        );
        assert_eq!(heap.used(), 8);
        assert_eq!(heap.allocate(8).unwrap().offset, 8);
    }

    #[test]
    fn test_fragmented_staging_heap_reports_exhaustion() {
        let mut heap = heap(HeapFlavor::Staging, 12);
        let a = heap.allocate(4).unwrap();
        let _b = heap.allocate(4).unwrap();
        let c = heap.allocate(4).unwrap();
        heap.free(&a).unwrap();
        heap.free(&c).unwrap();
        assert!(matches!(
            heap.allocate(8),
            Err(GpuError::DescriptorHeapExhausted { remaining: 8, .. })
        ));
    }

    #[test]
    fn test_visible_tables_carry_gpu_handles() {
        let mut heap = heap(HeapFlavor::ShaderVisible, 64);
        heap.allocate(3).unwrap();
        let t = heap.allocate(2).unwrap();
        assert_eq!(t.base_gpu, Some(GpuDescriptorHandle(0x90_000 + 3 * 32)));
        assert!(t.is_shader_visible());
    }

    #[test]
    fn test_reset_twice_leaves_heap_empty() {
        let mut heap = heap(HeapFlavor::Staging, 32);
        heap.allocate(20).unwrap();
        heap.reset();
        heap.reset();
        assert_eq!(heap.used(), 0);
        assert_eq!(heap.allocate(32).unwrap().offset, 0);
    }

    #[test]
    fn test_freed_staging_slot_is_reused() {
        let mut heap = heap(HeapFlavor::Staging, 4);
        let a = heap.allocate(1).unwrap();
        heap.allocate(3).unwrap();
        heap.free(&a).unwrap();
        assert_eq!(heap.allocate(1).unwrap().offset, 0);
    }
}
