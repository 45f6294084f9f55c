//! Heap pages and the per-page allocator.

use myth_core::errors::Result;
use myth_core::ids::HeapHandle;
use myth_core::memory::{ArenaStrategy, MemoryUsageClass};

use crate::arena::{SubAllocation, SubAllocator, create_arena};
use crate::backend::AllocationInfo;

/// A native heap carved by one arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapPage {
    pub handle: HeapHandle,
    pub size_bytes: u64,
    pub usage: MemoryUsageClass,
}

/// A placed range inside a heap page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Offset of the resource inside its page.
    pub base_address: u64,
    pub size_bytes: u64,
    pub page_index: u32,
    pub usage: MemoryUsageClass,
}

impl Allocation {
    #[inline]
    #[must_use]
    pub fn end(&self) -> u64 {
        self.base_address + self.size_bytes
    }
}

/// One heap page plus the arena that sub-allocates it.
#[derive(Debug)]
pub struct PagedResourceAllocator {
    index: u32,
    page: HeapPage,
    arena: Box<dyn SubAllocator>,
}

impl PagedResourceAllocator {
    #[must_use]
    pub fn new(index: u32, page: HeapPage, strategy: ArenaStrategy) -> Self {
        Self {
            index,
            page,
            arena: create_arena(strategy, page.size_bytes),
        }
    }

    /// Places a resource with the given requirements.
    pub fn allocate(&mut self, info: AllocationInfo) -> Result<Allocation> {
        let SubAllocation { offset, size } = self.arena.allocate(info.size_bytes, info.alignment)?;
        Ok(Allocation {
            base_address: offset,
            size_bytes: size,
            page_index: self.index,
            usage: self.page.usage,
        })
    }

    pub fn free(&mut self, allocation: &Allocation) -> Result<()> {
        debug_assert_eq!(allocation.page_index, self.index);
        self.arena.free(allocation.base_address)
    }

    /// Drops every allocation of the page.
    pub fn clear(&mut self) {
        self.arena.reset();
    }

    #[inline]
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    #[must_use]
    pub fn page(&self) -> &HeapPage {
        &self.page
    }

    #[inline]
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.arena.used()
    }

    #[inline]
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.arena.allocation_count()
    }
}
