use std::collections::BTreeMap;

use myth_core::errors::{GpuError, Result, precondition};
use myth_core::memory::{ArenaStrategy, align_up};

use super::{SubAllocation, SubAllocator, validate_request};

/// General-purpose allocator over address-ordered free ranges.
///
/// Allocation is first fit. Alignment padding in front of a block stays on
/// the free list, and freed blocks merge with both neighbours.
#[derive(Debug, Clone)]
pub struct FreeListArena {
    capacity: u64,
    /// offset -> length of each free range.
    free_ranges: BTreeMap<u64, u64>,
    /// offset -> size of each live allocation.
    allocations: BTreeMap<u64, u64>,
    used: u64,
}

impl FreeListArena {
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        let mut arena = Self {
            capacity,
            free_ranges: BTreeMap::new(),
            allocations: BTreeMap::new(),
            used: 0,
        };
        arena.reset();
        arena
    }

    /// Number of disjoint free ranges.
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.free_ranges.len()
    }

    /// Size of the largest free range.
    #[must_use]
    pub fn largest_free_range(&self) -> u64 {
        self.free_ranges.values().copied().max().unwrap_or(0)
    }

    fn insert_free(&mut self, mut offset: u64, mut len: u64) {
        if let Some((&prev, &prev_len)) = self.free_ranges.range(..offset).next_back() {
            if prev + prev_len == offset {
                self.free_ranges.remove(&prev);
                offset = prev;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free_ranges.remove(&(offset + len)) {
            len += next_len;
        }
        self.free_ranges.insert(offset, len);
    }
}

impl SubAllocator for FreeListArena {
    fn allocate(&mut self, size: u64, alignment: u64) -> Result<SubAllocation> {
        validate_request(size, alignment)?;

        let fit = self.free_ranges.iter().find_map(|(&start, &len)| {
            let aligned = align_up(start, alignment);
            let end = aligned.checked_add(size)?;
            (end <= start + len).then_some((start, len, aligned))
        });
        let Some((start, len, aligned)) = fit else {
            return Err(GpuError::OutOfMemory {
                requested: size,
                available: self.capacity - self.used,
            });
        };

        self.free_ranges.remove(&start);
        if aligned > start {
            self.free_ranges.insert(start, aligned - start);
        }
        let tail = start + len - (aligned + size);
        if tail > 0 {
            self.free_ranges.insert(aligned + size, tail);
        }

        self.allocations.insert(aligned, size);
        self.used += size;
        Ok(SubAllocation {
            offset: aligned,
            size,
        })
    }

    fn free(&mut self, offset: u64) -> Result<()> {
        let Some(size) = self.allocations.remove(&offset) else {
            return Err(precondition(format!(
                "free-list free of unknown offset {offset:#x}"
            )));
        };
        self.used -= size;
        self.insert_free(offset, size);
        Ok(())
    }

    fn reset(&mut self) {
        self.free_ranges.clear();
        self.allocations.clear();
        self.used = 0;
        if self.capacity > 0 {
            self.free_ranges.insert(0, self.capacity);
        }
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn used(&self) -> u64 {
        self.used
    }

    fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    fn strategy(&self) -> ArenaStrategy {
        ArenaStrategy::FreeList
    }
}
