use std::collections::{BTreeMap, BTreeSet};

use myth_core::errors::{GpuError, Result, precondition};
use myth_core::memory::ArenaStrategy;

use super::{SubAllocation, SubAllocator, validate_request};

/// Smallest block handed out by a [`BuddyArena`].
pub const MIN_BLOCK_SIZE: u64 = 256;

/// Power-of-two buddy allocator.
///
/// Blocks of order `k` are `MIN_BLOCK_SIZE << k` bytes and sit at offsets
/// that are multiples of their size, so any alignment up to the block size
/// comes for free. The buddy of a block is found by flipping the bit of its
/// size in the offset.
///
/// The managed capacity is the largest power of two that fits the region;
/// callers that want no waste size their regions accordingly.
#[derive(Debug, Clone)]
pub struct BuddyArena {
    capacity: u64,
    min_block: u64,
    max_order: usize,
    /// Free block offsets per order, lowest address first.
    free_lists: Vec<BTreeSet<u64>>,
    /// Live allocations: offset -> order.
    allocations: BTreeMap<u64, usize>,
    used: u64,
}

impl BuddyArena {
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        let capacity = if capacity == 0 {
            0
        } else {
            1u64 << (63 - capacity.leading_zeros())
        };
        let min_block = MIN_BLOCK_SIZE.min(capacity.max(1));
        let max_order = (capacity.max(1) / min_block).trailing_zeros() as usize;

        let mut arena = Self {
            capacity,
            min_block,
            max_order,
            free_lists: vec![BTreeSet::new(); max_order + 1],
            allocations: BTreeMap::new(),
            used: 0,
        };
        arena.reset();
        arena
    }

    #[inline]
    fn block_size(&self, order: usize) -> u64 {
        self.min_block << order
    }

    fn order_for(&self, size: u64) -> Option<usize> {
        let block = size.max(self.min_block).checked_next_power_of_two()?;
        let order = (block / self.min_block).trailing_zeros() as usize;
        (order <= self.max_order && self.capacity > 0).then_some(order)
    }

    /// Number of free blocks of each order, smallest first.
    #[must_use]
    pub fn free_blocks_per_order(&self) -> Vec<usize> {
        self.free_lists.iter().map(BTreeSet::len).collect()
    }
}

impl SubAllocator for BuddyArena {
    fn allocate(&mut self, size: u64, alignment: u64) -> Result<SubAllocation> {
        validate_request(size, alignment)?;

        let requested = size.max(alignment);
        let available = self.capacity - self.used;
        let out_of_memory = move || GpuError::OutOfMemory {
            requested,
            available,
        };
        let order = self.order_for(requested).ok_or_else(out_of_memory)?;
        let source = (order..=self.max_order)
            .find(|&o| !self.free_lists[o].is_empty())
            .ok_or_else(out_of_memory)?;

        let Some(offset) = self.free_lists[source].pop_first() else {
            return Err(out_of_memory());
        };

        // Split down to the requested order, keeping the lower half.
        for split in (order..source).rev() {
            let buddy = offset + self.block_size(split);
            self.free_lists[split].insert(buddy);
        }

        self.allocations.insert(offset, order);
        self.used += self.block_size(order);
        Ok(SubAllocation { offset, size })
    }

    fn free(&mut self, offset: u64) -> Result<()> {
        let Some(order) = self.allocations.remove(&offset) else {
            return Err(precondition(format!(
                "buddy free of unknown offset {offset:#x}"
            )));
        };
        self.used -= self.block_size(order);

        let mut offset = offset;
        let mut order = order;
        while order < self.max_order {
            let buddy = offset ^ self.block_size(order);
            if !self.free_lists[order].remove(&buddy) {
                break;
            }
            offset = offset.min(buddy);
            order += 1;
        }
        self.free_lists[order].insert(offset);
        Ok(())
    }

    fn reset(&mut self) {
        for list in &mut self.free_lists {
            list.clear();
        }
        self.allocations.clear();
        self.used = 0;
        if self.capacity > 0 {
            self.free_lists[self.max_order].insert(0);
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
        ArenaStrategy::Buddy
    }
}
