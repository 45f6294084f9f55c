//! Arena sub-allocators.
//!
//! An arena carves one contiguous region (a heap page, a descriptor heap)
//! into aligned sub-ranges. Offsets are relative to the start of the region.
//!
//! ```text
//!  LinearArena     [####|##|######|...............]   bump only, bulk reset
//!  BuddyArena      [####|  |##|   |########|      ]   power-of-two blocks
//!  FreeListArena   [###|    |#####|  |##|         ]   first fit, coalescing
//! ```
//!
//! All variants share the [`SubAllocator`] contract: an aligned request
//! either fits and returns a [`SubAllocation`], or fails with
//! [`GpuError::OutOfMemory`] and leaves the arena untouched. Growing is the
//! caller's job.

mod buddy;
mod free_list;
mod linear;

pub use buddy::BuddyArena;
pub use free_list::FreeListArena;
pub use linear::LinearArena;

use std::fmt;

use myth_core::errors::{GpuError, Result, precondition};
use myth_core::memory::{ArenaStrategy, is_valid_alignment};

/// A sub-range handed out by an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubAllocation {
    /// Aligned offset from the start of the region.
    pub offset: u64,
    /// Requested size in bytes (or units for descriptor heaps).
    pub size: u64,
}

impl SubAllocation {
    /// One past the last unit of the allocation.
    #[inline]
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Returns `true` if the two ranges share at least one unit.
    #[inline]
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Common contract of the arena variants.
pub trait SubAllocator: Send + Sync + fmt::Debug {
    /// Carves `size` units aligned to `alignment` (a power of two).
    fn allocate(&mut self, size: u64, alignment: u64) -> Result<SubAllocation>;

    /// Returns the allocation starting at `offset` to the arena.
    ///
    /// Linear arenas accept and ignore the call.
    fn free(&mut self, offset: u64) -> Result<()>;

    /// Forgets every allocation.
    fn reset(&mut self);

    /// Total size of the region.
    fn capacity(&self) -> u64;

    /// Units currently consumed, including internal rounding.
    fn used(&self) -> u64;

    /// Number of live allocations.
    fn allocation_count(&self) -> usize;

    fn strategy(&self) -> ArenaStrategy;

    /// Units not consumed by live allocations.
    fn free_space(&self) -> u64 {
        self.capacity() - self.used()
    }
}

/// Creates an arena of the given strategy over `capacity` units.
#[must_use]
pub fn create_arena(strategy: ArenaStrategy, capacity: u64) -> Box<dyn SubAllocator> {
    match strategy {
        ArenaStrategy::Linear => Box::new(LinearArena::new(capacity)),
        ArenaStrategy::Buddy => Box::new(BuddyArena::new(capacity)),
        ArenaStrategy::FreeList => Box::new(FreeListArena::new(capacity)),
    }
}

/// Validates the size and alignment of a request.
pub(crate) fn validate_request(size: u64, alignment: u64) -> Result<()> {
    if !is_valid_alignment(alignment) {
        if cfg!(debug_assertions) {
            panic!("invalid alignment {alignment}: must be a non-zero power of two");
        }
        return Err(GpuError::InvalidAlignment(alignment));
    }
    if size == 0 {
        return Err(precondition("zero-sized sub-allocation"));
    }
    Ok(())
}
