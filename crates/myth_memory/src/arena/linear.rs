use myth_core::errors::{GpuError, Result};
use myth_core::memory::{ArenaStrategy, align_up};

use super::{SubAllocation, SubAllocator, validate_request};

/// Bump allocator. Individual frees are ignored; memory comes back on
/// [`reset`](SubAllocator::reset).
#[derive(Debug, Clone)]
pub struct LinearArena {
    capacity: u64,
    top: u64,
    count: usize,
}

impl LinearArena {
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            top: 0,
            count: 0,
        }
    }

    /// Current bump offset.
    #[inline]
    #[must_use]
    pub fn top(&self) -> u64 {
        self.top
    }
}

impl SubAllocator for LinearArena {
    fn allocate(&mut self, size: u64, alignment: u64) -> Result<SubAllocation> {
        validate_request(size, alignment)?;

        let offset = align_up(self.top, alignment);
        let end = offset.checked_add(size).filter(|end| *end <= self.capacity);
        let Some(end) = end else {
            return Err(GpuError::OutOfMemory {
                requested: size.saturating_add(offset - self.top),
                available: self.capacity - self.top,
            });
        };

        self.top = end;
        self.count += 1;
        Ok(SubAllocation { offset, size })
    }

    fn free(&mut self, _offset: u64) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) {
        self.top = 0;
        self.count = 0;
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn used(&self) -> u64 {
        self.top
    }

    fn allocation_count(&self) -> usize {
        self.count
    }

    fn strategy(&self) -> ArenaStrategy {
        ArenaStrategy::Linear
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bumps_in_order() {
        let mut arena = LinearArena::new(1024);
        assert_eq!(arena.allocate(10, 1).unwrap().offset, 0);
        assert_eq!(arena.allocate(10, 16).unwrap().offset, 16);
        assert_eq!(arena.top(), 26);
        assert_eq!(arena.allocation_count(), 2);
    }

    #[test]
    fn test_free_is_a_no_op() {
        let mut arena = LinearArena::new(64);
        let a = arena.allocate(32, 1).unwrap();
        arena.free(a.offset).unwrap();
        assert_eq!(arena.used(), 32);
        assert_eq!(arena.allocate(32, 1).unwrap().offset, 32);
    }

    #[test]
    fn test_padding_counts_against_capacity() {
        let mut arena = LinearArena::new(256);
        arena.allocate(1, 1).unwrap();
        let err = arena.allocate(200, 128).unwrap_err();
        assert_eq!(
            err,
            GpuError::OutOfMemory {
                requested: 327,
                available: 255
            }
        );
    }

    #[test]
    fn test_huge_request_reports_saturated_size() {
        let mut arena = LinearArena::new(256);
        arena.allocate(1, 1).unwrap();
        let err = arena.allocate(u64::MAX - 8, 16).unwrap_err();
        assert_eq!(
            err,
            GpuError::OutOfMemory {
                requested: u64::MAX,
                available: 255
            }
        );
        assert_eq!(arena.top(), 1);
    }
}
