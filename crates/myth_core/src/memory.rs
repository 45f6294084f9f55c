//! Memory usage classes and alignment helpers.

use serde::{Deserialize, Serialize};

/// Placement policy for a heap page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemoryUsageClass {
    /// Host memory never read by the GPU.
    CpuOnly,
    /// Device-local memory.
    GpuOnly,
    /// Host-visible upload memory.
    CpuToGpu,
    /// Host-visible readback memory.
    GpuToCpu,
}

impl MemoryUsageClass {
    /// Number of usage classes.
    pub const COUNT: usize = 4;

    /// Every usage class, in index order.
    pub const ALL: [Self; Self::COUNT] = [Self::CpuOnly, Self::GpuOnly, Self::CpuToGpu, Self::GpuToCpu];

    /// Dense index for per-class tables.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::CpuOnly => 0,
            Self::GpuOnly => 1,
            Self::CpuToGpu => 2,
            Self::GpuToCpu => 3,
        }
    }

    /// Returns `true` when the CPU can map pages of this class.
    #[inline]
    #[must_use]
    pub const fn is_host_visible(self) -> bool {
        !matches!(self, Self::GpuOnly)
    }
}

/// Sub-allocation strategy used by heap pages of one usage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ArenaStrategy {
    /// Bump allocation, reclaimed only by reset.
    Linear,
    /// Power-of-two buddy blocks.
    Buddy,
    /// Address-ordered free ranges with first fit.
    #[default]
    FreeList,
}

/// Rounds `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a non-zero power of two.
#[inline]
#[must_use]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Returns `true` for non-zero powers of two.
#[inline]
#[must_use]
pub const fn is_valid_alignment(alignment: u64) -> bool {
    alignment.is_power_of_two()
}

/// Byte budget per usage class, used to pre-create heap pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryBudget {
    bytes: [u64; MemoryUsageClass::COUNT],
}

impl MemoryBudget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the budget for one class.
    #[must_use]
    pub fn with(mut self, usage: MemoryUsageClass, bytes: u64) -> Self {
        self.bytes[usage.index()] = bytes;
        self
    }

    #[inline]
    #[must_use]
    pub fn get(&self, usage: MemoryUsageClass) -> u64 {
        self.bytes[usage.index()]
    }

    /// Iterates over the classes with a non-zero budget.
    pub fn iter(&self) -> impl Iterator<Item = (MemoryUsageClass, u64)> + '_ {
        MemoryUsageClass::ALL
            .into_iter()
            .map(|usage| (usage, self.get(usage)))
            .filter(|(_, bytes)| *bytes > 0)
    }
}
