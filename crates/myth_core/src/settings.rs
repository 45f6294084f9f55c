//! GPU Layer Settings
//!
//! [`GpuSettings`] gathers the knobs of the allocation and caching
//! subsystems. Every field has a default tuned for a triple-buffered desktop
//! renderer, so most callers only override what they need:
//!
//! ```rust,ignore
//! use myth_core::settings::GpuSettings;
//!
//! let settings = GpuSettings {
//!     buffer_count: 2,
//!     default_page_size_bytes: 16 << 20,
//!     ..Default::default()
//! };
//! ```
//!
//! Settings can also be loaded from JSON; missing fields keep their defaults.

use serde::{Deserialize, Serialize};

use crate::errors::{GpuError, Result};
use crate::memory::{ArenaStrategy, MemoryUsageClass};

/// Upper bound on the number of buffered frames.
pub const MAX_BUFFERED_FRAMES: u32 = 4;

// ---------------------------------------------------------------------------
// Descriptor capacities
// ---------------------------------------------------------------------------

/// Capacities of the descriptor heaps.
///
/// Staging capacities size each CPU heap of a kind; when a staging heap
/// fills up another one of the same capacity is appended. Shader-visible
/// capacities are per buffered frame and never grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorSettings {
    pub staging_cbv_srv_uav: u32,
    pub staging_samplers: u32,
    pub staging_render_targets: u32,
    pub staging_depth_stencils: u32,
    pub visible_cbv_srv_uav: u32,
    pub visible_samplers: u32,
}

impl Default for DescriptorSettings {
    fn default() -> Self {
        Self {
            staging_cbv_srv_uav: 4096,
            staging_samplers: 1024,
            staging_render_targets: 1024,
            staging_depth_stencils: 256,
            visible_cbv_srv_uav: 16384,
            // Hardware limit on shader-visible sampler heaps.
            visible_samplers: 2048,
        }
    }
}

// ---------------------------------------------------------------------------
// Arena strategies
// ---------------------------------------------------------------------------

/// Sub-allocation strategy per memory usage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaStrategies {
    pub cpu_only: ArenaStrategy,
    pub gpu_only: ArenaStrategy,
    pub cpu_to_gpu: ArenaStrategy,
    pub gpu_to_cpu: ArenaStrategy,
}

impl ArenaStrategies {
    /// Uses the same strategy for every class.
    #[must_use]
    pub fn uniform(strategy: ArenaStrategy) -> Self {
        Self {
            cpu_only: strategy,
            gpu_only: strategy,
            cpu_to_gpu: strategy,
            gpu_to_cpu: strategy,
        }
    }

    #[must_use]
    pub fn get(&self, usage: MemoryUsageClass) -> ArenaStrategy {
        match usage {
            MemoryUsageClass::CpuOnly => self.cpu_only,
            MemoryUsageClass::GpuOnly => self.gpu_only,
            MemoryUsageClass::CpuToGpu => self.cpu_to_gpu,
            MemoryUsageClass::GpuToCpu => self.gpu_to_cpu,
        }
    }
}

// ---------------------------------------------------------------------------
// GpuSettings
// ---------------------------------------------------------------------------

/// Configuration of the GPU layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuSettings {
    /// Number of frames the CPU may record ahead of the GPU.
    ///
    /// Also the latency, in frames, of deferred resource release.
    pub buffer_count: u32,

    /// Minimum size of a newly created heap page.
    ///
    /// Requests larger than this get a page of their own size.
    pub default_page_size_bytes: u64,

    /// Sub-allocation strategy of each usage class.
    pub arena_strategy: ArenaStrategies,

    /// Size of the per-frame linear scratch page. `0` disables the scratch ring.
    pub scratch_page_size_bytes: u64,

    /// Descriptor heap capacities.
    pub descriptors: DescriptorSettings,

    /// Ticks an unused pipeline survives before eviction.
    pub pipeline_max_age: u64,

    /// Ticks an unused render pass survives before eviction.
    pub render_pass_max_age: u64,

    /// Ticks an unused CPU descriptor table survives before eviction.
    pub descriptor_table_max_age: u64,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            default_page_size_bytes: 64 * 1024 * 1024,
            arena_strategy: ArenaStrategies::default(),
            scratch_page_size_bytes: 4 * 1024 * 1024,
            descriptors: DescriptorSettings::default(),
            pipeline_max_age: 256,
            render_pass_max_age: 256,
            descriptor_table_max_age: 8,
        }
    }
}

impl GpuSettings {
    /// Parses settings from JSON, filling missing fields with defaults.
    pub fn from_json(source: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(source)
            .map_err(|e| GpuError::Precondition(format!("invalid GPU settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Buffer count clamped to `1..=MAX_BUFFERED_FRAMES`.
    #[inline]
    #[must_use]
    pub fn buffered_frames(&self) -> u32 {
        self.buffer_count.clamp(1, MAX_BUFFERED_FRAMES)
    }

    /// Checks the settings for values the managers cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.default_page_size_bytes == 0 {
            return Err(GpuError::Precondition(
                "default_page_size_bytes must be non-zero".into(),
            ));
        }
        let buddy = MemoryUsageClass::ALL
            .iter()
            .any(|&usage| self.arena_strategy.get(usage) == ArenaStrategy::Buddy);
        if buddy && !self.default_page_size_bytes.is_power_of_two() {
            return Err(GpuError::Precondition(format!(
                "buddy pages need a power-of-two page size, got {}",
                self.default_page_size_bytes
            )));
        }
        // An evicted object may still be referenced by a frame in flight
        // until its fence is reached, `buffered_frames` ticks later.
        let frames = u64::from(self.buffered_frames());
        let ages = [
            ("pipeline_max_age", self.pipeline_max_age),
            ("render_pass_max_age", self.render_pass_max_age),
            ("descriptor_table_max_age", self.descriptor_table_max_age),
        ];
        if let Some((name, age)) = ages.iter().find(|(_, age)| *age < frames) {
            return Err(GpuError::Precondition(format!(
                "`{name}` ({age}) must be at least the buffered frame count ({frames})"
            )));
        }
        let d = &self.descriptors;
        let capacities = [
            ("staging_cbv_srv_uav", d.staging_cbv_srv_uav),
            ("staging_samplers", d.staging_samplers),
            ("staging_render_targets", d.staging_render_targets),
            ("staging_depth_stencils", d.staging_depth_stencils),
            ("visible_cbv_srv_uav", d.visible_cbv_srv_uav),
            ("visible_samplers", d.visible_samplers),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, cap)| *cap == 0) {
            return Err(GpuError::Precondition(format!(
                "descriptor capacity `{name}` must be non-zero"
            )));
        }
        Ok(())
    }
}
