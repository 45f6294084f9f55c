//! Core types of the Myth GPU layer.
//!
//! - [`errors`]: [`GpuError`] and the coarse [`ErrorCode`] taxonomy
//! - [`ids`]: slot-map keys and native handle newtypes
//! - [`memory`]: usage classes, arena strategies, alignment helpers
//! - [`hash`]: content hashing for cache keys
//! - [`settings`]: [`GpuSettings`]

pub mod errors;
pub mod hash;
pub mod ids;
pub mod memory;
pub mod settings;

pub use errors::{ErrorCode, GpuError, Result};
pub use hash::fx_hash_key;
pub use memory::{ArenaStrategy, MemoryBudget, MemoryUsageClass, align_up};
pub use settings::GpuSettings;
