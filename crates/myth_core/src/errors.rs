//! Error Types
//!
//! This module defines the error type shared by every crate of the GPU layer.
//!
//! # Overview
//!
//! [`GpuError`] covers the failure modes of the allocation, descriptor and
//! state-tracking subsystems:
//! - Memory pressure (page exhaustion, descriptor heap exhaustion)
//! - Native backend failures
//! - Registry lookups and duplicate registrations
//! - Precondition violations (programmer errors)
//!
//! Each variant collapses onto a coarse [`ErrorCode`] through
//! [`GpuError::code`], which is what the device façade reports to the
//! rest of the engine.
//!
//! # Usage
//!
//! ```rust,ignore
//! use myth_core::errors::{GpuError, Result};
//!
//! fn reserve(bytes: u64) -> Result<u64> {
//!     if bytes == 0 {
//!         return Err(GpuError::Precondition("empty reservation".into()));
//!     }
//!     Ok(bytes)
//! }
//! ```

use thiserror::Error;

/// Coarse result taxonomy reported across the device boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A page or heap ran out of room.
    OutOfMemory,
    /// The native API rejected the request.
    Failed,
    /// A lookup missed on an id that was expected to exist.
    NotFound,
    /// A duplicate registration was attempted.
    AlreadyExists,
    /// A precondition was violated by the caller.
    NullPtrExcept,
}

/// The error type for the GPU layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    // ========================================================================
    // Resource Pressure
    // ========================================================================
    /// The arena could not fit the aligned request.
    #[error("Out of memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory {
        /// Aligned request size in bytes.
        requested: u64,
        /// Free bytes left in the arena at the time of the request.
        available: u64,
    },

    /// A descriptor heap cannot hold the requested table.
    #[error("Descriptor heap exhausted ({kind}): requested {requested}, remaining {remaining}")]
    DescriptorHeapExhausted {
        /// Descriptor kind name.
        kind: &'static str,
        /// Number of descriptors requested.
        requested: u32,
        /// Descriptors still available in the heap.
        remaining: u32,
    },

    // ========================================================================
    // Backend Failures
    // ========================================================================
    /// A native call failed, or a retry after page growth failed.
    #[error("[{subsystem}] operation failed: {message}")]
    Failed {
        /// Subsystem that issued the call.
        subsystem: &'static str,
        /// Human readable context.
        message: String,
    },

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// The requested object is not registered.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The object is already registered.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // ========================================================================
    // Precondition Violations
    // ========================================================================
    /// The caller violated an API precondition.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Alignment was zero or not a power of two.
    #[error("Invalid alignment {0}: must be a non-zero power of two")]
    InvalidAlignment(u64),
}

impl GpuError {
    /// Creates a [`GpuError::Failed`] for the given subsystem.
    pub fn failed(subsystem: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            subsystem,
            message: message.into(),
        }
    }

    /// Maps the error onto the coarse taxonomy.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::OutOfMemory { .. } | Self::DescriptorHeapExhausted { .. } => ErrorCode::OutOfMemory,
            Self::Failed { .. } => ErrorCode::Failed,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::Precondition(_) | Self::InvalidAlignment(_) => ErrorCode::NullPtrExcept,
        }
    }

    /// Returns `true` for errors that page growth can recover from.
    #[inline]
    #[must_use]
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

/// Alias for `Result<T, GpuError>`.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Reports a precondition violation.
///
/// Asserts in debug builds and hands the error back in release builds.
#[track_caller]
pub fn precondition(message: impl Into<String>) -> GpuError {
    let message = message.into();
    if cfg!(debug_assertions) {
        panic!("precondition violated: {message}");
    }
    GpuError::Precondition(message)
}
