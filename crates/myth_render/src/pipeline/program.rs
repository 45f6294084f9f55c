//! Shader program registry.
//!
//! Programs are registered explicitly, either one at a time or from a
//! static table of [`ProgramEntry`] builders:
//!
//! ```rust,ignore
//! static PROGRAMS: &[ProgramEntry] = &[
//!     ProgramEntry { id: ShaderProgramId(1), permutation: 0, build: forward_lit },
//!     ProgramEntry { id: ShaderProgramId(2), permutation: 0, build: tonemap },
//! ];
//!
//! registry.register_all(PROGRAMS)?;
//! ```

use rustc_hash::FxHashMap;

use myth_core::errors::{GpuError, Result};
use myth_core::ids::ShaderProgramId;

use super::key::BindType;
use super::root_layout::ResourceCounts;

/// What the GPU layer needs to know about a compiled program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderProgramDescription {
    pub name: String,
    pub bind_type: BindType,
    /// Binding counts from shader reflection. Without it the root layout is
    /// sized from the bound slots.
    pub reflection: Option<ResourceCounts>,
}

/// One row of a static registration table.
#[derive(Debug, Clone, Copy)]
pub struct ProgramEntry {
    pub id: ShaderProgramId,
    pub permutation: u64,
    pub build: fn() -> ShaderProgramDescription,
}

#[derive(Debug, Default)]
pub struct ShaderProgramRegistry {
    programs: FxHashMap<(ShaderProgramId, u64), ShaderProgramDescription>,
}

impl ShaderProgramRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: ShaderProgramId,
        permutation: u64,
        desc: ShaderProgramDescription,
    ) -> Result<()> {
        let key = (id, permutation);
        if self.programs.contains_key(&key) {
            return Err(GpuError::AlreadyExists(format!(
                "shader program {id:?} permutation {permutation:#x}"
            )));
        }
        log::debug!("[cache] program '{}' registered as {id:?}/{permutation:#x}", desc.name);
        self.programs.insert(key, desc);
        Ok(())
    }

    /// Registers every entry of a table. Stops at the first duplicate.
    pub fn register_all(&mut self, entries: &[ProgramEntry]) -> Result<usize> {
        for entry in entries {
            self.register(entry.id, entry.permutation, (entry.build)())?;
        }
        Ok(entries.len())
    }

    pub fn unregister(&mut self, id: ShaderProgramId, permutation: u64) -> Result<ShaderProgramDescription> {
        self.programs.remove(&(id, permutation)).ok_or_else(|| {
            GpuError::NotFound(format!("shader program {id:?} permutation {permutation:#x}"))
        })
    }

    #[must_use]
    pub fn get(&self, id: ShaderProgramId, permutation: u64) -> Option<&ShaderProgramDescription> {
        self.programs.get(&(id, permutation))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}
