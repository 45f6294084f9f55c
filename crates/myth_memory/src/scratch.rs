//! Per-frame scratch ring.
//!
//! One linear page per buffered frame, handed out with a bump pointer and
//! rewound when its frame slot comes around again. Used for transient
//! upload data (per-draw constants, staging copies) that never outlives the
//! frame it was written in.

use myth_core::errors::{GpuError, Result};
use myth_core::ids::HeapHandle;
use myth_core::memory::MemoryUsageClass;

use crate::arena::{LinearArena, SubAllocator};
use crate::backend::HeapBackend;
use crate::page::HeapPage;

/// A range of the current frame's scratch page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchAllocation {
    pub heap: HeapHandle,
    pub offset: u64,
    pub size_bytes: u64,
    pub frame_index: usize,
}

#[derive(Debug)]
struct ScratchPage {
    page: HeapPage,
    arena: LinearArena,
}

#[derive(Debug)]
pub(crate) struct ScratchRing {
    page_size: u64,
    pages: Vec<Option<ScratchPage>>,
}

impl ScratchRing {
    pub(crate) fn new(page_size: u64, buffer_count: usize) -> Self {
        Self {
            page_size,
            pages: (0..buffer_count).map(|_| None).collect(),
        }
    }

    pub(crate) fn allocate<B: HeapBackend + ?Sized>(
        &mut self,
        backend: &B,
        frame_index: usize,
        size: u64,
        alignment: u64,
    ) -> Result<ScratchAllocation> {
        let scratch = match self.pages[frame_index].take() {
            Some(scratch) => scratch,
            None => {
                let page_size = self.page_size;
                let handle = backend
                    .create_heap_page(page_size, MemoryUsageClass::CpuToGpu)
                    .map_err(|e| {
                        log::error!("[memory] scratch page creation failed for frame {frame_index} ({page_size} bytes): {e}");
                        GpuError::failed("memory", format!("scratch page creation failed: {e}"))
                    })?;
                log::debug!(
                    "[memory] scratch page for frame {frame_index} created ({} bytes)",
                    self.page_size
                );
                ScratchPage {
                    page: HeapPage {
                        handle,
                        size_bytes: self.page_size,
                        usage: MemoryUsageClass::CpuToGpu,
                    },
                    arena: LinearArena::new(self.page_size),
                }
            }
        };
        let heap = scratch.page.handle;
        let scratch = self.pages[frame_index].insert(scratch);

        let range = scratch.arena.allocate(size, alignment)?;
        Ok(ScratchAllocation {
            heap,
            offset: range.offset,
            size_bytes: range.size,
            frame_index,
        })
    }

    pub(crate) fn rewind(&mut self, frame_index: usize) {
        if let Some(Some(scratch)) = self.pages.get_mut(frame_index) {
            scratch.arena.reset();
        }
    }

    pub(crate) fn used_bytes(&self, frame_index: usize) -> u64 {
        self.pages
            .get(frame_index)
            .and_then(Option::as_ref)
            .map_or(0, |scratch| scratch.arena.used())
    }

    /// Destroys every page, then resizes the ring.
    pub(crate) fn release<B: HeapBackend + ?Sized>(&mut self, backend: &B, buffer_count: usize) {
        for scratch in self.pages.drain(..).flatten() {
            backend.destroy_heap_page(scratch.page.handle);
        }
        self.pages.resize_with(buffer_count, || None);
    }
}
