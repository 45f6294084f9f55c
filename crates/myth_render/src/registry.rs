//! Explicitly owned registry of derived GPU objects.
//!
//! [`GpuCaches`] is created by the device, passed by reference to the
//! command context at flush time, ticked once per frame and torn down with
//! the device. Nothing in it is global.

use myth_core::ids::{PipelineHandle, RenderPassHandle};
use myth_core::settings::GpuSettings;

use crate::backend::PipelineBackend;
use crate::cache::LifetimeCache;
use crate::descriptor::{DescriptorHeapAllocationManager, DescriptorTable, DescriptorTableKey};
use crate::pipeline::{
    PipelineBlobCache, PipelineDescriptor, RenderPassKey, RootLayoutCache, ShaderProgramRegistry, VertexLayoutRegistry,
};

/// Evictions performed by one [`GpuCaches::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSweep {
    pub pipelines: usize,
    pub render_passes: usize,
    pub descriptor_tables: usize,
}

/// Sizes of the caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub pipelines: usize,
    pub render_passes: usize,
    pub descriptor_tables: usize,
    pub root_layouts: usize,
    pub vertex_layouts: usize,
    pub programs: usize,
    pub pipeline_blobs: usize,
}

#[derive(Debug)]
pub struct GpuCaches {
    pub render_passes: LifetimeCache<RenderPassKey, RenderPassHandle>,
    pub pipelines: LifetimeCache<PipelineDescriptor, PipelineHandle>,
    /// Staging tables assembled at flush time, by their source handles.
    pub descriptor_tables: LifetimeCache<DescriptorTableKey, DescriptorTable>,
    pub root_layouts: RootLayoutCache,
    pub vertex_layouts: VertexLayoutRegistry,
    pub programs: ShaderProgramRegistry,
    pub pipeline_blobs: PipelineBlobCache,

    /// Tables dropped from the cache whose staging range may still be the
    /// source of a pending upload. Freed at the next tick.
    retired_tables: Vec<DescriptorTable>,
    pipeline_max_age: u64,
    render_pass_max_age: u64,
    descriptor_table_max_age: u64,
}

impl GpuCaches {
    /// Creates empty caches.
    ///
    /// Max ages are raised to at least the buffered frame count, so an
    /// evicted object is no longer referenced by any frame in flight.
    #[must_use]
    pub fn new(settings: &GpuSettings) -> Self {
        let frames = u64::from(settings.buffered_frames());
        Self {
            render_passes: LifetimeCache::new(),
            pipelines: LifetimeCache::new(),
            descriptor_tables: LifetimeCache::new(),
            root_layouts: RootLayoutCache::new(),
            vertex_layouts: VertexLayoutRegistry::new(),
            programs: ShaderProgramRegistry::new(),
            pipeline_blobs: PipelineBlobCache::new(),
            retired_tables: Vec::new(),
            pipeline_max_age: settings.pipeline_max_age.max(frames),
            render_pass_max_age: settings.render_pass_max_age.max(frames),
            descriptor_table_max_age: settings.descriptor_table_max_age.max(frames),
        }
    }

    /// Advances every lifetime cache by one tick and evicts what went stale.
    pub fn tick<B: PipelineBackend + ?Sized>(
        &mut self,
        backend: &B,
        descriptors: &DescriptorHeapAllocationManager,
    ) -> CacheSweep {
        for table in self.retired_tables.drain(..) {
            free_table(descriptors, &table);
        }
        self.pipelines.update_tick();
        self.render_passes.update_tick();
        self.descriptor_tables.update_tick();

        let sweep = CacheSweep {
            pipelines: self
                .pipelines
                .check(self.pipeline_max_age, |_, pipeline| backend.destroy_pipeline(pipeline)),
            render_passes: self
                .render_passes
                .check(self.render_pass_max_age, |_, pass| backend.destroy_render_pass(pass)),
            descriptor_tables: self
                .descriptor_tables
                .check(self.descriptor_table_max_age, |_, table| free_table(descriptors, &table)),
        };
        if sweep != CacheSweep::default() {
            log::debug!("[cache] evicted {sweep:?}");
        }
        sweep
    }

    /// Drops every cached descriptor table.
    ///
    /// Cached tables are keyed by the addresses of their source descriptors,
    /// so they must go whenever a source descriptor is freed and its address
    /// may be handed out again. The staging ranges are freed at the next
    /// [`tick`](Self::tick), after the current frame has been uploaded.
    pub fn invalidate_descriptor_tables(&mut self) -> usize {
        let retired = &mut self.retired_tables;
        let before = retired.len();
        self.descriptor_tables.clear_with(|_, table| retired.push(table));
        let count = retired.len() - before;
        if count > 0 {
            log::trace!("[cache] {count} descriptor tables retired");
        }
        count
    }

    /// Destroys every cached object.
    pub fn teardown<B: PipelineBackend + ?Sized>(&mut self, backend: &B, descriptors: &DescriptorHeapAllocationManager) {
        self.pipelines.clear_with(|_, pipeline| backend.destroy_pipeline(pipeline));
        self.render_passes.clear_with(|_, pass| backend.destroy_render_pass(pass));
        self.descriptor_tables
            .clear_with(|_, table| free_table(descriptors, &table));
        for table in self.retired_tables.drain(..) {
            free_table(descriptors, &table);
        }
        self.root_layouts.clear(backend);
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            pipelines: self.pipelines.len(),
            render_passes: self.render_passes.len(),
            descriptor_tables: self.descriptor_tables.len(),
            root_layouts: self.root_layouts.len(),
            vertex_layouts: self.vertex_layouts.len(),
            programs: self.programs.len(),
            pipeline_blobs: self.pipeline_blobs.len(),
        }
    }
}

fn free_table(descriptors: &DescriptorHeapAllocationManager, table: &DescriptorTable) {
    if let Err(e) = descriptors.free(table) {
        log::warn!("[cache] evicted descriptor table could not be freed: {e}");
    }
}
