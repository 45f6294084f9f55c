//! Heap capability of a native backend.
//!
//! The memory manager needs exactly four things from the native API: the
//! size/alignment a resource requires, heap pages, resources placed inside
//! those pages, and releasing both again. Everything else about the native
//! device stays behind other capability traits.

use myth_core::errors::Result;
use myth_core::ids::{HeapHandle, NativeResource};
use myth_core::memory::MemoryUsageClass;

/// Shape of a GPU resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDimension {
    Buffer,
    Texture1D,
    Texture2D,
    Texture3D,
}

/// Description of a resource to place in a heap page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceDescription {
    pub dimension: ResourceDimension,
    /// Byte size for buffers, texel width for textures.
    pub width: u64,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub format: Option<wgpu::TextureFormat>,
}

impl ResourceDescription {
    /// A linear buffer of `size_bytes`.
    #[must_use]
    pub fn buffer(size_bytes: u64) -> Self {
        Self {
            dimension: ResourceDimension::Buffer,
            width: size_bytes,
            height: 1,
            depth_or_array_layers: 1,
            mip_levels: 1,
            sample_count: 1,
            format: None,
        }
    }

    /// A single-sampled 2D texture with one mip level.
    #[must_use]
    pub fn texture_2d(width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            dimension: ResourceDimension::Texture2D,
            width: u64::from(width),
            height,
            depth_or_array_layers: 1,
            mip_levels: 1,
            sample_count: 1,
            format: Some(format),
        }
    }

    #[must_use]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    /// Tightly packed size of every subresource.
    ///
    /// Backends without a driver query can use this as the required size.
    #[must_use]
    pub fn packed_size_bytes(&self) -> u64 {
        if self.dimension == ResourceDimension::Buffer {
            return self.width;
        }

        let format = self.format.unwrap_or(wgpu::TextureFormat::Rgba8Unorm);
        let texel_bytes = u64::from(format.block_copy_size(None).unwrap_or(4));
        let (block_w, block_h) = format.block_dimensions();
        let depth = if self.dimension == ResourceDimension::Texture3D {
            u64::from(self.depth_or_array_layers.max(1))
        } else {
            1
        };
        let layers = if self.dimension == ResourceDimension::Texture3D {
            1
        } else {
            u64::from(self.depth_or_array_layers.max(1))
        };

        let mut total = 0;
        for mip in 0..self.mip_levels.max(1) {
            let w = (self.width >> mip).max(1).div_ceil(u64::from(block_w));
            let h = u64::from((self.height >> mip).max(1)).div_ceil(u64::from(block_h));
            let d = (depth >> mip).max(1);
            total += w * h * d * texel_bytes;
        }
        total * layers * u64::from(self.sample_count.max(1))
    }
}

/// Size and alignment the native API requires for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
    pub size_bytes: u64,
    /// Power of two.
    pub alignment: u64,
}

/// Heap capability of a backend.
///
/// Methods take `&self`; implementations that track state use interior
/// mutability so that several managers may share one backend.
pub trait HeapBackend {
    /// Required size and alignment for placing `desc` in a page of `usage`.
    fn allocation_info(&self, desc: &ResourceDescription, usage: MemoryUsageClass) -> AllocationInfo;

    /// Creates a native heap page.
    fn create_heap_page(&self, size_bytes: u64, usage: MemoryUsageClass) -> Result<HeapHandle>;

    fn destroy_heap_page(&self, heap: HeapHandle);

    /// Creates a resource at `offset` inside `heap`.
    fn create_placed_resource(
        &self,
        heap: HeapHandle,
        offset: u64,
        desc: &ResourceDescription,
    ) -> Result<NativeResource>;

    fn release_resource(&self, resource: NativeResource);
}
