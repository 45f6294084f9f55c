//! Opaque handles.
//!
//! Engine-facing objects are addressed through generational slot-map keys
//! resolved by the manager that owns them. Native objects created by a
//! backend are carried as plain integer newtypes the backend hands out; the
//! GPU layer never dereferences them.

use slotmap::new_key_type;

new_key_type! {
    /// A placed GPU resource owned by the resource allocation manager.
    pub struct ResourceId;
    /// A descriptor view (CBV/SRV/UAV/RTV/DSV) created for a resource.
    pub struct ResourceViewId;
    /// A sampler descriptor.
    pub struct SamplerId;
}

macro_rules! native_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
            pub struct $name(pub u64);

            impl $name {
                #[inline]
                #[must_use]
                pub const fn raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

native_handle! {
    /// Native memory heap backing one heap page.
    HeapHandle;
    /// Native placed resource.
    NativeResource;
    /// Native descriptor heap.
    DescriptorHeapHandle;
    /// Native root signature / pipeline layout.
    RootLayoutHandle;
    /// Native pipeline state object.
    PipelineHandle;
    /// Native render pass (or framebuffer) object.
    RenderPassHandle;
}

/// CPU address of a descriptor in a staging or shader-visible heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CpuDescriptorHandle(pub u64);

impl CpuDescriptorHandle {
    /// Returns the handle `index` descriptors further along the heap.
    #[inline]
    #[must_use]
    pub const fn offset(self, index: u32, stride: u32) -> Self {
        Self(self.0 + index as u64 * stride as u64)
    }
}

/// GPU address of a descriptor in a shader-visible heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GpuDescriptorHandle(pub u64);

impl GpuDescriptorHandle {
    /// Returns the handle `index` descriptors further along the heap.
    #[inline]
    #[must_use]
    pub const fn offset(self, index: u32, stride: u32) -> Self {
        Self(self.0 + index as u64 * stride as u64)
    }
}

/// Id of a registered vertex input layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexLayoutId(pub u32);

/// Id of a registered shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderProgramId(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_handle_offset_uses_stride() {
        let base = CpuDescriptorHandle(0x1000);
        assert_eq!(base.offset(3, 32), CpuDescriptorHandle(0x1000 + 96));
        assert_eq!(GpuDescriptorHandle(64).offset(0, 32), GpuDescriptorHandle(64));
    }
}
