//! View and sampler descriptions written into staging descriptors.

use std::hash::{Hash, Hasher};

use super::DescriptorKind;

/// How a view exposes its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthStencil,
}

impl ViewKind {
    /// Heap kind the view's descriptor lives in.
    #[must_use]
    pub const fn descriptor_kind(self) -> DescriptorKind {
        match self {
            Self::ConstantBuffer | Self::ShaderResource | Self::UnorderedAccess => DescriptorKind::CbvSrvUav,
            Self::RenderTarget => DescriptorKind::RenderTarget,
            Self::DepthStencil => DescriptorKind::DepthStencil,
        }
    }
}

/// Description of a resource view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewDescription {
    pub kind: ViewKind,
    /// Texture format; `None` for buffer views.
    pub format: Option<wgpu::TextureFormat>,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
    /// Byte range for buffer views.
    pub byte_offset: u64,
    pub byte_size: u64,
}

impl ViewDescription {
    fn texture(kind: ViewKind, format: wgpu::TextureFormat) -> Self {
        Self {
            kind,
            format: Some(format),
            base_mip_level: 0,
            mip_level_count: 1,
            base_array_layer: 0,
            array_layer_count: 1,
            byte_offset: 0,
            byte_size: 0,
        }
    }

    #[must_use]
    pub fn render_target(format: wgpu::TextureFormat) -> Self {
        Self::texture(ViewKind::RenderTarget, format)
    }

    #[must_use]
    pub fn depth_stencil(format: wgpu::TextureFormat) -> Self {
        Self::texture(ViewKind::DepthStencil, format)
    }

    #[must_use]
    pub fn shader_resource(format: wgpu::TextureFormat) -> Self {
        Self::texture(ViewKind::ShaderResource, format)
    }

    #[must_use]
    pub fn storage_texture(format: wgpu::TextureFormat) -> Self {
        Self::texture(ViewKind::UnorderedAccess, format)
    }

    /// A constant buffer view over `[offset, offset + size)`.
    #[must_use]
    pub fn constant_buffer(byte_offset: u64, byte_size: u64) -> Self {
        Self {
            kind: ViewKind::ConstantBuffer,
            format: None,
            base_mip_level: 0,
            mip_level_count: 0,
            base_array_layer: 0,
            array_layer_count: 0,
            byte_offset,
            byte_size,
        }
    }
}

/// Sampler state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDescription {
    pub address_modes: [wgpu::AddressMode; 3],
    pub mag_filter: wgpu::FilterMode,
    pub min_filter: wgpu::FilterMode,
    pub mip_filter: wgpu::FilterMode,
    pub lod_min_clamp: f32,
    pub lod_max_clamp: f32,
    pub compare: Option<wgpu::CompareFunction>,
    pub anisotropy_clamp: u16,
}

impl Default for SamplerDescription {
    fn default() -> Self {
        Self {
            address_modes: [wgpu::AddressMode::ClampToEdge; 3],
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mip_filter: wgpu::FilterMode::Linear,
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: None,
            anisotropy_clamp: 1,
        }
    }
}

impl Eq for SamplerDescription {}

impl Hash for SamplerDescription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address_modes.hash(state);
        self.mag_filter.hash(state);
        self.min_filter.hash(state);
        self.mip_filter.hash(state);
        self.lod_min_clamp.to_bits().hash(state);
        self.lod_max_clamp.to_bits().hash(state);
        self.compare.hash(state);
        self.anisotropy_clamp.hash(state);
    }
}
