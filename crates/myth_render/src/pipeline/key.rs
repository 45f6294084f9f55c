//! Hashable pipeline state.
//!
//! `wgpu` state descriptors (`BlendState`, `StencilFaceState`,
//! `DepthBiasState`, …) carry floats and do not implement `Hash` / `Eq`.
//! This module defines *mirror* types holding the fields relevant for
//! pipeline identity, and the tagged [`PipelineDescriptor`] keying the
//! pipeline cache.

use myth_core::hash::{fx_hash_key, xxh3_key};
use myth_core::ids::{RootLayoutHandle, ShaderProgramId, VertexLayoutId};

use super::root_layout::RootLayoutDescriptor;

/// Maximum number of simultaneously bound color targets.
pub const MAX_RENDER_TARGETS: usize = 8;

/// Pipeline bind point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindType {
    Graphics,
    Compute,
}

/// Primitive class a pipeline is compiled for.
///
/// Switching between topologies of the same class (list vs strip) is dynamic
/// state and does not need a new pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TopologyClass {
    Point,
    Line,
    #[default]
    Triangle,
}

impl From<wgpu::PrimitiveTopology> for TopologyClass {
    fn from(topology: wgpu::PrimitiveTopology) -> Self {
        match topology {
            wgpu::PrimitiveTopology::PointList => Self::Point,
            wgpu::PrimitiveTopology::LineList | wgpu::PrimitiveTopology::LineStrip => Self::Line,
            wgpu::PrimitiveTopology::TriangleList | wgpu::PrimitiveTopology::TriangleStrip => Self::Triangle,
        }
    }
}

/// Strip-cut index value baked into pipelines drawing indexed strips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexStripCut {
    #[default]
    Disabled,
    /// `0xFFFF`
    Uint16,
    /// `0xFFFF_FFFF`
    Uint32,
}

impl IndexStripCut {
    /// Strip-cut value required to draw `topology` with indices of `format`.
    #[must_use]
    pub fn for_draw(topology: wgpu::PrimitiveTopology, format: Option<wgpu::IndexFormat>) -> Self {
        match (topology.is_strip(), format) {
            (true, Some(wgpu::IndexFormat::Uint16)) => Self::Uint16,
            (true, Some(wgpu::IndexFormat::Uint32)) => Self::Uint32,
            _ => Self::Disabled,
        }
    }
}

// ─── Hashable Mirror Types ────────────────────────────────────────────────────

/// Hashable mirror of `wgpu::BlendComponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponentKey {
    pub src_factor: wgpu::BlendFactor,
    pub dst_factor: wgpu::BlendFactor,
    pub operation: wgpu::BlendOperation,
}

impl From<wgpu::BlendComponent> for BlendComponentKey {
    fn from(b: wgpu::BlendComponent) -> Self {
        Self {
            src_factor: b.src_factor,
            dst_factor: b.dst_factor,
            operation: b.operation,
        }
    }
}

/// Hashable mirror of `wgpu::BlendState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateKey {
    pub color: BlendComponentKey,
    pub alpha: BlendComponentKey,
}

impl From<wgpu::BlendState> for BlendStateKey {
    fn from(b: wgpu::BlendState) -> Self {
        Self {
            color: b.color.into(),
            alpha: b.alpha.into(),
        }
    }
}

/// Blend setup of one color target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendTarget {
    pub blend: Option<BlendStateKey>,
    pub write_mask: u32, // wgpu::ColorWrites bits
}

impl Default for BlendTarget {
    fn default() -> Self {
        Self {
            blend: None,
            write_mask: wgpu::ColorWrites::ALL.bits(),
        }
    }
}

/// Hashable mirror of `wgpu::StencilFaceState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceKey {
    pub compare: wgpu::CompareFunction,
    pub fail_op: wgpu::StencilOperation,
    pub depth_fail_op: wgpu::StencilOperation,
    pub pass_op: wgpu::StencilOperation,
}

impl From<wgpu::StencilFaceState> for StencilFaceKey {
    fn from(s: wgpu::StencilFaceState) -> Self {
        Self {
            compare: s.compare,
            fail_op: s.fail_op,
            depth_fail_op: s.depth_fail_op,
            pass_op: s.pass_op,
        }
    }
}

impl Default for StencilFaceKey {
    fn default() -> Self {
        wgpu::StencilFaceState::IGNORE.into()
    }
}

/// Hashable mirror of `wgpu::DepthBiasState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DepthBiasKey {
    pub constant: i32,
    pub slope_scale_bits: u32,
    pub clamp_bits: u32,
}

impl From<wgpu::DepthBiasState> for DepthBiasKey {
    fn from(b: wgpu::DepthBiasState) -> Self {
        Self {
            constant: b.constant,
            slope_scale_bits: b.slope_scale.to_bits(),
            clamp_bits: b.clamp.to_bits(),
        }
    }
}

// ─── Pipeline State ───────────────────────────────────────────────────────────

/// Rasterizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub cull_mode: Option<wgpu::Face>,
    pub front_face: wgpu::FrontFace,
    pub polygon_mode: wgpu::PolygonMode,
    pub unclipped_depth: bool,
    pub conservative: bool,
    pub bias: DepthBiasKey,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            cull_mode: Some(wgpu::Face::Back),
            front_face: wgpu::FrontFace::Ccw,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
            bias: DepthBiasKey::default(),
        }
    }
}

/// Depth and stencil test state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: wgpu::CompareFunction,
    pub stencil_test: bool,
    pub stencil_front: StencilFaceKey,
    pub stencil_back: StencilFaceKey,
    pub stencil_read_mask: u32,
    pub stencil_write_mask: u32,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil_test: false,
            stencil_front: StencilFaceKey::default(),
            stencil_back: StencilFaceKey::default(),
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
        }
    }
}

/// Everything a graphics pipeline is compiled against besides the program
/// and the root layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsState {
    pub raster: RasterState,
    pub depth_stencil: DepthStencilState,
    pub blend: [BlendTarget; MAX_RENDER_TARGETS],
    pub alpha_to_coverage: bool,
    pub topology_class: TopologyClass,
    pub input_layout: Option<VertexLayoutId>,
    /// Formats of the bound color targets, `None` past the last one.
    pub color_formats: [Option<wgpu::TextureFormat>; MAX_RENDER_TARGETS],
    pub depth_format: Option<wgpu::TextureFormat>,
    pub sample_count: u32,
    pub strip_cut: IndexStripCut,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            raster: RasterState::default(),
            depth_stencil: DepthStencilState::default(),
            blend: [BlendTarget::default(); MAX_RENDER_TARGETS],
            alpha_to_coverage: false,
            topology_class: TopologyClass::Triangle,
            input_layout: None,
            color_formats: [None; MAX_RENDER_TARGETS],
            depth_format: None,
            sample_count: 1,
            strip_cut: IndexStripCut::Disabled,
        }
    }
}

/// Graphics or compute pipeline state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics(GraphicsState),
    Compute,
}

/// Full description of a pipeline object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineDescriptor {
    pub program: ShaderProgramId,
    /// Permutation (define set) of the program.
    pub permutation: u64,
    pub root_layout: RootLayoutHandle,
    pub kind: PipelineKind,
}

/// Fields of a pipeline that survive a restart.
#[derive(Hash)]
struct BlobKey<'a> {
    program: ShaderProgramId,
    permutation: u64,
    layout: &'a RootLayoutDescriptor,
    kind: &'a PipelineKind,
}

impl PipelineDescriptor {
    /// In-process hash of the full descriptor.
    #[inline]
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        fx_hash_key(self)
    }

    /// Key of the pipeline in a persisted blob cache.
    ///
    /// `layout` describes the root layout behind `self.root_layout`. The
    /// native handle is left out, since it depends on creation order.
    #[must_use]
    pub fn blob_key(&self, layout: &RootLayoutDescriptor) -> u64 {
        xxh3_key(&BlobKey {
            program: self.program,
            permutation: self.permutation,
            layout,
            kind: &self.kind,
        })
    }

    #[must_use]
    pub fn bind_type(&self) -> BindType {
        match self.kind {
            PipelineKind::Graphics(_) => BindType::Graphics,
            PipelineKind::Compute => BindType::Compute,
        }
    }
}
