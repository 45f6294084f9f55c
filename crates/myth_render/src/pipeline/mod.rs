//! Pipeline objects and the registries they are built from.

mod blob;
mod key;
mod pass;
mod program;
mod root_layout;
mod vertex;

pub use blob::PipelineBlobCache;
pub use key::{
    BindType, BlendComponentKey, BlendStateKey, BlendTarget, DepthBiasKey, DepthStencilState, GraphicsState,
    IndexStripCut, MAX_RENDER_TARGETS, PipelineDescriptor, PipelineKind, RasterState, StencilFaceKey, TopologyClass,
};
pub use pass::{RenderPassDescription, RenderPassKey};
pub use program::{ProgramEntry, ShaderProgramDescription, ShaderProgramRegistry};
pub use root_layout::{
    RESOURCE_TABLE_ROOT_INDEX, ResourceCounts, RootLayoutCache, RootLayoutDescriptor, SAMPLER_TABLE_ROOT_INDEX,
};
pub use vertex::{VertexAttribute, VertexBinding, VertexLayout, VertexLayoutRegistry};
