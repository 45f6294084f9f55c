use bitflags::bitflags;

bitflags! {
    /// State that changed since the last flush.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFlags: u32 {
        const DESCRIPTORS         = 1 << 0;
        const SAMPLER_DESCRIPTORS = 1 << 1;
        const PIPELINE            = 1 << 2;
        const STENCIL_REF         = 1 << 3;
        const VERTEX_BUFFERS      = 1 << 4;
        const INDEX_BUFFER        = 1 << 5;
        const TOPOLOGY            = 1 << 6;
        const ROOT_SIGNATURE      = 1 << 7;
        const RENDER_TARGETS      = 1 << 8;
    }
}

impl DirtyFlags {
    /// Flags a compute flush consumes. The rest stay pending for the next
    /// draw.
    pub const COMPUTE: Self = Self::DESCRIPTORS
        .union(Self::SAMPLER_DESCRIPTORS)
        .union(Self::PIPELINE)
        .union(Self::ROOT_SIGNATURE);
}

bitflags! {
    /// What a pushed state copies from its parent.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ContextFlags: u32 {
        /// Program, root layout inputs and graphics state.
        const INHERIT_PIPELINE_STATE = 1 << 0;
        /// Descriptor slots, vertex and index buffers.
        const INHERIT_RESOURCES      = 1 << 1;
        const INHERIT_RENDER_TARGETS = 1 << 2;
    }
}
