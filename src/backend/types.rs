//! Common types shared between backends

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Rg32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float | TextureFormat::Rg32Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    pub fn is_srgb(&self) -> bool {
        matches!(
            self,
            TextureFormat::Rgba8UnormSrgb | TextureFormat::Bgra8UnormSrgb
        )
    }

    /// Format storage views of this format use. sRGB data is stored as its
    /// linear counterpart and encoded by the shader.
    pub fn storage_format(&self) -> TextureFormat {
        match self {
            TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8Unorm,
            TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8Unorm,
            format => *format,
        }
    }
}

/// Number of mip levels down to 1x1
pub fn full_mip_chain(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Size of mip `level` of a `size` texture
pub fn mip_size(size: u32, level: u32) -> u32 {
    size.checked_shr(level).unwrap_or(0).max(1)
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Uint32x2,
    Uint32x4,
    Unorm8x4,
}

impl VertexFormat {
    pub fn size(&self) -> u32 {
        match self {
            VertexFormat::Float32 | VertexFormat::Uint32 | VertexFormat::Unorm8x4 => 4,
            VertexFormat::Float32x2 | VertexFormat::Uint32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 | VertexFormat::Uint32x4 => 16,
        }
    }
}

/// How an input element advances through its vertex buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InputStepRate {
    #[default]
    PerVertex,
    /// Advance once every `n` instances
    PerInstance(u32),
}

/// One element of a pipeline input layout.
///
/// `offset` of `None` places the element directly after the previous element
/// of the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputElement {
    pub semantic_name: String,
    pub semantic_index: u32,
    pub format: VertexFormat,
    pub slot: u32,
    pub offset: Option<u32>,
    pub step: InputStepRate,
}

impl InputElement {
    pub fn per_vertex(semantic_name: &str, format: VertexFormat) -> Self {
        Self {
            semantic_name: semantic_name.to_string(),
            semantic_index: 0,
            format,
            slot: 0,
            offset: None,
            step: InputStepRate::PerVertex,
        }
    }

    pub fn with_slot(mut self, slot: u32) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Resolve append-aligned offsets into absolute byte offsets, per slot.
pub fn resolve_input_offsets(elements: &[InputElement]) -> Vec<u32> {
    let mut cursors: Vec<(u32, u32)> = Vec::new();
    elements
        .iter()
        .map(|element| {
            let index = match cursors.iter().position(|(slot, _)| *slot == element.slot) {
                Some(index) => index,
                None => {
                    cursors.push((element.slot, 0));
                    cursors.len() - 1
                }
            };
            let offset = element.offset.unwrap_or(cursors[index].1);
            cursors[index].1 = offset + element.format.size();
            offset
        })
        .collect()
}

/// Kind of memory heap a resource lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeapKind {
    /// GPU-local memory, not CPU-visible
    #[default]
    Default,
    /// CPU write-combined memory, readable by the GPU
    Upload,
    /// CPU-readable memory for GPU-to-CPU copies
    Readback,
}

impl HeapKind {
    pub fn is_cpu_visible(&self) -> bool {
        !matches!(self, HeapKind::Default)
    }
}

/// Resource creation flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceFlags(u32);

impl ResourceFlags {
    pub const NONE: Self = Self(0);
    pub const ALLOW_RENDER_TARGET: Self = Self(1 << 0);
    pub const ALLOW_DEPTH_STENCIL: Self = Self(1 << 1);
    pub const ALLOW_UNORDERED_ACCESS: Self = Self(1 << 2);
    pub const DENY_SHADER_RESOURCE: Self = Self(1 << 3);
    pub const ACCELERATION_STRUCTURE: Self = Self(1 << 4);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for ResourceFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Usage state of a GPU resource, changed only through explicit barriers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    GenericRead,
    VertexAndConstantBuffer,
    IndexBuffer,
    RenderTarget,
    UnorderedAccess,
    DepthWrite,
    DepthRead,
    NonPixelShaderResource,
    PixelShaderResource,
    AllShaderResource,
    CopyDest,
    CopySource,
    Present,
}

impl ResourceState {
    /// States that can only be held by resources in an upload heap
    pub fn is_upload_compatible(&self) -> bool {
        matches!(self, ResourceState::GenericRead | ResourceState::Common)
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub heap: HeapKind,
    pub flags: ResourceFlags,
    pub initial_state: ResourceState,
}

/// Optimized clear value for render targets and depth buffers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    #[default]
    D2,
    /// Six square faces, ordered +X, -X, +Y, -Y, +Z, -Z
    Cube,
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub flags: ResourceFlags,
    pub initial_state: ResourceState,
    pub clear_value: Option<ClearValue>,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            mip_levels: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            flags: ResourceFlags::NONE,
            initial_state: ResourceState::Common,
            clear_value: None,
        }
    }
}

impl TextureDescriptor {
    pub fn array_layers(&self) -> u32 {
        match self.dimension {
            TextureDimension::D2 => 1,
            TextureDimension::Cube => 6,
        }
    }
}

/// Row layout of one subresource inside an upload source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceLayout {
    pub offset: u64,
    pub row_pitch: u64,
    pub slice_pitch: u64,
}

/// Broad class of primitive topology a pipeline is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TopologyClass {
    #[default]
    Undefined,
    Point,
    Line,
    Triangle,
}

/// Primitive topology used at draw time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

impl PrimitiveTopology {
    pub fn class(&self) -> TopologyClass {
        match self {
            PrimitiveTopology::PointList => TopologyClass::Point,
            PrimitiveTopology::LineList | PrimitiveTopology::LineStrip => TopologyClass::Line,
            PrimitiveTopology::TriangleList | PrimitiveTopology::TriangleStrip => {
                TopologyClass::Triangle
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    #[default]
    Ccw,
    Cw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOperation,
}

impl Default for BlendComponent {
    fn default() -> Self {
        Self {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
            operation: BlendOperation::Add,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorWrites(pub u8);

impl ColorWrites {
    pub const RED: Self = Self(1 << 0);
    pub const GREEN: Self = Self(1 << 1);
    pub const BLUE: Self = Self(1 << 2);
    pub const ALPHA: Self = Self(1 << 3);
    pub const ALL: Self = Self(0xF);

    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl Default for ColorWrites {
    fn default() -> Self {
        Self::ALL
    }
}

/// Blend configuration of one render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderTargetBlend {
    pub enabled: bool,
    pub color: BlendComponent,
    pub alpha: BlendComponent,
    pub write_mask: ColorWrites,
}

/// Output-merger blend state, applied to every bound render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlendState {
    pub alpha_to_coverage: bool,
    pub target: RenderTargetBlend,
}

impl BlendState {
    pub fn opaque() -> Self {
        Self::default()
    }

    pub fn alpha_blending() -> Self {
        Self {
            alpha_to_coverage: false,
            target: RenderTargetBlend {
                enabled: true,
                color: BlendComponent {
                    src_factor: BlendFactor::SrcAlpha,
                    dst_factor: BlendFactor::OneMinusSrcAlpha,
                    operation: BlendOperation::Add,
                },
                alpha: BlendComponent {
                    src_factor: BlendFactor::One,
                    dst_factor: BlendFactor::OneMinusSrcAlpha,
                    operation: BlendOperation::Add,
                },
                write_mask: ColorWrites::ALL,
            },
        }
    }

    pub fn additive() -> Self {
        Self {
            alpha_to_coverage: false,
            target: RenderTargetBlend {
                enabled: true,
                color: BlendComponent {
                    src_factor: BlendFactor::One,
                    dst_factor: BlendFactor::One,
                    operation: BlendOperation::Add,
                },
                alpha: BlendComponent {
                    src_factor: BlendFactor::One,
                    dst_factor: BlendFactor::One,
                    operation: BlendOperation::Add,
                },
                write_mask: ColorWrites::ALL,
            },
        }
    }
}

/// Rasterizer state. Float fields are canonicalized before fingerprinting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerState {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip: bool,
    pub conservative: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Back,
            front_face: FrontFace::Ccw,
            depth_bias: 0,
            depth_bias_clamp: 0.0,
            slope_scaled_depth_bias: 0.0,
            depth_clip: true,
            conservative: false,
        }
    }
}

impl RasterizerState {
    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOperation {
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceState {
    pub fail_op: StencilOperation,
    pub depth_fail_op: StencilOperation,
    pub pass_op: StencilOperation,
    pub compare: CompareFunction,
}

impl Default for StencilFaceState {
    fn default() -> Self {
        Self {
            fail_op: StencilOperation::Keep,
            depth_fail_op: StencilOperation::Keep,
            pass_op: StencilOperation::Keep,
            compare: CompareFunction::Always,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_enabled: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
    pub stencil_enabled: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front: StencilFaceState,
    pub back: StencilFaceState,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_enabled: true,
            depth_write: true,
            depth_compare: CompareFunction::Less,
            stencil_enabled: false,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            front: StencilFaceState::default(),
            back: StencilFaceState::default(),
        }
    }
}

impl DepthStencilState {
    pub fn disabled() -> Self {
        Self {
            depth_enabled: false,
            depth_write: false,
            depth_compare: CompareFunction::Always,
            ..Default::default()
        }
    }
}

/// Multisample count and quality level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleDesc {
    pub count: u32,
    pub quality: u32,
}

impl Default for SampleDesc {
    fn default() -> Self {
        Self {
            count: 1,
            quality: 0,
        }
    }
}

/// Shader stage a bytecode blob is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
    Hull,
    Domain,
    Compute,
}

/// Which shader stages may access a binding-signature parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShaderVisibility {
    #[default]
    All,
    Vertex,
    Pixel,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDescriptor {
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub compare: Option<CompareFunction>,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            address_mode_w: AddressMode::Repeat,
            compare: None,
        }
    }
}

impl SamplerDescriptor {
    pub fn linear_clamp() -> Self {
        Self {
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            ..Default::default()
        }
    }

    /// Point-filtered comparison sampler used for shadow lookups
    pub fn shadow_comparison() -> Self {
        Self {
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            compare: Some(CompareFunction::LessEqual),
            ..Self::linear_clamp()
        }
    }
}

/// Hardware queue a command list executes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Direct,
    Compute,
    Copy,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Direct, QueueType::Compute, QueueType::Copy];
}

/// Monotonically increasing value signalled by a queue when work completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(pub u64);

/// Kind of descriptor heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

impl DescriptorHeapKind {
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorHeapKind::CbvSrvUav => "cbv_srv_uav",
            DescriptorHeapKind::Sampler => "sampler",
            DescriptorHeapKind::Rtv => "rtv",
            DescriptorHeapKind::Dsv => "dsv",
        }
    }

    /// Only resource-view and sampler heaps can be bound for shader access
    pub fn can_be_shader_visible(&self) -> bool {
        matches!(
            self,
            DescriptorHeapKind::CbvSrvUav | DescriptorHeapKind::Sampler
        )
    }
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn size(&self) -> u32 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_aligned_offsets() {
        let elements = vec![
            InputElement::per_vertex("POSITION", VertexFormat::Float32x3),
            InputElement::per_vertex("NORMAL", VertexFormat::Float32x3),
            InputElement::per_vertex("INSTANCE", VertexFormat::Float32x4).with_slot(1),
            InputElement::per_vertex("TEXCOORD", VertexFormat::Float32x2),
        ];

        assert_eq!(resolve_input_offsets(&elements), vec![0, 12, 0, 24]);
    }

    #[test]
    fn test_explicit_offset_moves_cursor() {
        let elements = vec![
            InputElement::per_vertex("POSITION", VertexFormat::Float32x3).with_offset(16),
            InputElement::per_vertex("NORMAL", VertexFormat::Float32x3),
        ];

        assert_eq!(resolve_input_offsets(&elements), vec![16, 28]);
    }

    #[test]
    fn test_topology_class() {
        assert_eq!(PrimitiveTopology::LineStrip.class(), TopologyClass::Line);
        assert_eq!(
            PrimitiveTopology::TriangleStrip.class(),
            TopologyClass::Triangle
        );
        assert_eq!(PrimitiveTopology::PointList.class(), TopologyClass::Point);
    }

    #[test]
    fn test_mip_chain_length() {
        assert_eq!(full_mip_chain(1, 1), 1);
        assert_eq!(full_mip_chain(256, 256), 9);
        assert_eq!(full_mip_chain(300, 17), 9);
        assert_eq!(full_mip_chain(0, 0), 1);

        assert_eq!(mip_size(300, 0), 300);
        assert_eq!(mip_size(300, 3), 37);
        assert_eq!(mip_size(17, 8), 1);
        assert_eq!(mip_size(17, 40), 1);
    }

    #[test]
    fn test_cube_has_six_layers() {
        let cube = TextureDescriptor {
            dimension: TextureDimension::Cube,
            ..Default::default()
        };
        assert_eq!(cube.array_layers(), 6);
        assert_eq!(TextureDescriptor::default().array_layers(), 1);
        assert_eq!(TextureFormat::Rgba8UnormSrgb.storage_format(), TextureFormat::Rgba8Unorm);
    }
}
