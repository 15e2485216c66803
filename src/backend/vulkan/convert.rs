//! Conversions from backend types to their Vulkan counterparts

use crate::backend::types::*;
use crate::pipeline::{DescriptorRangeType, ResourceDimension};
use ash::vk;

pub fn format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::Rg32Float => vk::Format::R32G32_SFLOAT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub fn has_stencil(format: TextureFormat) -> bool {
    matches!(format, TextureFormat::Depth24PlusStencil8)
}

/// Aspect used for sampling and copies
pub fn sampled_aspect(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Aspect used for attachments and layout transitions
pub fn full_aspect(format: TextureFormat) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        sampled_aspect(format)
    }
}

pub fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32 => vk::Format::R32_SFLOAT,
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Uint32 => vk::Format::R32_UINT,
        VertexFormat::Uint32x2 => vk::Format::R32G32_UINT,
        VertexFormat::Uint32x4 => vk::Format::R32G32B32A32_UINT,
        VertexFormat::Unorm8x4 => vk::Format::R8G8B8A8_UNORM,
    }
}

pub fn compare_op(func: CompareFunction) -> vk::CompareOp {
    match func {
        CompareFunction::Never => vk::CompareOp::NEVER,
        CompareFunction::Less => vk::CompareOp::LESS,
        CompareFunction::Equal => vk::CompareOp::EQUAL,
        CompareFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareFunction::Greater => vk::CompareOp::GREATER,
        CompareFunction::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareFunction::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareFunction::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn filter(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

pub fn mipmap_mode(mode: FilterMode) -> vk::SamplerMipmapMode {
    match mode {
        FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub fn address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

pub fn sampler_info(desc: &SamplerDescriptor) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo::default()
        .mag_filter(filter(desc.mag_filter))
        .min_filter(filter(desc.min_filter))
        .mipmap_mode(mipmap_mode(desc.mipmap_filter))
        .address_mode_u(address_mode(desc.address_mode_u))
        .address_mode_v(address_mode(desc.address_mode_v))
        .address_mode_w(address_mode(desc.address_mode_w))
        .compare_enable(desc.compare.is_some())
        .compare_op(compare_op(desc.compare.unwrap_or(CompareFunction::Always)))
        .max_lod(vk::LOD_CLAMP_NONE)
}

pub fn topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

/// Pipelines are built for a topology class; the exact topology is dynamic state
pub fn topology_class(class: TopologyClass) -> Option<vk::PrimitiveTopology> {
    match class {
        TopologyClass::Undefined => None,
        TopologyClass::Point => Some(vk::PrimitiveTopology::POINT_LIST),
        TopologyClass::Line => Some(vk::PrimitiveTopology::LINE_LIST),
        TopologyClass::Triangle => Some(vk::PrimitiveTopology::TRIANGLE_LIST),
    }
}

pub fn polygon_mode(mode: FillMode) -> vk::PolygonMode {
    match mode {
        FillMode::Solid => vk::PolygonMode::FILL,
        FillMode::Wireframe => vk::PolygonMode::LINE,
    }
}

pub fn cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub fn front_face(face: FrontFace) -> vk::FrontFace {
    match face {
        FrontFace::Ccw => vk::FrontFace::COUNTER_CLOCKWISE,
        FrontFace::Cw => vk::FrontFace::CLOCKWISE,
    }
}

pub fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

pub fn blend_op(operation: BlendOperation) -> vk::BlendOp {
    match operation {
        BlendOperation::Add => vk::BlendOp::ADD,
        BlendOperation::Subtract => vk::BlendOp::SUBTRACT,
        BlendOperation::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOperation::Min => vk::BlendOp::MIN,
        BlendOperation::Max => vk::BlendOp::MAX,
    }
}

pub fn blend_attachment(target: &RenderTargetBlend) -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState {
        blend_enable: target.enabled.into(),
        src_color_blend_factor: blend_factor(target.color.src_factor),
        dst_color_blend_factor: blend_factor(target.color.dst_factor),
        color_blend_op: blend_op(target.color.operation),
        src_alpha_blend_factor: blend_factor(target.alpha.src_factor),
        dst_alpha_blend_factor: blend_factor(target.alpha.dst_factor),
        alpha_blend_op: blend_op(target.alpha.operation),
        color_write_mask: vk::ColorComponentFlags::from_raw(u32::from(target.write_mask.bits())),
    }
}

pub fn stencil_op(operation: StencilOperation) -> vk::StencilOp {
    match operation {
        StencilOperation::Keep => vk::StencilOp::KEEP,
        StencilOperation::Zero => vk::StencilOp::ZERO,
        StencilOperation::Replace => vk::StencilOp::REPLACE,
        StencilOperation::IncrementClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOperation::DecrementClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOperation::Invert => vk::StencilOp::INVERT,
        StencilOperation::IncrementWrap => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOperation::DecrementWrap => vk::StencilOp::DECREMENT_AND_WRAP,
    }
}

pub fn stencil_face(face: &StencilFaceState, read_mask: u8, write_mask: u8) -> vk::StencilOpState {
    vk::StencilOpState {
        fail_op: stencil_op(face.fail_op),
        pass_op: stencil_op(face.pass_op),
        depth_fail_op: stencil_op(face.depth_fail_op),
        compare_op: compare_op(face.compare),
        compare_mask: u32::from(read_mask),
        write_mask: u32::from(write_mask),
        reference: 0,
    }
}

pub fn sample_count(count: u32) -> vk::SampleCountFlags {
    match count {
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

pub fn shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Hull => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::Domain => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

pub fn visibility(visibility: ShaderVisibility) -> vk::ShaderStageFlags {
    match visibility {
        ShaderVisibility::All => vk::ShaderStageFlags::ALL,
        ShaderVisibility::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderVisibility::Pixel => vk::ShaderStageFlags::FRAGMENT,
        ShaderVisibility::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

pub fn descriptor_type(
    range_type: DescriptorRangeType,
    dimension: ResourceDimension,
) -> vk::DescriptorType {
    match (range_type, dimension) {
        (DescriptorRangeType::ConstantBuffer, _) => vk::DescriptorType::UNIFORM_BUFFER,
        (DescriptorRangeType::Sampler, _) => vk::DescriptorType::SAMPLER,
        (_, ResourceDimension::AccelerationStructure) => {
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
        }
        (DescriptorRangeType::ShaderResource, ResourceDimension::Buffer)
        | (DescriptorRangeType::UnorderedAccess, ResourceDimension::Buffer) => {
            vk::DescriptorType::STORAGE_BUFFER
        }
        (DescriptorRangeType::ShaderResource, ResourceDimension::Texture2D) => {
            vk::DescriptorType::SAMPLED_IMAGE
        }
        (DescriptorRangeType::UnorderedAccess, ResourceDimension::Texture2D) => {
            vk::DescriptorType::STORAGE_IMAGE
        }
    }
}

pub fn index_type(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::Uint16 => vk::IndexType::UINT16,
        IndexFormat::Uint32 => vk::IndexType::UINT32,
    }
}

pub fn load_op(op: crate::backend::LoadOp) -> vk::AttachmentLoadOp {
    match op {
        crate::backend::LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        crate::backend::LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        crate::backend::LoadOp::Discard => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn store_op(op: crate::backend::StoreOp) -> vk::AttachmentStoreOp {
    match op {
        crate::backend::StoreOp::Store => vk::AttachmentStoreOp::STORE,
        crate::backend::StoreOp::Discard => vk::AttachmentStoreOp::DONT_CARE,
    }
}

/// Synchronization scope of a resource state
#[derive(Debug, Clone, Copy)]
pub struct StateScope {
    pub layout: vk::ImageLayout,
    pub stages: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

pub fn state_scope(state: ResourceState) -> StateScope {
    let shaders = vk::PipelineStageFlags2::VERTEX_SHADER
        | vk::PipelineStageFlags2::FRAGMENT_SHADER
        | vk::PipelineStageFlags2::COMPUTE_SHADER;
    let (layout, stages, access) = match state {
        ResourceState::Common => (
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        ),
        ResourceState::GenericRead => (
            vk::ImageLayout::READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ,
        ),
        ResourceState::VertexAndConstantBuffer => (
            vk::ImageLayout::UNDEFINED,
            vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT | shaders,
            vk::AccessFlags2::VERTEX_ATTRIBUTE_READ | vk::AccessFlags2::UNIFORM_READ,
        ),
        ResourceState::IndexBuffer => (
            vk::ImageLayout::UNDEFINED,
            vk::PipelineStageFlags2::INDEX_INPUT,
            vk::AccessFlags2::INDEX_READ,
        ),
        ResourceState::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        ResourceState::UnorderedAccess => (
            vk::ImageLayout::GENERAL,
            shaders,
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
        ),
        ResourceState::DepthWrite => (
            vk::ImageLayout::ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        ResourceState::DepthRead => (
            vk::ImageLayout::READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::SHADER_SAMPLED_READ,
        ),
        ResourceState::NonPixelShaderResource => (
            vk::ImageLayout::READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_READ,
        ),
        ResourceState::PixelShaderResource => (
            vk::ImageLayout::READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_READ,
        ),
        ResourceState::AllShaderResource => (
            vk::ImageLayout::READ_ONLY_OPTIMAL,
            shaders,
            vk::AccessFlags2::SHADER_READ,
        ),
        ResourceState::CopyDest => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags2::COPY,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
        ResourceState::CopySource => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::PipelineStageFlags2::COPY,
            vk::AccessFlags2::TRANSFER_READ,
        ),
        // Headless: nothing presents, the image only has to stay readable
        ResourceState::Present => (
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            vk::AccessFlags2::NONE,
        ),
    };
    StateScope {
        layout,
        stages,
        access,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_aspects() {
        assert_eq!(
            full_aspect(TextureFormat::Depth24PlusStencil8),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            sampled_aspect(TextureFormat::Depth24PlusStencil8),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            full_aspect(TextureFormat::Rgba16Float),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn test_range_descriptor_types() {
        assert_eq!(
            descriptor_type(DescriptorRangeType::ShaderResource, ResourceDimension::Buffer),
            vk::DescriptorType::STORAGE_BUFFER
        );
        assert_eq!(
            descriptor_type(
                DescriptorRangeType::ShaderResource,
                ResourceDimension::Texture2D
            ),
            vk::DescriptorType::SAMPLED_IMAGE
        );
        assert_eq!(
            descriptor_type(
                DescriptorRangeType::UnorderedAccess,
                ResourceDimension::Texture2D
            ),
            vk::DescriptorType::STORAGE_IMAGE
        );
    }

    #[test]
    fn test_shader_read_states_share_layout() {
        assert_eq!(
            state_scope(ResourceState::PixelShaderResource).layout,
            state_scope(ResourceState::NonPixelShaderResource).layout
        );
        assert_eq!(
            state_scope(ResourceState::DepthWrite).layout,
            vk::ImageLayout::ATTACHMENT_OPTIMAL
        );
    }
}
