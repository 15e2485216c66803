//! Content fingerprints of pipeline configurations
//!
//! A configuration is first copied into a canonical key: plain values only,
//! floats reduced to normalized bit patterns, input elements copied out with
//! their offsets resolved, shader bytecode referenced by content. The key is
//! then fed to xxh3 through `Hash`, which visits fields one by one, so struct
//! padding never takes part in the result.

use super::builder::{ComputePipelineDesc, GraphicsPipelineDesc};
use crate::backend::{
    resolve_input_offsets, BlendState, CullMode, DepthStencilState, FillMode, FrontFace,
    InputStepRate, RasterizerState, SampleDesc, ShaderStage, TextureFormat, TopologyClass,
    VertexFormat,
};
use crate::shader::ShaderBytecode;
use std::hash::{Hash, Hasher};

/// Deterministic hash of a complete pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineFingerprint(pub u64);

impl std::fmt::Display for PipelineFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Bit pattern of a float with `-0.0` folded into `0.0` and every NaN into one
fn canonical_f32(value: f32) -> u32 {
    if value == 0.0 {
        0
    } else if value.is_nan() {
        f32::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

#[derive(Hash)]
struct RasterizerKey {
    fill_mode: FillMode,
    cull_mode: CullMode,
    front_face: FrontFace,
    depth_bias: i32,
    depth_bias_clamp_bits: u32,
    slope_scaled_depth_bias_bits: u32,
    depth_clip: bool,
    conservative: bool,
}

impl From<&RasterizerState> for RasterizerKey {
    fn from(r: &RasterizerState) -> Self {
        Self {
            fill_mode: r.fill_mode,
            cull_mode: r.cull_mode,
            front_face: r.front_face,
            depth_bias: r.depth_bias,
            depth_bias_clamp_bits: canonical_f32(r.depth_bias_clamp),
            slope_scaled_depth_bias_bits: canonical_f32(r.slope_scaled_depth_bias),
            depth_clip: r.depth_clip,
            conservative: r.conservative,
        }
    }
}

#[derive(Hash)]
struct InputElementKey {
    semantic_name: String,
    semantic_index: u32,
    format: VertexFormat,
    slot: u32,
    offset: u32,
    step: InputStepRate,
}

#[derive(Hash)]
struct ShaderKey<'a> {
    stage: ShaderStage,
    entry_point: &'a str,
    bytes: &'a [u8],
}

impl<'a> From<&'a ShaderBytecode> for ShaderKey<'a> {
    fn from(bytecode: &'a ShaderBytecode) -> Self {
        Self {
            stage: bytecode.stage,
            entry_point: &bytecode.entry_point,
            bytes: bytecode.bytes(),
        }
    }
}

#[derive(Hash)]
struct GraphicsPipelineKey<'a> {
    signature: u64,
    vertex_shader: ShaderKey<'a>,
    pixel_shader: Option<ShaderKey<'a>>,
    geometry_shader: Option<ShaderKey<'a>>,
    hull_shader: Option<ShaderKey<'a>>,
    domain_shader: Option<ShaderKey<'a>>,
    blend: BlendState,
    rasterizer: RasterizerKey,
    depth_stencil: DepthStencilState,
    sample_mask: u32,
    topology: TopologyClass,
    primitive_restart: bool,
    render_target_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
    sample_desc: SampleDesc,
    input_element_count: u32,
    input_layout: Vec<InputElementKey>,
}

impl<'a> From<&'a GraphicsPipelineDesc> for GraphicsPipelineKey<'a> {
    fn from(desc: &'a GraphicsPipelineDesc) -> Self {
        let offsets = resolve_input_offsets(&desc.input_layout);
        let input_layout = desc
            .input_layout
            .iter()
            .zip(offsets)
            .map(|(element, offset)| InputElementKey {
                semantic_name: element.semantic_name.clone(),
                semantic_index: element.semantic_index,
                format: element.format,
                slot: element.slot,
                offset,
                step: element.step,
            })
            .collect();

        Self {
            signature: desc.signature.0,
            vertex_shader: (&desc.vertex_shader).into(),
            pixel_shader: desc.pixel_shader.as_ref().map(Into::into),
            geometry_shader: desc.geometry_shader.as_ref().map(Into::into),
            hull_shader: desc.hull_shader.as_ref().map(Into::into),
            domain_shader: desc.domain_shader.as_ref().map(Into::into),
            blend: desc.blend,
            rasterizer: (&desc.rasterizer).into(),
            depth_stencil: desc.depth_stencil,
            sample_mask: desc.sample_mask,
            topology: desc.topology,
            primitive_restart: desc.primitive_restart,
            render_target_formats: desc.render_target_formats.clone(),
            depth_format: desc.depth_format,
            sample_desc: desc.sample_desc,
            input_element_count: desc.input_layout.len() as u32,
            input_layout,
        }
    }
}

#[derive(Hash)]
struct ComputePipelineKey<'a> {
    signature: u64,
    compute_shader: ShaderKey<'a>,
}

#[derive(Hash)]
enum PipelineKey<'a> {
    Graphics(GraphicsPipelineKey<'a>),
    Compute(ComputePipelineKey<'a>),
}

impl PipelineKey<'_> {
    fn fingerprint(&self) -> PipelineFingerprint {
        let mut hasher = xxhash_rust::xxh3::Xxh3::new();
        self.hash(&mut hasher);
        PipelineFingerprint(hasher.finish())
    }
}

impl GraphicsPipelineDesc {
    /// Fingerprint of every field except the debug name
    pub fn fingerprint(&self) -> PipelineFingerprint {
        PipelineKey::Graphics(self.into()).fingerprint()
    }
}

impl ComputePipelineDesc {
    pub fn fingerprint(&self) -> PipelineFingerprint {
        PipelineKey::Compute(ComputePipelineKey {
            signature: self.signature.0,
            compute_shader: (&self.compute_shader).into(),
        })
        .fingerprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InputElement, NativeSignature};
    use crate::pipeline::GraphicsPipelineBuilder;

    fn shader(stage: ShaderStage, bytes: &[u8]) -> ShaderBytecode {
        ShaderBytecode::new(stage, "main", bytes.to_vec())
    }

    fn layout() -> Vec<InputElement> {
        vec![
            InputElement::per_vertex("POSITION", VertexFormat::Float32x3),
            InputElement::per_vertex("NORMAL", VertexFormat::Float32x3),
        ]
    }

    fn builder() -> GraphicsPipelineBuilder {
        GraphicsPipelineBuilder::new("a")
            .with_signature(NativeSignature(7))
            .with_shader(shader(ShaderStage::Vertex, &[1, 2, 3, 4]))
            .with_shader(shader(ShaderStage::Pixel, &[5, 6, 7, 8]))
            .with_topology(TopologyClass::Triangle)
            .with_render_targets(&[TextureFormat::Rgba16Float])
            .with_depth_format(TextureFormat::Depth32Float)
            .with_input_layout(&layout())
    }

    #[test]
    fn test_call_order_does_not_matter() {
        let a = builder().build().unwrap();
        let b = GraphicsPipelineBuilder::new("b")
            .with_input_layout(&layout())
            .with_depth_format(TextureFormat::Depth32Float)
            .with_render_targets(&[TextureFormat::Rgba16Float])
            .with_topology(TopologyClass::Triangle)
            .with_shader(shader(ShaderStage::Pixel, &[5, 6, 7, 8]))
            .with_shader(shader(ShaderStage::Vertex, &[1, 2, 3, 4]))
            .with_signature(NativeSignature(7))
            .build()
            .unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_layout_contents_matter_not_its_address() {
        let boxed: Box<[InputElement]> = layout().into_boxed_slice();
        let a = builder().with_input_layout(&boxed).build().unwrap();
        drop(boxed);
        let b = builder().with_input_layout(&layout()).build().unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut renamed = layout();
        renamed[1].semantic_name = "TANGENT".to_string();
        let c = builder().with_input_layout(&renamed).build().unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());

        let shorter = &layout()[..1];
        let d = builder().with_input_layout(shorter).build().unwrap();
        assert_ne!(a.fingerprint(), d.fingerprint());
    }

    #[test]
    fn test_explicit_and_appended_offsets_are_equivalent() {
        let explicit = vec![
            InputElement::per_vertex("POSITION", VertexFormat::Float32x3).with_offset(0),
            InputElement::per_vertex("NORMAL", VertexFormat::Float32x3).with_offset(12),
        ];
        let a = builder().build().unwrap();
        let b = builder().with_input_layout(&explicit).build().unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_negative_zero_bias_is_canonical() {
        let positive = RasterizerState {
            slope_scaled_depth_bias: 0.0,
            ..Default::default()
        };
        let negative = RasterizerState {
            slope_scaled_depth_bias: -0.0,
            ..Default::default()
        };
        let a = builder().with_rasterizer(positive).build().unwrap();
        let b = builder().with_rasterizer(negative).build().unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_shader_contents_matter() {
        let a = builder().build().unwrap();
        let b = builder()
            .with_shader(shader(ShaderStage::Pixel, &[5, 6, 7, 9]))
            .build()
            .unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_graphics_and_compute_keys_do_not_collide_trivially() {
        let cs = ComputePipelineDesc::new(
            "cs",
            NativeSignature(7),
            shader(ShaderStage::Compute, &[1, 2, 3, 4]),
        )
        .unwrap();
        assert_ne!(cs.fingerprint(), builder().build().unwrap().fingerprint());
    }
}
