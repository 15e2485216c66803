//! Pipeline configuration accumulation
//!
//! [`GraphicsPipelineBuilder`] collects state piece by piece and produces an
//! immutable [`GraphicsPipelineDesc`] once the configuration is complete. The
//! input layout and target formats are copied into the builder, so the caller's
//! arrays can go away as soon as the setter returns.

use super::CompileError;
use crate::backend::{
    BlendState, DepthStencilState, InputElement, NativeSignature, RasterizerState, SampleDesc,
    ShaderStage, TextureFormat, TopologyClass,
};
use crate::shader::ShaderBytecode;

pub const MAX_RENDER_TARGETS: usize = 8;

/// Complete, immutable graphics pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineDesc {
    /// Debug label. Not part of the pipeline's identity.
    pub name: String,
    pub signature: NativeSignature,
    pub vertex_shader: ShaderBytecode,
    pub pixel_shader: Option<ShaderBytecode>,
    pub geometry_shader: Option<ShaderBytecode>,
    pub hull_shader: Option<ShaderBytecode>,
    pub domain_shader: Option<ShaderBytecode>,
    pub blend: BlendState,
    pub rasterizer: RasterizerState,
    pub depth_stencil: DepthStencilState,
    pub sample_mask: u32,
    pub topology: TopologyClass,
    pub primitive_restart: bool,
    pub render_target_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub sample_desc: SampleDesc,
    pub input_layout: Vec<InputElement>,
}

/// Complete compute pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ComputePipelineDesc {
    pub name: String,
    pub signature: NativeSignature,
    pub compute_shader: ShaderBytecode,
}

impl ComputePipelineDesc {
    pub fn new(
        name: &str,
        signature: NativeSignature,
        compute_shader: ShaderBytecode,
    ) -> Result<Self, CompileError> {
        if compute_shader.stage != ShaderStage::Compute {
            return Err(CompileError::InvalidConfiguration {
                pipeline: name.to_string(),
                reason: format!("{:?} bytecode bound as a compute shader", compute_shader.stage),
            });
        }
        if compute_shader.is_empty() {
            return Err(CompileError::MissingBytecode {
                pipeline: name.to_string(),
                stage: ShaderStage::Compute,
            });
        }
        Ok(Self {
            name: name.to_string(),
            signature,
            compute_shader,
        })
    }
}

/// Accumulates a graphics pipeline configuration
#[derive(Debug, Clone)]
pub struct GraphicsPipelineBuilder {
    name: String,
    signature: Option<NativeSignature>,
    vertex_shader: Option<ShaderBytecode>,
    pixel_shader: Option<ShaderBytecode>,
    geometry_shader: Option<ShaderBytecode>,
    hull_shader: Option<ShaderBytecode>,
    domain_shader: Option<ShaderBytecode>,
    compute_shader_bound: bool,
    blend: BlendState,
    rasterizer: RasterizerState,
    depth_stencil: DepthStencilState,
    sample_mask: u32,
    topology: TopologyClass,
    primitive_restart: bool,
    render_target_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
    sample_desc: SampleDesc,
    input_layout: Vec<InputElement>,
}

impl GraphicsPipelineBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            signature: None,
            vertex_shader: None,
            pixel_shader: None,
            geometry_shader: None,
            hull_shader: None,
            domain_shader: None,
            compute_shader_bound: false,
            blend: BlendState::default(),
            rasterizer: RasterizerState::default(),
            depth_stencil: DepthStencilState::default(),
            sample_mask: u32::MAX,
            topology: TopologyClass::Undefined,
            primitive_restart: false,
            render_target_formats: Vec::new(),
            depth_format: None,
            sample_desc: SampleDesc::default(),
            input_layout: Vec::new(),
        }
    }

    pub fn with_signature(mut self, signature: NativeSignature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Bind bytecode to the stage it was compiled for
    pub fn with_shader(mut self, bytecode: ShaderBytecode) -> Self {
        match bytecode.stage {
            ShaderStage::Vertex => self.vertex_shader = Some(bytecode),
            ShaderStage::Pixel => self.pixel_shader = Some(bytecode),
            ShaderStage::Geometry => self.geometry_shader = Some(bytecode),
            ShaderStage::Hull => self.hull_shader = Some(bytecode),
            ShaderStage::Domain => self.domain_shader = Some(bytecode),
            ShaderStage::Compute => self.compute_shader_bound = true,
        }
        self
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: RasterizerState) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilState) -> Self {
        self.depth_stencil = depth_stencil;
        self
    }

    pub fn with_sample_mask(mut self, sample_mask: u32) -> Self {
        self.sample_mask = sample_mask;
        self
    }

    pub fn with_topology(mut self, topology: TopologyClass) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_primitive_restart(mut self, enabled: bool) -> Self {
        self.primitive_restart = enabled;
        self
    }

    pub fn with_render_targets(mut self, formats: &[TextureFormat]) -> Self {
        self.render_target_formats = formats.to_vec();
        self
    }

    pub fn with_depth_format(mut self, format: TextureFormat) -> Self {
        self.depth_format = Some(format);
        self
    }

    pub fn with_sample_desc(mut self, count: u32, quality: u32) -> Self {
        self.sample_desc = SampleDesc { count, quality };
        self
    }

    pub fn with_input_layout(mut self, elements: &[InputElement]) -> Self {
        self.input_layout = elements.to_vec();
        self
    }

    fn invalid(&self, reason: impl Into<String>) -> CompileError {
        CompileError::InvalidConfiguration {
            pipeline: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Validate the accumulated state and produce the final configuration
    pub fn build(&self) -> Result<GraphicsPipelineDesc, CompileError> {
        let signature = self
            .signature
            .ok_or_else(|| self.invalid("no binding signature"))?;

        let vertex_shader = self
            .vertex_shader
            .clone()
            .filter(|bytecode| !bytecode.is_empty())
            .ok_or_else(|| CompileError::MissingBytecode {
                pipeline: self.name.clone(),
                stage: ShaderStage::Vertex,
            })?;

        if self.compute_shader_bound {
            return Err(self.invalid("compute bytecode bound to a graphics pipeline"));
        }
        if self.hull_shader.is_some() != self.domain_shader.is_some() {
            return Err(self.invalid("hull and domain shaders must be bound together"));
        }
        if self.topology == TopologyClass::Undefined {
            return Err(self.invalid("primitive topology class is undefined"));
        }
        if self.render_target_formats.is_empty() && self.depth_format.is_none() {
            return Err(self.invalid("no render targets and no depth target"));
        }
        if self.render_target_formats.len() > MAX_RENDER_TARGETS {
            return Err(self.invalid(format!(
                "{} render targets, at most {} are supported",
                self.render_target_formats.len(),
                MAX_RENDER_TARGETS
            )));
        }
        if let Some(format) = self.render_target_formats.iter().find(|f| f.is_depth()) {
            return Err(self.invalid(format!("{:?} is not a color format", format)));
        }
        if let Some(format) = self.depth_format.filter(|f| !f.is_depth()) {
            return Err(self.invalid(format!("{:?} is not a depth format", format)));
        }
        if self.sample_desc.count == 0 {
            return Err(self.invalid("sample count must be at least 1"));
        }

        Ok(GraphicsPipelineDesc {
            name: self.name.clone(),
            signature,
            vertex_shader,
            pixel_shader: self.pixel_shader.clone(),
            geometry_shader: self.geometry_shader.clone(),
            hull_shader: self.hull_shader.clone(),
            domain_shader: self.domain_shader.clone(),
            blend: self.blend,
            rasterizer: self.rasterizer,
            depth_stencil: self.depth_stencil,
            sample_mask: self.sample_mask,
            topology: self.topology,
            primitive_restart: self.primitive_restart,
            render_target_formats: self.render_target_formats.clone(),
            depth_format: self.depth_format,
            sample_desc: self.sample_desc,
            input_layout: self.input_layout.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VertexFormat;

    fn vs() -> ShaderBytecode {
        ShaderBytecode::new(ShaderStage::Vertex, "vs_main", vec![1, 2, 3, 4])
    }

    fn complete() -> GraphicsPipelineBuilder {
        GraphicsPipelineBuilder::new("test")
            .with_signature(NativeSignature(1))
            .with_shader(vs())
            .with_topology(TopologyClass::Triangle)
            .with_render_targets(&[TextureFormat::Rgba16Float])
            .with_depth_format(TextureFormat::Depth32Float)
    }

    #[test]
    fn test_complete_configuration_builds() {
        let desc = complete().build().unwrap();
        assert_eq!(desc.sample_mask, u32::MAX);
        assert_eq!(desc.render_target_formats, vec![TextureFormat::Rgba16Float]);
    }

    #[test]
    fn test_input_layout_is_copied() {
        let mut layout = vec![InputElement::per_vertex("POSITION", VertexFormat::Float32x3)];
        let builder = complete().with_input_layout(&layout);
        layout.push(InputElement::per_vertex("NORMAL", VertexFormat::Float32x3));
        layout[0].semantic_name = "CHANGED".to_string();

        let desc = builder.build().unwrap();
        assert_eq!(desc.input_layout.len(), 1);
        assert_eq!(desc.input_layout[0].semantic_name, "POSITION");
    }

    #[test]
    fn test_undefined_topology_is_rejected() {
        let err = complete()
            .with_topology(TopologyClass::Undefined)
            .build()
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_missing_vertex_shader_is_rejected() {
        let err = GraphicsPipelineBuilder::new("no_vs")
            .with_signature(NativeSignature(1))
            .with_topology(TopologyClass::Triangle)
            .with_depth_format(TextureFormat::Depth32Float)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::MissingBytecode {
                pipeline: "no_vs".to_string(),
                stage: ShaderStage::Vertex,
            }
        );
    }

    #[test]
    fn test_depth_only_pipeline_is_valid() {
        let desc = complete().with_render_targets(&[]).build().unwrap();
        assert!(desc.render_target_formats.is_empty());
        assert_eq!(desc.depth_format, Some(TextureFormat::Depth32Float));
    }

    #[test]
    fn test_depth_format_as_color_target_is_rejected() {
        assert!(complete()
            .with_render_targets(&[TextureFormat::Depth32Float])
            .build()
            .is_err());
    }

    #[test]
    fn test_compute_descriptor_requires_compute_stage() {
        assert!(ComputePipelineDesc::new("cs", NativeSignature(1), vs()).is_err());
        let cs = ShaderBytecode::new(ShaderStage::Compute, "cs_main", vec![0; 4]);
        assert!(ComputePipelineDesc::new("cs", NativeSignature(1), cs).is_ok());
    }
}
