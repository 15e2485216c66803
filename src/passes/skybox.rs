//! Skybox pass
//!
//! Draws the environment cubemap into the HDR target wherever the forward
//! pass left the depth buffer at the far plane. Scenes without a sky image
//! record nothing.

use super::{resolve_pipeline, PassContext, PassStats, RenderPass};
use crate::backend::{
    BindPoint, ColorAttachment, CompareFunction, CullMode, DepthAttachment, DepthStencilState,
    GraphicsBackend, LoadOp, NativeSignature, PrimitiveTopology, RasterizerState, RenderingDesc,
    SamplerDescriptor, ShaderStage, ShaderVisibility, StoreOp, TextureFormat, TopologyClass,
};
use crate::pipeline::{
    BindingSignatureDesc, DescriptorRange, GraphicsPipelineBuilder, GraphicsPipelineDesc,
    PipelineCache, PipelineId,
};
use crate::shader::{ShaderCompileParameters, ShaderStorage, SKYBOX_SHADER};
use crate::{RendererConfig, RendererResult};

pub mod skybox_parameters {
    pub const CAMERA: u32 = 0;
    pub const ENVIRONMENT: u32 = 1;
    pub const INTENSITY: u32 = 2;
}

use skybox_parameters::*;

pub struct SkyboxPass {
    signature: NativeSignature,
    pipeline: PipelineId,
    hdr_format: TextureFormat,
    depth_format: TextureFormat,
}

impl SkyboxPass {
    pub fn signature_desc() -> BindingSignatureDesc {
        BindingSignatureDesc::new("skybox")
            .with_constant_buffer(0, ShaderVisibility::Pixel)
            .with_table(&[DescriptorRange::texture(0, 1)], ShaderVisibility::Pixel)
            .with_push_constants(1, 1, ShaderVisibility::Pixel)
            .with_static_sampler(0, SamplerDescriptor::linear_clamp(), ShaderVisibility::Pixel)
    }

    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        cache: &mut PipelineCache,
        shaders: &mut ShaderStorage,
        config: &RendererConfig,
    ) -> RendererResult<Self> {
        let signature = backend
            .create_binding_signature(&Self::signature_desc())
            .inspect_err(|err| log::error!("Can't create skybox binding signature: {}", err))?;
        let hdr_format = config.hdr_format;
        let depth_format = config.depth_format;
        let desc = Self::describe(shaders, signature, hdr_format, depth_format)?;
        let pipeline = cache.get_or_create(backend, &desc)?;
        Ok(Self {
            signature,
            pipeline,
            hdr_format,
            depth_format,
        })
    }

    /// Fullscreen triangle at the far plane, tested against but not writing
    /// depth
    pub fn describe(
        shaders: &mut ShaderStorage,
        signature: NativeSignature,
        hdr_format: TextureFormat,
        depth_format: TextureFormat,
    ) -> RendererResult<GraphicsPipelineDesc> {
        let vertex = shaders.compile(&ShaderCompileParameters::new(
            SKYBOX_SHADER,
            ShaderStage::Vertex,
            "vs_main",
        ))?;
        let pixel = shaders.compile(&ShaderCompileParameters::new(
            SKYBOX_SHADER,
            ShaderStage::Pixel,
            "ps_main",
        ))?;
        Ok(GraphicsPipelineBuilder::new("skybox")
            .with_signature(signature)
            .with_shader(vertex)
            .with_shader(pixel)
            .with_rasterizer(RasterizerState::default().with_cull_mode(CullMode::None))
            .with_depth_stencil(DepthStencilState {
                depth_write: false,
                depth_compare: CompareFunction::LessEqual,
                ..Default::default()
            })
            .with_topology(TopologyClass::Triangle)
            .with_render_targets(&[hdr_format])
            .with_depth_format(depth_format)
            .build()?)
    }

    pub fn reload_shaders<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        cache: &mut PipelineCache,
        shaders: &mut ShaderStorage,
    ) -> RendererResult<()> {
        let desc = Self::describe(shaders, self.signature, self.hdr_format, self.depth_format)?;
        self.pipeline = cache.get_or_create(backend, &desc)?;
        Ok(())
    }

    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }
}

impl<B: GraphicsBackend> RenderPass<B> for SkyboxPass {
    fn name(&self) -> &'static str {
        "skybox"
    }

    fn record(&mut self, ctx: &mut PassContext<'_, B>) -> RendererResult<PassStats> {
        let buffers = ctx.buffers;
        let Some(environment) = &buffers.environment else {
            return Ok(PassStats::default());
        };
        let (pipeline, signature) = resolve_pipeline(ctx.cache, self.pipeline, "skybox")?;
        let cmd = ctx.cmd;
        let targets = ctx.targets;
        let pool = ctx.pool;

        ctx.backend.begin_rendering(
            cmd,
            &RenderingDesc {
                label: "skybox".to_string(),
                width: targets.width,
                height: targets.height,
                color_attachments: vec![ColorAttachment {
                    texture: pool.native_texture(targets.hdr)?,
                    load_op: LoadOp::Load,
                    store_op: StoreOp::Store,
                    clear_color: [0.0; 4],
                }],
                depth_attachment: Some(DepthAttachment {
                    texture: pool.native_texture(targets.depth)?,
                    load_op: LoadOp::Load,
                    store_op: StoreOp::Discard,
                    clear_depth: 1.0,
                }),
            },
        );
        ctx.backend.set_viewport(cmd, &ctx.parameters.viewport);
        ctx.backend.set_scissor(cmd, &ctx.parameters.scissor);
        ctx.backend
            .set_binding_signature(cmd, BindPoint::Graphics, signature);
        ctx.backend.set_pipeline(cmd, pipeline);
        ctx.backend
            .set_constant_buffer(cmd, CAMERA, pool.native_buffer(targets.camera)?, 0);
        ctx.backend
            .set_descriptor_table(cmd, ENVIRONMENT, environment.cubemap_srv);
        ctx.backend.set_push_constants(
            cmd,
            INTENSITY,
            &[ctx.scene.environment_light.sky_intensity.to_bits()],
        );
        ctx.backend
            .set_primitive_topology(cmd, PrimitiveTopology::TriangleList);
        ctx.backend.draw(cmd, 0..3, 0..1);
        ctx.backend.end_rendering(cmd);

        Ok(PassStats {
            draws: 1,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    #[test]
    fn test_signature_layout() {
        let desc = SkyboxPass::signature_desc();
        assert_eq!(desc.bind_group_of(CAMERA), Some(0));
        assert_eq!(desc.bind_group_of(ENVIRONMENT), Some(1));
        assert_eq!(desc.bind_group_of(INTENSITY), None);
        assert_eq!(desc.static_sampler_group(), Some(2));
    }

    #[test]
    fn test_pipeline_keeps_geometry_depth() {
        let mut backend = DummyBackend::new();
        let mut shaders = ShaderStorage::embedded();
        let config = RendererConfig::default();
        let signature = backend
            .create_binding_signature(&SkyboxPass::signature_desc())
            .unwrap();

        let desc = SkyboxPass::describe(
            &mut shaders,
            signature,
            config.hdr_format,
            config.depth_format,
        )
        .unwrap();

        assert!(!desc.depth_stencil.depth_write);
        assert_eq!(desc.depth_stencil.depth_compare, CompareFunction::LessEqual);
        assert!(desc.input_layout.is_empty());
        assert_eq!(desc.render_target_formats, vec![config.hdr_format]);
    }

    #[test]
    fn test_reload_with_unchanged_source_hits_cache() {
        let mut backend = DummyBackend::new();
        let mut cache = PipelineCache::new();
        let mut shaders = ShaderStorage::embedded();

        let mut pass = SkyboxPass::new(
            &mut backend,
            &mut cache,
            &mut shaders,
            &RendererConfig::default(),
        )
        .unwrap();
        let before = pass.pipeline();
        pass.reload_shaders(&mut backend, &mut cache, &mut shaders)
            .unwrap();

        assert_eq!(pass.pipeline(), before);
        assert_eq!(cache.stats().hits, 1);
    }
}
