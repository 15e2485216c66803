//! Depth-only shadow map pass, rendered from the directional light

use super::{PassContext, PassStats, RenderPass};
use crate::backend::{
    BindPoint, DepthAttachment, DepthStencilState, GraphicsBackend, IndexFormat, LoadOp,
    NativeSignature, RasterizerState, RenderingDesc, ScissorRect, ShaderStage, ShaderVisibility,
    StoreOp, TextureFormat, Viewport,
};
use crate::pipeline::{
    BindingSignatureDesc, CompileError, DescriptorRange, GraphicsPipelineBuilder,
    GraphicsPipelineDesc, PipelineCache,
};
use crate::scene::{Model, PipelineSlot, Primitive, RenderScene, Vertex};
use crate::shader::{ShaderBytecode, ShaderCompileParameters, ShaderStorage, SHADOW_SHADER};
use crate::{RendererConfig, RendererResult};

pub mod shadow_parameters {
    pub const SHADOW_CAMERA: u32 = 0;
    pub const INSTANCE_ID: u32 = 1;
    pub const INSTANCES: u32 = 2;
}

use shadow_parameters::*;

const DEPTH_BIAS: i32 = 100;
const SLOPE_SCALED_DEPTH_BIAS: f32 = 1.5;

pub struct ShadowMapPass {
    signature: NativeSignature,
    vertex_shader: ShaderBytecode,
    depth_format: TextureFormat,
    size: u32,
}

impl ShadowMapPass {
    pub fn signature_desc() -> BindingSignatureDesc {
        BindingSignatureDesc::new("shadow")
            .with_constant_buffer(0, ShaderVisibility::Vertex)
            .with_push_constants(1, 1, ShaderVisibility::Vertex)
            .with_table(&[DescriptorRange::shader_resource(0, 1)], ShaderVisibility::Vertex)
    }

    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        shaders: &mut ShaderStorage,
        config: &RendererConfig,
    ) -> RendererResult<Self> {
        let signature = backend
            .create_binding_signature(&Self::signature_desc())
            .inspect_err(|err| log::error!("Can't create shadow binding signature: {}", err))?;

        Ok(Self {
            signature,
            vertex_shader: Self::compile_shader(shaders)?,
            depth_format: config.depth_format,
            size: config.shadow_map_size,
        })
    }

    fn compile_shader(shaders: &mut ShaderStorage) -> RendererResult<ShaderBytecode> {
        Ok(shaders.compile(&ShaderCompileParameters::new(
            SHADOW_SHADER,
            ShaderStage::Vertex,
            "vs_main",
        ))?)
    }

    pub fn reload_shaders(&mut self, shaders: &mut ShaderStorage) -> RendererResult<()> {
        self.vertex_shader = Self::compile_shader(shaders)?;
        Ok(())
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Depth-only configuration with the material's culling and a depth bias
    pub fn describe(
        &self,
        model: &Model,
        primitive: &Primitive,
    ) -> Result<GraphicsPipelineDesc, CompileError> {
        let material = model.material_for(primitive)?;
        let rasterizer = RasterizerState {
            depth_bias: DEPTH_BIAS,
            slope_scaled_depth_bias: SLOPE_SCALED_DEPTH_BIAS,
            ..material.rasterizer
        };

        GraphicsPipelineBuilder::new(&format!("shadow/{}", material.name))
            .with_signature(self.signature)
            .with_shader(self.vertex_shader.clone())
            .with_rasterizer(rasterizer)
            .with_depth_stencil(DepthStencilState::default())
            .with_topology(primitive.topology.class())
            .with_input_layout(&Vertex::position_input_layout())
            .with_depth_format(self.depth_format)
            .build()
    }

    /// Assign shadow pipelines.
    ///
    /// The forward pass already reports primitives with a bad material, so
    /// those are only logged at debug level here.
    pub fn compile_primitive_pipelines<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        cache: &mut PipelineCache,
        scene: &mut RenderScene,
    ) {
        let requests: Vec<_> = scene
            .primitives()
            .map(|item| self.describe(item.model, item.primitive))
            .collect();

        for (primitive, request) in scene.primitives_mut().zip(requests) {
            primitive.shadow_pipeline = match request {
                Ok(desc) => match cache.get_or_create(backend, &desc) {
                    Ok(id) => PipelineSlot::Ready(id),
                    Err(err) => {
                        log::warn!("Primitive '{}' will not cast shadows: {}", primitive.name, err);
                        PipelineSlot::Rejected(err)
                    }
                },
                Err(err) => {
                    log::debug!("No shadow pipeline for '{}': {}", primitive.name, err);
                    PipelineSlot::Rejected(err)
                }
            };
        }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for ShadowMapPass {
    fn name(&self) -> &'static str {
        "shadow"
    }

    fn record(&mut self, ctx: &mut PassContext<'_, B>) -> RendererResult<PassStats> {
        let cmd = ctx.cmd;
        let targets = ctx.targets;
        let pool = ctx.pool;

        ctx.backend.begin_rendering(
            cmd,
            &RenderingDesc {
                label: "shadow".to_string(),
                width: self.size,
                height: self.size,
                color_attachments: Vec::new(),
                depth_attachment: Some(DepthAttachment {
                    texture: pool.native_texture(targets.shadow_map)?,
                    load_op: LoadOp::Clear,
                    store_op: StoreOp::Store,
                    clear_depth: 1.0,
                }),
            },
        );

        let mut stats = PassStats::default();
        if !ctx.parameters.shadows {
            ctx.backend.end_rendering(cmd);
            return Ok(stats);
        }

        ctx.backend
            .set_viewport(cmd, &Viewport::full(self.size, self.size));
        ctx.backend
            .set_scissor(cmd, &ScissorRect::full(self.size, self.size));
        if let Some(vertices) = ctx.buffers.vertices {
            ctx.backend
                .set_vertex_buffer(cmd, 0, pool.native_buffer(vertices)?, 0, Vertex::STRIDE);
        }
        if let Some(indices) = ctx.buffers.indices {
            ctx.backend
                .set_index_buffer(cmd, pool.native_buffer(indices)?, 0, IndexFormat::Uint32);
        }

        ctx.backend
            .set_binding_signature(cmd, BindPoint::Graphics, self.signature);
        ctx.backend
            .set_constant_buffer(cmd, SHADOW_CAMERA, pool.native_buffer(targets.shadow_camera)?, 0);
        ctx.backend
            .set_descriptor_table(cmd, INSTANCES, ctx.buffers.instance_srv);

        let mut bound_pipeline = None;
        for item in ctx.scene.primitives() {
            if !item.model.render_parameters.cast_shadows {
                continue;
            }
            let primitive = item.primitive;
            let Some((pipeline, _)) = primitive
                .shadow_pipeline
                .id()
                .and_then(|id| ctx.cache.resolve(id))
            else {
                stats.skipped += 1;
                continue;
            };

            if bound_pipeline != Some(pipeline) {
                ctx.backend.set_pipeline(cmd, pipeline);
                bound_pipeline = Some(pipeline);
            }
            ctx.backend.set_primitive_topology(cmd, primitive.topology);
            ctx.backend
                .set_push_constants(cmd, INSTANCE_ID, &[item.instance_id]);
            match primitive.index_range() {
                Some(indices) => ctx.backend.draw_indexed(
                    cmd,
                    indices,
                    primitive.vertices_before() as i32,
                    0..1,
                ),
                None => ctx.backend.draw(cmd, primitive.vertex_range(), 0..1),
            }
            stats.draws += 1;
        }

        ctx.backend.end_rendering(cmd);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::scene::{Material, Mesh};

    #[test]
    fn test_shadow_pipeline_is_depth_only() {
        let mut backend = DummyBackend::new();
        let mut shaders = ShaderStorage::embedded();
        let pass = ShadowMapPass::new(&mut backend, &mut shaders, &RendererConfig::default()).unwrap();

        let model = Model::new("m").with_material(Material::new("stone"));
        let desc = pass.describe(&model, &Primitive::cube("c", Some(0))).unwrap();

        assert!(desc.pixel_shader.is_none());
        assert!(desc.render_target_formats.is_empty());
        assert_eq!(desc.depth_format, Some(TextureFormat::Depth32Float));
        assert_eq!(desc.input_layout.len(), 1);
        assert_eq!(desc.rasterizer.depth_bias, DEPTH_BIAS);
    }

    #[test]
    fn test_bad_material_is_rejected_quietly() {
        let mut backend = DummyBackend::new();
        let mut shaders = ShaderStorage::embedded();
        let mut cache = PipelineCache::new();
        let mut pass =
            ShadowMapPass::new(&mut backend, &mut shaders, &RendererConfig::default()).unwrap();
        let mut scene = RenderScene::new().with_model(
            Model::new("m")
                .with_material(Material::new("stone"))
                .with_mesh(
                    Mesh::new("mesh")
                        .with_primitive(Primitive::cube("good", Some(0)))
                        .with_primitive(Primitive::cube("bad", Some(7))),
                ),
        );

        pass.compile_primitive_pipelines(&mut backend, &mut cache, &mut scene);

        let slots: Vec<_> = scene
            .primitives()
            .map(|item| item.primitive.shadow_pipeline.is_ready())
            .collect();
        assert_eq!(slots, vec![true, false]);
    }
}
