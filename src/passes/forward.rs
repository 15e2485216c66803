//! Forward opaque pass
//!
//! Every primitive gets its own pipeline configuration built from its
//! material's fixed-function state, so materials that only differ in shader
//! parameters end up on the same cache entry. Per-primitive data is looked up
//! in the instance buffer through a pushed instance id.

use super::{PassContext, PassStats, RenderPass};
use crate::backend::{
    BindPoint, ColorAttachment, DepthAttachment, DepthStencilState, GraphicsBackend, IndexFormat,
    LoadOp, NativeSignature, RenderingDesc, SamplerDescriptor, ShaderStage, ShaderVisibility,
    StoreOp, TextureFormat,
};
use crate::pipeline::{
    BindingSignatureDesc, CompileError, DescriptorRange, GraphicsPipelineBuilder,
    GraphicsPipelineDesc, PipelineCache,
};
use crate::scene::{Model, PipelineSlot, Primitive, RenderScene, Vertex};
use crate::shader::{ShaderBytecode, ShaderCompileParameters, ShaderStorage, FORWARD_SHADER};
use crate::{RendererConfig, RendererResult};
use std::collections::HashSet;

/// Binding signature parameters of the forward pass
pub mod forward_parameters {
    pub const CAMERA: u32 = 0;
    pub const SCENE: u32 = 1;
    pub const INSTANCE_ID: u32 = 2;
    pub const INSTANCES: u32 = 3;
    pub const MATERIALS: u32 = 4;
    pub const SHADOW_MAP: u32 = 5;
}

use forward_parameters::*;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Outcome of assigning pipelines to every primitive of a scene
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub ready: u32,
    pub rejected: u32,
}

pub struct ForwardPass {
    signature: NativeSignature,
    vertex_shader: ShaderBytecode,
    pixel_shader: ShaderBytecode,
    hdr_format: TextureFormat,
    depth_format: TextureFormat,
    /// Primitives already reported as drawn without an assigned pipeline
    reported_unassigned: HashSet<u32>,
}

impl ForwardPass {
    pub fn signature_desc() -> BindingSignatureDesc {
        BindingSignatureDesc::new("forward")
            .with_constant_buffer(0, ShaderVisibility::All)
            .with_constant_buffer(1, ShaderVisibility::All)
            .with_push_constants(2, 1, ShaderVisibility::All)
            .with_table(&[DescriptorRange::shader_resource(0, 1)], ShaderVisibility::All)
            .with_table(&[DescriptorRange::shader_resource(1, 1)], ShaderVisibility::Pixel)
            .with_table(&[DescriptorRange::texture(2, 1)], ShaderVisibility::Pixel)
            .with_static_sampler(0, SamplerDescriptor::default(), ShaderVisibility::Pixel)
            .with_static_sampler(1, SamplerDescriptor::shadow_comparison(), ShaderVisibility::Pixel)
    }

    /// Create the binding signature and compile the pass shaders.
    ///
    /// A signature that can't be created is fatal to the renderer.
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        shaders: &mut ShaderStorage,
        config: &RendererConfig,
    ) -> RendererResult<Self> {
        let signature = backend
            .create_binding_signature(&Self::signature_desc())
            .inspect_err(|err| log::error!("Can't create forward binding signature: {}", err))?;
        let (vertex_shader, pixel_shader) = Self::compile_shaders(shaders)?;

        Ok(Self {
            signature,
            vertex_shader,
            pixel_shader,
            hdr_format: config.hdr_format,
            depth_format: config.depth_format,
            reported_unassigned: HashSet::new(),
        })
    }

    fn compile_shaders(
        shaders: &mut ShaderStorage,
    ) -> RendererResult<(ShaderBytecode, ShaderBytecode)> {
        let vertex = shaders.compile(&ShaderCompileParameters::new(
            FORWARD_SHADER,
            ShaderStage::Vertex,
            "vs_main",
        ))?;
        let pixel = shaders.compile(&ShaderCompileParameters::new(
            FORWARD_SHADER,
            ShaderStage::Pixel,
            "ps_main",
        ))?;
        Ok((vertex, pixel))
    }

    /// Pick up bytecode recompiled by the shader storage
    pub fn reload_shaders(&mut self, shaders: &mut ShaderStorage) -> RendererResult<()> {
        let (vertex_shader, pixel_shader) = Self::compile_shaders(shaders)?;
        self.vertex_shader = vertex_shader;
        self.pixel_shader = pixel_shader;
        Ok(())
    }

    pub fn signature(&self) -> NativeSignature {
        self.signature
    }

    /// Pipeline configuration a primitive of `model` draws with
    pub fn describe(
        &self,
        model: &Model,
        primitive: &Primitive,
    ) -> Result<GraphicsPipelineDesc, CompileError> {
        let material = model.material_for(primitive)?;
        GraphicsPipelineBuilder::new(&format!("forward/{}", material.name))
            .with_signature(self.signature)
            .with_shader(self.vertex_shader.clone())
            .with_shader(self.pixel_shader.clone())
            .with_blend(material.blend)
            .with_rasterizer(material.rasterizer)
            .with_depth_stencil(DepthStencilState::default())
            .with_topology(primitive.topology.class())
            .with_input_layout(&Vertex::default_input_layout())
            .with_render_targets(&[self.hdr_format])
            .with_depth_format(self.depth_format)
            .build()
    }

    /// Resolve a pipeline for every primitive of the scene.
    ///
    /// A primitive that can't get one is flagged as rejected and reported with
    /// a single warning; it is left out of every later frame without further
    /// log output.
    pub fn compile_primitive_pipelines<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        cache: &mut PipelineCache,
        scene: &mut RenderScene,
    ) -> PipelineReport {
        let requests: Vec<_> = scene
            .primitives()
            .map(|item| self.describe(item.model, item.primitive))
            .collect();

        let mut report = PipelineReport::default();
        for (primitive, request) in scene.primitives_mut().zip(requests) {
            primitive.pipeline = match request.and_then(|desc| cache.get_or_create(backend, &desc)) {
                Ok(id) => {
                    report.ready += 1;
                    PipelineSlot::Ready(id)
                }
                Err(err) => {
                    log::warn!("Primitive '{}' will not be rendered: {}", primitive.name, err);
                    report.rejected += 1;
                    PipelineSlot::Rejected(err)
                }
            };
        }

        self.reported_unassigned.clear();
        report
    }
}

impl<B: GraphicsBackend> RenderPass<B> for ForwardPass {
    fn name(&self) -> &'static str {
        "forward"
    }

    fn record(&mut self, ctx: &mut PassContext<'_, B>) -> RendererResult<PassStats> {
        let cmd = ctx.cmd;
        let targets = ctx.targets;
        let buffers = ctx.buffers;
        let pool = ctx.pool;

        ctx.backend.begin_rendering(
            cmd,
            &RenderingDesc {
                label: "forward".to_string(),
                width: targets.width,
                height: targets.height,
                color_attachments: vec![ColorAttachment {
                    texture: pool.native_texture(targets.hdr)?,
                    load_op: LoadOp::Clear,
                    store_op: StoreOp::Store,
                    clear_color: CLEAR_COLOR,
                }],
                depth_attachment: Some(DepthAttachment {
                    texture: pool.native_texture(targets.depth)?,
                    load_op: LoadOp::Clear,
                    // The skybox tests against it
                    store_op: StoreOp::Store,
                    clear_depth: 1.0,
                }),
            },
        );
        ctx.backend.set_viewport(cmd, &ctx.parameters.viewport);
        ctx.backend.set_scissor(cmd, &ctx.parameters.scissor);

        if let Some(vertices) = buffers.vertices {
            ctx.backend
                .set_vertex_buffer(cmd, 0, pool.native_buffer(vertices)?, 0, Vertex::STRIDE);
        }
        if let Some(indices) = buffers.indices {
            ctx.backend
                .set_index_buffer(cmd, pool.native_buffer(indices)?, 0, IndexFormat::Uint32);
        }

        let camera = pool.native_buffer(targets.camera)?;
        let scene_parameters = pool.native_buffer(targets.scene)?;

        let mut stats = PassStats::default();
        let mut bound_signature = None;
        let mut bound_pipeline = None;

        for item in ctx.scene.primitives() {
            let primitive = item.primitive;
            let id = match &primitive.pipeline {
                PipelineSlot::Ready(id) => *id,
                PipelineSlot::Rejected(_) => {
                    stats.skipped += 1;
                    continue;
                }
                PipelineSlot::Pending => {
                    if self.reported_unassigned.insert(item.instance_id) {
                        log::warn!(
                            "Primitive '{}' has no pipeline assigned, skipping it",
                            primitive.name
                        );
                    }
                    stats.skipped += 1;
                    continue;
                }
            };
            let Some((pipeline, signature)) = ctx.cache.resolve(id) else {
                if self.reported_unassigned.insert(item.instance_id) {
                    log::warn!(
                        "Primitive '{}' references unknown {:?}, skipping it",
                        primitive.name,
                        id
                    );
                }
                stats.skipped += 1;
                continue;
            };

            if bound_signature != Some(signature) {
                ctx.backend
                    .set_binding_signature(cmd, BindPoint::Graphics, signature);
                ctx.backend.set_constant_buffer(cmd, CAMERA, camera, 0);
                ctx.backend
                    .set_constant_buffer(cmd, SCENE, scene_parameters, 0);
                ctx.backend
                    .set_descriptor_table(cmd, INSTANCES, buffers.instance_srv);
                ctx.backend
                    .set_descriptor_table(cmd, MATERIALS, buffers.material_srv);
                ctx.backend
                    .set_descriptor_table(cmd, SHADOW_MAP, targets.shadow_map_srv);
                bound_signature = Some(signature);
            }
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
    use crate::backend::{CullMode, DummyBackend};
    use crate::scene::{Material, Mesh};

    fn pass(backend: &mut DummyBackend) -> ForwardPass {
        let mut shaders = ShaderStorage::embedded();
        ForwardPass::new(backend, &mut shaders, &RendererConfig::default()).unwrap()
    }

    fn scene(materials: Vec<Material>, primitives: Vec<Primitive>) -> RenderScene {
        let mut model = Model::new("model");
        model.materials = materials;
        let mut mesh = Mesh::new("mesh");
        mesh.primitives = primitives;
        RenderScene::new().with_model(model.with_mesh(mesh))
    }

    #[test]
    fn test_signature_layout() {
        let desc = ForwardPass::signature_desc();
        assert_eq!(desc.parameters.len(), 6);
        assert_eq!(desc.bind_group_of(CAMERA), Some(0));
        assert_eq!(desc.bind_group_of(INSTANCE_ID), None);
        assert_eq!(desc.bind_group_of(SHADOW_MAP), Some(4));
        assert_eq!(desc.static_sampler_group(), Some(5));
    }

    #[test]
    fn test_parameter_only_materials_share_pipeline() {
        let mut backend = DummyBackend::new();
        let mut cache = PipelineCache::new();
        let mut forward = pass(&mut backend);
        let mut scene = scene(
            vec![
                Material::new("red").with_base_color(glam::Vec4::new(1.0, 0.0, 0.0, 1.0)),
                Material::new("blue").with_base_color(glam::Vec4::new(0.0, 0.0, 1.0, 1.0)),
                Material::new("two sided").with_rasterizer(
                    crate::backend::RasterizerState::default().with_cull_mode(CullMode::None),
                ),
            ],
            vec![
                Primitive::cube("a", Some(0)),
                Primitive::cube("b", Some(1)),
                Primitive::cube("c", Some(2)),
            ],
        );

        let report = forward.compile_primitive_pipelines(&mut backend, &mut cache, &mut scene);
        assert_eq!(report, PipelineReport { ready: 3, rejected: 0 });

        let ids: Vec<_> = scene
            .primitives()
            .map(|item| item.primitive.pipeline.id().unwrap())
            .collect();
        assert_eq!(ids[0], ids[1]);
        assert_ne!(ids[0], ids[2]);
        assert_eq!(backend.pipeline_compile_count(), 2);
    }

    #[test]
    fn test_missing_material_is_rejected() {
        let mut backend = DummyBackend::new();
        let mut cache = PipelineCache::new();
        let mut forward = pass(&mut backend);
        let mut scene = scene(
            vec![Material::new("only")],
            vec![Primitive::cube("no material", None)],
        );

        let report = forward.compile_primitive_pipelines(&mut backend, &mut cache, &mut scene);
        assert_eq!(report.rejected, 1);

        let primitive = scene.primitives().next().unwrap().primitive;
        assert_eq!(
            primitive.pipeline,
            PipelineSlot::Rejected(CompileError::MaterialMissing {
                primitive: "no material".to_string()
            })
        );
        assert_eq!(backend.pipeline_compile_count(), 0);
    }

    #[test]
    fn test_compile_failure_is_recorded_on_primitive() {
        let mut backend = DummyBackend::new();
        backend.fail_pipeline("forward/broken");
        let mut cache = PipelineCache::new();
        let mut forward = pass(&mut backend);
        let mut scene = scene(
            vec![
                Material::new("fine"),
                Material::new("broken").with_rasterizer(
                    crate::backend::RasterizerState::default().with_cull_mode(CullMode::Front),
                ),
            ],
            vec![Primitive::cube("a", Some(0)), Primitive::cube("b", Some(1))],
        );

        forward.compile_primitive_pipelines(&mut backend, &mut cache, &mut scene);

        let slots: Vec<_> = scene.primitives().map(|item| item.primitive.pipeline.clone()).collect();
        assert!(slots[0].is_ready());
        assert!(matches!(slots[1], PipelineSlot::Rejected(CompileError::Native { .. })));
        assert_eq!(cache.stats().failures, 1);
    }
}
