//! HDR to display tonemapping as a compute pass

use super::{group_count, resolve_pipeline, PassContext, PassStats, RenderPass};
use crate::backend::{BindPoint, GraphicsBackend, NativeSignature, ShaderStage, ShaderVisibility};
use crate::pipeline::{
    BindingSignatureDesc, ComputePipelineDesc, DescriptorRange, PipelineCache, PipelineId,
};
use crate::shader::{ShaderCompileParameters, ShaderStorage, TONEMAP_SHADER};
use crate::{RendererResult, TonemapSettings};

pub mod tonemap_parameters {
    pub const HDR: u32 = 0;
    pub const OUTPUT: u32 = 1;
    pub const CONSTANTS: u32 = 2;
}

use tonemap_parameters::*;

pub const TONEMAP_GROUP_SIZE: u32 = 8;

pub struct TonemapPass {
    signature: NativeSignature,
    pipeline: PipelineId,
}

impl TonemapPass {
    pub fn signature_desc() -> BindingSignatureDesc {
        BindingSignatureDesc::new("tonemap")
            .with_table(&[DescriptorRange::storage_texture(0, 1)], ShaderVisibility::Compute)
            .with_table(&[DescriptorRange::storage_texture(1, 1)], ShaderVisibility::Compute)
            .with_push_constants(0, 4, ShaderVisibility::Compute)
    }

    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        cache: &mut PipelineCache,
        shaders: &mut ShaderStorage,
    ) -> RendererResult<Self> {
        let signature = backend
            .create_binding_signature(&Self::signature_desc())
            .inspect_err(|err| log::error!("Can't create tonemap binding signature: {}", err))?;
        let pipeline = Self::compile(backend, cache, shaders, signature)?;
        Ok(Self {
            signature,
            pipeline,
        })
    }

    fn compile<B: GraphicsBackend>(
        backend: &mut B,
        cache: &mut PipelineCache,
        shaders: &mut ShaderStorage,
        signature: NativeSignature,
    ) -> RendererResult<PipelineId> {
        let bytecode = shaders.compile(&ShaderCompileParameters::new(
            TONEMAP_SHADER,
            ShaderStage::Compute,
            "cs_main",
        ))?;
        let desc = ComputePipelineDesc::new("tonemap", signature, bytecode)?;
        Ok(cache.get_or_create_compute(backend, &desc)?)
    }

    /// Re-resolve the pipeline from current bytecode. The old pipeline stays
    /// bound if that fails.
    pub fn reload_shaders<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        cache: &mut PipelineCache,
        shaders: &mut ShaderStorage,
    ) -> RendererResult<()> {
        self.pipeline = Self::compile(backend, cache, shaders, self.signature)?;
        Ok(())
    }

    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    /// Push constant block, laid out as the shader's `TonemapParameters`
    pub fn constants(width: u32, height: u32, settings: &TonemapSettings) -> [u32; 4] {
        [
            width,
            height,
            settings.method as u32,
            settings.exposure.to_bits(),
        ]
    }
}

impl<B: GraphicsBackend> RenderPass<B> for TonemapPass {
    fn name(&self) -> &'static str {
        "tonemap"
    }

    fn record(&mut self, ctx: &mut PassContext<'_, B>) -> RendererResult<PassStats> {
        let cmd = ctx.cmd;
        let targets = ctx.targets;
        let (pipeline, signature) = resolve_pipeline(ctx.cache, self.pipeline, "tonemap")?;

        ctx.backend
            .set_binding_signature(cmd, BindPoint::Compute, signature);
        ctx.backend.set_pipeline(cmd, pipeline);
        ctx.backend.set_descriptor_table(cmd, HDR, targets.hdr_uav);
        ctx.backend
            .set_descriptor_table(cmd, OUTPUT, targets.output_uav);
        ctx.backend.set_push_constants(
            cmd,
            CONSTANTS,
            &Self::constants(targets.width, targets.height, &ctx.parameters.tonemap),
        );
        ctx.backend.dispatch(
            cmd,
            group_count(targets.width, TONEMAP_GROUP_SIZE),
            group_count(targets.height, TONEMAP_GROUP_SIZE),
            1,
        );

        Ok(PassStats {
            dispatches: 1,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::TonemapMethod;

    #[test]
    fn test_push_constant_layout() {
        let settings = TonemapSettings {
            method: TonemapMethod::Aces,
            exposure: 1.5,
        };
        let constants = TonemapPass::constants(1280, 720, &settings);
        assert_eq!(constants[..3], [1280, 720, 2]);
        assert_eq!(f32::from_bits(constants[3]), 1.5);
    }

    #[test]
    fn test_reload_with_unchanged_source_hits_cache() {
        let mut backend = DummyBackend::new();
        let mut cache = PipelineCache::new();
        let mut shaders = ShaderStorage::embedded();

        let mut pass = TonemapPass::new(&mut backend, &mut cache, &mut shaders).unwrap();
        let before = pass.pipeline();
        pass.reload_shaders(&mut backend, &mut cache, &mut shaders).unwrap();

        assert_eq!(pass.pipeline(), before);
        assert_eq!(cache.stats().compiles, 1);
        assert_eq!(cache.stats().hits, 1);
    }
}
