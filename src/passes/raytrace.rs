//! Optional ray-query pass writing into the HDR target
//!
//! The acceleration structure and the ray-query bytecode come from outside the
//! renderer. The pass runs only when raytracing is requested, the backend
//! supports it, and both have been supplied.

use super::{group_count, PassContext, PassStats, RenderPass};
use crate::backend::{
    AccelerationStructureHandle, BindPoint, DescriptorView, GraphicsBackend, NativeSignature,
    ShaderVisibility,
};
use crate::descriptor::{DescriptorHandle, DescriptorHeap};
use crate::pipeline::{
    BindingSignatureDesc, ComputePipelineDesc, DescriptorRange, PipelineCache, PipelineId,
};
use crate::shader::ShaderBytecode;
use crate::RendererResult;

pub mod raytrace_parameters {
    pub const CAMERA: u32 = 0;
    pub const SCENE: u32 = 1;
    pub const ACCELERATION_STRUCTURE: u32 = 2;
    pub const OUTPUT: u32 = 3;
}

use raytrace_parameters::*;

pub const RAYTRACE_GROUP_SIZE: u32 = 8;

/// Whether the pass runs this frame, and why not
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaytraceState {
    Active,
    DisabledInConfig,
    Unsupported,
    /// Enabled, but no pipeline or acceleration structure has been supplied
    NotReady,
}

pub struct RaytracePass {
    signature: NativeSignature,
    pipeline: Option<PipelineId>,
    acceleration_structure: Option<DescriptorHandle>,
    state: Option<RaytraceState>,
}

impl RaytracePass {
    pub fn signature_desc() -> BindingSignatureDesc {
        BindingSignatureDesc::new("raytrace")
            .with_constant_buffer(0, ShaderVisibility::Compute)
            .with_constant_buffer(1, ShaderVisibility::Compute)
            .with_table(&[DescriptorRange::acceleration_structure(0)], ShaderVisibility::Compute)
            .with_table(&[DescriptorRange::storage_texture(0, 1)], ShaderVisibility::Compute)
    }

    pub fn new<B: GraphicsBackend>(backend: &mut B) -> RendererResult<Self> {
        let signature = backend
            .create_binding_signature(&Self::signature_desc())
            .inspect_err(|err| log::error!("Can't create raytrace binding signature: {}", err))?;
        Ok(Self {
            signature,
            pipeline: None,
            acceleration_structure: None,
            state: None,
        })
    }

    /// Compile the ray-query pipeline and bind the scene's acceleration structure
    pub fn enable<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        cache: &mut PipelineCache,
        heap: &mut DescriptorHeap,
        bytecode: ShaderBytecode,
        acceleration_structure: AccelerationStructureHandle,
    ) -> RendererResult<()> {
        let desc = ComputePipelineDesc::new("raytrace", self.signature, bytecode)?;
        let pipeline = cache.get_or_create_compute(backend, &desc)?;

        let srv = match self.acceleration_structure {
            Some(srv) => srv,
            None => heap.allocate()?,
        };
        heap.write(
            backend,
            &srv,
            &DescriptorView::AccelerationStructure(acceleration_structure),
        )?;

        self.pipeline = Some(pipeline);
        self.acceleration_structure = Some(srv);
        Ok(())
    }

    /// Decide whether the pass runs, logging once whenever the answer changes
    pub fn update_state(&mut self, requested: bool, supported: bool) -> RaytraceState {
        let state = if !requested {
            RaytraceState::DisabledInConfig
        } else if !supported {
            RaytraceState::Unsupported
        } else if self.pipeline.is_none() || self.acceleration_structure.is_none() {
            RaytraceState::NotReady
        } else {
            RaytraceState::Active
        };

        if self.state != Some(state) {
            match state {
                RaytraceState::Active => log::info!("Raytrace pass enabled"),
                RaytraceState::DisabledInConfig => log::info!("Raytrace pass disabled"),
                RaytraceState::Unsupported => {
                    log::info!("Raytrace pass skipped: backend has no raytracing support")
                }
                RaytraceState::NotReady => {
                    log::info!("Raytrace pass skipped: no acceleration structure supplied")
                }
            }
            self.state = Some(state);
        }
        state
    }

    pub fn state(&self) -> Option<RaytraceState> {
        self.state
    }
}

impl<B: GraphicsBackend> RenderPass<B> for RaytracePass {
    fn name(&self) -> &'static str {
        "raytrace"
    }

    fn record(&mut self, ctx: &mut PassContext<'_, B>) -> RendererResult<PassStats> {
        let (Some(id), Some(acceleration_structure)) = (self.pipeline, self.acceleration_structure)
        else {
            return Ok(PassStats::default());
        };
        let Some((pipeline, signature)) = ctx.cache.resolve(id) else {
            return Ok(PassStats::default());
        };

        let cmd = ctx.cmd;
        let targets = ctx.targets;
        ctx.backend
            .set_binding_signature(cmd, BindPoint::Compute, signature);
        ctx.backend.set_pipeline(cmd, pipeline);
        ctx.backend
            .set_constant_buffer(cmd, CAMERA, ctx.pool.native_buffer(targets.camera)?, 0);
        ctx.backend
            .set_constant_buffer(cmd, SCENE, ctx.pool.native_buffer(targets.scene)?, 0);
        ctx.backend
            .set_descriptor_table(cmd, ACCELERATION_STRUCTURE, acceleration_structure);
        ctx.backend.set_descriptor_table(cmd, OUTPUT, targets.hdr_uav);
        ctx.backend.dispatch(
            cmd,
            group_count(targets.width, RAYTRACE_GROUP_SIZE),
            group_count(targets.height, RAYTRACE_GROUP_SIZE),
            1,
        );

        Ok(PassStats {
            dispatches: 1,
            ..Default::default()
        })
    }
}
