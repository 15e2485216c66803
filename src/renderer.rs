//! Renderer entry point
//!
//! [`Renderer`] owns the backend and every subsystem that talks to it, and
//! hands them to each other explicitly. A typical session:
//!
//! ```no_run
//! use scene_renderer::{BackendType, Renderer, RendererConfig};
//! use scene_renderer::scene::{Material, Mesh, Model, Primitive, RenderScene};
//!
//! # fn main() -> scene_renderer::RendererResult<()> {
//! let mut renderer = Renderer::new(RendererConfig {
//!     backend: BackendType::Dummy,
//!     ..Default::default()
//! })?;
//!
//! let mut scene = RenderScene::new().with_model(
//!     Model::new("crate")
//!         .with_material(Material::new("wood"))
//!         .with_mesh(Mesh::new("box").with_primitive(Primitive::cube("box", Some(0)))),
//! );
//! renderer.prepare_scene(&mut scene)?;
//! renderer.render_frame(&scene)?;
//! # Ok(())
//! # }
//! ```

use crate::backend::{
    AccelerationStructureHandle, Backend, FenceValue, GraphicsBackend, QueueType,
};
use crate::descriptor::DescriptorHeaps;
use crate::passes::{
    CubemapConverter, ForwardPass, FrameOrchestrator, FrameParameters, FrameState, FrameTargets,
    MipGenerator, PassTimings, PipelineReport, RaytracePass, ShadowMapPass, SkyboxPass,
    TonemapPass,
};
use crate::pipeline::{CacheStats, PipelineCache};
use crate::queue::CommandQueues;
use crate::resources::ResourcePool;
use crate::scene::{RenderScene, SceneBuilder};
use crate::shader::{ShaderBytecode, ShaderStorage};
use crate::{RendererConfig, RendererResult};

/// Read-only numbers for overlays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub cache: CacheStats,
    pub pass_timings: PassTimings,
    /// Forward, skybox and post draws of the last frame
    pub draws: u32,
    /// Primitives left out of the last frame
    pub skipped: u32,
    pub last_fence: FenceValue,
}

pub struct Renderer<B: GraphicsBackend = Backend> {
    backend: B,
    config: RendererConfig,
    heaps: DescriptorHeaps,
    pool: ResourcePool,
    cache: PipelineCache,
    shaders: ShaderStorage,
    queues: CommandQueues,
    orchestrator: FrameOrchestrator,
    mips: MipGenerator,
    cubemap: CubemapConverter,
    frame_number: u32,
}

impl Renderer<Backend> {
    /// Create the configured backend and everything on top of it.
    ///
    /// Failing to create the device, a descriptor heap or a binding signature
    /// is fatal: no renderer is returned.
    pub fn new(config: RendererConfig) -> RendererResult<Self> {
        let backend = Backend::new(config.backend)
            .inspect_err(|err| log::error!("Can't create {:?} backend: {}", config.backend, err))?;
        Self::with_backend(backend, config)
    }
}

impl<B: GraphicsBackend> Renderer<B> {
    /// Build the renderer on an already created backend
    pub fn with_backend(mut backend: B, config: RendererConfig) -> RendererResult<Self> {
        let mut heaps = DescriptorHeaps::new(&mut backend, &config.descriptor_budgets)
            .inspect_err(|err| log::error!("Can't create descriptor heaps: {}", err))?;
        let mut pool = ResourcePool::new();
        let mut cache = PipelineCache::new();
        let mut shaders = ShaderStorage::new(Some(config.shader_root.clone()));

        let targets = FrameTargets::create(&mut backend, &mut pool, &mut heaps, &config)?;
        let shadow = ShadowMapPass::new(&mut backend, &mut shaders, &config)?;
        let forward = ForwardPass::new(&mut backend, &mut shaders, &config)?;
        let skybox = SkyboxPass::new(&mut backend, &mut cache, &mut shaders, &config)?;
        let raytrace = RaytracePass::new(&mut backend)?;
        let tonemap = TonemapPass::new(&mut backend, &mut cache, &mut shaders)?;
        let mips = MipGenerator::new(&mut backend, &mut cache, &mut shaders)?;
        let cubemap = CubemapConverter::new(&mut backend, &mut cache, &mut shaders)?;

        if config.raytracing && !backend.supports_raytracing() {
            log::warn!(
                "Raytracing requested, but the {} backend doesn't support it",
                backend.name()
            );
        }

        log::info!(
            "Renderer initialized: {} backend, {}x{}, shadow map {}x{}",
            backend.name(),
            config.width,
            config.height,
            config.shadow_map_size,
            config.shadow_map_size
        );

        let orchestrator = FrameOrchestrator::new(
            shadow,
            forward,
            skybox,
            raytrace,
            tonemap,
            targets,
            config.raytracing,
        );

        Ok(Self {
            backend,
            config,
            heaps,
            pool,
            cache,
            shaders,
            queues: CommandQueues::new(),
            orchestrator,
            mips,
            cubemap,
            frame_number: 0,
        })
    }

    /// Upload the scene's merged buffers and assign pipelines to its primitives.
    ///
    /// Material textures get their mip chains and the sky image, if any, is
    /// converted to the skybox cubemap in the same submission. Primitives that
    /// can't get a pipeline are reported once here and left out of every frame.
    pub fn prepare_scene(&mut self, scene: &mut RenderScene) -> RendererResult<PipelineReport> {
        if scene.buffers().is_some() {
            // The previous buffers may still be read by frames in flight
            self.queues.flush_all(&mut self.backend)?;
        }

        let cmd = self
            .backend
            .begin_command_list(QueueType::Direct, "scene upload")?;
        self.backend
            .set_descriptor_heaps(cmd, &self.heaps.shader_visible());
        SceneBuilder::upload(
            scene,
            &mut self.backend,
            &mut self.pool,
            &mut self.heaps.cbv_srv_uav,
            cmd,
            self.config.generate_mips,
        )?;

        let textures = scene
            .buffers()
            .map(|buffers| buffers.textures.clone())
            .unwrap_or_default();
        let mut dispatches = 0;
        for texture in textures {
            dispatches += self.mips.generate(
                &mut self.backend,
                &self.cache,
                &mut self.pool,
                &mut self.heaps.cbv_srv_uav,
                cmd,
                texture,
            )?;
        }
        if dispatches > 0 {
            log::debug!("Recorded {} mip dispatches", dispatches);
        }

        if let Some(sky) = scene.environment_light.sky.clone() {
            match self.cubemap.convert(
                &mut self.backend,
                &self.cache,
                &mut self.pool,
                &mut self.heaps.cbv_srv_uav,
                cmd,
                &sky,
                self.config.environment_map_size,
            ) {
                Ok(map) => {
                    if let Some(buffers) = scene.buffers.as_mut() {
                        buffers.environment = Some(map);
                    }
                }
                Err(err) => log::warn!("Sky '{}' disabled: {}", sky.name, err),
            }
        }

        let fence = self.queues.execute(&mut self.backend, QueueType::Direct, cmd)?;
        self.pool.mark_submitted(fence);

        Ok(self.compile_pipelines(scene))
    }

    fn compile_pipelines(&mut self, scene: &mut RenderScene) -> PipelineReport {
        let report = self.orchestrator.forward_mut().compile_primitive_pipelines(
            &mut self.backend,
            &mut self.cache,
            scene,
        );
        self.orchestrator.shadow_mut().compile_primitive_pipelines(
            &mut self.backend,
            &mut self.cache,
            scene,
        );
        log::info!(
            "Assigned pipelines: {} primitives ready, {} rejected, {} pipelines cached",
            report.ready,
            report.rejected,
            self.cache.len()
        );
        report
    }

    /// Record and submit one frame, returning the fence that marks its completion.
    ///
    /// Waits for the previous frame first, so at most one frame is in flight.
    pub fn render_frame(&mut self, scene: &RenderScene) -> RendererResult<FenceValue> {
        if self.orchestrator.state() == FrameState::Submitted {
            self.orchestrator
                .complete_frame(&mut self.backend, &mut self.queues)?;
        }
        let completed = self.backend.completed_fence_value(QueueType::Direct);
        self.pool.retire_staging(&mut self.backend, completed);

        let parameters = FrameParameters {
            tonemap: self.config.tonemap,
            shadows: self.config.shadows,
            ..FrameParameters::new(self.frame_number, self.config.width, self.config.height)
        };
        let frame = self.orchestrator.record_frame(
            &mut self.backend,
            &self.cache,
            &mut self.pool,
            &self.heaps,
            scene,
            &parameters,
        )?;
        let fence = self
            .orchestrator
            .submit(&mut self.backend, &mut self.queues, &mut self.pool, frame)?;

        self.frame_number = self.frame_number.wrapping_add(1);
        Ok(fence)
    }

    /// Recompile shaders whose sources changed and re-resolve every pipeline
    /// built from them. Returns how many shaders were recompiled.
    ///
    /// Old cache entries stay; pipelines are never evicted.
    pub fn reload_changed_shaders(&mut self, scene: &mut RenderScene) -> usize {
        let changed = self.shaders.changed_shaders();
        if changed.is_empty() {
            return 0;
        }
        if let Err(err) = self.queues.flush_all(&mut self.backend) {
            log::error!("Can't flush queues before shader reload: {}", err);
            return 0;
        }

        let reloaded = changed
            .iter()
            .filter(|parameters| self.shaders.recompile(parameters).is_ok())
            .inspect(|parameters| {
                log::info!(
                    "Reloaded shader {} ({})",
                    parameters.path.display(),
                    parameters.entry_point
                )
            })
            .count();
        if reloaded == 0 {
            return 0;
        }

        if let Err(err) = self.orchestrator.forward_mut().reload_shaders(&mut self.shaders) {
            log::error!("Forward pass keeps its previous shaders: {}", err);
        }
        if let Err(err) = self.orchestrator.shadow_mut().reload_shaders(&mut self.shaders) {
            log::error!("Shadow pass keeps its previous shaders: {}", err);
        }
        if let Err(err) = self.orchestrator.skybox_mut().reload_shaders(
            &mut self.backend,
            &mut self.cache,
            &mut self.shaders,
        ) {
            log::error!("Skybox pass keeps its previous pipeline: {}", err);
        }
        if let Err(err) = self.orchestrator.tonemap_mut().reload_shaders(
            &mut self.backend,
            &mut self.cache,
            &mut self.shaders,
        ) {
            log::error!("Tonemap pass keeps its previous pipeline: {}", err);
        }
        if let Err(err) =
            self.mips
                .reload_shaders(&mut self.backend, &mut self.cache, &mut self.shaders)
        {
            log::error!("Mip generation keeps its previous pipeline: {}", err);
        }
        if let Err(err) =
            self.cubemap
                .reload_shaders(&mut self.backend, &mut self.cache, &mut self.shaders)
        {
            log::error!("Cubemap conversion keeps its previous pipeline: {}", err);
        }

        self.compile_pipelines(scene);
        reloaded
    }

    /// Turn on the raytrace pass with externally built bytecode and
    /// acceleration structure. It runs only if the config asks for it and the
    /// backend supports it.
    pub fn enable_raytracing(
        &mut self,
        bytecode: ShaderBytecode,
        acceleration_structure: AccelerationStructureHandle,
    ) -> RendererResult<()> {
        self.orchestrator.raytrace_mut().enable(
            &mut self.backend,
            &mut self.cache,
            &mut self.heaps.cbv_srv_uav,
            bytecode,
            acceleration_structure,
        )
    }

    /// Drain every queue
    pub fn flush(&mut self) -> RendererResult<()> {
        self.queues.flush_all(&mut self.backend)?;
        if self.orchestrator.state() == FrameState::Submitted {
            self.orchestrator
                .complete_frame(&mut self.backend, &mut self.queues)?;
        }
        let completed = self.backend.completed_fence_value(QueueType::Direct);
        self.pool.retire_staging(&mut self.backend, completed);
        Ok(())
    }

    /// Destroy the scene's merged buffers once the GPU is done with them
    pub fn release_scene(&mut self, scene: &mut RenderScene) -> RendererResult<()> {
        if let Some(buffers) = scene.take_buffers() {
            self.queues.flush_all(&mut self.backend)?;
            buffers.release(&mut self.backend, &mut self.pool);
        }
        Ok(())
    }

    pub fn stats(&self) -> RendererStats {
        let frame = self.orchestrator.last_stats();
        RendererStats {
            cache: self.cache.stats(),
            pass_timings: self.orchestrator.timings(),
            draws: frame.draws,
            skipped: frame.skipped,
            last_fence: self.orchestrator.last_fence().unwrap_or_default(),
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn cache(&self) -> &PipelineCache {
        &self.cache
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn heaps(&self) -> &DescriptorHeaps {
        &self.heaps
    }

    pub fn frame_state(&self) -> FrameState {
        self.orchestrator.state()
    }

    pub fn frame_targets(&self) -> &FrameTargets {
        self.orchestrator.targets()
    }

    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }
}

impl<B: GraphicsBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if let Err(err) = self.queues.flush_all(&mut self.backend) {
            log::error!("Can't drain queues on shutdown: {}", err);
        }
        self.pool.release_all(&mut self.backend);
        log::debug!("Renderer released all resources");
    }
}
