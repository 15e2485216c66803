//! Frame state machine
//!
//! A frame moves through `Idle`, the three recording states and `Submitted`
//! strictly in order. Resource transitions between passes are recorded
//! explicitly: the shadow map becomes readable before the forward pass binds
//! it, and the HDR target becomes writable by compute before post passes run.

use super::{
    ForwardPass, FrameParameters, FrameState, PassContext, PassStats, PassTimings, RaytracePass,
    RaytraceState, RenderPass, ShadowMapPass, SkyboxPass, TonemapPass,
};
use crate::backend::{
    ClearValue, CommandList, DescriptorView, GraphicsBackend, HeapKind, NativeResource, QueueType,
    ResourceBarrier, ResourceFlags, ResourceState, TextureDescriptor, TextureFormat,
};
use crate::descriptor::{DescriptorHandle, DescriptorHeaps};
use crate::pipeline::PipelineCache;
use crate::queue::CommandQueues;
use crate::resources::{BufferHandle, ResourcePool, TextureHandle};
use crate::scene::{GpuCamera, GpuSceneParameters, GpuShadowCamera, RenderScene};
use crate::{RendererConfig, RendererError, RendererResult};
use std::time::{Duration, Instant};

/// Constant buffers are placed at this alignment
const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Render targets and per-frame constant buffers shared by the passes
#[derive(Debug)]
pub struct FrameTargets {
    pub width: u32,
    pub height: u32,
    pub shadow_map: TextureHandle,
    pub shadow_map_srv: DescriptorHandle,
    pub shadow_map_dsv: DescriptorHandle,
    pub hdr: TextureHandle,
    pub hdr_rtv: DescriptorHandle,
    pub hdr_uav: DescriptorHandle,
    pub depth: TextureHandle,
    pub depth_dsv: DescriptorHandle,
    pub output: TextureHandle,
    pub output_uav: DescriptorHandle,
    pub camera: BufferHandle,
    pub scene: BufferHandle,
    pub shadow_camera: BufferHandle,
}

impl FrameTargets {
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        pool: &mut ResourcePool,
        heaps: &mut DescriptorHeaps,
        config: &RendererConfig,
    ) -> RendererResult<Self> {
        let (width, height) = (config.width, config.height);

        let shadow_map = pool.create_texture(
            backend,
            &TextureDescriptor {
                label: Some("shadow map".to_string()),
                width: config.shadow_map_size,
                height: config.shadow_map_size,
                format: config.depth_format,
                flags: ResourceFlags::ALLOW_DEPTH_STENCIL,
                initial_state: ResourceState::DepthWrite,
                clear_value: Some(ClearValue::DepthStencil {
                    depth: 1.0,
                    stencil: 0,
                }),
                ..Default::default()
            },
        )?;
        let hdr = pool.create_texture(
            backend,
            &TextureDescriptor {
                label: Some("hdr color".to_string()),
                width,
                height,
                format: config.hdr_format,
                flags: ResourceFlags::ALLOW_RENDER_TARGET | ResourceFlags::ALLOW_UNORDERED_ACCESS,
                initial_state: ResourceState::RenderTarget,
                clear_value: Some(ClearValue::Color([0.0, 0.0, 0.0, 1.0])),
                ..Default::default()
            },
        )?;
        let depth = pool.create_texture(
            backend,
            &TextureDescriptor {
                label: Some("depth".to_string()),
                width,
                height,
                format: config.depth_format,
                flags: ResourceFlags::ALLOW_DEPTH_STENCIL | ResourceFlags::DENY_SHADER_RESOURCE,
                initial_state: ResourceState::DepthWrite,
                clear_value: Some(ClearValue::DepthStencil {
                    depth: 1.0,
                    stencil: 0,
                }),
                ..Default::default()
            },
        )?;
        let output = pool.create_texture(
            backend,
            &TextureDescriptor {
                label: Some("output".to_string()),
                width,
                height,
                format: config.output_format,
                flags: ResourceFlags::ALLOW_UNORDERED_ACCESS,
                initial_state: ResourceState::CopySource,
                ..Default::default()
            },
        )?;

        let shadow_map_native = pool.native_texture(shadow_map)?;
        let hdr_native = pool.native_texture(hdr)?;
        let depth_native = pool.native_texture(depth)?;
        let output_native = pool.native_texture(output)?;

        let shadow_map_srv = write_view(
            backend,
            &mut heaps.cbv_srv_uav,
            DescriptorView::Texture {
                texture: shadow_map_native,
                format: config.depth_format,
            },
        )?;
        let shadow_map_dsv = write_view(
            backend,
            &mut heaps.dsv,
            DescriptorView::DepthStencil {
                texture: shadow_map_native,
                format: config.depth_format,
            },
        )?;
        let hdr_rtv = write_view(
            backend,
            &mut heaps.rtv,
            DescriptorView::RenderTarget {
                texture: hdr_native,
                format: config.hdr_format,
            },
        )?;
        let hdr_uav = write_view(
            backend,
            &mut heaps.cbv_srv_uav,
            DescriptorView::StorageTexture {
                texture: hdr_native,
                format: config.hdr_format,
                mip_level: 0,
            },
        )?;
        let depth_dsv = write_view(
            backend,
            &mut heaps.dsv,
            DescriptorView::DepthStencil {
                texture: depth_native,
                format: config.depth_format,
            },
        )?;
        let output_uav = write_view(
            backend,
            &mut heaps.cbv_srv_uav,
            DescriptorView::StorageTexture {
                texture: output_native,
                format: config.output_format,
                mip_level: 0,
            },
        )?;

        let camera = constant_buffer::<B, GpuCamera>(backend, pool, "camera constants")?;
        let scene = constant_buffer::<B, GpuSceneParameters>(backend, pool, "scene constants")?;
        let shadow_camera =
            constant_buffer::<B, GpuShadowCamera>(backend, pool, "shadow camera constants")?;

        Ok(Self {
            width,
            height,
            shadow_map,
            shadow_map_srv,
            shadow_map_dsv,
            hdr,
            hdr_rtv,
            hdr_uav,
            depth,
            depth_dsv,
            output,
            output_uav,
            camera,
            scene,
            shadow_camera,
        })
    }

    /// Format of the final image
    pub fn output_format(&self, pool: &ResourcePool) -> Option<TextureFormat> {
        pool.texture_descriptor(self.output).ok().map(|desc| desc.format)
    }
}

fn write_view<B: GraphicsBackend>(
    backend: &mut B,
    heap: &mut crate::descriptor::DescriptorHeap,
    view: DescriptorView,
) -> RendererResult<DescriptorHandle> {
    let handle = heap.allocate()?;
    heap.write(backend, &handle, &view)?;
    Ok(handle)
}

fn constant_buffer<B: GraphicsBackend, T>(
    backend: &mut B,
    pool: &mut ResourcePool,
    label: &str,
) -> RendererResult<BufferHandle> {
    let size = (std::mem::size_of::<T>() as u64).next_multiple_of(CONSTANT_BUFFER_ALIGNMENT);
    Ok(pool.create_buffer(
        backend,
        label,
        size,
        HeapKind::Upload,
        ResourceFlags::NONE,
        ResourceState::GenericRead,
    )?)
}

/// Commands of a frame that has been recorded but not submitted
#[derive(Debug)]
#[must_use = "a recorded frame must be submitted"]
pub struct RecordedFrame {
    pub cmd: CommandList,
    pub stats: PassStats,
}

/// Runs the passes of a frame in order
pub struct FrameOrchestrator {
    state: FrameState,
    shadow: ShadowMapPass,
    forward: ForwardPass,
    skybox: SkyboxPass,
    raytrace: RaytracePass,
    tonemap: TonemapPass,
    targets: FrameTargets,
    raytracing_requested: bool,
    timings: PassTimings,
    last_stats: PassStats,
    last_fence: Option<crate::backend::FenceValue>,
}

impl FrameOrchestrator {
    pub fn new(
        shadow: ShadowMapPass,
        forward: ForwardPass,
        skybox: SkyboxPass,
        raytrace: RaytracePass,
        tonemap: TonemapPass,
        targets: FrameTargets,
        raytracing_requested: bool,
    ) -> Self {
        Self {
            state: FrameState::Idle,
            shadow,
            forward,
            skybox,
            raytrace,
            tonemap,
            targets,
            raytracing_requested,
            timings: PassTimings::default(),
            last_stats: PassStats::default(),
            last_fence: None,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Move to `to`, which must be the successor of the current state
    pub fn advance(&mut self, to: FrameState) -> RendererResult<()> {
        let expected = self.state.next();
        if to != expected {
            log::error!(
                "Frame state {:?} can't move to {:?}, expected {:?}",
                self.state,
                to,
                expected
            );
            return Err(RendererError::FrameOutOfOrder {
                expected,
                found: to,
            });
        }
        log::trace!("Frame state {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Record every pass of a frame into a fresh direct command list.
    ///
    /// On failure the frame is abandoned and the state returns to `Idle`.
    pub fn record_frame<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        cache: &PipelineCache,
        pool: &mut ResourcePool,
        heaps: &DescriptorHeaps,
        scene: &RenderScene,
        parameters: &FrameParameters,
    ) -> RendererResult<RecordedFrame> {
        let result = self.record_passes(backend, cache, pool, heaps, scene, parameters);
        if result.is_err() {
            self.state = FrameState::Idle;
        }
        result
    }

    fn record_passes<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        cache: &PipelineCache,
        pool: &mut ResourcePool,
        heaps: &DescriptorHeaps,
        scene: &RenderScene,
        parameters: &FrameParameters,
    ) -> RendererResult<RecordedFrame> {
        let buffers = scene.buffers().ok_or(RendererError::SceneNotPrepared)?;

        self.advance(FrameState::RecordingShadowPass)?;
        let cmd = backend.begin_command_list(QueueType::Direct, "frame")?;
        self.upload_constants(backend, pool, cmd, scene, parameters)?;
        backend.set_descriptor_heaps(cmd, &heaps.shader_visible());

        let targets = &self.targets;
        let mut stats = PassStats::default();
        let mut timings = PassTimings::default();

        transition(backend, pool, cmd, &[(targets.shadow_map, ResourceState::DepthWrite)])?;
        {
            let mut ctx = PassContext {
                backend: &mut *backend,
                cmd,
                cache,
                pool,
                scene,
                buffers,
                targets,
                parameters,
            };
            // Frame stats count what reaches the screen, so shadow draws stay out
            let (_, elapsed) = timed(&mut self.shadow, &mut ctx)?;
            timings.shadow = elapsed;
        }

        self.state = checked_next(self.state, FrameState::RecordingForwardPass)?;
        transition(
            backend,
            pool,
            cmd,
            &[
                (targets.shadow_map, ResourceState::PixelShaderResource),
                (targets.hdr, ResourceState::RenderTarget),
                (targets.depth, ResourceState::DepthWrite),
            ],
        )?;
        {
            let mut ctx = PassContext {
                backend: &mut *backend,
                cmd,
                cache,
                pool,
                scene,
                buffers,
                targets,
                parameters,
            };
            let (pass_stats, elapsed) = timed(&mut self.forward, &mut ctx)?;
            timings.forward = elapsed;
            stats += pass_stats;

            let (pass_stats, elapsed) = timed(&mut self.skybox, &mut ctx)?;
            timings.skybox = elapsed;
            stats += pass_stats;
        }
        transition(backend, pool, cmd, &[(targets.shadow_map, ResourceState::DepthWrite)])?;

        self.state = checked_next(self.state, FrameState::RecordingPostPass)?;
        let raytrace = self
            .raytrace
            .update_state(self.raytracing_requested, backend.supports_raytracing());
        if raytrace == RaytraceState::Active {
            transition(backend, pool, cmd, &[(targets.hdr, ResourceState::UnorderedAccess)])?;
            let mut ctx = PassContext {
                backend: &mut *backend,
                cmd,
                cache,
                pool,
                scene,
                buffers,
                targets,
                parameters,
            };
            let (pass_stats, elapsed) = timed(&mut self.raytrace, &mut ctx)?;
            timings.raytrace = elapsed;
            stats += pass_stats;
            backend.resource_barrier(
                cmd,
                &[ResourceBarrier::UnorderedAccess {
                    resource: NativeResource::Texture(pool.native_texture(targets.hdr)?),
                }],
            );
        }

        transition(
            backend,
            pool,
            cmd,
            &[
                (targets.hdr, ResourceState::UnorderedAccess),
                (targets.output, ResourceState::UnorderedAccess),
            ],
        )?;
        {
            let mut ctx = PassContext {
                backend: &mut *backend,
                cmd,
                cache,
                pool,
                scene,
                buffers,
                targets,
                parameters,
            };
            let (pass_stats, elapsed) = timed(&mut self.tonemap, &mut ctx)?;
            timings.tonemap = elapsed;
            stats += pass_stats;
        }
        transition(backend, pool, cmd, &[(targets.output, ResourceState::CopySource)])?;

        self.timings = timings;
        self.last_stats = stats;
        Ok(RecordedFrame { cmd, stats })
    }

    /// Execute a recorded frame on the direct queue
    pub fn submit<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        queues: &mut CommandQueues,
        pool: &mut ResourcePool,
        frame: RecordedFrame,
    ) -> RendererResult<crate::backend::FenceValue> {
        self.advance(FrameState::Submitted)?;
        let fence = match queues.execute(backend, QueueType::Direct, frame.cmd) {
            Ok(fence) => fence,
            Err(err) => {
                self.state = FrameState::Idle;
                return Err(err.into());
            }
        };
        pool.mark_submitted(fence);
        self.last_fence = Some(fence);
        Ok(fence)
    }

    /// Wait for the submitted frame and return to `Idle`
    pub fn complete_frame<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        queues: &mut CommandQueues,
    ) -> RendererResult<()> {
        if let Some(fence) = self.last_fence {
            queues.wait_for_fence(backend, QueueType::Direct, fence)?;
        }
        self.advance(FrameState::Idle)
    }

    fn upload_constants<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        pool: &mut ResourcePool,
        cmd: CommandList,
        scene: &RenderScene,
        parameters: &FrameParameters,
    ) -> RendererResult<()> {
        let camera = scene.camera.gpu_data(parameters.frame_number);
        let scene_parameters = GpuSceneParameters::new(
            &scene.directional_light,
            &scene.environment_light,
            parameters.shadows,
        );
        let shadow_camera = GpuShadowCamera {
            shadow_matrix: scene_parameters.shadow_matrix,
        };

        let target = ResourceState::GenericRead;
        pool.upload(backend, cmd, self.targets.camera, bytemuck::bytes_of(&camera), target)?;
        pool.upload(
            backend,
            cmd,
            self.targets.scene,
            bytemuck::bytes_of(&scene_parameters),
            target,
        )?;
        pool.upload(
            backend,
            cmd,
            self.targets.shadow_camera,
            bytemuck::bytes_of(&shadow_camera),
            target,
        )?;
        Ok(())
    }

    pub fn targets(&self) -> &FrameTargets {
        &self.targets
    }

    pub fn timings(&self) -> PassTimings {
        self.timings
    }

    pub fn last_stats(&self) -> PassStats {
        self.last_stats
    }

    pub fn last_fence(&self) -> Option<crate::backend::FenceValue> {
        self.last_fence
    }

    pub fn forward(&self) -> &ForwardPass {
        &self.forward
    }

    pub fn forward_mut(&mut self) -> &mut ForwardPass {
        &mut self.forward
    }

    pub fn shadow_mut(&mut self) -> &mut ShadowMapPass {
        &mut self.shadow
    }

    pub fn skybox_mut(&mut self) -> &mut SkyboxPass {
        &mut self.skybox
    }

    pub fn raytrace_mut(&mut self) -> &mut RaytracePass {
        &mut self.raytrace
    }

    pub fn tonemap_mut(&mut self) -> &mut TonemapPass {
        &mut self.tonemap
    }

    pub fn set_raytracing(&mut self, requested: bool) {
        self.raytracing_requested = requested;
    }
}

/// Advance inside `record_passes` without borrowing all of `self`
fn checked_next(current: FrameState, to: FrameState) -> RendererResult<FrameState> {
    let expected = current.next();
    if to != expected {
        return Err(RendererError::FrameOutOfOrder {
            expected,
            found: to,
        });
    }
    Ok(to)
}

fn timed<B: GraphicsBackend, P: RenderPass<B>>(
    pass: &mut P,
    ctx: &mut PassContext<'_, B>,
) -> RendererResult<(PassStats, Duration)> {
    let start = Instant::now();
    let stats = pass.record(ctx)?;
    let elapsed = start.elapsed();
    log::trace!("Recorded {} pass in {:?}: {:?}", pass.name(), elapsed, stats);
    Ok((stats, elapsed))
}

/// Record the barriers that move textures into the given states
fn transition<B: GraphicsBackend>(
    backend: &mut B,
    pool: &mut ResourcePool,
    cmd: CommandList,
    transitions: &[(TextureHandle, ResourceState)],
) -> RendererResult<()> {
    let mut barriers = Vec::with_capacity(transitions.len());
    for &(texture, state) in transitions {
        if let Some(barrier) = pool.transition_texture(texture, state)? {
            barriers.push(barrier);
        }
    }
    if !barriers.is_empty() {
        backend.resource_barrier(cmd, &barriers);
    }
    Ok(())
}
