//! Render passes and per-frame orchestration
//!
//! A frame runs a fixed sequence: shadow map, forward opaque, skybox,
//! optional raytrace, tonemap. Each pass records into the frame's command
//! list through a [`PassContext`]; the [`FrameOrchestrator`] owns the order
//! and the resource transitions between passes.
//!
//! [`MipGenerator`] and [`CubemapConverter`] are compute passes too, but run
//! once while a scene is uploaded rather than every frame.

mod cubemap;
mod forward;
mod mips;
mod orchestrator;
mod raytrace;
mod shadow;
mod skybox;
mod tonemap;

pub use cubemap::*;
pub use forward::*;
pub use mips::*;
pub use orchestrator::*;
pub use raytrace::*;
pub use shadow::*;
pub use skybox::*;
pub use tonemap::*;

use crate::backend::{
    CommandList, GraphicsBackend, NativePipeline, NativeSignature, ScissorRect, Viewport,
};
use crate::pipeline::{CompileError, PipelineCache, PipelineId};
use crate::resources::ResourcePool;
use crate::scene::{RenderScene, SceneBuffers};
use crate::{RendererError, RendererResult, TonemapSettings};
use std::time::Duration;

/// Everything a pass may read while recording
pub struct PassContext<'a, B: GraphicsBackend> {
    pub backend: &'a mut B,
    pub cmd: CommandList,
    pub cache: &'a PipelineCache,
    pub pool: &'a ResourcePool,
    pub scene: &'a RenderScene,
    pub buffers: &'a SceneBuffers,
    pub targets: &'a FrameTargets,
    pub parameters: &'a FrameParameters,
}

/// A stage of the frame
pub trait RenderPass<B: GraphicsBackend> {
    /// Name of the pass, used in logs and command list markers
    fn name(&self) -> &'static str;

    /// Record the pass into `ctx.cmd`
    fn record(&mut self, ctx: &mut PassContext<'_, B>) -> RendererResult<PassStats>;
}

/// Work recorded by one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub draws: u32,
    /// Primitives left out because they have no usable pipeline
    pub skipped: u32,
    pub dispatches: u32,
}

impl std::ops::AddAssign for PassStats {
    fn add_assign(&mut self, other: Self) {
        self.draws += other.draws;
        self.skipped += other.skipped;
        self.dispatches += other.dispatches;
    }
}

/// Per-frame inputs that are not part of the scene
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameParameters {
    pub frame_number: u32,
    pub viewport: Viewport,
    pub scissor: ScissorRect,
    pub tonemap: TonemapSettings,
    pub shadows: bool,
}

impl FrameParameters {
    pub fn new(frame_number: u32, width: u32, height: u32) -> Self {
        Self {
            frame_number,
            viewport: Viewport::full(width, height),
            scissor: ScissorRect::full(width, height),
            tonemap: TonemapSettings::default(),
            shadows: true,
        }
    }
}

/// CPU time spent recording each pass of the last frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassTimings {
    pub shadow: Duration,
    pub forward: Duration,
    pub skybox: Duration,
    pub raytrace: Duration,
    pub tonemap: Duration,
}

impl PassTimings {
    pub fn total(&self) -> Duration {
        self.shadow + self.forward + self.skybox + self.raytrace + self.tonemap
    }
}

/// Recording state of the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Idle,
    RecordingShadowPass,
    /// Forward opaque, then the skybox behind it
    RecordingForwardPass,
    /// Raytrace (when active) and tonemap
    RecordingPostPass,
    /// The frame's commands are on the GPU
    Submitted,
}

impl FrameState {
    /// The only state this one may move to
    pub fn next(self) -> FrameState {
        match self {
            FrameState::Idle => FrameState::RecordingShadowPass,
            FrameState::RecordingShadowPass => FrameState::RecordingForwardPass,
            FrameState::RecordingForwardPass => FrameState::RecordingPostPass,
            FrameState::RecordingPostPass => FrameState::Submitted,
            FrameState::Submitted => FrameState::Idle,
        }
    }
}

/// Thread groups needed to cover `size` with groups of `group_size`
pub(crate) fn group_count(size: u32, group_size: u32) -> u32 {
    size.div_ceil(group_size)
}

/// Native pipeline and signature of a pass pipeline that must be cached
pub(crate) fn resolve_pipeline(
    cache: &PipelineCache,
    id: PipelineId,
    pass: &str,
) -> RendererResult<(NativePipeline, NativeSignature)> {
    cache.resolve(id).ok_or_else(|| {
        RendererError::Compile(CompileError::InvalidConfiguration {
            pipeline: pass.to_string(),
            reason: format!("{:?} is not in the pipeline cache", id),
        })
    })
}
