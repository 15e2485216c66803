//! Scene Renderer - a pipeline-caching frame renderer over a pluggable GPU backend
//!
//! The renderer turns a [`scene::RenderScene`] of models, meshes and materials
//! into frames: a shadow map pass, a forward HDR pass with a skybox behind
//! it, an optional raytrace pass and a tonemap pass, recorded in that order by
//! the [`passes::FrameOrchestrator`].
//!
//! Two backends implement [`backend::GraphicsBackend`]:
//! - **Vulkan**: native device via ash and gpu-allocator (feature `vulkan`)
//! - **Dummy**: records commands without a GPU, used for tests and headless runs
//!
//! # Features
//! - Pipeline cache deduplicating identical configurations by fingerprint
//! - Linear descriptor allocation over fixed-capacity heaps
//! - Handle-based resource pool with staged uploads
//! - Merged scene vertex and index buffers with per-primitive offsets
//! - GPU mip chains for material textures and a cubemap sky from an
//!   equirectangular image
//! - WGSL shaders compiled through naga, with hot reload

pub mod backend;
pub mod descriptor;
pub mod error;
pub mod passes;
pub mod pipeline;
pub mod queue;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod shader;

pub use backend::{Backend, DummyBackend, GraphicsBackend};
pub use descriptor::DescriptorBudgets;
pub use error::{RendererError, RendererResult};
pub use renderer::{Renderer, RendererStats};

use backend::TextureFormat;
use std::path::PathBuf;

/// Backend selection for the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Vulkan backend via ash - headless, native only
    Vulkan,
    /// Command-recording backend without a GPU
    Dummy,
}

impl Default for BackendType {
    fn default() -> Self {
        if cfg!(feature = "vulkan") {
            BackendType::Vulkan
        } else {
            BackendType::Dummy
        }
    }
}

/// Tonemapping operator, matching the shader's `tonemap_method` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum TonemapMethod {
    #[default]
    None = 0,
    Reinhard = 1,
    Aces = 2,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonemapSettings {
    pub method: TonemapMethod,
    pub exposure: f32,
}

impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            method: TonemapMethod::default(),
            exposure: 1.0,
        }
    }
}

/// Configuration for initializing the renderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Which backend to use
    pub backend: BackendType,
    /// Render resolution
    pub width: u32,
    pub height: u32,
    /// Capacities of the four descriptor heaps
    pub descriptor_budgets: DescriptorBudgets,
    /// Edge length of the square shadow map
    pub shadow_map_size: u32,
    pub hdr_format: TextureFormat,
    pub depth_format: TextureFormat,
    pub output_format: TextureFormat,
    pub tonemap: TonemapSettings,
    /// Run the raytrace pass when the backend supports it
    pub raytracing: bool,
    pub shadows: bool,
    /// Face size of the cubemap a sky image is converted to
    pub environment_map_size: u32,
    /// Build full mip chains for material textures
    pub generate_mips: bool,
    /// Directory whose WGSL files override the built-in shaders
    pub shader_root: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            width: 1280,
            height: 720,
            descriptor_budgets: DescriptorBudgets::default(),
            shadow_map_size: 4096,
            hdr_format: TextureFormat::Rgba16Float,
            depth_format: TextureFormat::Depth32Float,
            output_format: TextureFormat::Rgba8Unorm,
            tonemap: TonemapSettings::default(),
            raytracing: false,
            shadows: true,
            environment_map_size: 512,
            generate_mips: true,
            shader_root: PathBuf::from("shaders"),
        }
    }
}
