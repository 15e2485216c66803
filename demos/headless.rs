//! # Headless Demo
//!
//! Renders a small scene without a window:
//! - A floor plane and a few cubes with two materials
//! - Shadow map, forward HDR and tonemap passes every frame
//! - Optional albedo texture loaded from disk
//! - Shader hot reload between frames when `--shader-root` holds edited sources
//!
//! ```bash
//! cargo run --example headless -- --backend dummy --frames 10
//! RUST_LOG=debug cargo run --example headless -- --tonemap aces
//! ```

use std::path::PathBuf;

use clap::Parser;
use glam::{Mat4, Vec3, Vec4};
use scene_renderer::scene::{
    Camera, DirectionalLight, Material, Mesh, Model, Primitive, RenderScene, TextureSlot,
};
use scene_renderer::{
    BackendType, Renderer, RendererConfig, RendererResult, TonemapMethod, TonemapSettings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// Native Vulkan device via ash
    #[default]
    Vulkan,
    /// No GPU, commands are only recorded
    Dummy,
}

impl From<CliBackend> for BackendType {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Vulkan => BackendType::Vulkan,
            CliBackend::Dummy => BackendType::Dummy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliTonemap {
    None,
    Reinhard,
    #[default]
    Aces,
}

impl From<CliTonemap> for TonemapMethod {
    fn from(cli: CliTonemap) -> Self {
        match cli {
            CliTonemap::None => TonemapMethod::None,
            CliTonemap::Reinhard => TonemapMethod::Reinhard,
            CliTonemap::Aces => TonemapMethod::Aces,
        }
    }
}

/// Render a test scene offscreen
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, value_enum, default_value_t)]
    backend: CliBackend,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Number of frames to render
    #[arg(long, default_value_t = 3)]
    frames: u32,

    #[arg(long, value_enum, default_value_t)]
    tonemap: CliTonemap,

    #[arg(long, default_value_t = 1.0)]
    exposure: f32,

    /// Disable the shadow map pass
    #[arg(long)]
    no_shadows: bool,

    /// Directory whose WGSL files override the built-in shaders
    #[arg(long, default_value = "shaders")]
    shader_root: PathBuf,

    /// Image used as the albedo texture of the cubes
    #[arg(long)]
    texture: Option<PathBuf>,
}

fn build_scene(args: &Args) -> RenderScene {
    let mut cube_material = Material::new("painted").with_base_color(Vec4::new(0.8, 0.3, 0.2, 1.0));
    if let Some(path) = &args.texture {
        cube_material.load_texture(TextureSlot::Albedo, path);
    }

    let floor = Model::new("floor")
        .with_material(Material::new("concrete").with_base_color(Vec4::splat(0.6)))
        .with_mesh(Mesh::new("floor").with_primitive(Primitive::plane("floor", 20.0, 20.0, Some(0))));

    let mut cubes = Model::new("cubes")
        .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.5, 0.0)))
        .with_material(cube_material);
    for i in 0..4 {
        let x = i as f32 * 1.5 - 2.25;
        cubes = cubes.with_mesh(
            Mesh::new(&format!("cube{}", i))
                .with_transform(Mat4::from_translation(Vec3::new(x, 0.0, 0.0)))
                .with_primitive(Primitive::cube(&format!("cube{}", i), Some(0))),
        );
    }

    let mut scene = RenderScene::new().with_model(floor).with_model(cubes);
    scene.camera = Camera::new(Vec3::new(0.0, 4.0, 8.0), Vec3::ZERO);
    scene.camera.set_aspect(args.width as f32, args.height as f32);
    scene.directional_light = DirectionalLight::new(Vec3::new(-0.4, -1.0, -0.3), Vec3::ONE, 3.0);
    scene
}

fn main() -> RendererResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut renderer = Renderer::new(RendererConfig {
        backend: args.backend.into(),
        width: args.width,
        height: args.height,
        tonemap: TonemapSettings {
            method: args.tonemap.into(),
            exposure: args.exposure,
        },
        shadows: !args.no_shadows,
        shader_root: args.shader_root.clone(),
        ..Default::default()
    })?;

    let mut scene = build_scene(&args);
    let report = renderer.prepare_scene(&mut scene)?;
    log::info!(
        "{} primitives ready, {} rejected",
        report.ready,
        report.rejected
    );

    for _ in 0..args.frames {
        let reloaded = renderer.reload_changed_shaders(&mut scene);
        if reloaded > 0 {
            log::info!("Picked up {} edited shaders", reloaded);
        }
        let fence = renderer.render_frame(&scene)?;
        log::debug!("Frame {} submitted, fence {}", renderer.frame_number(), fence.0);
    }
    renderer.flush()?;

    let stats = renderer.stats();
    let output_format = renderer
        .frame_targets()
        .output_format(renderer.pool());
    log::info!(
        "Rendered {} frames into {:?}: {} draws, {} skipped, {} pipelines ({} hits, {} misses), last frame {:?}",
        renderer.frame_number(),
        output_format,
        stats.draws,
        stats.skipped,
        stats.cache.entries,
        stats.cache.hits,
        stats.cache.misses,
        stats.pass_timings.total()
    );

    renderer.release_scene(&mut scene)?;
    Ok(())
}
