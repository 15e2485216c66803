//! Shared fixtures for the integration tests.
//!
//! Every test runs on the dummy backend, so nothing here needs a GPU.

#![allow(dead_code)]

use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::Once;

use glam::{Mat4, Vec3, Vec4};
use log::{Level, Log, Metadata, Record};
use scene_renderer::backend::DummyBackend;
use scene_renderer::scene::{Material, Mesh, Model, Primitive, RenderScene};
use scene_renderer::{BackendType, Renderer, RendererConfig};

// ============================================================================
// Log capture
// ============================================================================

thread_local! {
    static CAPTURED: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

/// Logger that keeps records per test thread, so parallel tests don't see
/// each other's output.
struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        CAPTURED.with(|captured| {
            captured
                .borrow_mut()
                .push((record.level(), record.args().to_string()))
        });
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INIT: Once = Once::new();

/// Install the capturing logger and forget anything logged so far on this thread
pub fn capture_logs() {
    INIT.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });
    CAPTURED.with(|captured| captured.borrow_mut().clear());
}

/// Messages logged on this thread at exactly `level`
pub fn logged(level: Level) -> Vec<String> {
    CAPTURED.with(|captured| {
        captured
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message.clone())
            .collect()
    })
}

// ============================================================================
// Renderer and scene fixtures
// ============================================================================

/// Small dummy-backed configuration that reads shaders from `shader_root`
pub fn test_config(shader_root: PathBuf) -> RendererConfig {
    RendererConfig {
        backend: BackendType::Dummy,
        width: 320,
        height: 240,
        shadow_map_size: 256,
        shader_root,
        ..Default::default()
    }
}

pub fn dummy_renderer() -> Renderer<DummyBackend> {
    dummy_renderer_with(test_config(PathBuf::from("no-such-shader-root")))
}

pub fn dummy_renderer_with(config: RendererConfig) -> Renderer<DummyBackend> {
    Renderer::with_backend(DummyBackend::new(), config).expect("dummy renderer")
}

pub fn red() -> Material {
    Material::new("red").with_base_color(Vec4::new(1.0, 0.0, 0.0, 1.0))
}

pub fn blue() -> Material {
    Material::new("blue").with_base_color(Vec4::new(0.0, 0.0, 1.0, 1.0))
}

/// One model holding a cube for each entry of `primitive_materials`
pub fn cubes(materials: Vec<Material>, primitive_materials: &[Option<usize>]) -> RenderScene {
    let mut mesh = Mesh::new("cubes");
    for (i, material) in primitive_materials.iter().enumerate() {
        mesh = mesh.with_primitive(Primitive::cube(&format!("cube{}", i), *material));
    }

    let mut model = Model::new("model").with_mesh(mesh);
    for material in materials {
        model = model.with_material(material);
    }
    RenderScene::new().with_model(model)
}

/// Two models sharing nothing, so offsets run across model boundaries
pub fn two_models() -> RenderScene {
    let first = Model::new("floor")
        .with_material(red())
        .with_mesh(Mesh::new("floor").with_primitive(Primitive::plane("floor", 10.0, 10.0, Some(0))));
    let second = Model::new("crates")
        .with_transform(Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)))
        .with_material(blue())
        .with_mesh(
            Mesh::new("crates")
                .with_primitive(Primitive::cube("a", Some(0)))
                .with_primitive(Primitive::cube("b", Some(0))),
        );
    RenderScene::new().with_model(first).with_model(second)
}
