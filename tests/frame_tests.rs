//! End-to-end frame tests on the dummy backend.
//!
//! These drive a full [`Renderer`] and inspect the command lists the dummy
//! backend recorded.
//!
//! ```bash
//! cargo test --test frame_tests
//! ```

mod common;

use common::{blue, capture_logs, cubes, dummy_renderer, logged, red, two_models};
use glam::{Vec2, Vec3, Vec4};
use log::Level;
use scene_renderer::backend::{DummyBackend, QueueType, RecordedCommand, TextureFormat};
use scene_renderer::passes::{FrameState, PipelineReport};
use scene_renderer::resources::TextureData;
use scene_renderer::scene::{
    EnvironmentLight, Material, Mesh, Model, Primitive, RenderScene, TextureSlot, Vertex,
};
use scene_renderer::{GraphicsBackend, Renderer, RendererError};

/// Indexed draws of the last submitted frame, in recording order
fn frame_draws(renderer: &Renderer<DummyBackend>) -> Vec<(std::ops::Range<u32>, i32)> {
    let frame = renderer
        .backend()
        .submitted()
        .iter()
        .rev()
        .find(|list| list.label == "frame")
        .expect("a submitted frame");
    frame
        .commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::DrawIndexed {
                indices,
                base_vertex,
                ..
            } => Some((indices.clone(), *base_vertex)),
            _ => None,
        })
        .collect()
}

/// Commands of the last submitted list with `label`
fn last_list<'a>(renderer: &'a Renderer<DummyBackend>, label: &str) -> &'a [RecordedCommand] {
    renderer
        .backend()
        .submitted()
        .iter()
        .rev()
        .find(|list| list.label == label)
        .map(|list| list.commands.as_slice())
        .unwrap_or_default()
}

fn dispatch_count(commands: &[RecordedCommand]) -> usize {
    commands
        .iter()
        .filter(|command| matches!(command, RecordedCommand::Dispatch { .. }))
        .count()
}

fn rgba8(name: &str, width: u32, height: u32, data_len: usize) -> TextureData {
    TextureData {
        width,
        height,
        format: TextureFormat::Rgba8UnormSrgb,
        data: vec![180; data_len],
        name: name.to_string(),
    }
}

fn textured_cube(texture: TextureData) -> RenderScene {
    let mut material = red();
    material.set_texture(TextureSlot::Albedo, texture);
    RenderScene::new().with_model(
        Model::new("textured")
            .with_material(material)
            .with_mesh(Mesh::new("box").with_primitive(Primitive::cube("box", Some(0)))),
    )
}

// ============================================================================
// Primitive rejection
// ============================================================================

#[test]
fn test_bad_primitive_is_reported_once_and_skipped() {
    let mut renderer = dummy_renderer();
    let mut scene = cubes(vec![red()], &[Some(0), Some(9), Some(0)]);

    capture_logs();
    let report = renderer.prepare_scene(&mut scene).unwrap();
    assert_eq!(report, PipelineReport { ready: 2, rejected: 1 });

    for _ in 0..3 {
        renderer.render_frame(&scene).unwrap();
    }

    let warnings = logged(Level::Warn);
    assert_eq!(warnings.len(), 1, "warnings: {:?}", warnings);
    assert!(warnings[0].contains("cube1"));

    let stats = renderer.stats();
    assert_eq!(stats.draws, 2);
    assert_eq!(stats.skipped, 1);
}

#[test]
fn test_primitive_without_material_is_skipped() {
    let mut renderer = dummy_renderer();
    let mut scene = cubes(vec![red()], &[None, Some(0)]);

    renderer.prepare_scene(&mut scene).unwrap();
    renderer.render_frame(&scene).unwrap();

    let stats = renderer.stats();
    assert_eq!(stats.draws, 1);
    assert_eq!(stats.skipped, 1);
}

#[test]
fn test_same_state_materials_share_pipeline() {
    let mut renderer = dummy_renderer();
    let mut scene = cubes(vec![red(), blue()], &[Some(0), Some(1)]);

    renderer.prepare_scene(&mut scene).unwrap();

    let ids: Vec<_> = scene
        .primitives()
        .map(|item| item.primitive.pipeline.id().unwrap())
        .collect();
    assert_eq!(ids[0], ids[1]);
    assert!(renderer.stats().cache.hits >= 1);
}

// ============================================================================
// Frame lifecycle
// ============================================================================

#[test]
fn test_frame_state_follows_submission() {
    let mut renderer = dummy_renderer();
    let mut scene = cubes(vec![red()], &[Some(0)]);
    renderer.prepare_scene(&mut scene).unwrap();
    assert_eq!(renderer.frame_state(), FrameState::Idle);

    renderer.render_frame(&scene).unwrap();
    assert_eq!(renderer.frame_state(), FrameState::Submitted);

    // The next frame completes the previous one first
    renderer.render_frame(&scene).unwrap();
    assert_eq!(renderer.frame_state(), FrameState::Submitted);
    assert_eq!(renderer.frame_number(), 2);

    renderer.flush().unwrap();
    assert_eq!(renderer.frame_state(), FrameState::Idle);
}

#[test]
fn test_unprepared_scene_is_rejected() {
    let mut renderer = dummy_renderer();
    let scene = cubes(vec![red()], &[Some(0)]);

    let result = renderer.render_frame(&scene);
    assert!(matches!(result, Err(RendererError::SceneNotPrepared)));
    assert_eq!(renderer.frame_state(), FrameState::Idle);
}

#[test]
fn test_frame_fences_increase() {
    let mut renderer = dummy_renderer();
    let mut scene = cubes(vec![red()], &[Some(0)]);
    renderer.prepare_scene(&mut scene).unwrap();

    let first = renderer.render_frame(&scene).unwrap();
    let second = renderer.render_frame(&scene).unwrap();
    assert!(second > first);
    assert_eq!(renderer.stats().last_fence, second);

    // Starting the second frame waited for the first
    let completed = renderer.backend().completed_fence_value(QueueType::Direct);
    assert!(completed >= first);
}

#[test]
fn test_empty_scene_renders_without_draws() {
    let mut renderer = dummy_renderer();
    let mut scene = RenderScene::new();

    renderer.prepare_scene(&mut scene).unwrap();
    renderer.render_frame(&scene).unwrap();

    assert_eq!(renderer.stats().draws, 0);
    assert!(frame_draws(&renderer).is_empty());
}

// ============================================================================
// Merged buffers
// ============================================================================

#[test]
fn test_draws_use_prefix_offsets() {
    let mut renderer = dummy_renderer();
    let mut scene = two_models();
    renderer.prepare_scene(&mut scene).unwrap();

    let offsets: Vec<_> = scene
        .primitives()
        .map(|item| (item.primitive.vertices_before(), item.primitive.indices_before()))
        .collect();
    // Plane: 4 vertices, 6 indices. Cube: 24 vertices, 36 indices.
    assert_eq!(offsets, vec![(0, 0), (4, 6), (28, 42)]);

    renderer.render_frame(&scene).unwrap();
    let draws = frame_draws(&renderer);
    // Shadow draws come first, the forward pass repeats them
    assert_eq!(draws.len(), 6);
    assert_eq!(
        draws[3..].to_vec(),
        vec![(0..6, 0), (6..42, 4), (42..78, 28)]
    );
}

#[test]
fn test_prepare_twice_replaces_buffers() {
    let mut renderer = dummy_renderer();
    let mut scene = two_models();

    renderer.prepare_scene(&mut scene).unwrap();
    let buffers_after_first = renderer.pool().buffer_count();
    renderer.prepare_scene(&mut scene).unwrap();
    assert_eq!(renderer.pool().buffer_count(), buffers_after_first);

    renderer.release_scene(&mut scene).unwrap();
    assert!(scene.buffers().is_none());
    assert!(renderer.pool().buffer_count() < buffers_after_first);
}

#[test]
fn test_shadows_can_be_disabled() {
    let mut config = common::test_config("no-such-shader-root".into());
    config.shadows = false;
    let mut renderer = common::dummy_renderer_with(config);
    let mut scene = two_models();

    renderer.prepare_scene(&mut scene).unwrap();
    renderer.render_frame(&scene).unwrap();

    assert_eq!(frame_draws(&renderer).len(), 3);
}

#[test]
fn test_non_indexed_primitive_draws_next_to_indexed_ones() {
    let mut config = common::test_config("no-such-shader-root".into());
    config.shadows = false;
    let mut renderer = common::dummy_renderer_with(config);
    let corner = |x: f32, y: f32| Vertex::new(Vec3::new(x, y, 0.0), Vec3::Z, Vec4::X, Vec2::ZERO);
    let triangle = Primitive::new(
        "triangle",
        vec![corner(0.0, 0.0), corner(1.0, 0.0), corner(0.0, 1.0)],
        Vec::new(),
        Some(0),
    );
    let mut scene = RenderScene::new().with_model(
        Model::new("mixed").with_material(Material::new("plain")).with_mesh(
            Mesh::new("mixed")
                .with_primitive(triangle)
                .with_primitive(Primitive::cube("cube", Some(0))),
        ),
    );

    renderer.prepare_scene(&mut scene).unwrap();
    renderer.render_frame(&scene).unwrap();

    let draws: Vec<_> = last_list(&renderer, "frame")
        .iter()
        .filter(|command| command.is_draw())
        .cloned()
        .collect();
    assert_eq!(
        draws,
        vec![
            RecordedCommand::Draw {
                vertices: 0..3,
                instances: 0..1,
            },
            RecordedCommand::DrawIndexed {
                indices: 0..36,
                base_vertex: 3,
                instances: 0..1,
            },
        ]
    );
}

// ============================================================================
// Textures and sky
// ============================================================================

#[test]
fn test_texture_that_fails_to_upload_is_not_kept() {
    let mut renderer = dummy_renderer();
    let targets_only = renderer.pool().texture_count();
    // 4x4 RGBA8 needs 64 bytes
    let mut scene = textured_cube(rgba8("short", 4, 4, 4));

    capture_logs();
    renderer.prepare_scene(&mut scene).unwrap();
    assert_eq!(renderer.pool().texture_count(), targets_only);
    assert!(logged(Level::Warn)
        .iter()
        .any(|message| message.contains("short")));

    renderer.render_frame(&scene).unwrap();
    renderer.release_scene(&mut scene).unwrap();
    assert_eq!(renderer.pool().texture_count(), targets_only);
}

#[test]
fn test_textures_get_their_mip_chains_on_upload() {
    let mut renderer = dummy_renderer();
    let mut scene = textured_cube(rgba8("albedo", 8, 8, 256));

    renderer.prepare_scene(&mut scene).unwrap();

    // 8x8 has three levels below the uploaded one
    assert_eq!(dispatch_count(last_list(&renderer, "scene upload")), 3);
    let texture = scene.buffers().unwrap().textures[0];
    assert_eq!(
        renderer.pool().texture_descriptor(texture).unwrap().mip_levels,
        4
    );
}

#[test]
fn test_mip_generation_can_be_disabled() {
    let mut config = common::test_config("no-such-shader-root".into());
    config.generate_mips = false;
    let mut renderer = common::dummy_renderer_with(config);
    let mut scene = textured_cube(rgba8("albedo", 8, 8, 256));

    renderer.prepare_scene(&mut scene).unwrap();

    assert_eq!(dispatch_count(last_list(&renderer, "scene upload")), 0);
    let texture = scene.buffers().unwrap().textures[0];
    assert_eq!(
        renderer.pool().texture_descriptor(texture).unwrap().mip_levels,
        1
    );
}

#[test]
fn test_sky_is_drawn_after_the_geometry() {
    let mut config = common::test_config("no-such-shader-root".into());
    config.environment_map_size = 32;
    let mut renderer = common::dummy_renderer_with(config);
    let targets_only = renderer.pool().texture_count();
    let mut scene = cubes(vec![red()], &[Some(0)]);
    scene.environment_light = EnvironmentLight::default().with_sky(rgba8("sky", 8, 4, 128));

    renderer.prepare_scene(&mut scene).unwrap();
    assert!(last_list(&renderer, "scene upload")
        .contains(&RecordedCommand::Dispatch { x: 4, y: 4, z: 6 }));

    renderer.render_frame(&scene).unwrap();
    assert_eq!(renderer.stats().draws, 2);
    let frame = last_list(&renderer, "frame");
    let draws: Vec<_> = frame.iter().filter(|command| command.is_draw()).collect();
    assert_eq!(
        draws.last(),
        Some(&&RecordedCommand::Draw {
            vertices: 0..3,
            instances: 0..1,
        })
    );
    // The cube is drawn by the shadow and forward passes before the sky
    assert_eq!(draws.len(), 3);

    renderer.release_scene(&mut scene).unwrap();
    assert_eq!(renderer.pool().texture_count(), targets_only);
}

#[test]
fn test_unreadable_sky_is_left_out() {
    let mut renderer = dummy_renderer();
    let mut scene = cubes(vec![red()], &[Some(0)]);
    scene.environment_light = EnvironmentLight::default().with_sky(rgba8("sky", 8, 4, 3));

    capture_logs();
    renderer.prepare_scene(&mut scene).unwrap();
    renderer.render_frame(&scene).unwrap();

    assert!(scene.buffers().unwrap().environment.is_none());
    assert_eq!(renderer.stats().draws, 1);
    assert!(logged(Level::Warn)
        .iter()
        .any(|message| message.contains("Sky 'sky' disabled")));
}
