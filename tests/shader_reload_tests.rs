//! Shader hot reload from a shader root directory.

mod common;

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::time::{Duration, SystemTime};

use common::{capture_logs, cubes, dummy_renderer_with, logged, red, test_config};
use log::Level;

const FORWARD_SOURCE: &str = include_str!("../src/shader/forward.wgsl");

/// Rewrite a file and push its modification time forward, so the change is
/// seen even on filesystems with coarse timestamps.
fn rewrite(path: &Path, contents: &str, seconds_ahead: u64) {
    fs::write(path, contents).unwrap();
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(seconds_ahead))
        .unwrap();
}

#[test]
fn test_unchanged_sources_reload_nothing() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("forward.wgsl"), FORWARD_SOURCE).unwrap();
    let mut renderer = dummy_renderer_with(test_config(root.path().to_path_buf()));
    let mut scene = cubes(vec![red()], &[Some(0)]);
    renderer.prepare_scene(&mut scene).unwrap();

    assert_eq!(renderer.reload_changed_shaders(&mut scene), 0);
}

#[test]
fn test_edited_shader_is_recompiled() {
    let root = tempfile::tempdir().unwrap();
    let path = root.path().join("forward.wgsl");
    fs::write(&path, FORWARD_SOURCE).unwrap();
    let mut renderer = dummy_renderer_with(test_config(root.path().to_path_buf()));
    let mut scene = cubes(vec![red()], &[Some(0)]);
    renderer.prepare_scene(&mut scene).unwrap();

    rewrite(&path, &format!("{}\n// edited\n", FORWARD_SOURCE), 10);
    capture_logs();

    // Vertex and pixel entry points of the forward shader
    assert_eq!(renderer.reload_changed_shaders(&mut scene), 2);
    assert!(logged(Level::Info)
        .iter()
        .any(|message| message.starts_with("Reloaded shader")));
    assert!(scene.primitives().all(|item| item.primitive.pipeline.is_ready()));

    // Reported once
    assert_eq!(renderer.reload_changed_shaders(&mut scene), 0);

    renderer.render_frame(&scene).unwrap();
    assert_eq!(renderer.stats().draws, 1);
}

#[test]
fn test_broken_edit_keeps_previous_shader() {
    let root = tempfile::tempdir().unwrap();
    let path = root.path().join("forward.wgsl");
    fs::write(&path, FORWARD_SOURCE).unwrap();
    let mut renderer = dummy_renderer_with(test_config(root.path().to_path_buf()));
    let mut scene = cubes(vec![red()], &[Some(0)]);
    renderer.prepare_scene(&mut scene).unwrap();
    let before: Vec<_> = scene
        .primitives()
        .map(|item| item.primitive.pipeline.id())
        .collect();

    rewrite(&path, "fn vs_main( {", 10);
    capture_logs();

    assert_eq!(renderer.reload_changed_shaders(&mut scene), 0);
    assert!(!logged(Level::Error).is_empty());

    let after: Vec<_> = scene
        .primitives()
        .map(|item| item.primitive.pipeline.id())
        .collect();
    assert_eq!(before, after);

    // The failed source isn't retried until it changes again
    assert_eq!(renderer.reload_changed_shaders(&mut scene), 0);

    renderer.render_frame(&scene).unwrap();
    assert_eq!(renderer.stats().draws, 1);

    rewrite(&path, FORWARD_SOURCE, 20);
    assert_eq!(renderer.reload_changed_shaders(&mut scene), 2);
}

#[test]
fn test_override_file_added_later_is_picked_up() {
    let root = tempfile::tempdir().unwrap();
    let mut renderer = dummy_renderer_with(test_config(root.path().to_path_buf()));
    let mut scene = cubes(vec![red()], &[Some(0)]);
    renderer.prepare_scene(&mut scene).unwrap();

    // Built-in forward shader in use, nothing to reload yet
    assert_eq!(renderer.reload_changed_shaders(&mut scene), 0);

    fs::write(
        root.path().join("forward.wgsl"),
        format!("{}\n// override\n", FORWARD_SOURCE),
    )
    .unwrap();

    assert_eq!(renderer.reload_changed_shaders(&mut scene), 2);
    assert!(scene.primitives().all(|item| item.primitive.pipeline.is_ready()));
    assert_eq!(renderer.reload_changed_shaders(&mut scene), 0);
}
