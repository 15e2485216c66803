//! Scene description: camera, lights, models and the merged GPU buffers

mod camera;
mod light;
mod material;
mod mesh;
mod model;
mod render_scene;

pub use camera::*;
pub use light::*;
pub use material::*;
pub use mesh::*;
pub use model::*;
pub use render_scene::*;
