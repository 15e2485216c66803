//! Light types for the scene

use crate::resources::TextureData;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Sun-like light. Its shadow map covers a sphere around `shadow_center`.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub shadow_center: Vec3,
    pub shadow_radius: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.3, -1.0, -0.5).normalize(),
            color: Vec3::ONE,
            intensity: 1.0,
            shadow_center: Vec3::ZERO,
            shadow_radius: 20.0,
        }
    }
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize(),
            color,
            intensity,
            ..Default::default()
        }
    }

    /// Light-space view-projection used to render and sample the shadow map.
    ///
    /// Orthographic, looking along `direction` at `shadow_center`, with depth
    /// covering twice the shadow radius in front of and behind the center.
    pub fn shadow_matrix(&self) -> Mat4 {
        let direction = self.direction.normalize_or_zero();
        let direction = if direction == Vec3::ZERO {
            -Vec3::Y
        } else {
            direction
        };
        let up = if direction.dot(Vec3::Y).abs() > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };

        let radius = self.shadow_radius.max(f32::EPSILON);
        let eye = self.shadow_center - direction * radius * 2.0;
        let view = Mat4::look_at_rh(eye, self.shadow_center, up);
        let projection = Mat4::orthographic_rh(-radius, radius, -radius, radius, 0.0, radius * 4.0);
        projection * view
    }
}

/// Uniform ambient term and an optional sky
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentLight {
    pub ambient_intensity: f32,
    /// Equirectangular sky image, converted to a cubemap when the scene is
    /// prepared and drawn behind the geometry
    pub sky: Option<TextureData>,
    pub sky_intensity: f32,
}

impl Default for EnvironmentLight {
    fn default() -> Self {
        Self {
            ambient_intensity: 0.1,
            sky: None,
            sky_intensity: 1.0,
        }
    }
}

impl EnvironmentLight {
    pub fn with_sky(mut self, sky: TextureData) -> Self {
        self.sky = Some(sky);
        self
    }
}

/// Scene constant buffer, laid out as the shaders' `SceneParameters` struct
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuSceneParameters {
    pub shadow_matrix: Mat4,
    pub directional_light_color: Vec4,
    pub directional_light_direction: Vec4,
    pub directional_light_intensity: f32,
    pub ambient_light_intensity: f32,
    pub shadows_enabled: u32,
    pub pad: u32,
}

impl GpuSceneParameters {
    pub fn new(
        light: &DirectionalLight,
        environment: &EnvironmentLight,
        shadows_enabled: bool,
    ) -> Self {
        Self {
            shadow_matrix: light.shadow_matrix(),
            directional_light_color: light.color.extend(1.0),
            directional_light_direction: light.direction.normalize_or_zero().extend(0.0),
            directional_light_intensity: light.intensity,
            ambient_light_intensity: environment.ambient_intensity,
            shadows_enabled: shadows_enabled as u32,
            pad: 0,
        }
    }
}

/// Shadow pass constant buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuShadowCamera {
    pub shadow_matrix: Mat4,
}
