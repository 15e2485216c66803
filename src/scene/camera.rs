//! Scene camera and its constant buffer

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Perspective camera looking from `position` at `target`
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Default::default()
        }
    }

    pub fn set_aspect(&mut self, width: f32, height: f32) {
        if height > 0.0 {
            self.aspect = width / height;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Right-handed, depth in 0..1
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Clip space to world-space view direction, ignoring the camera position
    pub fn sky_matrix(&self) -> Mat4 {
        let mut rotation = self.view_matrix();
        rotation.w_axis = glam::Vec4::W;
        (self.projection_matrix() * rotation).inverse()
    }

    pub fn gpu_data(&self, frame_number: u32) -> GpuCamera {
        let view = self.view_matrix();
        let projection = self.projection_matrix();
        GpuCamera {
            view_projection: projection * view,
            view,
            projection,
            sky: self.sky_matrix(),
            position: self.position.to_array(),
            frame_number,
        }
    }
}

/// Camera constant buffer (b0), laid out as `Camera` in forward.wgsl
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuCamera {
    pub view_projection: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub sky: Mat4,
    pub position: [f32; 3],
    pub frame_number: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_camera_layout() {
        assert_eq!(std::mem::size_of::<GpuCamera>(), 272);
        assert_eq!(std::mem::size_of::<GpuCamera>() % 16, 0);
    }

    #[test]
    fn test_target_projects_to_screen_center() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let clip = camera.view_projection_matrix() * Vec3::ZERO.extend(1.0);
        let ndc = clip / clip.w;

        assert!(ndc.x.abs() < 1e-5);
        assert!(ndc.y.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn test_zero_height_keeps_aspect() {
        let mut camera = Camera::default();
        camera.set_aspect(640.0, 0.0);
        assert_eq!(camera.aspect, 16.0 / 9.0);

        camera.set_aspect(640.0, 480.0);
        assert_eq!(camera.aspect, 640.0 / 480.0);
    }

    #[test]
    fn test_sky_matrix_ignores_position() {
        let near = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let far = Camera::new(Vec3::new(100.0, 0.0, 5.0), Vec3::new(100.0, 0.0, 0.0));

        // Screen center looks along -Z from either position
        for camera in [near, far] {
            let point = camera.sky_matrix() * glam::Vec4::new(0.0, 0.0, 1.0, 1.0);
            let direction = (point.truncate() / point.w).normalize();
            assert!((direction - Vec3::NEG_Z).length() < 1e-3, "{direction}");
        }
    }

    #[test]
    fn test_gpu_data_carries_frame_number() {
        let data = Camera::default().gpu_data(7);
        assert_eq!(data.frame_number, 7);
        assert_eq!(data.position, [0.0, 2.0, 5.0]);
    }
}
