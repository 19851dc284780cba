// Camera: projection plus view matrices
//
// World space is left-handed with +y pointing down, matching Vulkan clip
// space, so no y-flip is needed in shaders. Depth maps to `[0, 1]`.

use glam::{EulerRot, Mat3, Mat4, Vec3, Vec4};

#[derive(Debug, Clone)]
pub struct Camera {
    projection: Mat4,
    view: Mat4,
    inverse_view: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            inverse_view: Mat4::IDENTITY,
        }
    }
}

impl Camera {
    pub fn set_orthographic_projection(
        &mut self,
        left: f32,
        right: f32,
        top: f32,
        bottom: f32,
        near: f32,
        far: f32,
    ) {
        // glam's bottom/top are swapped because +y points down
        self.projection = Mat4::orthographic_lh(left, right, top, bottom, near, far);
    }

    pub fn set_perspective_projection(&mut self, fov_y: f32, aspect: f32, near: f32, far: f32) {
        if aspect <= f32::EPSILON {
            log::warn!("Ignoring perspective projection with aspect ratio {}", aspect);
            return;
        }
        self.projection = Mat4::perspective_lh(fov_y, aspect, near, far);
    }

    /// Look along `direction` from `position`
    pub fn set_view_direction(&mut self, position: Vec3, direction: Vec3, up: Vec3) {
        let w = direction.normalize();
        let u = w.cross(up).normalize();
        let v = w.cross(u);
        self.set_view_basis(u, v, w, position);
    }

    pub fn set_view_target(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        self.set_view_direction(position, target - position, up);
    }

    /// View from Tait-Bryan angles applied in Y, X, Z order
    pub fn set_view_yxz(&mut self, position: Vec3, rotation: Vec3) {
        let basis = Mat3::from_euler(EulerRot::YXZ, rotation.y, rotation.x, rotation.z);
        self.set_view_basis(basis.x_axis, basis.y_axis, basis.z_axis, position);
    }

    fn set_view_basis(&mut self, u: Vec3, v: Vec3, w: Vec3, position: Vec3) {
        self.view = Mat4::from_cols(
            Vec4::new(u.x, v.x, w.x, 0.0),
            Vec4::new(u.y, v.y, w.y, 0.0),
            Vec4::new(u.z, v.z, w.z, 0.0),
            Vec4::new(-u.dot(position), -v.dot(position), -w.dot(position), 1.0),
        );
        self.inverse_view = Mat4::from_cols(
            u.extend(0.0),
            v.extend(0.0),
            w.extend(0.0),
            position.extend(1.0),
        );
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn inverse_view(&self) -> Mat4 {
        self.inverse_view
    }

    pub fn position(&self) -> Vec3 {
        self.inverse_view.w_axis.truncate()
    }

    pub fn projection_view(&self) -> Mat4 {
        self.projection * self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn looking_down_z_with_y_down_is_identity() {
        let mut camera = Camera::default();
        camera.set_view_direction(Vec3::ZERO, Vec3::Z, Vec3::NEG_Y);
        assert!(camera.view().abs_diff_eq(Mat4::IDENTITY, EPS));
    }

    #[test]
    fn inverse_view_undoes_view() {
        let mut camera = Camera::default();
        camera.set_view_yxz(Vec3::new(1.0, -2.0, 3.0), Vec3::new(0.3, 1.2, -0.4));
        assert!((camera.inverse_view() * camera.view()).abs_diff_eq(Mat4::IDENTITY, EPS));
        assert!(camera.position().abs_diff_eq(Vec3::new(1.0, -2.0, 3.0), EPS));
    }

    #[test]
    fn view_target_points_camera_at_target() {
        let mut camera = Camera::default();
        let target = Vec3::new(0.0, 0.0, 2.5);
        camera.set_view_target(Vec3::new(-1.0, -2.0, -2.0), target, Vec3::NEG_Y);
        let in_view = camera.view().transform_point3(target);
        assert!(in_view.x.abs() < EPS && in_view.y.abs() < EPS);
        assert!(in_view.z > 0.0);
    }

    #[test]
    fn unrotated_yxz_view_is_a_translation() {
        let mut camera = Camera::default();
        let position = Vec3::new(0.5, 1.0, -4.0);
        camera.set_view_yxz(position, Vec3::ZERO);
        assert!(camera
            .view()
            .abs_diff_eq(Mat4::from_translation(-position), EPS));
    }

    #[test]
    fn perspective_maps_near_and_far_to_unit_depth() {
        let mut camera = Camera::default();
        camera.set_perspective_projection(50f32.to_radians(), 1.5, 0.1, 10.0);
        let near = camera.projection().project_point3(Vec3::new(0.0, 0.0, 0.1));
        let far = camera.projection().project_point3(Vec3::new(0.0, 0.0, 10.0));
        assert!(near.z.abs() < EPS);
        assert!((far.z - 1.0).abs() < EPS);
    }

    #[test]
    fn zero_aspect_keeps_previous_projection() {
        let mut camera = Camera::default();
        camera.set_perspective_projection(1.0, 0.0, 0.1, 10.0);
        assert_eq!(camera.projection(), Mat4::IDENTITY);
    }

    #[test]
    fn orthographic_maps_box_corners_to_clip_space() {
        let mut camera = Camera::default();
        camera.set_orthographic_projection(-2.0, 2.0, -1.0, 1.0, 0.0, 4.0);
        let top_left = camera.projection().project_point3(Vec3::new(-2.0, -1.0, 0.0));
        let bottom_right = camera.projection().project_point3(Vec3::new(2.0, 1.0, 4.0));
        assert!(top_left.abs_diff_eq(Vec3::new(-1.0, -1.0, 0.0), EPS));
        assert!(bottom_right.abs_diff_eq(Vec3::new(1.0, 1.0, 1.0), EPS));
    }
}
