// Renderable objects and their transforms

use glam::{EulerRot, Mat3, Mat4, Quat, Vec3};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use super::model::Drawable;

pub type GameObjectId = u32;

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// Translation, scale and Tait-Bryan rotation (applied Y, X, Z)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub scale: Vec3,
    pub rotation: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Vec3::ZERO,
        }
    }
}

impl Transform {
    pub fn orientation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.rotation.y, self.rotation.x, self.rotation.z)
    }

    /// Translate * Ry * Rx * Rz * Scale
    pub fn mat4(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.orientation(), self.translation)
    }

    /// Rotation * inverse scale; equals the inverse transpose of the model's upper 3x3
    pub fn normal_matrix(&self) -> Mat3 {
        Mat3::from_quat(self.orientation()) * Mat3::from_diagonal(self.scale.recip())
    }
}

/// Something in the scene; ids are unique for the life of the process
pub struct GameObject {
    id: GameObjectId,
    pub model: Option<Arc<dyn Drawable>>,
    pub color: Vec3,
    pub transform: Transform,
}

impl GameObject {
    pub fn create() -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            model: None,
            color: Vec3::ONE,
            transform: Transform::default(),
        }
    }

    pub fn with_model(model: Arc<dyn Drawable>) -> Self {
        Self {
            model: Some(model),
            ..Self::create()
        }
    }

    pub fn id(&self) -> GameObjectId {
        self.id
    }
}

impl std::fmt::Debug for GameObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameObject")
            .field("id", &self.id)
            .field("has_model", &self.model.is_some())
            .field("color", &self.color)
            .field("transform", &self.transform)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = GameObject::create();
        let b = GameObject::create();
        assert!(b.id() > a.id());
    }

    #[test]
    fn default_transform_is_identity() {
        let transform = Transform::default();
        assert!(transform.mat4().abs_diff_eq(Mat4::IDENTITY, EPS));
        assert!(transform.normal_matrix().abs_diff_eq(Mat3::IDENTITY, EPS));
    }

    #[test]
    fn model_matrix_scales_rotates_then_translates() {
        let transform = Transform {
            translation: Vec3::new(1.0, 2.0, 3.0),
            scale: Vec3::splat(2.0),
            rotation: Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0),
        };
        // +x scaled to 2, yawed a quarter turn onto -z, then offset
        let moved = transform.mat4().transform_point3(Vec3::X);
        assert!(moved.abs_diff_eq(Vec3::new(1.0, 2.0, 1.0), EPS));
    }

    #[test]
    fn normal_matrix_is_inverse_transpose_of_model() {
        let transform = Transform {
            translation: Vec3::new(-3.0, 0.5, 2.0),
            scale: Vec3::new(1.0, 3.0, 0.5),
            rotation: Vec3::new(0.4, -1.1, 0.7),
        };
        let expected = Mat3::from_mat4(transform.mat4()).inverse().transpose();
        assert!(transform.normal_matrix().abs_diff_eq(expected, 1e-4));
    }
}
