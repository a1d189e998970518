mod error;

pub use error::{Result, SceneError};

use std::{sync::Arc, time::Duration};

use glam::{Mat4, Vec3, Vec4};
use mesh::Sphere;
use resource_manager::{Geometry, ResourceManager};

/// Constant-speed rotation about a fixed axis through the origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spin {
    axis: Vec3,
    degrees_per_second: f32,
}

impl Default for Spin {
    fn default() -> Self {
        Self {
            axis: Vec3::new(0.5, 1.0, 0.0).normalize(),
            degrees_per_second: 50.0,
        }
    }
}

impl Spin {
    /// `axis` is normalized; a zero or non-finite axis is rejected.
    pub fn new(axis: Vec3, degrees_per_second: f32) -> Result<Self> {
        let normalized = axis.normalize_or_zero();
        if normalized == Vec3::ZERO {
            return Err(SceneError::InvalidSpinAxis(axis.to_array()));
        }
        Ok(Self {
            axis: normalized,
            degrees_per_second,
        })
    }

    pub fn axis(&self) -> Vec3 {
        self.axis
    }

    pub fn degrees_per_second(&self) -> f32 {
        self.degrees_per_second
    }

    /// Rotation after `elapsed` time.
    pub fn model_matrix(&self, elapsed: Duration) -> Mat4 {
        let degrees = self.degrees_per_second * elapsed.as_secs_f32();
        Mat4::from_axis_angle(self.axis, degrees.to_radians())
    }
}

/// A drawable entity: uploaded geometry, its base transform and flat colour.
pub struct Mesh {
    pub name: String,
    pub geometry: Arc<Geometry>,
    pub transform: Mat4,
    pub color: Vec4,
}

/// Stores all objects to be rendered by the renderer.
pub struct Scene {
    pub name: String,
    pub meshes: Vec<Mesh>,
    pub spin: Spin,
}

impl Scene {
    /// Uploads `sphere` once and wraps it in a single-mesh scene.
    pub fn new(
        sphere: &Sphere,
        resource_manager: Arc<ResourceManager>,
        spin: Spin,
        color: Vec4,
    ) -> Result<Self> {
        tracing::info!("Uploading sphere mesh:\n{}", sphere);

        let geometry = Geometry::from_bytes(
            resource_manager,
            sphere.interleaved_vertices(),
            sphere.vertex_count() as u32,
            sphere.indices_bytes(),
            sphere.index_count() as u32,
        )?;

        Ok(Self {
            name: "sphere".to_string(),
            meshes: vec![Mesh {
                name: "sphere".to_string(),
                geometry: Arc::new(geometry),
                transform: Mat4::IDENTITY,
                color,
            }],
            spin,
        })
    }

    /// World transform of `mesh` after `elapsed` time.
    pub fn model_matrix(&self, mesh: &Mesh, elapsed: Duration) -> Mat4 {
        self.spin.model_matrix(elapsed) * mesh.transform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn rotation_degrees(matrix: Mat4) -> f32 {
        let (_, angle) = Quat::from_mat4(&matrix).to_axis_angle();
        angle.to_degrees()
    }

    #[test]
    fn no_rotation_at_start() {
        let spin = Spin::default();
        assert!(spin
            .model_matrix(Duration::ZERO)
            .abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn angle_grows_linearly() {
        let spin = Spin::default();

        let one = rotation_degrees(spin.model_matrix(Duration::from_secs(1)));
        let two = rotation_degrees(spin.model_matrix(Duration::from_secs(2)));
        let half = rotation_degrees(spin.model_matrix(Duration::from_millis(500)));

        assert!((one - 50.0).abs() < 1e-3, "got {one}");
        assert!((two - 100.0).abs() < 1e-3, "got {two}");
        assert!((half - 25.0).abs() < 1e-3, "got {half}");
    }

    #[test]
    fn axis_is_fixed_by_the_rotation() {
        let spin = Spin::default();
        let axis = spin.axis();

        assert!((axis.length() - 1.0).abs() < 1e-6);
        let rotated = spin
            .model_matrix(Duration::from_secs_f32(3.7))
            .transform_vector3(axis);
        assert!(rotated.abs_diff_eq(axis, 1e-5));
    }

    #[test]
    fn spin_normalizes_its_axis() {
        let spin = Spin::new(Vec3::new(0.0, 0.0, 3.0), 90.0).unwrap();
        assert_eq!(spin.axis(), Vec3::Z);
        assert_eq!(spin.degrees_per_second(), 90.0);
    }

    #[test]
    fn zero_axis_is_rejected() {
        assert!(matches!(
            Spin::new(Vec3::ZERO, 50.0),
            Err(SceneError::InvalidSpinAxis(_))
        ));
        assert!(Spin::new(Vec3::new(f32::NAN, 1.0, 0.0), 50.0).is_err());
    }
}
