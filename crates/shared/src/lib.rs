use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use std::mem::size_of;

pub use mesh::Vertex;

/// Binding 0: one interleaved [`Vertex`] per vertex.
pub fn vertex_binding_description() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(size_of::<Vertex>() as u32)
        .input_rate(vk::VertexInputRate::VERTEX)
}

/// Locations 0, 1 and 2: position, normal and texture coordinate.
pub fn vertex_attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription::default()
            .location(0)
            .binding(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(memoffset::offset_of!(Vertex, pos) as u32),
        vk::VertexInputAttributeDescription::default()
            .location(1)
            .binding(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(memoffset::offset_of!(Vertex, normal) as u32),
        vk::VertexInputAttributeDescription::default()
            .location(2)
            .binding(0)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(memoffset::offset_of!(Vertex, tex_coord) as u32),
    ]
}

/// Per-frame camera matrices, bound at set 0 binding 0.
#[repr(C)]
#[derive(Clone, Debug, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub view: Mat4,
    pub proj: Mat4,
}

/// Per-draw data pushed to the vertex and fragment stages.
#[repr(C)]
#[derive(Clone, Debug, Copy, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
    pub model: Mat4,
    pub color: Vec4,
}

impl PushConstants {
    pub const SIZE: u32 = size_of::<Self>() as u32;
}

#[derive(Clone, Debug, Copy, PartialEq)]
pub enum Projection {
    /// Perspective projection using the camera's vertical field of view.
    Perspective,
    /// Orthographic projection showing `height` world units vertically.
    Orthographic { height: f32 },
}

/// A camera on the +Z axis looking at the origin.
#[derive(Clone, Debug, Copy, PartialEq)]
pub struct CameraInfo {
    /// Distance from the origin along +Z.
    pub distance: f32,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub projection: Projection,
}

impl Default for CameraInfo {
    fn default() -> Self {
        Self {
            distance: 4.0,
            fov_y_degrees: 40.0,
            near: 0.1,
            far: 100.0,
            projection: Projection::Perspective,
        }
    }
}

impl CameraInfo {
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_translation(Vec3::new(0.0, 0.0, -self.distance))
    }

    /// Projection into Vulkan clip space (depth 0..1, Y pointing down).
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        let mut proj = match self.projection {
            Projection::Perspective => Mat4::perspective_rh(
                self.fov_y_degrees.to_radians(),
                aspect,
                self.near,
                self.far,
            ),
            Projection::Orthographic { height } => {
                let half_h = height * 0.5;
                let half_w = half_h * aspect;
                Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, self.near, self.far)
            }
        };
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn uniform_buffer_object(&self, aspect: f32) -> UniformBufferObject {
        UniformBufferObject {
            view: self.view_matrix(),
            proj: self.projection_matrix(aspect),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_match_mesh_layout() {
        let binding = vertex_binding_description();
        assert_eq!(binding.stride as usize, mesh::VERTEX_STRIDE);

        let [pos, normal, uv] = vertex_attribute_descriptions();
        assert_eq!(
            (pos.location, pos.offset as usize),
            (0, mesh::POSITION_OFFSET)
        );
        assert_eq!(
            (normal.location, normal.offset as usize),
            (1, mesh::NORMAL_OFFSET)
        );
        assert_eq!(
            (uv.location, uv.offset as usize),
            (2, mesh::TEX_COORD_OFFSET)
        );
        assert_eq!(uv.format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn push_constants_fit_the_guaranteed_minimum() {
        assert_eq!(PushConstants::SIZE, 80);
        assert!(PushConstants::SIZE <= 128);
        assert_eq!(size_of::<UniformBufferObject>(), 128);
    }

    #[test]
    fn view_moves_the_world_away_from_the_camera() {
        let camera = CameraInfo::default();
        let origin = camera.view_matrix().transform_point3(Vec3::ZERO);
        assert_eq!(origin, Vec3::new(0.0, 0.0, -4.0));
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let camera = CameraInfo::default();
        let flipped = camera.projection_matrix(800.0 / 600.0);
        let gl_style = Mat4::perspective_rh(40f32.to_radians(), 800.0 / 600.0, 0.1, 100.0);

        assert_eq!(flipped.y_axis.y, -gl_style.y_axis.y);
        assert_eq!(flipped.x_axis, gl_style.x_axis);

        // a point above the centre ends up with negative clip-space y
        let above = flipped.project_point3(Vec3::new(0.0, 1.0, -4.0));
        assert!(above.y < 0.0);
        assert!((0.0..=1.0).contains(&above.z));
    }

    #[test]
    fn orthographic_spans_the_requested_height() {
        let camera = CameraInfo {
            projection: Projection::Orthographic { height: 4.0 },
            ..Default::default()
        };
        let proj = camera.projection_matrix(2.0);

        let top = proj.project_point3(Vec3::new(4.0, 2.0, -1.0));
        assert!((top.x - 1.0).abs() < 1e-6);
        assert!((top.y + 1.0).abs() < 1e-6);
    }
}
