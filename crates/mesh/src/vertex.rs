use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Byte offset of the position attribute inside an interleaved [`Vertex`].
pub const POSITION_OFFSET: usize = 0;
/// Byte offset of the normal attribute inside an interleaved [`Vertex`].
pub const NORMAL_OFFSET: usize = 3 * size_of::<f32>();
/// Byte offset of the texture coordinate attribute inside an interleaved [`Vertex`].
pub const TEX_COORD_OFFSET: usize = 6 * size_of::<f32>();
/// Number of floats per interleaved vertex (3 position + 3 normal + 2 texcoord).
pub const FLOATS_PER_VERTEX: usize = 8;
/// Distance in bytes between two consecutive interleaved vertices.
pub const VERTEX_STRIDE: usize = FLOATS_PER_VERTEX * size_of::<f32>();

/// One interleaved vertex as uploaded to the GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub fn new(pos: Vec3, normal: Vec3, tex_coord: Vec2) -> Self {
        Self {
            pos: pos.to_array(),
            normal: normal.to_array(),
            tex_coord: tex_coord.to_array(),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from(self.pos)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from(self.normal)
    }

    pub fn tex_coord(&self) -> Vec2 {
        Vec2::from(self.tex_coord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_interleaved_offsets() {
        assert_eq!(size_of::<Vertex>(), VERTEX_STRIDE);
        assert_eq!(VERTEX_STRIDE, 32);
        assert_eq!(memoffset::offset_of!(Vertex, pos), POSITION_OFFSET);
        assert_eq!(memoffset::offset_of!(Vertex, normal), NORMAL_OFFSET);
        assert_eq!(memoffset::offset_of!(Vertex, tex_coord), TEX_COORD_OFFSET);
        assert_eq!((NORMAL_OFFSET, TEX_COORD_OFFSET), (12, 24));
    }

    #[test]
    fn bytes_are_position_normal_texcoord() {
        let v = Vertex::new(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(4.0, 5.0, 6.0),
            Vec2::new(7.0, 8.0),
        );
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&v));
        assert_eq!(floats, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }
}
