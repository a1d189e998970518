//! Procedural geometry for the sphere demo.
//!
//! [`Sphere`] builds a latitude/longitude sphere with interleaved
//! position/normal/texcoord vertices and `u32` indices, ready to be copied
//! straight into GPU buffers.

mod error;
mod sphere;
mod vertex;

pub use error::{MeshError, Result};
pub use sphere::{Sphere, SphereParams, MIN_SECTOR_COUNT, MIN_STACK_COUNT};
pub use vertex::{
    Vertex, FLOATS_PER_VERTEX, NORMAL_OFFSET, POSITION_OFFSET, TEX_COORD_OFFSET, VERTEX_STRIDE,
};
