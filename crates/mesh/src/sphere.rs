use std::{
    f32::consts::{FRAC_PI_2, PI},
    fmt,
    mem::size_of,
};

use glam::{Vec2, Vec3};
use tracing::debug;

use crate::error::{MeshError, Result};
use crate::vertex::{Vertex, VERTEX_STRIDE};

/// Fewest longitudinal slices that still enclose a volume.
pub const MIN_SECTOR_COUNT: u32 = 3;
/// Fewest latitudinal bands that still enclose a volume.
pub const MIN_STACK_COUNT: u32 = 2;

/// Parameters of a latitude/longitude sphere centred at the origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphereParams {
    pub radius: f32,
    /// Longitudinal divisions (slices around the pole axis).
    pub sector_count: u32,
    /// Latitudinal divisions (bands from pole to pole).
    pub stack_count: u32,
    /// Share one normal per vertex (`true`) or give every triangle its own flat normal.
    pub smooth: bool,
}

impl Default for SphereParams {
    fn default() -> Self {
        Self {
            radius: 1.0,
            sector_count: 36,
            stack_count: 18,
            smooth: true,
        }
    }
}

impl SphereParams {
    pub fn new(radius: f32, sector_count: u32, stack_count: u32, smooth: bool) -> Self {
        Self {
            radius,
            sector_count,
            stack_count,
            smooth,
        }
    }

    /// Checks that these parameters produce a closed, non-degenerate mesh.
    pub fn validate(&self) -> Result<()> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(MeshError::InvalidParameter {
                name: "radius",
                value: self.radius.to_string(),
                reason: "must be a finite value greater than zero",
            });
        }
        if self.sector_count < MIN_SECTOR_COUNT {
            return Err(MeshError::InvalidParameter {
                name: "sector_count",
                value: self.sector_count.to_string(),
                reason: "must be at least 3",
            });
        }
        if self.stack_count < MIN_STACK_COUNT {
            return Err(MeshError::InvalidParameter {
                name: "stack_count",
                value: self.stack_count.to_string(),
                reason: "must be at least 2",
            });
        }

        // Faceted meshes need one vertex per index, so the index count bounds both.
        let grid = (self.stack_count as u64 + 1) * (self.sector_count as u64 + 1);
        let indices = 6 * self.sector_count as u64 * (self.stack_count as u64 - 1);
        if grid.max(indices) > u32::MAX as u64 {
            return Err(MeshError::InvalidParameter {
                name: "sector_count * stack_count",
                value: format!("{} * {}", self.sector_count, self.stack_count),
                reason: "mesh does not fit in 32-bit indices",
            });
        }

        Ok(())
    }

    /// Vertex count of the shared latitude/longitude grid, seam column included.
    pub fn grid_vertex_count(&self) -> usize {
        (self.stack_count as usize + 1) * (self.sector_count as usize + 1)
    }

    /// Index count of the triangulation. Pole bands contribute one triangle per
    /// sector, so this is two triangles per cell less one per pole cell.
    /// Unvalidated stack counts below 2 give no triangles.
    pub fn index_count(&self) -> usize {
        let sectors = self.sector_count as usize;
        let stacks = self.stack_count as usize;
        6 * sectors * stacks.saturating_sub(1)
    }
}

/// A triangulated sphere with interleaved position/normal/texcoord vertices.
///
/// Vertices are ordered from the north pole (+Z) to the south pole, sweeping
/// longitude inside each stack. Triangles wind counter-clockwise when seen from
/// outside the sphere.
#[derive(Clone, Debug, PartialEq)]
pub struct Sphere {
    params: SphereParams,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    normals_reversed: bool,
}

impl Sphere {
    /// Generates the sphere described by `params`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidParameter`] when the radius is not positive,
    /// fewer than 3 sectors or fewer than 2 stacks are requested.
    pub fn new(params: SphereParams) -> Result<Self> {
        params.validate()?;

        let grid = build_grid(&params);
        let grid_indices = build_indices(params.sector_count, params.stack_count);

        let (vertices, indices) = if params.smooth {
            (grid, grid_indices)
        } else {
            facet(&grid, &grid_indices)
        };

        debug!(
            "Generated sphere: radius={}, sectors={}, stacks={}, smooth={}, vertices={}, indices={}",
            params.radius,
            params.sector_count,
            params.stack_count,
            params.smooth,
            vertices.len(),
            indices.len()
        );

        Ok(Self {
            params,
            vertices,
            indices,
            normals_reversed: false,
        })
    }

    /// Shorthand for [`Sphere::new`] with positional arguments.
    pub fn generate(radius: f32, sector_count: u32, stack_count: u32, smooth: bool) -> Result<Self> {
        Self::new(SphereParams::new(radius, sector_count, stack_count, smooth))
    }

    /// Flips every normal and the winding of every triangle, turning the sphere
    /// inside out for viewing from the centre. Calling it twice restores the mesh.
    pub fn reverse_normals(&mut self) {
        for vertex in &mut self.vertices {
            vertex.normal = (-vertex.normal()).to_array();
        }
        for triangle in self.indices.chunks_exact_mut(3) {
            triangle.swap(0, 2);
        }
        self.normals_reversed = !self.normals_reversed;
        debug!("Sphere normals reversed (inward: {})", self.normals_reversed);
    }

    pub fn params(&self) -> &SphereParams {
        &self.params
    }

    pub fn radius(&self) -> f32 {
        self.params.radius
    }

    pub fn sector_count(&self) -> u32 {
        self.params.sector_count
    }

    pub fn stack_count(&self) -> u32 {
        self.params.stack_count
    }

    pub fn is_smooth(&self) -> bool {
        self.params.smooth
    }

    pub fn normals_reversed(&self) -> bool {
        self.normals_reversed
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Vertex count of the shared grid the mesh was built from. Equals
    /// [`Sphere::vertex_count`] for smooth spheres.
    pub fn grid_vertex_count(&self) -> usize {
        self.params.grid_vertex_count()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Bytes between consecutive vertices in [`Sphere::interleaved_vertices`].
    pub fn interleaved_stride(&self) -> usize {
        VERTEX_STRIDE
    }

    /// Total size in bytes of the interleaved vertex buffer.
    pub fn interleaved_vertex_size(&self) -> usize {
        self.vertices.len() * VERTEX_STRIDE
    }

    /// Total size in bytes of the index buffer.
    pub fn index_size(&self) -> usize {
        self.indices.len() * size_of::<u32>()
    }

    /// The vertex buffer as raw bytes, ready for upload.
    pub fn interleaved_vertices(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// The index buffer as raw bytes, ready for upload.
    pub fn indices_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

impl fmt::Display for Sphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===== Sphere =====")?;
        writeln!(f, "        Radius: {}", self.params.radius)?;
        writeln!(f, "  Sector Count: {}", self.params.sector_count)?;
        writeln!(f, "   Stack Count: {}", self.params.stack_count)?;
        writeln!(f, "Smooth Shading: {}", self.params.smooth)?;
        writeln!(f, "Normals Inward: {}", self.normals_reversed)?;
        writeln!(f, "Triangle Count: {}", self.triangle_count())?;
        writeln!(f, "   Index Count: {}", self.index_count())?;
        writeln!(f, "  Vertex Count: {}", self.vertex_count())?;
        writeln!(f, "    Index Size: {} bytes", self.index_size())?;
        write!(
            f,
            "   Vertex Size: {} bytes (stride {})",
            self.interleaved_vertex_size(),
            self.interleaved_stride()
        )
    }
}

/// Builds the shared latitude/longitude grid with smooth normals.
fn build_grid(params: &SphereParams) -> Vec<Vertex> {
    let radius = params.radius;
    let sectors = params.sector_count;
    let stacks = params.stack_count;

    let sector_step = 2.0 * PI / sectors as f32;
    let stack_step = PI / stacks as f32;
    let length_inv = 1.0 / radius;

    let mut vertices = Vec::with_capacity(params.grid_vertex_count());
    for i in 0..=stacks {
        // +pi/2 at the north pole down to -pi/2 at the south pole
        let stack_angle = FRAC_PI_2 - i as f32 * stack_step;
        let xy = radius * stack_angle.cos();
        let z = radius * stack_angle.sin();

        for j in 0..=sectors {
            let sector_angle = j as f32 * sector_step;
            let position = Vec3::new(xy * sector_angle.cos(), xy * sector_angle.sin(), z);
            let tex_coord = Vec2::new(j as f32 / sectors as f32, i as f32 / stacks as f32);

            vertices.push(Vertex::new(position, position * length_inv, tex_coord));
        }
    }

    vertices
}

/// Triangulates the grid. The first stack only gets the lower triangle of each
/// quad and the last stack only the upper one, since the other half collapses
/// onto the pole.
fn build_indices(sectors: u32, stacks: u32) -> Vec<u32> {
    let capacity = 6 * sectors as usize * (stacks as usize - 1);
    let mut indices = Vec::with_capacity(capacity);

    for i in 0..stacks {
        let mut k1 = i * (sectors + 1);
        let mut k2 = k1 + sectors + 1;

        for _ in 0..sectors {
            if i != 0 {
                indices.extend_from_slice(&[k1, k2, k1 + 1]);
            }
            if i != stacks - 1 {
                indices.extend_from_slice(&[k1 + 1, k2, k2 + 1]);
            }
            k1 += 1;
            k2 += 1;
        }
    }

    indices
}

/// Splits the grid so every triangle owns three vertices carrying its face normal.
fn facet(grid: &[Vertex], grid_indices: &[u32]) -> (Vec<Vertex>, Vec<u32>) {
    let mut vertices = Vec::with_capacity(grid_indices.len());

    for triangle in grid_indices.chunks_exact(3) {
        let [a, b, c] = [
            grid[triangle[0] as usize],
            grid[triangle[1] as usize],
            grid[triangle[2] as usize],
        ];
        let face_normal = (b.position() - a.position())
            .cross(c.position() - a.position())
            .normalize_or_zero()
            .to_array();

        for corner in [a, b, c] {
            vertices.push(Vertex {
                normal: face_normal,
                ..corner
            });
        }
    }

    let indices = (0..vertices.len() as u32).collect();
    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn corners(sphere: &Sphere, triangle: &[u32]) -> [Vertex; 3] {
        [
            sphere.vertices()[triangle[0] as usize],
            sphere.vertices()[triangle[1] as usize],
            sphere.vertices()[triangle[2] as usize],
        ]
    }

    fn face_cross(sphere: &Sphere, triangle: &[u32]) -> Vec3 {
        let [a, b, c] = corners(sphere, triangle);
        (b.position() - a.position()).cross(c.position() - a.position())
    }

    fn all_variants() -> Vec<Sphere> {
        let mut spheres = Vec::new();
        for &(radius, sectors, stacks) in &[(1.0, 8, 8), (2.0, 3, 2), (0.5, 36, 18), (3.5, 5, 3)] {
            for smooth in [true, false] {
                spheres.push(Sphere::generate(radius, sectors, stacks, smooth).unwrap());
            }
        }
        spheres
    }

    #[test]
    fn smooth_counts_follow_grid_formula() {
        for &(sectors, stacks) in &[(3, 2), (8, 8), (36, 18), (5, 7)] {
            let sphere = Sphere::generate(1.0, sectors, stacks, true).unwrap();
            let (s, t) = (sectors as usize, stacks as usize);

            assert_eq!(sphere.vertex_count(), (t + 1) * (s + 1));
            assert_eq!(sphere.index_count(), 6 * s * (t - 2) + 6 * s);
            assert_eq!(sphere.triangle_count() * 3, sphere.index_count());
            assert_eq!(sphere.index_count(), sphere.params().index_count());
        }
    }

    #[test]
    fn faceted_8x8_counts() {
        let sphere = Sphere::generate(1.0, 8, 8, false).unwrap();

        assert_eq!(sphere.grid_vertex_count(), 81);
        assert_eq!(sphere.index_count(), 336);
        assert_eq!(sphere.triangle_count(), 112);
        // one vertex per triangle corner
        assert_eq!(sphere.vertex_count(), 336);
        assert!(sphere
            .indices()
            .iter()
            .enumerate()
            .all(|(i, &index)| index as usize == i));
    }

    #[test]
    fn minimal_sphere_is_two_pole_caps() {
        let sphere = Sphere::generate(2.0, 3, 2, true).unwrap();

        assert_eq!(sphere.vertex_count(), 12);
        assert_eq!(sphere.triangle_count(), 6);
        assert_eq!(sphere.index_count(), 18);
    }

    #[test]
    fn vertices_lie_on_the_surface() {
        for sphere in all_variants() {
            let radius = sphere.radius();
            for vertex in sphere.vertices() {
                let distance = vertex.position().length();
                assert!(
                    (distance - radius).abs() <= EPSILON * radius.max(1.0),
                    "vertex {:?} is {} from the origin, expected {}",
                    vertex.pos,
                    distance,
                    radius
                );
            }
        }
    }

    #[test]
    fn smooth_normals_are_normalized_positions() {
        let sphere = Sphere::generate(2.5, 12, 9, true).unwrap();
        for vertex in sphere.vertices() {
            let normal = vertex.normal();
            assert!((normal.length() - 1.0).abs() < EPSILON);
            assert!((normal.dot(vertex.position().normalize()) - 1.0).abs() < EPSILON);
        }
    }

    #[test]
    fn faceted_normals_match_their_face() {
        let sphere = Sphere::generate(1.0, 8, 8, false).unwrap();
        for triangle in sphere.indices().chunks_exact(3) {
            let expected = face_cross(&sphere, triangle).normalize();
            for corner in corners(&sphere, triangle) {
                assert!((corner.normal().length() - 1.0).abs() < EPSILON);
                assert!(corner.normal().abs_diff_eq(expected, EPSILON));
            }
        }
    }

    #[test]
    fn indices_stay_in_bounds() {
        for sphere in all_variants() {
            let count = sphere.vertex_count() as u32;
            assert!(sphere.indices().iter().all(|&index| index < count));
        }
    }

    #[test]
    fn triangles_wind_outward() {
        for sphere in all_variants() {
            for triangle in sphere.indices().chunks_exact(3) {
                let cross = face_cross(&sphere, triangle);
                let [a, b, c] = corners(&sphere, triangle);
                let centroid = (a.position() + b.position() + c.position()) / 3.0;
                let normal_sum = a.normal() + b.normal() + c.normal();

                assert!(cross.length() > 0.0, "degenerate triangle {:?}", triangle);
                assert!(cross.dot(centroid) > 0.0, "triangle {:?} faces inward", triangle);
                assert!(cross.dot(normal_sum) > 0.0, "triangle {:?} opposes its normals", triangle);
            }
        }
    }

    #[test]
    fn poles_and_texcoords_span_the_grid() {
        let sphere = Sphere::generate(2.0, 6, 4, true).unwrap();
        let first = sphere.vertices().first().unwrap();
        let last = sphere.vertices().last().unwrap();

        assert!((first.pos[2] - 2.0).abs() < EPSILON);
        assert!((last.pos[2] + 2.0).abs() < EPSILON);
        assert_eq!(first.tex_coord, [0.0, 0.0]);
        assert_eq!(last.tex_coord, [1.0, 1.0]);

        // seam column duplicates the first column's position with u = 1
        let seam = sphere.vertices()[6 + 7];
        let start = sphere.vertices()[7];
        assert!(seam.position().abs_diff_eq(start.position(), EPSILON));
        assert_eq!(seam.tex_coord[0], 1.0);
    }

    #[test]
    fn reverse_normals_is_an_involution() {
        for sphere in all_variants() {
            let mut reversed = sphere.clone();
            reversed.reverse_normals();
            assert!(reversed.normals_reversed());
            assert_ne!(reversed.vertices(), sphere.vertices());

            for (flipped, original) in reversed.vertices().iter().zip(sphere.vertices()) {
                assert_eq!(flipped.normal(), -original.normal());
                assert_eq!(flipped.pos, original.pos);
            }

            reversed.reverse_normals();
            assert_eq!(reversed, sphere);
        }
    }

    #[test]
    fn reversed_winding_follows_the_normals() {
        let mut sphere = Sphere::generate(1.0, 10, 6, true).unwrap();
        sphere.reverse_normals();

        for triangle in sphere.indices().chunks_exact(3) {
            let cross = face_cross(&sphere, triangle);
            let [a, b, c] = corners(&sphere, triangle);
            let centroid = (a.position() + b.position() + c.position()) / 3.0;

            assert!(cross.dot(centroid) < 0.0);
            assert!(cross.dot(a.normal() + b.normal() + c.normal()) > 0.0);
        }
    }

    #[test]
    fn byte_views_match_reported_sizes() {
        let sphere = Sphere::generate(1.0, 8, 8, false).unwrap();

        assert_eq!(sphere.interleaved_stride(), 32);
        assert_eq!(sphere.interleaved_vertex_size(), sphere.vertex_count() * 32);
        assert_eq!(sphere.interleaved_vertices().len(), sphere.interleaved_vertex_size());
        assert_eq!(sphere.index_size(), sphere.index_count() * 4);
        assert_eq!(sphere.indices_bytes().len(), sphere.index_size());

        let floats: &[f32] = bytemuck::cast_slice(sphere.interleaved_vertices());
        let third = sphere.vertices()[2];
        assert_eq!(&floats[16..19], &third.pos);
        assert_eq!(&floats[19..22], &third.normal);
        assert_eq!(&floats[22..24], &third.tex_coord);
    }

    #[test]
    fn generation_is_deterministic() {
        let a = Sphere::generate(1.25, 9, 7, false).unwrap();
        let b = Sphere::generate(1.25, 9, 7, false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_degenerate_parameters() {
        let cases = [
            (1.0, 2, 8, "sector_count"),
            (1.0, 8, 1, "stack_count"),
            (0.0, 8, 8, "radius"),
            (-1.0, 8, 8, "radius"),
            (f32::NAN, 8, 8, "radius"),
            (f32::INFINITY, 8, 8, "radius"),
        ];

        for (radius, sectors, stacks, expected) in cases {
            match Sphere::generate(radius, sectors, stacks, true) {
                Err(MeshError::InvalidParameter { name, .. }) => assert_eq!(name, expected),
                other => panic!("expected InvalidParameter for {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn index_count_of_unvalidated_params_does_not_underflow() {
        assert_eq!(SphereParams::new(1.0, 8, 1, true).index_count(), 0);
        assert_eq!(SphereParams::new(1.0, 8, 0, false).index_count(), 0);
        assert_eq!(SphereParams::new(1.0, 8, 2, true).index_count(), 48);
    }

    #[test]
    fn rejects_meshes_beyond_32_bit_indices() {
        let params = SphereParams::new(1.0, u32::MAX, 3, true);
        assert!(matches!(
            params.validate(),
            Err(MeshError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn summary_lists_counts() {
        let sphere = Sphere::generate(1.0, 8, 8, false).unwrap();
        let summary = sphere.to_string();

        assert!(summary.contains("Sector Count: 8"));
        assert!(summary.contains("Index Count: 336"));
        assert!(summary.contains("Smooth Shading: false"));
    }
}
