//! CPU-side triangle geometry and extraction into interleaved vertex buffers.
//!
//! A [`Geometry`] is a plain list of [`Vertex`] values and triangle [`Face`]s. It
//! carries every field any shader might want (position, normal, uv, color); which of
//! them actually end up on the GPU is decided by [`extract`] together with a
//! [`CompiledGeometryLayout`] from the attribute registry.
//!
//! # Primitives
//!
//! | Builder | Description |
//! |---------|-------------|
//! | [`Geometry::cube`] | Unit cube centered at the origin, one vertex set per face |
//! | [`Geometry::sphere`] | UV sphere with radius 0.5 |
//! | [`Geometry::plane`] | Square on the XZ plane facing +Y |
//! | [`Geometry::quad`] | Square on the XY plane facing +Z, used for billboards |
//!
//! # Example
//!
//! ```
//! use tessera::*;
//!
//! let lit = AttributeRequestSet::from([
//!     (AttributeKind::Position3, "position"),
//!     (AttributeKind::Texture2, "uv"),
//! ]);
//! let registry = compile_registry(&[], [&lit]);
//! let layout = compile_geometry_layout(&registry);
//!
//! let extracted = extract(&Geometry::cube(1.0), &layout);
//! assert_eq!(extracted.stride, 20);
//! assert_eq!(extracted.triangle_count, 12);
//! ```

use crate::vertex_layout::{AttributeKind, CompiledGeometryLayout};
use glam::{Vec2, Vec3};
use std::io::Write;

/// A single vertex of a [`Geometry`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    /// Surface normal, expected to be normalized.
    pub normal: Vec3,
    pub uv: Vec2,
    pub color: Vec3,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
            color: Vec3::ONE,
        }
    }

    pub fn with_color(mut self, color: Vec3) -> Self {
        self.color = color;
        self
    }
}

/// A triangle, as three indices into [`Geometry::vertices`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Face {
    pub a: u32,
    pub b: u32,
    pub c: u32,
}

impl Face {
    pub const fn new(a: u32, b: u32, c: u32) -> Self {
        Self { a, b, c }
    }
}

/// Vertices and triangles.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Geometry {
    pub vertices: Vec<Vertex>,
    pub faces: Vec<Face>,
}

impl Geometry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a vertex and returns its index.
    pub fn add_vertex(&mut self, vertex: Vertex) -> u32 {
        self.vertices.push(vertex);
        (self.vertices.len() - 1) as u32
    }

    pub fn add_face(&mut self, a: u32, b: u32, c: u32) -> &mut Self {
        debug_assert!(
            [a, b, c].iter().all(|&i| (i as usize) < self.vertices.len()),
            "face ({a}, {b}, {c}) points past {} vertices",
            self.vertices.len()
        );
        self.faces.push(Face::new(a, b, c));
        self
    }

    /// Adds two triangles spanning `a b c d` in counter-clockwise order.
    pub fn add_quad(&mut self, a: u32, b: u32, c: u32, d: u32) -> &mut Self {
        self.add_face(a, b, c);
        self.add_face(c, d, a)
    }

    /// Sets every vertex color.
    pub fn colored(mut self, color: Vec3) -> Self {
        for v in &mut self.vertices {
            v.color = color;
        }
        self
    }

    /// Flips winding order and normals, so the inside faces the viewer.
    ///
    /// Used for skyboxes and other geometry seen from within.
    pub fn inverted(mut self) -> Self {
        for face in &mut self.faces {
            std::mem::swap(&mut face.b, &mut face.c);
        }
        for v in &mut self.vertices {
            v.normal = -v.normal;
        }
        self
    }

    /// A cube with side `size`, centered at the origin.
    pub fn cube(size: f32) -> Self {
        let h = size * 0.5;
        // (normal, tangent u, tangent v) per face
        let sides = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        ];

        let mut geom = Self::new();
        for (normal, u, v) in sides {
            let center = normal * h;
            let corner = |su: f32, sv: f32, uv: Vec2| {
                Vertex::new(center + u * (su * h) + v * (sv * h), normal, uv)
            };
            let a = geom.add_vertex(corner(-1.0, -1.0, Vec2::new(0.0, 1.0)));
            let b = geom.add_vertex(corner(1.0, -1.0, Vec2::new(1.0, 1.0)));
            let c = geom.add_vertex(corner(1.0, 1.0, Vec2::new(1.0, 0.0)));
            let d = geom.add_vertex(corner(-1.0, 1.0, Vec2::new(0.0, 0.0)));
            geom.add_quad(a, b, c, d);
        }
        geom
    }

    /// A UV sphere with radius 0.5.
    ///
    /// Produces `(segments + 1) * (rings + 1)` vertices and `segments * rings * 2` faces.
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut geom = Self::new();

        for ring in 0..=rings {
            let phi = std::f32::consts::PI * ring as f32 / rings as f32;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for seg in 0..=segments {
                let theta = 2.0 * std::f32::consts::PI * seg as f32 / segments as f32;
                let normal = Vec3::new(ring_radius * theta.cos(), y, ring_radius * theta.sin());
                let uv = Vec2::new(seg as f32 / segments as f32, ring as f32 / rings as f32);
                geom.add_vertex(Vertex::new(normal * 0.5, normal, uv));
            }
        }

        for ring in 0..rings {
            for seg in 0..segments {
                let current = ring * (segments + 1) + seg;
                let next = current + segments + 1;
                geom.add_face(current, current + 1, next);
                geom.add_face(current + 1, next + 1, next);
            }
        }

        geom
    }

    /// A flat square of side `size` on the XZ plane, facing up.
    pub fn plane(size: f32) -> Self {
        let h = size * 0.5;
        let mut geom = Self::new();
        let a = geom.add_vertex(Vertex::new(Vec3::new(-h, 0.0, h), Vec3::Y, Vec2::new(0.0, 1.0)));
        let b = geom.add_vertex(Vertex::new(Vec3::new(h, 0.0, h), Vec3::Y, Vec2::new(1.0, 1.0)));
        let c = geom.add_vertex(Vertex::new(Vec3::new(h, 0.0, -h), Vec3::Y, Vec2::new(1.0, 0.0)));
        let d = geom.add_vertex(Vertex::new(Vec3::new(-h, 0.0, -h), Vec3::Y, Vec2::new(0.0, 0.0)));
        geom.add_quad(a, b, c, d);
        geom
    }

    /// A square of side `size` on the XY plane, facing +Z.
    pub fn quad(size: f32) -> Self {
        let h = size * 0.5;
        let mut geom = Self::new();
        let a = geom.add_vertex(Vertex::new(Vec3::new(-h, -h, 0.0), Vec3::Z, Vec2::new(0.0, 1.0)));
        let b = geom.add_vertex(Vertex::new(Vec3::new(h, -h, 0.0), Vec3::Z, Vec2::new(1.0, 1.0)));
        let c = geom.add_vertex(Vertex::new(Vec3::new(h, h, 0.0), Vec3::Z, Vec2::new(1.0, 0.0)));
        let d = geom.add_vertex(Vertex::new(Vec3::new(-h, h, 0.0), Vec3::Z, Vec2::new(0.0, 0.0)));
        geom.add_quad(a, b, c, d);
        geom
    }

    /// Axis-aligned bounding box as `(min, max)`.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        self.vertices.iter().fold(
            (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
            |(min, max), v| (min.min(v.position), max.max(v.position)),
        )
    }

    pub fn center(&self) -> Vec3 {
        let (min, max) = self.bounds();
        (min + max) * 0.5
    }

    pub fn translate(&mut self, offset: Vec3) {
        for v in &mut self.vertices {
            v.position += offset;
        }
    }

    /// Moves the geometry so its bounding box is centered at the origin.
    pub fn recenter(&mut self) {
        let center = self.center();
        self.translate(-center);
    }

    /// Recomputes smooth normals by averaging area-weighted face normals.
    ///
    /// Faces pointing past the vertex list are skipped.
    pub fn recalculate_normals(&mut self) {
        for v in &mut self.vertices {
            v.normal = Vec3::ZERO;
        }

        for face in &self.faces {
            let [a, b, c] = [face.a, face.b, face.c].map(|i| i as usize);
            let (Some(p0), Some(p1), Some(p2)) =
                (self.vertices.get(a), self.vertices.get(b), self.vertices.get(c))
            else {
                continue;
            };
            let face_normal = (p1.position - p0.position).cross(p2.position - p0.position);
            for i in [a, b, c] {
                self.vertices[i].normal += face_normal;
            }
        }

        for v in &mut self.vertices {
            v.normal = v.normal.normalize_or_zero();
        }
    }

    /// Writes the geometry as Wavefront OBJ text, mostly for debugging.
    pub fn write_obj(&self, out: &mut impl Write) -> std::io::Result<()> {
        for v in &self.vertices {
            writeln!(out, "v {} {} {}", v.position.x, v.position.y, v.position.z)?;
        }
        for v in &self.vertices {
            writeln!(out, "vt {} {}", v.uv.x, v.uv.y)?;
        }
        for v in &self.vertices {
            writeln!(out, "vn {} {} {}", v.normal.x, v.normal.y, v.normal.z)?;
        }
        for f in &self.faces {
            let [a, b, c] = [f.a + 1, f.b + 1, f.c + 1];
            writeln!(out, "f {a}/{a}/{a} {b}/{b}/{b} {c}/{c}/{c}")?;
        }
        Ok(())
    }
}

/// Geometry flattened into GPU-ready buffers.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedGeometry {
    /// Interleaved vertex data, one element per layout slot.
    pub data: Vec<u8>,
    /// Bytes per vertex.
    pub stride: u64,
    pub indices: Vec<u32>,
    pub triangle_count: u32,
}

impl ExtractedGeometry {
    pub fn vertex_count(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.data.len() / self.stride as usize
        }
    }
}

/// Interleaves `geometry` according to `layout`.
///
/// # Panics
///
/// Panics if the layout contains a kind that has no per-vertex source
/// (an instance transform).
pub fn extract(geometry: &Geometry, layout: &CompiledGeometryLayout) -> ExtractedGeometry {
    let stride = layout.stride();
    let mut floats: Vec<f32> =
        Vec::with_capacity(geometry.vertices.len() * stride as usize / std::mem::size_of::<f32>());

    for vertex in &geometry.vertices {
        for element in layout.elements() {
            match element.kind {
                AttributeKind::Position2xy => {
                    floats.extend_from_slice(&[vertex.position.x, vertex.position.y])
                }
                AttributeKind::Position2xz => {
                    floats.extend_from_slice(&[vertex.position.x, vertex.position.z])
                }
                AttributeKind::Position3 => floats.extend_from_slice(&vertex.position.to_array()),
                AttributeKind::Normal3 => floats.extend_from_slice(&vertex.normal.to_array()),
                AttributeKind::Color3 => floats.extend_from_slice(&vertex.color.to_array()),
                AttributeKind::Color4 => floats.extend_from_slice(&vertex.color.extend(1.0).to_array()),
                AttributeKind::Texture2 => floats.extend_from_slice(&vertex.uv.to_array()),
                AttributeKind::InstanceTransform => {
                    panic!("Invalid buffer type: {:?}", element.kind)
                }
            }
        }
    }

    let indices: Vec<u32> = geometry
        .faces
        .iter()
        .flat_map(|f| [f.a, f.b, f.c])
        .collect();

    ExtractedGeometry {
        data: bytemuck::cast_slice(&floats).to_vec(),
        stride,
        indices,
        triangle_count: geometry.faces.len() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex_layout::{
        AttributeRequestSet, GeometryElement, compile_geometry_layout, compile_registry,
    };

    fn layout(kinds: &[AttributeKind]) -> CompiledGeometryLayout {
        let set = kinds
            .iter()
            .fold(AttributeRequestSet::new(), |set, kind| set.with(*kind, "x"));
        compile_geometry_layout(&compile_registry(&[], [&set]))
    }

    fn triangle() -> Geometry {
        let mut geom = Geometry::new();
        let a = geom.add_vertex(
            Vertex::new(Vec3::new(1.0, 2.0, 3.0), Vec3::Z, Vec2::new(0.25, 0.75))
                .with_color(Vec3::new(0.1, 0.2, 0.3)),
        );
        let b = geom.add_vertex(Vertex::new(Vec3::new(4.0, 5.0, 6.0), Vec3::Z, Vec2::ZERO));
        let c = geom.add_vertex(Vertex::new(Vec3::new(7.0, 8.0, 9.0), Vec3::Z, Vec2::ONE));
        geom.add_face(a, b, c);
        geom
    }

    fn first_floats(extracted: &ExtractedGeometry) -> &[f32] {
        let floats: &[f32] = bytemuck::cast_slice(&extracted.data);
        &floats[..extracted.stride as usize / 4]
    }

    #[test]
    fn interleaves_in_slot_order() {
        let extracted = extract(
            &triangle(),
            &layout(&[AttributeKind::Texture2, AttributeKind::Position3]),
        );

        assert_eq!(extracted.stride, 20);
        assert_eq!(extracted.vertex_count(), 3);
        assert_eq!(first_floats(&extracted), &[0.25, 0.75, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn color4_appends_opaque_alpha() {
        let extracted = extract(&triangle(), &layout(&[AttributeKind::Color4]));
        assert_eq!(first_floats(&extracted), &[0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn planar_positions_pick_components() {
        let extracted = extract(
            &triangle(),
            &layout(&[AttributeKind::Position2xy, AttributeKind::Position2xz]),
        );
        assert_eq!(first_floats(&extracted), &[1.0, 2.0, 1.0, 3.0]);
    }

    #[test]
    fn indices_are_flattened_faces() {
        let mut geom = triangle();
        geom.add_face(2, 1, 0);
        let extracted = extract(&geom, &layout(&[AttributeKind::Position3]));

        assert_eq!(extracted.indices, vec![0, 1, 2, 2, 1, 0]);
        assert_eq!(extracted.triangle_count, 2);
    }

    #[test]
    #[should_panic(expected = "Invalid buffer type")]
    fn instance_transform_cannot_be_extracted() {
        let layout = CompiledGeometryLayout::from_elements(vec![GeometryElement {
            kind: AttributeKind::InstanceTransform,
            slot: 0,
        }]);
        extract(&triangle(), &layout);
    }

    #[test]
    fn cube_has_six_faces() {
        let cube = Geometry::cube(2.0);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.faces.len(), 12);
        let (min, max) = cube.bounds();
        assert_eq!(min, Vec3::splat(-1.0));
        assert_eq!(max, Vec3::splat(1.0));
    }

    #[test]
    fn cube_faces_wind_outward() {
        let cube = Geometry::cube(1.0);
        for face in &cube.faces {
            let [a, b, c] = [face.a, face.b, face.c].map(|i| cube.vertices[i as usize]);
            let n = (b.position - a.position).cross(c.position - a.position);
            assert!(n.dot(a.normal) > 0.0);
        }
    }

    #[test]
    fn inverted_flips_winding() {
        let cube = Geometry::cube(1.0).inverted();
        let face = cube.faces[0];
        let [a, b, c] = [face.a, face.b, face.c].map(|i| cube.vertices[i as usize]);
        let n = (b.position - a.position).cross(c.position - a.position);
        assert!(n.dot(a.normal) > 0.0);
        assert_eq!(a.normal, Vec3::NEG_Z);
    }

    #[test]
    fn sphere_counts() {
        let sphere = Geometry::sphere(8, 4);
        assert_eq!(sphere.vertices.len(), 9 * 5);
        assert_eq!(sphere.faces.len(), 8 * 4 * 2);
    }

    #[test]
    fn recenter_moves_bounds_to_origin() {
        let mut geom = triangle();
        geom.recenter();
        assert!(geom.center().abs_diff_eq(Vec3::ZERO, 1e-5));
    }

    #[test]
    fn recalculated_normals_follow_winding() {
        let mut geom = Geometry::plane(1.0);
        for v in &mut geom.vertices {
            v.normal = Vec3::X;
        }
        geom.recalculate_normals();
        assert!(geom.vertices[0].normal.abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    fn normals_skip_faces_past_the_vertex_list() {
        let mut geom = Geometry::plane(1.0);
        geom.faces.push(Face::new(0, 1, 9));
        geom.recalculate_normals();
        assert!(geom.vertices[0].normal.abs_diff_eq(Vec3::Y, 1e-5));
        assert!(geom.vertices[1].normal.abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "points past 3 vertices")]
    fn adding_a_face_past_the_vertex_list_is_caught() {
        triangle().add_face(0, 1, 3);
    }

    #[test]
    fn obj_output_is_one_based() {
        let mut out = Vec::new();
        triangle().write_obj(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("f 1/1/1 2/2/2 3/3/3"));
    }
}
