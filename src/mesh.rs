//! Primitive geometry for the instanced batches and the accent star.
//!
//! Everything is built on the CPU once at startup: a unit cuboid, a coarse
//! UV sphere, and an octahedron. Normals are per-face on the flat shapes so
//! the facets catch the point lights individually.

use std::f32::consts::{PI, TAU};

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
}

impl MeshData {
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Axis-aligned cuboid with extents [-0.5, 0.5] on every axis. Four
/// vertices per face so each face keeps its own normal.
pub fn cuboid() -> MeshData {
    let faces: [(Vec3, Vec3, Vec3); 6] = [
        // (normal, tangent u, tangent v)
        (Vec3::X, Vec3::Y, Vec3::Z),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::Z, Vec3::X),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::Y, Vec3::X),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u16;
        for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let position = normal * 0.5 + u * su + v * sv;
            vertices.push(Vertex {
                position: position.to_array(),
                normal: normal.to_array(),
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    MeshData { vertices, indices }
}

/// UV sphere with shared smooth normals. The batch spheres use radius 0.6
/// on a deliberately coarse 8x8 grid.
pub fn sphere(radius: f32, segments: u16, rings: u16) -> MeshData {
    let mut vertices = Vec::with_capacity(((rings + 1) * (segments + 1)) as usize);
    for ring in 0..=rings {
        let theta = PI * ring as f32 / rings as f32;
        let y = theta.cos();
        let ring_radius = theta.sin();
        for segment in 0..=segments {
            let phi = TAU * segment as f32 / segments as f32;
            let normal = Vec3::new(ring_radius * phi.cos(), y, ring_radius * phi.sin());
            vertices.push(Vertex {
                position: (normal * radius).to_array(),
                normal: normal.to_array(),
            });
        }
    }

    let stride = segments + 1;
    let mut indices = Vec::with_capacity((rings * segments * 6) as usize);
    for ring in 0..rings {
        for segment in 0..segments {
            let a = ring * stride + segment;
            let b = a + stride;
            indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    MeshData { vertices, indices }
}

/// Regular octahedron of the given radius with flat per-face normals.
pub fn octahedron(radius: f32) -> MeshData {
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(24);
    for sx in [1.0f32, -1.0] {
        for sy in [1.0f32, -1.0] {
            for sz in [1.0f32, -1.0] {
                let a = Vec3::new(sx, 0.0, 0.0) * radius;
                let b = Vec3::new(0.0, sy, 0.0) * radius;
                let c = Vec3::new(0.0, 0.0, sz) * radius;
                // Swap two corners in the mirrored octants so the face
                // normal points away from the centre.
                let (b, c) = if sx * sy * sz > 0.0 { (b, c) } else { (c, b) };
                let normal = (b - a).cross(c - a).normalize();

                let base = vertices.len() as u16;
                for position in [a, b, c] {
                    vertices.push(Vertex {
                        position: position.to_array(),
                        normal: normal.to_array(),
                    });
                }
                indices.extend_from_slice(&[base, base + 1, base + 2]);
            }
        }
    }
    MeshData { vertices, indices }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_unit_normals(mesh: &MeshData) {
        for vertex in &mesh.vertices {
            let length = Vec3::from_array(vertex.normal).length();
            assert!((length - 1.0).abs() < 1e-5);
        }
    }

    fn assert_indices_in_range(mesh: &MeshData) {
        for &index in &mesh.indices {
            assert!((index as usize) < mesh.vertices.len());
        }
        assert_eq!(mesh.indices.len() % 3, 0);
    }

    #[test]
    fn test_cuboid_shape() {
        let mesh = cuboid();
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.index_count(), 36);
        assert_unit_normals(&mesh);
        assert_indices_in_range(&mesh);
        for vertex in &mesh.vertices {
            for coordinate in vertex.position {
                assert!(coordinate.abs() <= 0.5 + 1e-6);
            }
            // Every corner sits on the surface of the half-unit box.
            assert!((Vec3::from_array(vertex.position)
                .abs()
                .max_element()
                - 0.5)
                .abs()
                < 1e-6);
        }
    }

    #[test]
    fn test_sphere_shape() {
        let mesh = sphere(0.6, 8, 8);
        assert_eq!(mesh.vertices.len(), 81);
        assert_eq!(mesh.index_count(), 8 * 8 * 6);
        assert_unit_normals(&mesh);
        assert_indices_in_range(&mesh);
        for vertex in &mesh.vertices {
            let radius = Vec3::from_array(vertex.position).length();
            assert!((radius - 0.6).abs() < 1e-5);
        }
    }

    #[test]
    fn test_octahedron_normals_face_outward() {
        let mesh = octahedron(1.0);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.index_count(), 24);
        assert_unit_normals(&mesh);
        assert_indices_in_range(&mesh);
        for triangle in mesh.indices.chunks(3) {
            let centroid = triangle
                .iter()
                .map(|&i| Vec3::from_array(mesh.vertices[i as usize].position))
                .sum::<Vec3>()
                / 3.0;
            let normal = Vec3::from_array(mesh.vertices[triangle[0] as usize].normal);
            assert!(centroid.dot(normal) > 0.0);
        }
    }
}
