//! Indexed triangle mesh with a BVH for collision queries.

pub mod bvh;
pub mod ray;

use crate::error::{Result, SupportError};
use crate::geometry::{Point3, Vec3};

use self::bvh::{Bvh, BvhClosest};
use self::ray::{Ray, Triangle};

/// Triangles closer than this to a surface point contribute to its normal.
const NORMAL_EPSILON: f64 = 1e-6;

/// Closest intersection of a ray with the mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshHit {
    /// Distance along the ray, `f64::INFINITY` on a miss.
    pub t: f64,
    /// Normal of the triangle that was hit.
    pub normal: Vec3,
    /// The ray hit the back side of a triangle, so it started inside the model.
    pub inside: bool,
}

impl MeshHit {
    fn miss() -> Self {
        Self {
            t: f64::INFINITY,
            normal: Vec3::zeros(),
            inside: false,
        }
    }
}

/// The object to support: a closed triangle mesh with an acceleration structure.
#[derive(Debug, Clone)]
pub struct IndexedMesh {
    vertices: Vec<Point3>,
    indices: Vec<[u32; 3]>,
    triangles: Vec<Triangle>,
    bvh: Bvh,
    ground_level: f64,
    ground_level_offset: f64,
}

impl IndexedMesh {
    /// Build a mesh from vertex positions and triangle indices.
    pub fn new(vertices: Vec<Point3>, indices: Vec<[u32; 3]>) -> Result<Self> {
        if indices.is_empty() {
            return Err(SupportError::EmptyMesh);
        }
        if let Some(v) = vertices.iter().find(|v| !v.coords.iter().all(|c| c.is_finite())) {
            return Err(SupportError::DegenerateMesh(format!(
                "non-finite vertex {v:?}"
            )));
        }

        let mut triangles = Vec::with_capacity(indices.len());
        for (fi, tri) in indices.iter().enumerate() {
            let mut corners = [Point3::origin(); 3];
            for (corner, &vi) in corners.iter_mut().zip(tri) {
                *corner = *vertices.get(vi as usize).ok_or_else(|| {
                    SupportError::DegenerateMesh(format!(
                        "triangle {fi} references vertex {vi} of {}",
                        vertices.len()
                    ))
                })?;
            }
            triangles.push(Triangle::new(corners[0], corners[1], corners[2]));
        }

        let ground_level = vertices
            .iter()
            .map(|v| v.z)
            .fold(f64::INFINITY, f64::min);
        let bvh = Bvh::build(&triangles);

        Ok(Self {
            vertices,
            indices,
            triangles,
            bvh,
            ground_level,
            ground_level_offset: 0.0,
        })
    }

    /// Build a mesh from flat `[x0, y0, z0, ...]` positions and flat indices,
    /// the layout produced by tessellators.
    pub fn from_flat(positions: &[f32], indices: &[u32]) -> Result<Self> {
        if positions.len() % 3 != 0 || indices.len() % 3 != 0 {
            return Err(SupportError::DegenerateMesh(
                "flat buffers must hold whole triples".into(),
            ));
        }
        let vertices = positions
            .chunks_exact(3)
            .map(|c| Point3::new(c[0] as f64, c[1] as f64, c[2] as f64))
            .collect();
        let indices = indices
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();
        Self::new(vertices, indices)
    }

    /// Vertex positions.
    pub fn vertices(&self) -> &[Point3] {
        &self.vertices
    }

    /// Triangle indices.
    pub fn indices(&self) -> &[[u32; 3]] {
        &self.indices
    }

    /// Triangles with precomputed normals, in index order.
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// Lowest Z coordinate of the mesh.
    pub fn ground_level(&self) -> f64 {
        self.ground_level
    }

    /// How deep pillars without a pedestal may sink below the ground level.
    pub fn ground_level_offset(&self) -> f64 {
        self.ground_level_offset
    }

    /// Set the ground level offset, e.g. to the pad wall thickness.
    pub fn set_ground_level_offset(&mut self, offset: f64) {
        self.ground_level_offset = offset;
    }

    /// Closest intersection of the ray `source + t * dir`, `t > 0`, with the mesh.
    pub fn query_ray_hit(&self, source: &Point3, dir: &Vec3) -> MeshHit {
        let ray = Ray::new(*source, *dir);
        match self.bvh.trace_closest(&self.triangles, &ray) {
            Some(hit) => {
                let normal = self.triangles[hit.triangle].normal;
                MeshHit {
                    t: hit.t,
                    normal,
                    inside: normal.dot(&ray.direction) > 0.0,
                }
            }
            None => MeshHit::miss(),
        }
    }

    /// Closest point of the surface to `p`.
    pub fn closest_point(&self, p: &Point3) -> Option<BvhClosest> {
        self.bvh.closest_point(&self.triangles, p)
    }

    /// Squared distance from `p` to the surface.
    pub fn squared_distance(&self, p: &Point3) -> f64 {
        self.closest_point(p)
            .map_or(f64::INFINITY, |c| c.distance_sq)
    }

    /// Surface normal at the surface point closest to `p`.
    ///
    /// Normals of every triangle touching that point are averaged, so points
    /// on edges and vertices get a blended normal.
    pub fn normal_at(&self, p: &Point3) -> Vec3 {
        let Some(closest) = self.closest_point(p) else {
            return Vec3::zeros();
        };

        let touching = self
            .bvh
            .triangles_within(&self.triangles, &closest.point, NORMAL_EPSILON);
        let sum: Vec3 = touching.iter().map(|&id| self.triangles[id].normal).sum();

        sum.try_normalize(f64::EPSILON)
            .unwrap_or(self.triangles[closest.triangle].normal)
    }
}

/// Mesh fixtures shared by the unit tests of this crate.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Axis-aligned box with outward facing triangles.
    pub(crate) fn box_mesh(min: Point3, max: Point3) -> IndexedMesh {
        boxes_mesh(&[(min, max)])
    }

    /// Several disjoint boxes in one mesh.
    pub(crate) fn boxes_mesh(boxes: &[(Point3, Point3)]) -> IndexedMesh {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        for (min, max) in boxes {
            let base = vertices.len() as u32;
            for i in 0..8u32 {
                vertices.push(Point3::new(
                    if i & 1 == 0 { min.x } else { max.x },
                    if i & 2 == 0 { min.y } else { max.y },
                    if i & 4 == 0 { min.z } else { max.z },
                ));
            }
            let faces: [[u32; 3]; 12] = [
                // -Z
                [0, 2, 1],
                [1, 2, 3],
                // +Z
                [4, 5, 6],
                [5, 7, 6],
                // -Y
                [0, 1, 4],
                [1, 5, 4],
                // +Y
                [2, 6, 3],
                [3, 6, 7],
                // -X
                [0, 4, 2],
                [2, 4, 6],
                // +X
                [1, 3, 5],
                [3, 7, 5],
            ];
            indices.extend(faces.iter().map(|f| [f[0] + base, f[1] + base, f[2] + base]));
        }
        IndexedMesh::new(vertices, indices).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::box_mesh;
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_box_normals_point_outward() {
        let mesh = box_mesh(Point3::origin(), Point3::new(2.0, 2.0, 2.0));
        let center = Point3::new(1.0, 1.0, 1.0);
        for tri in mesh.triangles() {
            let c = Point3::from((tri.v[0].coords + tri.v[1].coords + tri.v[2].coords) / 3.0);
            assert!(tri.normal.dot(&(c - center)) > 0.0);
        }
        assert_relative_eq!(mesh.ground_level(), 0.0);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(
            IndexedMesh::new(vec![], vec![]).unwrap_err(),
            SupportError::EmptyMesh
        );
        let err = IndexedMesh::new(vec![Point3::origin()], vec![[0, 1, 2]]).unwrap_err();
        assert!(matches!(err, SupportError::DegenerateMesh(_)));
        assert!(IndexedMesh::from_flat(&[0.0, 1.0], &[0, 0, 0]).is_err());
    }

    #[test]
    fn test_from_flat() {
        let mesh = IndexedMesh::from_flat(
            &[0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0],
            &[0, 1, 2],
        )
        .unwrap();
        assert_eq!(mesh.triangles().len(), 1);
        assert_relative_eq!(mesh.ground_level(), 1.0);
    }

    #[test]
    fn test_ray_hit_outside_and_inside() {
        let mesh = box_mesh(Point3::origin(), Point3::new(10.0, 10.0, 10.0));

        let hit = mesh.query_ray_hit(&Point3::new(5.0, 5.0, -3.0), &Vec3::z());
        assert_relative_eq!(hit.t, 3.0, epsilon = 1e-9);
        assert!(!hit.inside);

        let hit = mesh.query_ray_hit(&Point3::new(5.0, 5.0, 4.0), &Vec3::z());
        assert_relative_eq!(hit.t, 6.0, epsilon = 1e-9);
        assert!(hit.inside);

        let miss = mesh.query_ray_hit(&Point3::new(5.0, 5.0, -3.0), &(-Vec3::z()));
        assert!(miss.t.is_infinite());
    }

    #[test]
    fn test_normal_at_face_and_edge() {
        let mesh = box_mesh(Point3::origin(), Point3::new(10.0, 10.0, 10.0));

        let n = mesh.normal_at(&Point3::new(3.0, 4.0, 0.0));
        assert_abs_diff_eq!(n, Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-9);

        let n = mesh.normal_at(&Point3::new(5.0, 0.0, 0.0));
        let expected = Vec3::new(0.0, -1.0, -1.0).normalize();
        assert_abs_diff_eq!(n, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_squared_distance() {
        let mesh = box_mesh(Point3::origin(), Point3::new(10.0, 10.0, 10.0));
        assert_relative_eq!(mesh.squared_distance(&Point3::new(5.0, 5.0, -2.0)), 4.0, epsilon = 1e-9);
        assert_relative_eq!(mesh.squared_distance(&Point3::new(13.0, 14.0, 5.0)), 25.0, epsilon = 1e-9);
    }
}
