//! Collision queries between support geometry and the object mesh.
//!
//! Swept volumes (pinheads, beams) are approximated by a fan of parallel
//! rays cast from a ring around the sweep axis. The clearance of the sweep
//! is the shortest ray hit.

use crate::geometry::{Point3, PointRing, Vec3};
use crate::mesh::IndexedMesh;

/// Number of rays used to approximate a sweep.
pub const SWEEP_SAMPLES: usize = 8;

/// Offset used when re-casting a ray from the outside of the model.
const RECAST_EPSILON: f64 = 1e-4;

/// Result of a ray or sweep query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitResult {
    distance: f64,
    source: Point3,
    dir: Vec3,
    normal: Vec3,
    inside: bool,
}

impl HitResult {
    /// A query result at `distance` along `dir` from `source`.
    pub fn new(source: Point3, dir: Vec3, distance: f64, normal: Vec3, inside: bool) -> Self {
        Self {
            distance,
            source,
            dir,
            normal,
            inside,
        }
    }

    /// A query that found nothing in its way.
    pub fn miss(source: Point3, dir: Vec3) -> Self {
        Self::new(source, dir, f64::INFINITY, Vec3::zeros(), false)
    }

    /// A query that is blocked right at its start.
    pub fn blocked(source: Point3, dir: Vec3) -> Self {
        Self::new(source, dir, 0.0, Vec3::zeros(), false)
    }

    /// Distance to the first collision, `f64::INFINITY` if there is none.
    pub fn distance(&self) -> f64 {
        self.distance
    }

    /// Whether anything was hit.
    pub fn is_hit(&self) -> bool {
        self.distance.is_finite()
    }

    /// Where the ray started.
    pub fn source(&self) -> Point3 {
        self.source
    }

    /// Collision point. Not finite on a miss.
    pub fn position(&self) -> Point3 {
        self.source + self.distance * self.dir
    }

    /// Direction of the query.
    pub fn direction(&self) -> Vec3 {
        self.dir
    }

    /// Surface normal at the collision point (zero on a miss).
    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    /// The ray started inside the model and hit it from behind.
    pub fn is_inside(&self) -> bool {
        self.inside
    }
}

fn closest_of(hits: impl IntoIterator<Item = HitResult>) -> Option<HitResult> {
    hits.into_iter()
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
}

/// Read-only geometric queries against the object to support.
///
/// Implementors provide ray casting and nearest point queries; the sweep
/// tests are built on top of them. Every method must be safe to call from
/// several threads at once.
pub trait CollisionOracle: Send + Sync {
    /// Closest hit of the ray `source + t * dir`, `t > 0`.
    fn ray_hit(&self, source: &Point3, dir: &Vec3) -> HitResult;

    /// Squared distance from `p` to the surface.
    fn squared_distance(&self, p: &Point3) -> f64;

    /// Unit surface normal at the surface point closest to `p`.
    fn normal_at(&self, p: &Point3) -> Vec3;

    /// Lowest Z coordinate of the object.
    fn ground_level(&self) -> f64;

    /// How deep pillars without a pedestal may sink below ground.
    fn ground_level_offset(&self) -> f64 {
        0.0
    }

    /// Distance from `p` to the closest surface point.
    fn point_to_mesh_distance(&self, p: &Point3) -> f64 {
        self.squared_distance(p).sqrt()
    }

    /// Clearance of a pinhead of width `width` placed at `source` and pointing along `dir`.
    ///
    /// Rays run from the pin circle towards the back circle. A ray starting
    /// inside the model is re-cast from the far side of a thin wall, or yields
    /// zero clearance when the pin is buried deeper than its radius.
    fn pinhead_intersect(
        &self,
        source: &Point3,
        dir: &Vec3,
        r_pin: f64,
        r_back: f64,
        width: f64,
        sd: f64,
    ) -> HitResult {
        let ring = PointRing::<SWEEP_SAMPLES>::new(dir);
        let back_center = source + width * dir;
        let (rpin, rback) = (r_pin + sd, r_back + sd);

        let hits = (0..SWEEP_SAMPLES).map(|i| {
            let ps = ring.get(i, source, rpin);
            let pb = ring.get(i, &back_center, rback);
            let n = (pb - ps).normalize();

            let q = self.ray_hit(&(ps + sd * n), &n);
            if !q.is_inside() {
                q
            } else if q.distance() > rpin {
                HitResult::blocked(ps, n)
            } else {
                self.ray_hit(&(ps + (q.distance() + 2.0 * sd) * n), &n)
            }
        });

        closest_of(hits).unwrap_or_else(|| HitResult::miss(*source, *dir))
    }

    /// Clearance of a cylindrical beam of radius `r` swept from `source` along `dir`.
    fn beam_intersect(&self, source: &Point3, dir: &Vec3, r: f64, sd: f64) -> HitResult {
        let ring = PointRing::<SWEEP_SAMPLES>::new(dir);

        let hits = (0..SWEEP_SAMPLES).map(|i| {
            let p = ring.get(i, source, r + sd);
            let q = self.ray_hit(&(p + r * dir), dir);
            if !q.is_inside() {
                q
            } else if q.distance() > 2.0 * r + sd {
                HitResult::blocked(p, *dir)
            } else {
                self.ray_hit(&(q.position() + RECAST_EPSILON * dir), dir)
            }
        });

        closest_of(hits).unwrap_or_else(|| HitResult::miss(*source, *dir))
    }
}

impl CollisionOracle for IndexedMesh {
    fn ray_hit(&self, source: &Point3, dir: &Vec3) -> HitResult {
        let dir = dir.normalize();
        let hit = self.query_ray_hit(source, &dir);
        HitResult::new(*source, dir, hit.t, hit.normal, hit.inside)
    }

    fn squared_distance(&self, p: &Point3) -> f64 {
        IndexedMesh::squared_distance(self, p)
    }

    fn normal_at(&self, p: &Point3) -> Vec3 {
        IndexedMesh::normal_at(self, p)
    }

    fn ground_level(&self) -> f64 {
        IndexedMesh::ground_level(self)
    }

    fn ground_level_offset(&self) -> f64 {
        IndexedMesh::ground_level_offset(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DOWN;
    use crate::mesh::fixtures::{box_mesh, boxes_mesh};
    use approx::assert_relative_eq;

    fn plate() -> IndexedMesh {
        box_mesh(Point3::new(-10.0, -10.0, 10.0), Point3::new(10.0, 10.0, 12.0))
    }

    #[test]
    fn test_hit_result_accessors() {
        let hit = HitResult::new(Point3::origin(), DOWN, 2.0, Vec3::z(), false);
        assert!(hit.is_hit());
        assert_relative_eq!(hit.position().z, -2.0);

        let miss = HitResult::miss(Point3::origin(), DOWN);
        assert!(!miss.is_hit());
        assert!(miss.distance().is_infinite());
    }

    #[test]
    fn test_beam_below_plate_reaches_ground() {
        let mesh = plate();
        let hit = mesh.beam_intersect(&Point3::new(0.0, 0.0, 8.0), &DOWN, 0.5, 0.5);
        assert!(!hit.is_hit());

        let up = mesh.beam_intersect(&Point3::new(0.0, 0.0, 8.0), &Vec3::z(), 0.5, 0.5);
        assert!(up.is_hit());
        assert_relative_eq!(up.distance(), 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_beam_between_plates_is_blocked() {
        let mesh = boxes_mesh(&[
            (Point3::new(-10.0, -10.0, 0.0), Point3::new(10.0, 10.0, 2.0)),
            (Point3::new(-10.0, -10.0, 6.0), Point3::new(10.0, 10.0, 8.0)),
        ]);
        let hit = mesh.beam_intersect(&Point3::new(0.0, 0.0, 5.0), &DOWN, 0.5, 0.5);
        assert!(hit.is_hit());
        assert_relative_eq!(hit.distance(), 2.5, epsilon = 1e-9);
        assert_relative_eq!(hit.normal().z, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pinhead_clearance() {
        let mesh = plate();
        let hit = mesh.pinhead_intersect(&Point3::new(0.0, 0.0, 10.0), &DOWN, 0.2, 0.5, 2.2, 0.5);
        assert!(hit.distance() > 2.2);

        // A second plate right below the support point leaves no room.
        let mesh = boxes_mesh(&[
            (Point3::new(-10.0, -10.0, 10.0), Point3::new(10.0, 10.0, 12.0)),
            (Point3::new(-10.0, -10.0, 6.0), Point3::new(10.0, 10.0, 9.0)),
        ]);
        let hit = mesh.pinhead_intersect(&Point3::new(0.0, 0.0, 10.0), &DOWN, 0.2, 0.5, 2.2, 0.5);
        assert!(hit.distance() < 2.2);
    }

    #[test]
    fn test_buried_pinhead_has_no_clearance() {
        let mesh = plate();
        let hit = mesh.pinhead_intersect(&Point3::new(0.0, 0.0, 11.8), &DOWN, 0.2, 0.5, 2.2, 0.5);
        assert_relative_eq!(hit.distance(), 0.0);
    }

    /// A 0.2mm sheet at z = 10, optionally above a floor.
    fn sheet(with_floor: bool) -> IndexedMesh {
        let mut boxes = vec![(Point3::new(-10.0, -10.0, 10.0), Point3::new(10.0, 10.0, 10.2))];
        if with_floor {
            boxes.push((Point3::new(-10.0, -10.0, 0.0), Point3::new(10.0, 10.0, 2.0)));
        }
        boxes_mesh(&boxes)
    }

    #[test]
    fn test_beam_recasts_past_thin_wall() {
        // Ring rays start at z = 10.1, inside the sheet.
        let src = Point3::new(0.3, 0.1, 10.6);
        let hit = sheet(false).beam_intersect(&src, &DOWN, 0.5, 0.5);
        assert!(!hit.is_hit(), "beam re-hit the sheet at {}", hit.distance());

        let hit = sheet(true).beam_intersect(&src, &DOWN, 0.5, 0.5);
        assert!(hit.is_hit());
        assert_relative_eq!(hit.position().z, 2.0, epsilon = 1e-9);
        assert_relative_eq!(hit.normal().z, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_beam_inside_thick_wall_is_blocked() {
        // 1.9mm to the exit is more than 2r + sd.
        let hit = plate().beam_intersect(&Point3::new(0.3, 0.1, 12.4), &DOWN, 0.5, 0.5);
        assert!(hit.is_hit());
        assert_relative_eq!(hit.distance(), 0.0);
    }

    #[test]
    fn test_pinhead_recasts_past_thin_wall() {
        let src = Point3::new(0.3, 0.1, 10.6);
        let hit = sheet(false).pinhead_intersect(&src, &DOWN, 0.2, 0.5, 2.2, 0.5);
        assert!(!hit.is_hit(), "pinhead re-hit the sheet at {}", hit.distance());

        let hit = sheet(true).pinhead_intersect(&src, &DOWN, 0.2, 0.5, 2.2, 0.5);
        assert!(hit.is_hit());
        assert!(hit.distance() > 2.2);
    }

    #[test]
    fn test_pinhead_inside_thick_wall_is_blocked() {
        // Pin rays start 1.4mm above the bottom face, deeper than the pin ring.
        let hit = plate().pinhead_intersect(&Point3::new(0.3, 0.1, 11.9), &DOWN, 0.2, 0.5, 2.2, 0.5);
        assert!(hit.is_hit());
        assert_relative_eq!(hit.distance(), 0.0);
    }

    #[test]
    fn test_point_to_mesh_distance() {
        let mesh = plate();
        assert_relative_eq!(
            mesh.point_to_mesh_distance(&Point3::new(0.0, 0.0, 7.0)),
            3.0,
            epsilon = 1e-9
        );
    }
}
