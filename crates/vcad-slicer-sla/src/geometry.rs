//! Geometry types and helpers shared by the support tree modules.
//!
//! Thin aliases over nalgebra plus the spherical coordinate conversions
//! used for head and bridge orientations.

use std::f64::consts::PI;

use nalgebra::{Vector2, Vector3};

/// A point in 3D space.
pub type Point3 = nalgebra::Point3<f64>;

/// A vector in 3D space.
pub type Vec3 = Vector3<f64>;

/// A point in the XY plane.
pub type Point2 = nalgebra::Point2<f64>;

/// A vector in the XY plane.
pub type Vec2 = Vector2<f64>;

/// Straight down, towards the print bed.
pub const DOWN: Vec3 = Vec3::new(0.0, 0.0, -1.0);

/// Convert a direction into `(polar, azimuth)`.
///
/// The polar angle is measured from +Z, so a direction pointing straight
/// down has a polar angle of π.
pub fn dir_to_spheric(n: &Vec3) -> (f64, f64) {
    let norm = n.norm();
    let polar = (n.z / norm).clamp(-1.0, 1.0).acos();
    let azimuth = n.y.atan2(n.x);
    (polar, azimuth)
}

/// Inverse of [`dir_to_spheric`] for unit directions.
pub fn spheric_to_dir(polar: f64, azimuth: f64) -> Vec3 {
    let (sp, cp) = polar.sin_cos();
    let (sa, ca) = azimuth.sin_cos();
    Vec3::new(ca * sp, sa * sp, cp)
}

/// Distance of two points projected onto the XY plane.
#[inline]
pub fn distance_2d(a: &Point3, b: &Point3) -> f64 {
    Vec2::new(a.x - b.x, a.y - b.y).norm()
}

/// Normalized direction from `from` to `to`.
#[inline]
pub fn dirv(from: &Point3, to: &Point3) -> Vec3 {
    (to - from).normalize()
}

/// Angle between a segment and the horizontal plane, in `[0, π/2]`.
pub fn slope_angle(a: &Point3, b: &Point3) -> f64 {
    let dz = (b.z - a.z).abs();
    dz.atan2(distance_2d(a, b))
}

/// `N` evenly spaced points on a circle perpendicular to an axis.
///
/// Used to approximate swept volumes with a fan of parallel rays.
#[derive(Debug, Clone, Copy)]
pub struct PointRing<const N: usize> {
    a: Vec3,
    b: Vec3,
}

impl<const N: usize> PointRing<N> {
    /// Create a ring around the (unit) axis `n`.
    pub fn new(n: &Vec3) -> Self {
        // Any vector not parallel to the axis works as a seed for the basis.
        let seed = if n.x.abs() < 0.9 {
            Vec3::x()
        } else {
            Vec3::y()
        };
        let a = n.cross(&seed).normalize();
        let b = n.cross(&a).normalize();
        Self { a, b }
    }

    /// The `idx`-th point of a ring of radius `r` centered at `center`.
    pub fn get(&self, idx: usize, center: &Point3, r: f64) -> Point3 {
        let phi = 2.0 * PI * idx as f64 / N as f64;
        let (s, c) = phi.sin_cos();
        center + r * (c * self.a + s * self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_spheric_round_trip_down() {
        let (polar, azimuth) = dir_to_spheric(&DOWN);
        assert_relative_eq!(polar, PI);
        let back = spheric_to_dir(polar, azimuth);
        assert_abs_diff_eq!(back, DOWN, epsilon = 1e-12);
    }

    #[test]
    fn test_spheric_tilted() {
        let d = Vec3::new(1.0, 1.0, -2.0f64.sqrt()).normalize();
        let (polar, azimuth) = dir_to_spheric(&d);
        assert_relative_eq!(polar, 3.0 * PI / 4.0, epsilon = 1e-12);
        assert_relative_eq!(azimuth, PI / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_point_ring_is_perpendicular() {
        let axis = Vec3::new(0.3, -0.2, -1.0).normalize();
        let ring = PointRing::<8>::new(&axis);
        let center = Point3::new(1.0, 2.0, 3.0);
        for i in 0..8 {
            let p = ring.get(i, &center, 2.0);
            let v = p - center;
            assert_relative_eq!(v.norm(), 2.0, epsilon = 1e-12);
            assert_abs_diff_eq!(v.dot(&axis), 0.0, epsilon = 1e-12);
        }
        // Opposite samples are diametrically opposed.
        let p0 = ring.get(0, &center, 1.0);
        let p4 = ring.get(4, &center, 1.0);
        assert_relative_eq!((p0 - p4).norm(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_slope_angle() {
        let a = Point3::new(0.0, 0.0, 10.0);
        let b = Point3::new(3.0, 4.0, 5.0);
        assert_relative_eq!(slope_angle(&a, &b), PI / 4.0, epsilon = 1e-12);
        assert_relative_eq!(distance_2d(&a, &b), 5.0);
    }
}
