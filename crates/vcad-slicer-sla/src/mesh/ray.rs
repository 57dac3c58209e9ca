//! Rays, bounding boxes and the triangle primitives the BVH is built from.

use crate::geometry::{Point3, Vec3};

/// Axis-aligned bounding box in 3D.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb3 {
    /// Minimum corner.
    pub min: Point3,
    /// Maximum corner.
    pub max: Point3,
}

impl Aabb3 {
    /// Create an empty (inverted) AABB suitable for expansion.
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Expand this AABB to include a point.
    pub fn include_point(&mut self, p: &Point3) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    /// Expand this AABB to include another one.
    pub fn include(&mut self, other: &Aabb3) {
        self.include_point(&other.min);
        self.include_point(&other.max);
    }

    /// Center of the box.
    pub fn center(&self) -> Point3 {
        nalgebra::center(&self.min, &self.max)
    }

    /// Surface area, used by the SAH split cost.
    pub fn surface_area(&self) -> f64 {
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Squared distance from a point to the box (zero inside).
    pub fn squared_distance(&self, p: &Point3) -> f64 {
        let dx = (self.min.x - p.x).max(0.0).max(p.x - self.max.x);
        let dy = (self.min.y - p.y).max(0.0).max(p.y - self.max.y);
        let dz = (self.min.z - p.z).max(0.0).max(p.z - self.max.z);
        dx * dx + dy * dy + dz * dz
    }
}

/// A ray in 3D space defined by origin and direction.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// Origin point of the ray.
    pub origin: Point3,
    /// Unit direction of the ray.
    pub direction: Vec3,
    /// Precomputed reciprocal of direction components for fast AABB tests.
    inv_direction: Vec3,
}

impl Ray {
    /// Create a new ray from origin and direction.
    ///
    /// The direction will be normalized.
    pub fn new(origin: Point3, direction: Vec3) -> Self {
        let direction = direction.normalize();
        let inv_direction = Vec3::new(1.0 / direction.x, 1.0 / direction.y, 1.0 / direction.z);
        Self {
            origin,
            direction,
            inv_direction,
        }
    }

    /// Evaluate the ray at parameter `t`: `origin + t * direction`.
    #[inline]
    pub fn at(&self, t: f64) -> Point3 {
        self.origin + t * self.direction
    }

    /// Test ray-AABB intersection using the slab method.
    ///
    /// Returns the entry parameter (clamped to zero) if the ray hits the box.
    #[inline]
    pub fn intersect_aabb(&self, aabb: &Aabb3) -> Option<f64> {
        let mut t_min = f64::NEG_INFINITY;
        let mut t_max = f64::INFINITY;

        for axis in 0..3 {
            let inv = self.inv_direction[axis];
            let o = self.origin[axis];
            let mut t0 = (aabb.min[axis] - o) * inv;
            let mut t1 = (aabb.max[axis] - o) * inv;
            // 0 * inf produces NaN for rays lying in a slab plane.
            if t0.is_nan() {
                t0 = f64::NEG_INFINITY;
            }
            if t1.is_nan() {
                t1 = f64::INFINITY;
            }
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
        }

        if t_max >= t_min && t_max >= 0.0 {
            Some(t_min.max(0.0))
        } else {
            None
        }
    }
}

/// A triangle with precomputed unit normal.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    /// Vertices in counter-clockwise order seen from outside.
    pub v: [Point3; 3],
    /// Outward unit normal (zero for degenerate triangles).
    pub normal: Vec3,
}

impl Triangle {
    /// Create a triangle, computing its normal from the winding order.
    pub fn new(a: Point3, b: Point3, c: Point3) -> Self {
        let n = (b - a).cross(&(c - a));
        let len = n.norm();
        let normal = if len > 1e-20 { n / len } else { Vec3::zeros() };
        Self {
            v: [a, b, c],
            normal,
        }
    }

    /// Bounding box of the triangle.
    pub fn aabb(&self) -> Aabb3 {
        let mut aabb = Aabb3::empty();
        for p in &self.v {
            aabb.include_point(p);
        }
        aabb
    }

    /// Möller–Trumbore intersection. Returns the ray parameter of the hit.
    pub fn intersect(&self, ray: &Ray) -> Option<f64> {
        const EPS: f64 = 1e-12;
        let e1 = self.v[1] - self.v[0];
        let e2 = self.v[2] - self.v[0];
        let p = ray.direction.cross(&e2);
        let det = e1.dot(&p);
        if det.abs() < EPS {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = ray.origin - self.v[0];
        let u = s.dot(&p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(&e1);
        let v = ray.direction.dot(&q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = e2.dot(&q) * inv_det;
        (t > EPS).then_some(t)
    }

    /// Closest point of the triangle to `p`.
    ///
    /// Region based projection from Ericson, "Real-Time Collision Detection".
    pub fn closest_point(&self, p: &Point3) -> Point3 {
        let [a, b, c] = self.v;
        let ab = b - a;
        let ac = c - a;
        let ap = p - a;
        let d1 = ab.dot(&ap);
        let d2 = ac.dot(&ap);
        if d1 <= 0.0 && d2 <= 0.0 {
            return a;
        }

        let bp = p - b;
        let d3 = ab.dot(&bp);
        let d4 = ac.dot(&bp);
        if d3 >= 0.0 && d4 <= d3 {
            return b;
        }

        let vc = d1 * d4 - d3 * d2;
        if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
            let v = d1 / (d1 - d3);
            return a + v * ab;
        }

        let cp = p - c;
        let d5 = ab.dot(&cp);
        let d6 = ac.dot(&cp);
        if d6 >= 0.0 && d5 <= d6 {
            return c;
        }

        let vb = d5 * d2 - d1 * d6;
        if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
            let w = d2 / (d2 - d6);
            return a + w * ac;
        }

        let va = d3 * d6 - d5 * d4;
        if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
            let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
            return b + w * (c - b);
        }

        let denom = 1.0 / (va + vb + vc);
        let v = vb * denom;
        let w = vc * denom;
        a + ab * v + ac * w
    }
}
