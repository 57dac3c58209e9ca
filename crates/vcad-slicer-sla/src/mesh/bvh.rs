//! Bounding Volume Hierarchy over mesh triangles.
//!
//! Uses Surface Area Heuristic (SAH) for construction. Answers closest ray
//! hits and closest surface points.

use crate::geometry::Point3;

use super::ray::{Aabb3, Ray, Triangle};

/// A BVH node - either a leaf containing triangles or an internal node with children.
#[derive(Debug, Clone)]
pub enum BvhNode {
    /// Leaf node containing triangle indices.
    Leaf {
        /// Axis-aligned bounding box of this node.
        aabb: Aabb3,
        /// Triangle indices contained in this leaf.
        triangles: Vec<usize>,
    },
    /// Internal node with two children.
    Internal {
        /// Axis-aligned bounding box of this node.
        aabb: Aabb3,
        /// Left child node.
        left: Box<BvhNode>,
        /// Right child node.
        right: Box<BvhNode>,
    },
}

impl BvhNode {
    fn aabb(&self) -> &Aabb3 {
        match self {
            BvhNode::Leaf { aabb, .. } | BvhNode::Internal { aabb, .. } => aabb,
        }
    }
}

/// Closest ray hit found in the hierarchy.
#[derive(Debug, Clone, Copy)]
pub struct BvhHit {
    /// Ray parameter of the hit.
    pub t: f64,
    /// Index of the triangle that was hit.
    pub triangle: usize,
}

/// Closest surface point found in the hierarchy.
#[derive(Debug, Clone, Copy)]
pub struct BvhClosest {
    /// Squared distance from the query point.
    pub distance_sq: f64,
    /// Closest point on the surface.
    pub point: Point3,
    /// Index of the triangle the point lies on.
    pub triangle: usize,
}

/// Bounding Volume Hierarchy for accelerated ray-mesh and point-mesh queries.
///
/// The hierarchy only stores triangle indices; queries take the triangle
/// slice it was built from.
#[derive(Debug, Clone)]
pub struct Bvh {
    root: Option<BvhNode>,
}

impl Bvh {
    /// Build a BVH over the given triangles using SAH construction.
    pub fn build(triangles: &[Triangle]) -> Self {
        let mut tri_data: Vec<(usize, Aabb3, Point3)> = triangles
            .iter()
            .enumerate()
            .map(|(idx, tri)| {
                let aabb = tri.aabb();
                (idx, aabb, aabb.center())
            })
            .collect();

        let root = if tri_data.is_empty() {
            None
        } else {
            Some(build_node(&mut tri_data))
        };

        Self { root }
    }

    /// Bounding box of the whole hierarchy.
    pub fn bounds(&self) -> Option<Aabb3> {
        self.root.as_ref().map(|root| *root.aabb())
    }

    /// Trace a ray and return only the closest hit.
    pub fn trace_closest(&self, triangles: &[Triangle], ray: &Ray) -> Option<BvhHit> {
        let mut closest: Option<BvhHit> = None;
        let mut closest_t = f64::INFINITY;

        if let Some(ref root) = self.root {
            trace_node_closest(triangles, ray, root, &mut closest, &mut closest_t);
        }

        closest
    }

    /// Find the point of the surface closest to `p`.
    pub fn closest_point(&self, triangles: &[Triangle], p: &Point3) -> Option<BvhClosest> {
        let mut best: Option<BvhClosest> = None;
        let mut best_d2 = f64::INFINITY;

        if let Some(ref root) = self.root {
            closest_in_node(triangles, p, root, &mut best, &mut best_d2);
        }

        best
    }

    /// Indices of all triangles closer to `p` than `radius`.
    pub fn triangles_within(&self, triangles: &[Triangle], p: &Point3, radius: f64) -> Vec<usize> {
        let mut out = Vec::new();
        let r2 = radius * radius;
        let mut stack: Vec<&BvhNode> = self.root.iter().collect();

        while let Some(node) = stack.pop() {
            if node.aabb().squared_distance(p) > r2 {
                continue;
            }
            match node {
                BvhNode::Leaf { triangles: ids, .. } => {
                    out.extend(
                        ids.iter()
                            .copied()
                            .filter(|&id| (triangles[id].closest_point(p) - p).norm_squared() <= r2),
                    );
                }
                BvhNode::Internal { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }

        out.sort_unstable();
        out
    }
}

fn trace_node_closest(
    triangles: &[Triangle],
    ray: &Ray,
    node: &BvhNode,
    closest: &mut Option<BvhHit>,
    closest_t: &mut f64,
) {
    match node {
        BvhNode::Leaf { aabb, triangles: ids } => {
            if let Some(t_min) = ray.intersect_aabb(aabb) {
                // Early out if AABB entry is beyond current closest
                if t_min >= *closest_t {
                    return;
                }

                for &id in ids {
                    if let Some(t) = triangles[id].intersect(ray) {
                        if t < *closest_t {
                            *closest_t = t;
                            *closest = Some(BvhHit { t, triangle: id });
                        }
                    }
                }
            }
        }
        BvhNode::Internal { aabb, left, right } => {
            if let Some(t_min) = ray.intersect_aabb(aabb) {
                if t_min >= *closest_t {
                    return;
                }

                // Test children in order of AABB distance
                let left_t = ray.intersect_aabb(left.aabb());
                let right_t = ray.intersect_aabb(right.aabb());

                match (left_t, right_t) {
                    (Some(lt), Some(rt)) => {
                        let (first, second) = if lt < rt {
                            (left, right)
                        } else {
                            (right, left)
                        };
                        trace_node_closest(triangles, ray, first, closest, closest_t);
                        trace_node_closest(triangles, ray, second, closest, closest_t);
                    }
                    (Some(_), None) => {
                        trace_node_closest(triangles, ray, left, closest, closest_t);
                    }
                    (None, Some(_)) => {
                        trace_node_closest(triangles, ray, right, closest, closest_t);
                    }
                    (None, None) => {}
                }
            }
        }
    }
}

fn closest_in_node(
    triangles: &[Triangle],
    p: &Point3,
    node: &BvhNode,
    best: &mut Option<BvhClosest>,
    best_d2: &mut f64,
) {
    if node.aabb().squared_distance(p) >= *best_d2 {
        return;
    }

    match node {
        BvhNode::Leaf { triangles: ids, .. } => {
            for &id in ids {
                let q = triangles[id].closest_point(p);
                let d2 = (q - p).norm_squared();
                if d2 < *best_d2 {
                    *best_d2 = d2;
                    *best = Some(BvhClosest {
                        distance_sq: d2,
                        point: q,
                        triangle: id,
                    });
                }
            }
        }
        BvhNode::Internal { left, right, .. } => {
            let dl = left.aabb().squared_distance(p);
            let dr = right.aabb().squared_distance(p);
            let (first, second) = if dl <= dr {
                (left, right)
            } else {
                (right, left)
            };
            closest_in_node(triangles, p, first, best, best_d2);
            closest_in_node(triangles, p, second, best, best_d2);
        }
    }
}

/// Build a BVH node recursively using SAH.
fn build_node(tri_data: &mut [(usize, Aabb3, Point3)]) -> BvhNode {
    let mut bounds = Aabb3::empty();
    for (_, aabb, _) in tri_data.iter() {
        bounds.include(aabb);
    }

    // Base case: small number of triangles -> leaf
    if tri_data.len() <= 4 {
        return BvhNode::Leaf {
            aabb: bounds,
            triangles: tri_data.iter().map(|(id, _, _)| *id).collect(),
        };
    }

    let (best_axis, best_pos) = find_best_split(tri_data, &bounds);
    let mut mid = partition(tri_data, best_axis, best_pos);

    // Fallback if partition fails
    if mid == 0 || mid == tri_data.len() {
        mid = tri_data.len() / 2;
    }

    let (left_data, right_data) = tri_data.split_at_mut(mid);

    BvhNode::Internal {
        aabb: bounds,
        left: Box::new(build_node(left_data)),
        right: Box::new(build_node(right_data)),
    }
}

/// Find the best split axis and position using SAH.
fn find_best_split(tri_data: &[(usize, Aabb3, Point3)], bounds: &Aabb3) -> (usize, f64) {
    const NUM_BUCKETS: usize = 12;

    let extent = bounds.max - bounds.min;
    let total_area = bounds.surface_area();

    let mut best_cost = f64::INFINITY;
    let mut best_axis = 0;
    let mut best_pos = 0.0;

    for axis in 0..3 {
        let axis_extent = extent[axis];
        if axis_extent < 1e-10 {
            continue;
        }
        let axis_min = bounds.min[axis];

        let mut bucket_counts = [0usize; NUM_BUCKETS];
        let mut bucket_bounds = [Aabb3::empty(); NUM_BUCKETS];

        for (_, aabb, centroid) in tri_data {
            let b = ((centroid[axis] - axis_min) / axis_extent * NUM_BUCKETS as f64) as usize;
            let b = b.min(NUM_BUCKETS - 1);
            bucket_counts[b] += 1;
            bucket_bounds[b].include(aabb);
        }

        for split in 1..NUM_BUCKETS {
            let mut left_count = 0;
            let mut left_bounds = Aabb3::empty();
            for i in 0..split {
                left_count += bucket_counts[i];
                if bucket_counts[i] > 0 {
                    left_bounds.include(&bucket_bounds[i]);
                }
            }

            let mut right_count = 0;
            let mut right_bounds = Aabb3::empty();
            for i in split..NUM_BUCKETS {
                right_count += bucket_counts[i];
                if bucket_counts[i] > 0 {
                    right_bounds.include(&bucket_bounds[i]);
                }
            }

            if left_count == 0 || right_count == 0 {
                continue;
            }

            // SAH cost: traversal + P(left) * N_left + P(right) * N_right
            let cost = 0.125
                + left_bounds.surface_area() / total_area * left_count as f64
                + right_bounds.surface_area() / total_area * right_count as f64;

            if cost < best_cost {
                best_cost = cost;
                best_axis = axis;
                best_pos = axis_min + (split as f64 / NUM_BUCKETS as f64) * axis_extent;
            }
        }
    }

    (best_axis, best_pos)
}

/// Partition triangles by centroid along an axis.
fn partition(tri_data: &mut [(usize, Aabb3, Point3)], axis: usize, pos: f64) -> usize {
    let mut left = 0;
    let mut right = tri_data.len();

    while left < right {
        if tri_data[left].2[axis] < pos {
            left += 1;
        } else {
            right -= 1;
            tri_data.swap(left, right);
        }
    }

    left
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vec3;
    use crate::mesh::fixtures::box_mesh;
    use approx::assert_relative_eq;

    fn cube_triangles() -> Vec<Triangle> {
        box_mesh(Point3::origin(), Point3::new(10.0, 10.0, 10.0))
            .triangles()
            .to_vec()
    }

    #[test]
    fn test_bvh_build() {
        let tris = cube_triangles();
        let bvh = Bvh::build(&tris);
        let bounds = bvh.bounds().unwrap();
        assert_relative_eq!(bounds.max.z, 10.0);
        assert!(Bvh::build(&[]).bounds().is_none());
    }

    #[test]
    fn test_bvh_trace_closest() {
        let tris = cube_triangles();
        let bvh = Bvh::build(&tris);

        let ray = Ray::new(Point3::new(5.0, 5.0, -5.0), Vec3::new(0.0, 0.0, 1.0));
        let hit = bvh.trace_closest(&tris, &ray).unwrap();
        assert_relative_eq!(hit.t, 5.0, epsilon = 1e-9);
        assert!(tris[hit.triangle].normal.z < -0.99);
    }

    #[test]
    fn test_bvh_trace_miss() {
        let tris = cube_triangles();
        let bvh = Bvh::build(&tris);
        let ray = Ray::new(Point3::new(50.0, 50.0, -5.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(bvh.trace_closest(&tris, &ray).is_none());
    }

    #[test]
    fn test_bvh_closest_point() {
        let tris = cube_triangles();
        let bvh = Bvh::build(&tris);

        let outside = bvh.closest_point(&tris, &Point3::new(5.0, 5.0, 13.0)).unwrap();
        assert_relative_eq!(outside.distance_sq, 9.0, epsilon = 1e-9);
        assert_relative_eq!(outside.point.z, 10.0, epsilon = 1e-9);

        let inside = bvh.closest_point(&tris, &Point3::new(5.0, 5.0, 1.0)).unwrap();
        assert_relative_eq!(inside.distance_sq, 1.0, epsilon = 1e-9);
    }
}
