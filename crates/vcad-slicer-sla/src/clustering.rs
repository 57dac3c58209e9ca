//! Grouping of nearby points.
//!
//! Clusters grow from the lowest unclustered index by repeatedly adding the
//! neighbors of the members found so far, so the result only depends on the
//! indices, never on the spatial index layout.

use std::collections::HashSet;

use crate::geometry::Point3;
use crate::point_index::{PointIndex, PointIndexEl};

/// Groups of input indices, each sorted ascending.
pub type ClusteredPoints = Vec<Vec<usize>>;

fn cluster_index<Q>(
    mut index: PointIndex,
    mut seeds: Vec<PointIndexEl>,
    max_points: usize,
    neighbors: Q,
) -> ClusteredPoints
where
    Q: Fn(&PointIndex, &PointIndexEl) -> Vec<PointIndexEl>,
{
    let mut clusters = Vec::new();
    let mut taken = HashSet::new();
    seeds.sort_by_key(|e| e.1);

    for seed in seeds {
        if taken.contains(&seed.1) {
            continue;
        }

        let mut cluster: Vec<PointIndexEl> = Vec::new();
        let mut frontier = vec![seed];

        'grow: while !frontier.is_empty() {
            let mut next = Vec::new();
            for p in &frontier {
                for q in neighbors(&index, p) {
                    if max_points > 0 && cluster.len() >= max_points {
                        break 'grow;
                    }
                    if cluster.iter().all(|c| c.1 != q.1) {
                        cluster.push(q);
                        next.push(q);
                    }
                }
            }
            frontier = next;
        }

        // An irreflexive predicate would leave the seed out.
        if cluster.iter().all(|c| c.1 != seed.1) {
            if max_points > 0 && cluster.len() >= max_points {
                cluster.pop();
            }
            cluster.push(seed);
        }

        for el in &cluster {
            index.remove(el);
            taken.insert(el.1);
        }
        let mut ids: Vec<usize> = cluster.into_iter().map(|e| e.1).collect();
        ids.sort_unstable();
        clusters.push(ids);
    }

    clusters
}

/// Cluster points closer to each other than `dist`.
///
/// Clusters hold at most `max_points` members (`0` means unbounded).
pub fn cluster_by_distance(points: &[Point3], dist: f64, max_points: usize) -> ClusteredPoints {
    let seeds: Vec<PointIndexEl> = points.iter().copied().zip(0..).collect();
    let mut index = PointIndex::new();
    for (p, i) in &seeds {
        index.insert(p, *i);
    }

    cluster_index(index, seeds, max_points, |idx, el| idx.within(&el.0, dist))
}

/// Cluster the given indices with a custom neighbor predicate.
///
/// `point_of` maps an index to its position; `predicate` decides whether two
/// indexed points belong together.
pub fn cluster_with<P, F>(
    indices: &[usize],
    point_of: P,
    predicate: F,
    max_points: usize,
) -> ClusteredPoints
where
    P: Fn(usize) -> Point3,
    F: Fn(&PointIndexEl, &PointIndexEl) -> bool,
{
    let seeds: Vec<PointIndexEl> = indices.iter().map(|&i| (point_of(i), i)).collect();
    let mut index = PointIndex::new();
    for (p, i) in &seeds {
        index.insert(p, *i);
    }

    cluster_index(index, seeds, max_points, |idx, el| idx.query(|e| predicate(el, e)))
}

/// Position within `cluster` of its most central member.
///
/// The member with the smallest summed distance to all others wins, ties
/// going to the earlier member. Clusters of one or two members have no
/// meaningful center and return `Some(0)`; an empty cluster returns `None`.
pub fn cluster_centroid<P, D>(cluster: &[usize], point_of: P, distance: D) -> Option<usize>
where
    P: Fn(usize) -> Point3,
    D: Fn(&Point3, &Point3) -> f64,
{
    match cluster.len() {
        0 => return None,
        1 | 2 => return Some(0),
        _ => {}
    }

    let points: Vec<Point3> = cluster.iter().map(|&i| point_of(i)).collect();
    let mut sums = vec![0.0; points.len()];
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            let d = distance(&points[i], &points[j]);
            sums[i] += d;
            sums[j] += d;
        }
    }

    let mut best = 0;
    for (i, s) in sums.iter().enumerate() {
        if *s < sums[best] {
            best = i;
        }
    }
    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::distance_2d;

    #[test]
    fn test_near_duplicates_collapse() {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.05, 0.0, 0.0),
            Point3::new(5.0, 0.0, 0.0),
        ];
        let clusters = cluster_by_distance(&points, 0.1, 2);
        assert_eq!(clusters, vec![vec![0, 1], vec![2]]);
        assert_eq!(clusters[0][0], 0);
    }

    #[test]
    fn test_cluster_cap() {
        let points: Vec<Point3> = (0..5).map(|i| Point3::new(i as f64 * 0.01, 0.0, 0.0)).collect();
        let clusters = cluster_by_distance(&points, 0.1, 2);
        assert_eq!(clusters, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn test_chained_predicate_clusters() {
        // 0-1-2 form a chain, 3 is isolated.
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.5, 0.0, 0.0),
            Point3::new(3.0, 0.0, 0.0),
            Point3::new(20.0, 0.0, 0.0),
        ];
        let clusters = cluster_with(
            &[3, 1, 0, 2],
            |i| points[i],
            |a, b| distance_2d(&a.0, &b.0) < 2.0,
            0,
        );
        assert_eq!(clusters, vec![vec![0, 1, 2], vec![3]]);

        let capped = cluster_with(&[0, 1, 2, 3], |i| points[i], |a, b| distance_2d(&a.0, &b.0) < 2.0, 2);
        assert_eq!(capped, vec![vec![0, 1], vec![2], vec![3]]);
    }

    #[test]
    fn test_centroid() {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ];
        let center = cluster_centroid(&[0, 1, 2], |i| points[i], distance_2d);
        assert_eq!(center, Some(1));

        assert_eq!(cluster_centroid(&[2, 0], |i| points[i], distance_2d), Some(0));
        assert_eq!(cluster_centroid(&[], |i| points[i], distance_2d), None);
    }

    #[test]
    fn test_centroid_tie_goes_to_first() {
        // Equilateral triangle: all members are equally central.
        let h = 3.0f64.sqrt() / 2.0;
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, h, 0.0),
        ];
        let center = cluster_centroid(&[0, 1, 2], |i| points[i], |a, b| (a - b).norm().round());
        assert_eq!(center, Some(0));
    }
}
