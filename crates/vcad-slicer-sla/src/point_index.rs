//! Spatial index over pillar endpoints.

use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use rstar::primitives::GeomWithData;
use rstar::RTree;

use crate::geometry::Point3;

/// An indexed point and the id of what it belongs to.
pub type PointIndexEl = (Point3, usize);

type Entry = GeomWithData<[f64; 3], usize>;

fn entry(p: &Point3, id: usize) -> Entry {
    GeomWithData::new([p.x, p.y, p.z], id)
}

fn element(e: &Entry) -> PointIndexEl {
    let [x, y, z] = *e.geom();
    (Point3::new(x, y, z), e.data)
}

/// R*-tree of `(point, id)` pairs.
///
/// Exclusive access (`&mut self`) is used by single threaded phases.
/// [`PointIndex::guarded_insert`] and the query methods only need a shared
/// reference and may be called from several worker threads.
#[derive(Debug, Default)]
pub struct PointIndex {
    tree: RwLock<RTree<Entry>>,
}

impl PointIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RTree<Entry>> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert without locking; the caller has exclusive access.
    pub fn insert(&mut self, p: &Point3, id: usize) {
        self.tree
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry(p, id));
    }

    /// Insert while other threads may be using the index.
    pub fn guarded_insert(&self, p: &Point3, id: usize) {
        self.tree
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry(p, id));
    }

    /// Remove a specific entry. Returns whether it was present.
    pub fn remove(&mut self, el: &PointIndexEl) -> bool {
        self.tree
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&entry(&el.0, el.1))
            .is_some()
    }

    /// Up to `k` entries nearest to `p`, closest first.
    pub fn nearest(&self, p: &Point3, k: usize) -> Vec<PointIndexEl> {
        self.read()
            .nearest_neighbor_iter(&[p.x, p.y, p.z])
            .take(k)
            .map(element)
            .collect()
    }

    /// All entries satisfying `pred`, ordered by id.
    pub fn query<F>(&self, pred: F) -> Vec<PointIndexEl>
    where
        F: Fn(&PointIndexEl) -> bool,
    {
        let mut out: Vec<PointIndexEl> = self.read().iter().map(element).filter(|e| pred(e)).collect();
        out.sort_by_key(|e| e.1);
        out
    }

    /// All entries closer to `p` than `radius`, ordered by id.
    pub fn within(&self, p: &Point3, radius: f64) -> Vec<PointIndexEl> {
        let mut out: Vec<PointIndexEl> = self
            .read()
            .locate_within_distance([p.x, p.y, p.z], radius * radius)
            .map(element)
            .filter(|e| (e.0 - p).norm() < radius)
            .collect();
        out.sort_by_key(|e| e.1);
        out
    }

    /// Independent copy of the index, taken under the read lock.
    pub fn guarded_clone(&self) -> PointIndex {
        PointIndex {
            tree: RwLock::new(self.read().clone()),
        }
    }

    /// Visit every entry in id order.
    ///
    /// Iterates over a snapshot, so `f` may insert into the index.
    pub fn foreach<F>(&self, mut f: F)
    where
        F: FnMut(&PointIndexEl),
    {
        for el in self.query(|_| true) {
            f(&el);
        }
    }

    /// Like [`PointIndex::foreach`], stopping at the first error.
    pub fn try_foreach<E, F>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&PointIndexEl) -> Result<(), E>,
    {
        self.query(|_| true).iter().try_for_each(|el| f(el))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.read().size()
    }

    /// True when the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample() -> PointIndex {
        let mut index = PointIndex::new();
        index.insert(&Point3::new(0.0, 0.0, 0.0), 0);
        index.insert(&Point3::new(3.0, 0.0, 0.0), 1);
        index.insert(&Point3::new(1.0, 0.0, 0.0), 2);
        index.insert(&Point3::new(10.0, 10.0, 0.0), 3);
        index
    }

    #[test]
    fn test_nearest_is_sorted() {
        let index = sample();
        let ids: Vec<usize> = index
            .nearest(&Point3::new(2.9, 0.0, 0.0), 3)
            .iter()
            .map(|e| e.1)
            .collect();
        assert_eq!(ids, vec![1, 2, 0]);
        assert!(PointIndex::new().nearest(&Point3::origin(), 1).is_empty());
    }

    #[test]
    fn test_query_and_within() {
        let index = sample();
        let near: Vec<usize> = index
            .within(&Point3::origin(), 2.0)
            .iter()
            .map(|e| e.1)
            .collect();
        assert_eq!(near, vec![0, 2]);

        let far = index.query(|e| e.0.x > 2.0);
        assert_eq!(far.iter().map(|e| e.1).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_clone_is_independent() {
        let index = sample();
        let mut local = index.guarded_clone();
        let first = local.nearest(&Point3::origin(), 1)[0];
        assert!(local.remove(&first));
        assert!(!local.remove(&first));
        assert_eq!(local.len(), 3);
        assert_eq!(index.len(), 4);
        assert_eq!(local.nearest(&Point3::origin(), 1)[0].1, 2);
    }

    #[test]
    fn test_guarded_insert_from_threads() {
        let index = Arc::new(PointIndex::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        index.guarded_insert(&Point3::new(t as f64, i as f64, 0.0), t * 25 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(index.len(), 100);

        let mut seen = Vec::new();
        index.foreach(|e| seen.push(e.1));
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }
}
