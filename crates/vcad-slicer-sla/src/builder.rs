//! Append-only store of the generated support elements.

use serde::{Deserialize, Serialize};

use crate::geometry::Point3;
use crate::primitives::{Anchor, Bridge, Head, Junction, Pedestal, Pillar};

/// Element counts of a support tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportTreeStats {
    /// Heads that hold a support point.
    pub valid_heads: usize,
    /// Head slots left without a head.
    pub invalid_heads: usize,
    /// Pillars.
    pub pillars: usize,
    /// Bridges between heads and pillars.
    pub bridges: usize,
    /// Braces between pillars.
    pub crossbridges: usize,
    /// Junctions.
    pub junctions: usize,
    /// Anchors into the model.
    pub anchors: usize,
    /// Pillar pedestals.
    pub pedestals: usize,
}

/// Owner of every element of a support tree.
///
/// Elements are only ever appended and are referenced by their index.
/// Heads are the exception: there is one slot per support point and a head
/// that could not be placed or routed stays in its slot, invalidated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportTreeBuilder {
    ground_level: f64,
    heads: Vec<Head>,
    pillars: Vec<Pillar>,
    bridges: Vec<Bridge>,
    crossbridges: Vec<Bridge>,
    junctions: Vec<Junction>,
    anchors: Vec<Anchor>,
    pedestals: Vec<Pedestal>,
}

impl SupportTreeBuilder {
    /// Create an empty builder for a tree standing on `ground_level`.
    pub fn new(ground_level: f64) -> Self {
        Self {
            ground_level,
            ..Default::default()
        }
    }

    /// Z coordinate of the print bed.
    pub fn ground_level(&self) -> f64 {
        self.ground_level
    }

    /// Store `head` in slot `id`, growing the slots as needed.
    pub fn add_head(&mut self, id: usize, head: Head) {
        if self.heads.len() <= id {
            self.heads.resize(id + 1, Head::default());
        }
        self.heads[id] = head;
    }

    /// Drop the head in slot `id` from the output.
    pub fn invalidate_head(&mut self, id: usize) {
        if let Some(head) = self.heads.get_mut(id) {
            head.invalidate();
        }
    }

    /// Add a pillar hanging from the junction of head `head_id`.
    pub fn add_pillar_from_head(&mut self, head_id: usize, height: f64) -> usize {
        let id = self.pillars.len();
        let head = &mut self.heads[head_id];
        let mut pillar = Pillar::from_head(head, height);
        pillar.id = id;
        head.pillar_id = Some(id);
        self.pillars.push(pillar);
        id
    }

    /// Add a free standing pillar of `height` on `endpt`.
    pub fn add_pillar(&mut self, endpt: &Point3, height: f64, r: f64) -> usize {
        let id = self.pillars.len();
        let mut pillar = Pillar::new(*endpt, height, r);
        pillar.id = id;
        self.pillars.push(pillar);
        id
    }

    /// Put a pedestal under pillar `pillar_id`.
    pub fn add_pillar_base(&mut self, pillar_id: usize, height: f64, radius: f64) -> usize {
        let id = self.pedestals.len();
        let pillar = &mut self.pillars[pillar_id];
        pillar.pedestal_id = Some(id);
        self.pedestals.push(Pedestal {
            id,
            pillar_id,
            pos: pillar.endpt,
            height,
            r_bottom: radius.max(pillar.r),
            r_top: pillar.r,
        });
        id
    }

    /// Add a bridge between two points.
    pub fn add_bridge(&mut self, startp: &Point3, endp: &Point3, r: f64) -> usize {
        let id = self.bridges.len();
        self.bridges.push(Bridge {
            id,
            startp: *startp,
            endp: *endp,
            r,
        });
        id
    }

    /// Add a bridge from the junction of head `head_id` to `endp`.
    pub fn add_bridge_from_head(&mut self, head_id: usize, endp: &Point3) -> usize {
        let head = self.heads[head_id];
        let id = self.add_bridge(&head.junction_point(), endp, head.r_back_mm);
        self.heads[head_id].bridge_id = Some(id);
        id
    }

    /// Add a brace between two pillars.
    pub fn add_crossbridge(&mut self, startp: &Point3, endp: &Point3, r: f64) -> usize {
        let id = self.crossbridges.len();
        self.crossbridges.push(Bridge {
            id,
            startp: *startp,
            endp: *endp,
            r,
        });
        id
    }

    /// Add a junction sphere.
    pub fn add_junction(&mut self, pos: &Point3, r: f64) -> usize {
        let id = self.junctions.len();
        self.junctions.push(Junction { id, pos: *pos, r });
        id
    }

    /// Add an anchor; it receives its index as id.
    pub fn add_anchor(&mut self, mut anchor: Anchor) -> usize {
        let id = self.anchors.len();
        anchor.id = Some(id);
        self.anchors.push(anchor);
        id
    }

    /// Count one more brace on pillar `pillar_id`.
    pub fn increment_links(&mut self, pillar_id: usize) {
        self.pillars[pillar_id].links += 1;
    }

    /// Count one more bridge resting on pillar `pillar_id`.
    pub fn increment_bridges(&mut self, pillar_id: usize) {
        self.pillars[pillar_id].bridges += 1;
    }

    /// Number of bridges resting on pillar `pillar_id`.
    pub fn bridgecount(&self, pillar_id: usize) -> u32 {
        self.pillars[pillar_id].bridges
    }

    /// Head in slot `id`.
    pub fn head(&self, id: usize) -> &Head {
        &self.heads[id]
    }

    /// Pillar `id`.
    pub fn pillar(&self, id: usize) -> &Pillar {
        &self.pillars[id]
    }

    /// Number of pillars.
    pub fn pillarcount(&self) -> usize {
        self.pillars.len()
    }

    /// All head slots, including invalid ones.
    pub fn heads(&self) -> &[Head] {
        &self.heads
    }

    /// Pillars.
    pub fn pillars(&self) -> &[Pillar] {
        &self.pillars
    }

    /// Bridges.
    pub fn bridges(&self) -> &[Bridge] {
        &self.bridges
    }

    /// Braces between pillars.
    pub fn crossbridges(&self) -> &[Bridge] {
        &self.crossbridges
    }

    /// Junctions.
    pub fn junctions(&self) -> &[Junction] {
        &self.junctions
    }

    /// Anchors.
    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    /// Pedestals.
    pub fn pedestals(&self) -> &[Pedestal] {
        &self.pedestals
    }

    /// Element counts.
    pub fn stats(&self) -> SupportTreeStats {
        let valid_heads = self.heads.iter().filter(|h| h.is_valid()).count();
        SupportTreeStats {
            valid_heads,
            invalid_heads: self.heads.len() - valid_heads,
            pillars: self.pillars.len(),
            bridges: self.bridges.len(),
            crossbridges: self.crossbridges.len(),
            junctions: self.junctions.len(),
            anchors: self.anchors.len(),
            pedestals: self.pedestals.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DOWN;
    use approx::assert_relative_eq;

    fn valid_head(id: usize, pos: Point3) -> Head {
        let mut head = Head::new(0.5, 0.2, 1.0, 0.2, DOWN, pos);
        head.id = Some(id);
        head
    }

    #[test]
    fn test_head_slots() {
        let mut builder = SupportTreeBuilder::new(0.0);
        builder.add_head(2, valid_head(2, Point3::new(0.0, 0.0, 10.0)));
        assert_eq!(builder.heads().len(), 3);
        assert!(!builder.head(0).is_valid());
        assert!(builder.head(2).is_valid());

        builder.invalidate_head(2);
        assert!(!builder.head(2).is_valid());
        assert_eq!(builder.stats().invalid_heads, 3);
    }

    #[test]
    fn test_pillar_and_bridge_links() {
        let mut builder = SupportTreeBuilder::new(0.0);
        builder.add_head(0, valid_head(0, Point3::new(0.0, 0.0, 10.0)));
        builder.add_head(1, valid_head(1, Point3::new(3.0, 0.0, 10.0)));

        let pid = builder.add_pillar_from_head(0, 8.3);
        assert_eq!(builder.head(0).pillar_id, Some(pid));
        assert_relative_eq!(builder.pillar(pid).endpoint().z, 0.0, epsilon = 1e-12);

        let base = builder.add_pillar_base(pid, 1.0, 2.0);
        assert_eq!(builder.pillar(pid).pedestal_id, Some(base));
        assert_relative_eq!(builder.pedestals()[base].r_bottom, 2.0);
        assert_relative_eq!(builder.pedestals()[base].r_top, 0.5);

        let bid = builder.add_bridge_from_head(1, &Point3::new(0.0, 0.0, 5.3));
        assert_eq!(builder.head(1).bridge_id, Some(bid));
        assert_relative_eq!(builder.bridges()[bid].startp.z, 8.3, epsilon = 1e-12);
        builder.increment_bridges(pid);
        assert_eq!(builder.bridgecount(pid), 1);

        let other = builder.add_pillar(&Point3::new(6.0, 0.0, 0.0), 8.3, 0.5);
        builder.add_crossbridge(
            &Point3::new(0.0, 0.0, 8.3),
            &Point3::new(6.0, 0.0, 2.3),
            0.5,
        );
        builder.increment_links(pid);
        builder.increment_links(other);

        let stats = builder.stats();
        assert_eq!(stats.valid_heads, 2);
        assert_eq!(stats.pillars, 2);
        assert_eq!(stats.bridges, 1);
        assert_eq!(stats.crossbridges, 1);
        assert_eq!(stats.pedestals, 1);
        assert_eq!(builder.pillar(other).links, 1);
    }

    #[test]
    fn test_anchor_ids() {
        let mut builder = SupportTreeBuilder::new(0.0);
        let a = builder.add_anchor(Head::new(0.25, 0.2, 0.0, 0.2, DOWN, Point3::origin()));
        let b = builder.add_anchor(Head::new(0.25, 0.2, 0.0, 0.2, DOWN, Point3::origin()));
        assert_eq!((a, b), (0, 1));
        assert_eq!(builder.anchors()[1].id, Some(1));
    }
}
