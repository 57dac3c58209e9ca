//! Bracing between pillars.

use std::collections::HashSet;
use std::f64::consts::PI;

use log::debug;

use crate::config::PillarConnectionMode;
use crate::error::Result;
use crate::geometry::{dirv, distance_2d, Point3, DOWN};
use crate::primitives::Pillar;

use super::DefaultSupportTree;

const EPSILON: f64 = 1e-4;

/// A brace only counts for the longer pillar if the shorter one reaches at
/// least this fraction of its height.
const MIN_HEIGHT_RATIO: f64 = 0.5;

/// Angle between the candidate positions tried for helper pillars.
const HELPER_ANGLE_STEP: f64 = 0.1 * PI;

type PillarPairs = HashSet<(usize, usize)>;

fn pair(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

impl DefaultSupportTree<'_> {
    /// Brace two pillars with a zig-zag of crossbridges at the bridge slope.
    ///
    /// Returns whether any brace was added.
    pub(super) fn interconnect(&self, pillar: &Pillar, nextpillar: &Pillar) -> bool {
        let cfg = self.cfg;
        let mut was_connected = false;

        let mut supper = pillar.startpoint();
        let mut slower = nextpillar.startpoint();
        let mut eupper = pillar.endpoint();
        let mut elower = nextpillar.endpoint();

        let zmin = self.ground + cfg.base_height_mm;
        eupper.z = eupper.z.max(zmin);
        elower.z = elower.z.max(zmin);

        if slower.z - elower.z < 0.0 || supper.z - eupper.z < 0.0 {
            return false;
        }

        let pillar_dist = distance_2d(&supper, &slower);
        if pillar_dist < 2.0 * cfg.head_back_radius_mm || pillar_dist > cfg.max_pillar_link_distance_mm {
            return false;
        }
        let bridge_distance = pillar_dist / cfg.bridge_slope.cos();
        let zstep = -pillar_dist * cfg.bridge_slope.tan();

        if supper.z < slower.z {
            std::mem::swap(&mut supper, &mut slower);
        }
        if eupper.z < elower.z {
            std::mem::swap(&mut eupper, &mut elower);
        }

        let mut startz = if slower.z - zstep < supper.z {
            slower.z - zstep
        } else {
            slower.z
        };

        // Not even one full step fits: center what does.
        if slower.z - eupper.z < zstep.abs() {
            startz = supper.z.min(slower.z - zstep);
            let endz = (eupper.z + zstep).max(elower.z);
            let available = startz - endz;
            let rounds = (available / zstep.abs()).floor();
            startz -= 0.5 * (available - rounds * zstep.abs());
        }

        let docrosses = match cfg.pillar_connection_mode {
            PillarConnectionMode::Cross => true,
            PillarConnectionMode::Zigzag => false,
            PillarConnectionMode::Dynamic => {
                pillar_dist > cfg.dynamic_cross_distance_factor * cfg.base_radius_mm
            }
        };

        // sj and ej swap every round, giving the zig-zag.
        let mut sj = Point3::new(supper.x, supper.y, startz);
        let mut ej = Point3::new(slower.x, slower.y, startz + zstep);

        while ej.z >= eupper.z {
            if self.beam_distance(&sj, &dirv(&sj, &ej), pillar.r) >= bridge_distance {
                self.builder().add_crossbridge(&sj, &ej, pillar.r);
                was_connected = true;
            }

            if docrosses {
                let sjback = Point3::new(ej.x, ej.y, sj.z);
                let ejback = Point3::new(sj.x, sj.y, ej.z);
                if sjback.z <= slower.z
                    && ejback.z >= eupper.z
                    && self.beam_distance(&sjback, &dirv(&sjback, &ejback), pillar.r) >= bridge_distance
                {
                    self.builder().add_crossbridge(&sjback, &ejback, pillar.r);
                    was_connected = true;
                }
            }

            std::mem::swap(&mut sj, &mut ej);
            ej.z = sj.z + zstep;
        }

        was_connected
    }

    /// Brace every indexed pillar with its nearest neighbors, then add
    /// helper pillars next to tall pillars that are still not braced enough.
    pub(super) fn interconnect_pillars(&self) -> Result<()> {
        let cfg = self.cfg;
        let cap = cfg.pillar_cascade_neighbors;
        let h1 = cfg.max_solo_pillar_height_mm;
        let h2 = cfg.max_dual_pillar_height_mm;

        let mut pairs = PillarPairs::new();
        self.cascade(&mut pairs)?;

        let pillarcount = self.builder().pillarcount();
        let mut helpers = 0;

        for pid in 0..pillarcount {
            self.ctl.check_cancelled()?;
            let pillar = *self.builder().pillar(pid);

            let mut need: u32 = if pillar.bridges > cfg.max_bridges_on_pillar {
                3
            } else if pillar.links < 2 && pillar.height > h2 {
                2
            } else if pillar.links < 1 && pillar.height > h1 {
                1
            } else {
                0
            };
            need = need.saturating_sub(pillar.links).min(cap.saturating_sub(pillar.links));
            if need == 0 {
                continue;
            }

            let Some(spots) = self.find_helper_spots(&pillar, need as usize) else {
                debug!("pillar {pid}: no room for helper pillars");
                continue;
            };

            let pillarsp = pillar.startpoint();
            let gnd = self.ground;
            let mut newpills = Vec::with_capacity(spots.len());

            for s in spots {
                let orig = *self.builder().pillar(pid);
                if orig.links >= cap {
                    break;
                }
                let candidate = Pillar::new(Point3::new(s.x, s.y, gnd), s.z - gnd, orig.r);
                if !self.interconnect(&orig, &candidate) {
                    continue;
                }

                let bridge_clear = {
                    let len = (s - pillarsp).norm();
                    len <= cfg.max_bridge_length_mm && self.beam_distance(&pillarsp, &dirv(&pillarsp, &s), orig.r) > len
                };

                let mut builder = self.builder();
                let new_id = builder.add_pillar(&candidate.endpt, candidate.height, candidate.r);
                builder.add_pillar_base(new_id, cfg.base_height_mm, cfg.base_radius_mm);

                builder.add_junction(&s, orig.r);
                if bridge_clear {
                    builder.add_bridge(&pillarsp, &s, orig.r);
                }
                if orig.endpoint().z > gnd + orig.r {
                    builder.add_junction(&orig.endpoint(), orig.r);
                }

                builder.increment_links(pid);
                builder.increment_links(new_id);
                drop(builder);

                self.pillar_index.guarded_insert(&candidate.endpt, new_id);
                pairs.insert(pair(pid, new_id));
                newpills.push(new_id);
            }

            if newpills.is_empty() {
                continue;
            }
            helpers += newpills.len();

            for w in newpills.windows(2) {
                let a = *self.builder().pillar(w[0]);
                let b = *self.builder().pillar(w[1]);
                if a.links >= cap || b.links >= cap || !self.interconnect(&a, &b) {
                    continue;
                }
                pairs.insert(pair(a.id, b.id));
                let mut builder = self.builder();
                builder.increment_links(a.id);
                builder.increment_links(b.id);
            }

            self.cascade(&mut pairs)?;
        }

        debug!("added {helpers} helper pillars");
        Ok(())
    }

    /// One bracing round over the pillar index, in pillar id order.
    fn cascade(&self, pairs: &mut PillarPairs) -> Result<()> {
        let cfg = self.cfg;
        let cap = cfg.pillar_cascade_neighbors;
        let h1 = cfg.max_solo_pillar_height_mm;

        self.pillar_index.try_foreach(|el| {
            self.ctl.check_cancelled()?;
            let (qp, id) = *el;

            let pillar = *self.builder().pillar(id);
            if pillar.links >= cap {
                return Ok(());
            }

            // Thinner pillars reach less far.
            let max_d = cfg.max_pillar_link_distance_mm * pillar.r / cfg.head_back_radius_mm;
            let mut qres = self.pillar_index.query(|e| (e.0 - qp).norm() < max_d);
            qres.sort_by(|a, b| (a.0 - qp).norm().total_cmp(&(b.0 - qp).norm()));

            for (_, nid) in qres {
                if nid == id || pairs.contains(&pair(id, nid)) {
                    continue;
                }

                let pillar = *self.builder().pillar(id);
                let neighbor = *self.builder().pillar(nid);
                if neighbor.links >= cap || neighbor.r < pillar.r {
                    continue;
                }

                if self.interconnect(&pillar, &neighbor) {
                    pairs.insert(pair(id, nid));
                    let mut builder = self.builder();
                    if pillar.height < h1 || neighbor.height / pillar.height > MIN_HEIGHT_RATIO {
                        builder.increment_links(id);
                    }
                    if neighbor.height < h1 || pillar.height / neighbor.height > MIN_HEIGHT_RATIO {
                        builder.increment_links(nid);
                    }
                }

                let links = self.builder().pillar(id).links;
                if links >= cap {
                    break;
                }
            }
            Ok(())
        })
    }

    /// Tops of `need` helper pillars around `pillar`, a bridge slope below
    /// its top, each with a free drop and room for a pedestal.
    fn find_helper_spots(&self, pillar: &Pillar, need: usize) -> Option<Vec<Point3>> {
        let cfg = self.cfg;
        let r = 2.0 * cfg.base_radius_mm;
        let top = pillar.startpoint();
        let sp = Point3::new(top.x, top.y, top.z - r * cfg.bridge_slope.tan());
        let min_dist = cfg.pillar_base_safety_distance_mm + cfg.base_radius_mm + EPSILON;

        let placeable = |s: &Point3| {
            let check_from = Point3::new(s.x, s.y, s.z + pillar.r);
            !self.beam_hit(&check_from, &DOWN, pillar.r).is_hit()
                && self.oracle.point_to_mesh_distance(&Point3::new(s.x, s.y, self.ground)) > min_dist
        };

        let mut alpha = 0.0;
        while alpha < 2.0 * PI {
            let mut spots = Vec::with_capacity(need);
            for n in 0..need {
                let a = alpha + n as f64 * PI / 3.0;
                let s = Point3::new(sp.x + a.cos() * r, sp.y + a.sin() * r, sp.z);
                if !placeable(&s) {
                    break;
                }
                spots.push(s);
            }
            if spots.len() == need {
                return Some(spots);
            }
            alpha += HELPER_ANGLE_STEP;
        }
        None
    }
}
