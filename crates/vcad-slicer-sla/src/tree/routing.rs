//! Connecting heads to pillars, the bed and the model.

use std::f64::consts::PI;
use std::sync::PoisonError;

use crate::error::Result;
use crate::geometry::{dir_to_spheric, dirv, distance_2d, spheric_to_dir, Point3, Vec3, DOWN};
use crate::primitives::Head;

use super::DefaultSupportTree;

const EPSILON: f64 = 1e-4;

/// Scan score that counts as an unobstructed direction.
const FREE_DIRECTION_SCORE: f64 = 1e6;

impl DefaultSupportTree<'_> {
    /// Bridge `head` onto the pillar `nearpillar_id`.
    ///
    /// The bridge descends at least at the bridge slope. When the pillar top
    /// is too close for that, the bridge lands lower on the pillar; when it
    /// is too far below, a short pillar is put under the head first.
    pub(super) fn connect_to_nearpillar(&self, head: &Head, nearpillar_id: Option<usize>) -> bool {
        let (Some(pid), Some(head_id)) = (nearpillar_id, head.id) else {
            return false;
        };
        let cfg = self.cfg;

        let nearpillar = *self.builder().pillar(pid);
        if nearpillar.bridges >= cfg.max_bridges_on_pillar {
            return false;
        }

        let r = head.r_back_mm;
        let headjp = head.junction_point();
        let nearjp_u = nearpillar.startpoint();
        let nearjp_l = nearpillar.endpoint();

        let d2d = distance_2d(&headjp, &nearjp_u);
        let d3d = (headjp - nearjp_u).norm();
        let slope = (nearjp_u.z - headjp.z).atan2(d2d);
        let max_len = r * cfg.max_bridge_length_mm / cfg.head_back_radius_mm;
        let max_slope = cfg.bridge_slope;

        let mut bridgestart = headjp;
        let mut bridgeend = nearjp_u;
        let mut zdiff = 0.0;

        if d3d > max_len || slope > -max_slope {
            let mut zdown = headjp.z - d2d * max_slope.tan();
            let touchjp = Point3::new(nearjp_u.x, nearjp_u.y, zdown);
            let d = (headjp - touchjp).norm();
            zdiff = zdown - nearjp_u.z;

            // Touch point above the pillar top: land on the top instead and
            // lower the bridge start with a pillar under the head.
            if zdiff > 0.0 {
                zdown -= zdiff;
                bridgestart.z -= zdiff;
                if self.beam_distance(&headjp, &DOWN, r) < zdiff {
                    return false;
                }
            }

            if zdown <= nearjp_u.z && zdown >= nearjp_l.z && d < max_len {
                bridgeend.z = zdown;
            } else {
                return false;
            }
        }

        // Bridges landing right above the bed are not worth it.
        let minz = self.ground + 4.0 * r;
        if bridgeend.z < minz {
            return false;
        }

        let length = (bridgeend - bridgestart).norm();
        if self.beam_distance(&bridgestart, &dirv(&bridgestart, &bridgeend), r) < length {
            return false;
        }

        let _guard = self.bridge_mutex.lock().unwrap_or_else(PoisonError::into_inner);
        let mut builder = self.builder();
        if builder.bridgecount(pid) >= cfg.max_bridges_on_pillar {
            return false;
        }
        if zdiff > 0.0 {
            builder.add_pillar_from_head(head_id, headjp.z - bridgestart.z);
            builder.add_junction(&bridgestart, r);
            builder.add_bridge(&bridgestart, &bridgeend, r);
        } else {
            builder.add_bridge_from_head(head_id, &bridgeend);
        }
        builder.increment_bridges(pid);
        true
    }

    /// Try the indexed pillars nearest to `source` until one can be bridged to.
    ///
    /// Pillars thinner than the head are skipped.
    pub(super) fn search_pillar_and_connect(&self, source: &Head) -> Result<bool> {
        let mut spindex = self.pillar_index.guarded_clone();
        let jp = source.junction_point();
        let querypt = Point3::new(jp.x, jp.y, self.ground);

        while let Some(candidate) = spindex.nearest(&querypt, 1).into_iter().next() {
            self.ctl.check_cancelled()?;
            let r = self.builder().pillar(candidate.1).r;
            if r >= source.r_back_mm && self.connect_to_nearpillar(source, Some(candidate.1)) {
                return Ok(true);
            }
            spindex.remove(&candidate);
        }
        Ok(false)
    }

    /// Drop a pillar from `hjp` to the bed.
    ///
    /// Pillars at least as thick as a full head get a pedestal. With zero
    /// elevation the pillar is moved away from the object footprint along a
    /// corrector bridge, giving up the pedestal if there is no room for it.
    pub(super) fn create_ground_pillar(&self, hjp: &Point3, sourcedir: &Vec3, radius: f64, head_id: Option<usize>) -> bool {
        let cfg = self.cfg;
        let sd = cfg.pillar_base_safety_distance_mm;
        let mut can_add_base = radius >= cfg.head_back_radius_mm;
        let base_r = if can_add_base { cfg.base_radius_mm } else { 0.0 };
        let mut gndlvl = self.ground;
        if !can_add_base {
            gndlvl -= self.oracle.ground_level_offset();
        }

        let mut endp = Point3::new(hjp.x, hjp.y, gndlvl);
        let mut t = 0.0;

        if cfg.is_zero_elevation() {
            let (_, azimuth) = dir_to_spheric(sourcedir);
            let dir = spheric_to_dir(PI - cfg.bridge_slope, azimuth);

            let mut found = self.find_pillar_spot(hjp, &dir, radius, gndlvl, sd + base_r + EPSILON, can_add_base);
            if found.is_none() && can_add_base {
                can_add_base = false;
                gndlvl -= self.oracle.ground_level_offset();
                found = self.find_pillar_spot(hjp, &dir, radius, gndlvl, sd + EPSILON, false);
            }
            let Some((tf, ep)) = found else {
                return false;
            };
            t = tf;
            endp = ep;
        }

        let pillar_id = {
            let mut builder = self.builder();
            let pillar_id = if t > 0.0 {
                let pid = builder.add_pillar(&Point3::new(endp.x, endp.y, gndlvl), endp.z - gndlvl, radius);
                match head_id {
                    Some(h) => builder.add_bridge_from_head(h, &endp),
                    None => builder.add_bridge(hjp, &endp, radius),
                };
                builder.add_junction(&endp, radius);
                pid
            } else {
                match head_id {
                    Some(h) => builder.add_pillar_from_head(h, hjp.z - gndlvl),
                    None => builder.add_pillar(&Point3::new(hjp.x, hjp.y, gndlvl), hjp.z - gndlvl, radius),
                }
            };
            if can_add_base {
                builder.add_pillar_base(pillar_id, cfg.base_height_mm, cfg.base_radius_mm);
            }
            pillar_id
        };

        self.pillar_index
            .guarded_insert(&Point3::new(endp.x, endp.y, gndlvl), pillar_id);
        true
    }

    /// Walk from `hjp` along `dir` in steps of `radius` until the bed below
    /// is far enough from the object and the drop is free.
    fn find_pillar_spot(
        &self,
        hjp: &Point3,
        dir: &Vec3,
        radius: f64,
        gndlvl: f64,
        min_dist: f64,
        with_base: bool,
    ) -> Option<(f64, Point3)> {
        let reach = self.beam_distance(hjp, dir, radius);
        let lowest = if with_base { gndlvl } else { gndlvl + radius };
        let mut t = 0.0;

        loop {
            let endp = hjp + t * dir;
            let floor = Point3::new(endp.x, endp.y, gndlvl);
            if self.oracle.point_to_mesh_distance(&floor) >= min_dist
                && !self.beam_hit(&endp, &DOWN, radius).is_hit()
            {
                return Some((t, endp));
            }

            t += radius;
            if t > self.cfg.max_bridge_length_mm || t > reach || (hjp + t * dir).z < lowest {
                return None;
            }
        }
    }

    /// Bridge `head` sideways out of the cavity it hangs in, then drop a
    /// pillar to the bed.
    ///
    /// The head direction is tried first, then the direction with the most
    /// clearance within the bridge slope.
    pub(super) fn connect_to_ground(&self, head: &Head) -> Result<bool> {
        if self.connect_to_ground_along(head, &head.dir) {
            return Ok(true);
        }
        self.ctl.check_cancelled()?;

        let hjp = head.junction_point();
        let r_back = head.r_back_mm;
        let (polar, azimuth) = dir_to_spheric(&head.dir);
        let res = self.optimizer(FREE_DIRECTION_SCORE).maximize(
            |&[plr, azm]: &[f64; 2]| self.beam_distance(&hjp, &spheric_to_dir(plr, azm), r_back),
            [polar, azimuth],
            [(PI - self.cfg.bridge_slope, PI), (-PI, PI)],
        );

        let [plr, azm] = res.optimum;
        Ok(self.connect_to_ground_along(head, &spheric_to_dir(plr, azm)))
    }

    fn connect_to_ground_along(&self, head: &Head, dir: &Vec3) -> bool {
        let Some(head_id) = head.id else {
            return false;
        };
        let cfg = self.cfg;
        let hjp = head.junction_point();
        let r = head.r_back_mm;

        let t = self
            .beam_distance(&hjp, dir, r)
            .min(cfg.max_bridge_length_mm * r / cfg.head_back_radius_mm);

        let mut d = 0.0;
        loop {
            if !self.beam_hit(&(hjp + d * dir), &DOWN, r).is_hit() {
                break;
            }
            if d >= t {
                return false;
            }
            d = (d + r).min(t);
        }

        if d <= 0.0 {
            return self.create_ground_pillar(&hjp, dir, r, Some(head_id));
        }

        let endp = hjp + d * dir;
        if !self.create_ground_pillar(&endp, dir, r, None) {
            return false;
        }

        let mut builder = self.builder();
        builder.add_bridge_from_head(head_id, &endp);
        builder.add_junction(&endp, r);
        true
    }

    /// Hang `head` on a short pillar ending in an anchor that pierces the
    /// model below it.
    ///
    /// Uses the downward scan taken during classification. The tail rises
    /// along the surface normal at the hit, clamped to at least 45°, so a
    /// flat floor gets a tail as tall as the head allows.
    pub(super) fn connect_to_model_body(&self, head: &Head) -> bool {
        let Some(head_id) = head.id else {
            return false;
        };
        let Some(hit) = self.head_to_ground_scans.get(&head_id) else {
            return false;
        };
        if !hit.is_hit() {
            return false;
        }
        let cfg = self.cfg;

        let hjp = head.junction_point();
        let zangle = hit.normal().z.clamp(-1.0, 1.0).asin().max(PI / 4.0);
        let mut h = (zangle.sin() * head.fullwidth()).min(hit.distance() - head.r_back_mm);

        // Mini heads may end in a zero length tail.
        if head.r_back_mm < cfg.head_back_radius_mm {
            h = h.max(0.0);
        } else if h <= 0.0 {
            return false;
        }

        let endp = Point3::new(hjp.x, hjp.y, hjp.z - hit.distance() + h);
        let center_hit = self.oracle.ray_hit(&hjp, &DOWN);
        let hitp = if (center_hit.distance() - hit.distance()).abs() < 2.0 * head.r_back_mm {
            center_hit.position()
        } else {
            hit.position()
        };

        let taildir = endp - hitp;
        let Some(dir) = taildir.try_normalize(f64::EPSILON) else {
            return false;
        };
        let w = (taildir.norm() + cfg.head_penetration_mm - 2.0 * head.r_pin_mm - head.r_back_mm).max(0.0);

        let pillar = {
            let mut builder = self.builder();
            let pid = builder.add_pillar_from_head(head_id, hjp.z - endp.z);
            builder.add_anchor(Head::new(
                head.r_back_mm,
                head.r_pin_mm,
                w,
                cfg.head_penetration_mm,
                dir,
                hitp,
            ));
            *builder.pillar(pid)
        };
        self.pillar_index.guarded_insert(&pillar.endpoint(), pillar.id);
        true
    }
}
