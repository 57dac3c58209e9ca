//! Support tree generation.
//!
//! [`DefaultSupportTree`] runs a fixed sequence of phases over a shared
//! [`SupportTreeBuilder`]:
//!
//! 1. place a pinhead under every support point,
//! 2. sort heads into those that see the bed and those that see the model,
//! 3. drop pillars to the bed, bridging clustered heads onto one pillar,
//! 4. route the remaining heads onto pillars, the bed or the model,
//! 5. brace neighboring pillars.
//!
//! Placement failures only invalidate the affected head. Cancellation stops
//! the run at the next check and keeps everything built so far.

mod cascade;
mod routing;

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::builder::SupportTreeBuilder;
use crate::clustering::{cluster_by_distance, cluster_centroid, cluster_with, ClusteredPoints};
use crate::collision::{CollisionOracle, HitResult};
use crate::config::SupportTreeConfig;
use crate::control::JobController;
use crate::error::Result;
use crate::geometry::{dir_to_spheric, distance_2d, spheric_to_dir, Point3, Vec3, DOWN};
use crate::mesh::IndexedMesh;
use crate::optimizer::{Optimizer, StopCriteria};
use crate::point_index::PointIndex;
use crate::primitives::{Head, SupportPoint};

/// Support points closer than this are merged.
const SUPPORT_POINT_MERGE_DISTANCE: f64 = 0.1;

/// A mesh together with the points to support and the settings to use.
#[derive(Debug, Clone)]
pub struct SupportableMesh {
    /// The object.
    pub mesh: IndexedMesh,
    /// Points on the object surface needing support.
    pub points: Vec<SupportPoint>,
    /// Generator settings.
    pub config: SupportTreeConfig,
}

impl SupportableMesh {
    /// Bundle a mesh, its support points and settings.
    pub fn new(mesh: IndexedMesh, points: Vec<SupportPoint>, config: SupportTreeConfig) -> Self {
        Self {
            mesh,
            points,
            config,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Every phase ran.
    Done,
    /// Cancelled; the builder holds what was built before.
    Aborted,
}

/// Output of a run.
#[derive(Debug, Clone)]
pub struct SupportTreeResult {
    /// The generated elements. Head slots refer to the support points that
    /// remained after bottom point removal, in order.
    pub builder: SupportTreeBuilder,
    /// How the run ended.
    pub outcome: BuildOutcome,
}

/// Generate the support tree for `sm`.
pub fn create_support_tree(sm: &SupportableMesh, ctl: &JobController) -> Result<SupportTreeResult> {
    build_support_tree(&sm.mesh, &sm.points, &sm.config, ctl)
}

/// Generate a support tree against any collision oracle.
///
/// The bed lies `object_elevation_mm` below the lowest point of the object.
/// With zero elevation, support points on the bed are dropped first.
pub fn build_support_tree(
    oracle: &dyn CollisionOracle,
    points: &[SupportPoint],
    config: &SupportTreeConfig,
    ctl: &JobController,
) -> Result<SupportTreeResult> {
    config.validate()?;

    let ground = oracle.ground_level() - config.object_elevation_mm;
    let points = if config.is_zero_elevation() {
        remove_bottom_points(points, oracle.ground_level(), config.bottom_points_tolerance_mm)
    } else {
        points.to_vec()
    };

    let mut tree = DefaultSupportTree::new(oracle, &points, config, ground, ctl);
    let outcome = tree.execute();
    Ok(SupportTreeResult {
        builder: tree.into_builder(),
        outcome,
    })
}

/// Support points strictly above `ground_level + tolerance`.
pub fn remove_bottom_points(points: &[SupportPoint], ground_level: f64, tolerance: f64) -> Vec<SupportPoint> {
    points
        .iter()
        .filter(|sp| sp.pos.z > ground_level + tolerance)
        .copied()
        .collect()
}

/// Phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    /// Nothing done yet.
    Begin,
    /// Placing pinheads.
    Pinheads,
    /// Sorting heads by what is below them.
    Classify,
    /// Dropping pillars to the bed.
    RoutingGround,
    /// Routing heads that do not see the bed.
    RoutingNonground,
    /// Bracing pillars.
    CascadePillars,
    /// Finishing up.
    MergeResult,
    /// Finished.
    Done,
    /// Cancelled.
    Abort,
}

impl BuildStep {
    /// Progress reported when the step starts.
    pub fn percent(self) -> u32 {
        match self {
            Self::Begin => 0,
            Self::Pinheads => 30,
            Self::Classify => 50,
            Self::RoutingGround => 60,
            Self::RoutingNonground => 70,
            Self::CascadePillars => 80,
            Self::MergeResult => 99,
            Self::Done => 100,
            Self::Abort => 0,
        }
    }

    /// Label reported when the step starts.
    pub fn label(self) -> &'static str {
        match self {
            Self::Begin => "Starting",
            Self::Pinheads => "Generate pinheads",
            Self::Classify => "Classification",
            Self::RoutingGround => "Routing to ground",
            Self::RoutingNonground => "Routing supports to model surface",
            Self::CascadePillars => "Interconnecting pillars",
            Self::MergeResult => "Merging support mesh",
            Self::Done => "Done",
            Self::Abort => "Abort",
        }
    }

    fn next(self) -> Self {
        match self {
            Self::Begin => Self::Pinheads,
            Self::Pinheads => Self::Classify,
            Self::Classify => Self::RoutingGround,
            Self::RoutingGround => Self::RoutingNonground,
            Self::RoutingNonground => Self::CascadePillars,
            Self::CascadePillars => Self::MergeResult,
            Self::MergeResult => Self::Done,
            Self::Done => Self::Done,
            Self::Abort => Self::Abort,
        }
    }
}

/// The support tree generator for one object.
pub struct DefaultSupportTree<'a> {
    oracle: &'a dyn CollisionOracle,
    points: &'a [SupportPoint],
    cfg: &'a SupportTreeConfig,
    ctl: &'a JobController,
    ground: f64,

    builder: Mutex<SupportTreeBuilder>,
    bridge_mutex: Mutex<()>,
    pillar_index: PointIndex,

    iheads: Vec<usize>,
    iheads_onmodel: Vec<usize>,
    head_to_ground_scans: HashMap<usize, HitResult>,
    pillar_clusters: ClusteredPoints,
}

impl<'a> DefaultSupportTree<'a> {
    /// Prepare a run; nothing is computed until [`DefaultSupportTree::execute`].
    pub fn new(
        oracle: &'a dyn CollisionOracle,
        points: &'a [SupportPoint],
        cfg: &'a SupportTreeConfig,
        ground: f64,
        ctl: &'a JobController,
    ) -> Self {
        Self {
            oracle,
            points,
            cfg,
            ctl,
            ground,
            builder: Mutex::new(SupportTreeBuilder::new(ground)),
            bridge_mutex: Mutex::new(()),
            pillar_index: PointIndex::new(),
            iheads: Vec::new(),
            iheads_onmodel: Vec::new(),
            head_to_ground_scans: HashMap::new(),
            pillar_clusters: Vec::new(),
        }
    }

    /// Run all phases.
    pub fn execute(&mut self) -> BuildOutcome {
        let mut step = BuildStep::Begin;
        loop {
            // A run that got through its last phase is complete.
            let finishing = matches!(step, BuildStep::MergeResult | BuildStep::Done);
            if !finishing && self.ctl.stopped() {
                step = BuildStep::Abort;
            }
            self.ctl.update_status(step.percent(), step.label());

            let res = match step {
                BuildStep::Begin => Ok(()),
                BuildStep::Pinheads => self.add_pinheads(),
                BuildStep::Classify => self.classify(),
                BuildStep::RoutingGround => self.routing_to_ground(),
                BuildStep::RoutingNonground => self.routing_to_model(),
                BuildStep::CascadePillars => self.interconnect_pillars(),
                BuildStep::MergeResult => {
                    self.merge_result();
                    Ok(())
                }
                BuildStep::Done => return BuildOutcome::Done,
                BuildStep::Abort => return BuildOutcome::Aborted,
            };

            step = match res {
                Ok(()) => step.next(),
                Err(err) => {
                    info!("support tree generation stopped in {step:?}: {err}");
                    BuildStep::Abort
                }
            };
        }
    }

    /// The generated elements.
    pub fn into_builder(self) -> SupportTreeBuilder {
        self.builder.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn builder(&self) -> MutexGuard<'_, SupportTreeBuilder> {
        self.builder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clearance of a beam of radius `r` from `src` along `dir`.
    fn beam_distance(&self, src: &Point3, dir: &Vec3, r: f64) -> f64 {
        self.beam_hit(src, dir, r).distance()
    }

    fn beam_hit(&self, src: &Point3, dir: &Vec3, r: f64) -> HitResult {
        self.oracle.beam_intersect(src, dir, r, self.cfg.safety_distance_mm)
    }

    fn optimizer(&self, stop_score: f64) -> Optimizer {
        let stop = StopCriteria::default()
            .max_iterations(self.cfg.optimizer_max_iterations)
            .relative_score_difference(self.cfg.optimizer_rel_score_diff)
            .stop_score(stop_score);
        Optimizer::new(stop).seed(self.cfg.optimizer_seed)
    }

    fn add_pinheads(&mut self) -> Result<()> {
        let cfg = self.cfg;
        let positions: Vec<Point3> = self.points.iter().map(|sp| sp.pos).collect();
        let filtered: Vec<usize> = cluster_by_distance(&positions, SUPPORT_POINT_MERGE_DISTANCE, 2)
            .into_iter()
            .filter_map(|cl| cl.first().copied())
            .collect();
        debug!("{} of {} support points left after merging", filtered.len(), self.points.len());

        let this = &*self;
        let placed: Vec<(usize, Option<Head>)> = filtered
            .par_iter()
            .map(|&i| this.place_head(i).map(|head| (i, head)))
            .collect::<Result<_>>()?;

        let mut builder = self.builder.lock().unwrap_or_else(PoisonError::into_inner);
        for (i, sp) in self.points.iter().enumerate() {
            let unplaced = Head::new(
                cfg.head_back_radius_mm,
                sp.head_front_radius,
                cfg.head_width_mm,
                cfg.head_penetration_mm,
                DOWN,
                sp.pos,
            );
            builder.add_head(i, unplaced);
        }
        for (i, head) in placed {
            if let Some(head) = head {
                builder.add_head(i, head);
                self.iheads.push(i);
            }
        }
        debug!("placed {} pinheads", self.iheads.len());
        Ok(())
    }

    /// Find a collision free head for support point `i`.
    ///
    /// The full size head is tried first, then the fallback radius. For each
    /// radius the surface normal clamped to the bridge slope is tested, and
    /// if that collides the orientation and width are optimized.
    fn place_head(&self, i: usize) -> Result<Option<Head>> {
        self.ctl.check_cancelled()?;
        let cfg = self.cfg;
        let sp = &self.points[i];
        let hp = sp.pos;

        let Some(n) = self.oracle.normal_at(&hp).try_normalize(f64::EPSILON) else {
            return Ok(None);
        };
        let (polar, azimuth) = dir_to_spheric(&n);
        if polar < PI - cfg.normal_cutoff_angle {
            return Ok(None);
        }
        let polar = polar.max(PI - cfg.bridge_slope);

        let radii = [cfg.head_back_radius_mm, cfg.head_fallback_radius_mm];
        let tries = if cfg.head_fallback_radius_mm < cfg.head_back_radius_mm { 2 } else { 1 };
        let pin_r = sp.head_front_radius;
        let sd = cfg.safety_distance_mm;

        for &back_r in &radii[..tries] {
            let (mut lmin, lmax) = if back_r < cfg.head_back_radius_mm {
                (0.0, cfg.head_penetration_mm)
            } else {
                (cfg.head_width_mm, cfg.head_width_mm)
            };

            // Space the head needs in front of the surface.
            let w = lmin + 2.0 * back_r + 2.0 * cfg.head_front_radius_mm - cfg.head_penetration_mm;

            let mut nn = spheric_to_dir(polar, azimuth);
            let mut clearance = self.oracle.pinhead_intersect(&hp, &nn, pin_r, back_r, w, sd).distance();

            if clearance <= w {
                let res = self.optimizer(w).maximize(
                    |&[plr, azm, l]: &[f64; 3]| {
                        let dir = spheric_to_dir(plr, azm);
                        self.oracle.pinhead_intersect(&hp, &dir, pin_r, back_r, l, sd).distance()
                    },
                    [polar, azimuth, 0.5 * (lmin + lmax)],
                    [(PI - cfg.bridge_slope, PI), (-PI, PI), (lmin, lmax)],
                );
                if res.score > w {
                    let [plr, azm, l] = res.optimum;
                    nn = spheric_to_dir(plr, azm);
                    lmin = l;
                    clearance = res.score;
                }
            }

            if clearance > w && hp.z + w * nn.z >= self.ground {
                let mut head = Head::new(back_r, pin_r, lmin, cfg.head_penetration_mm, nn, hp);
                head.id = Some(i);
                return Ok(Some(head));
            }
        }

        Ok(None)
    }

    fn classify(&mut self) -> Result<()> {
        let cfg = self.cfg;
        let iheads = self.iheads.clone();
        let mut ground_heads = Vec::new();

        for i in iheads {
            self.ctl.check_cancelled()?;
            let head = *self.builder().head(i);
            let hit = self.beam_hit(&head.junction_point(), &DOWN, head.r_back_mm);

            if !hit.is_hit() {
                ground_heads.push(i);
            } else if cfg.ground_facing_only {
                self.builder().invalidate_head(i);
            } else {
                self.iheads_onmodel.push(i);
            }
            self.head_to_ground_scans.insert(i, hit);
        }

        let clusters = {
            let builder = self.builder();
            cluster_with(
                &ground_heads,
                |i| builder.head(i).junction_point(),
                |a, b| {
                    distance_2d(&a.0, &b.0) < 2.0 * cfg.base_radius_mm
                        && (a.0 - b.0).norm() < cfg.max_bridge_length_mm
                },
                cfg.max_bridges_on_pillar as usize,
            )
        };
        debug!(
            "{} heads see the bed in {} clusters, {} see the model",
            ground_heads.len(),
            clusters.len(),
            self.iheads_onmodel.len()
        );
        self.pillar_clusters = clusters;
        Ok(())
    }

    fn routing_to_ground(&mut self) -> Result<()> {
        let clusters = std::mem::take(&mut self.pillar_clusters);
        let mut centroids = Vec::with_capacity(clusters.len());

        for cl in &clusters {
            self.ctl.check_cancelled()?;
            let lcid = cluster_centroid(cl, |i| self.points[i].pos, distance_2d).unwrap_or(0);
            centroids.push(lcid);

            let hid = cl[lcid];
            let head = *self.builder().head(hid);
            if !self.create_ground_pillar(&head.junction_point(), &head.dir, head.r_back_mm, Some(hid)) {
                warn!("support point {hid}: no room for a ground pillar, routing it to the model");
                self.iheads_onmodel.push(hid);
            }
        }

        for (cl, &lcid) in clusters.iter().zip(&centroids) {
            self.ctl.check_cancelled()?;
            let centerpillar = self.builder().head(cl[lcid]).pillar_id;

            for (j, &sidx) in cl.iter().enumerate() {
                if j == lcid {
                    continue;
                }
                let side = *self.builder().head(sidx);
                if self.connect_to_nearpillar(&side, centerpillar) || self.search_pillar_and_connect(&side)? {
                    continue;
                }
                if !self.create_ground_pillar(&side.junction_point(), &side.dir, side.r_back_mm, Some(sidx)) {
                    warn!("support point {sidx}: no room for a ground pillar, routing it to the model");
                    self.iheads_onmodel.push(sidx);
                }
            }
        }
        Ok(())
    }

    fn routing_to_model(&mut self) -> Result<()> {
        let onmodel = std::mem::take(&mut self.iheads_onmodel);

        if self.cfg.ground_facing_only {
            info!("ground facing supports only, dropping {} heads", onmodel.len());
            let mut builder = self.builder();
            for &i in &onmodel {
                builder.invalidate_head(i);
            }
            return Ok(());
        }

        let this = &*self;
        onmodel.par_iter().try_for_each(|&idx| -> Result<()> {
            this.ctl.check_cancelled()?;
            let head = *this.builder().head(idx);
            if !head.is_valid() {
                return Ok(());
            }

            if this.search_pillar_and_connect(&head)? || this.connect_to_ground(&head)? || this.connect_to_model_body(&head) {
                return Ok(());
            }

            warn!("support point {idx}: cannot route to the bed or the model");
            this.builder().invalidate_head(idx);
            Ok(())
        })
    }

    fn merge_result(&self) {
        let stats = self.builder().stats();
        info!(
            "support tree: {} heads ({} dropped), {} pillars, {} bridges, {} crossbridges, {} anchors",
            stats.valid_heads,
            stats.invalid_heads,
            stats.pillars,
            stats.bridges,
            stats.crossbridges,
            stats.anchors
        );
    }
}
