//! Support tree settings.

use std::f64::consts::{FRAC_PI_4, PI};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SupportError};

/// How neighboring pillars are braced against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PillarConnectionMode {
    /// Zig-zag bracing only.
    Zigzag,
    /// Every zig-zag segment gets a mirrored segment, forming crosses.
    Cross,
    /// Crosses only when the pillars are far enough apart.
    #[default]
    Dynamic,
}

/// Parameters of the support tree generator.
///
/// All lengths are in millimeters, all angles in radians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportTreeConfig {
    /// Radius of the pin touching the model surface.
    pub head_front_radius_mm: f64,
    /// Radius of the back of the head, which is also the pillar radius.
    pub head_back_radius_mm: f64,
    /// Smaller back radius tried when a full size head does not fit.
    pub head_fallback_radius_mm: f64,
    /// How deep the pin sinks into the model.
    pub head_penetration_mm: f64,
    /// Length of the head between pin and back sphere.
    pub head_width_mm: f64,
    /// Heads are only placed where the surface normal is within this angle
    /// from pointing straight down.
    pub normal_cutoff_angle: f64,
    /// Minimum angle between a bridge and the horizontal plane.
    pub bridge_slope: f64,
    /// Radius of the pedestal at the bottom of ground pillars.
    pub base_radius_mm: f64,
    /// Height of the pedestal at the bottom of ground pillars.
    pub base_height_mm: f64,
    /// Gap between the print bed and the lowest point of the object.
    pub object_elevation_mm: f64,
    /// In zero elevation mode, support points this close to the bed are dropped.
    pub bottom_points_tolerance_mm: f64,
    /// Longest allowed bridge.
    pub max_bridge_length_mm: f64,
    /// Longest horizontal distance between two pillars that get braced.
    pub max_pillar_link_distance_mm: f64,
    /// How many neighbors a pillar is braced with at most.
    pub pillar_cascade_neighbors: u32,
    /// How many bridges may rest on a single pillar.
    pub max_bridges_on_pillar: u32,
    /// Pillars taller than this need at least one braced neighbor.
    pub max_solo_pillar_height_mm: f64,
    /// Pillars taller than this need at least two braced neighbors.
    pub max_dual_pillar_height_mm: f64,
    /// Bracing pattern between pillars.
    pub pillar_connection_mode: PillarConnectionMode,
    /// In dynamic mode, crosses are used beyond this multiple of `base_radius_mm`.
    pub dynamic_cross_distance_factor: f64,
    /// Only support points that can reach the bed directly.
    pub ground_facing_only: bool,
    /// Minimum distance between a pillar base and the object footprint.
    pub pillar_base_safety_distance_mm: f64,
    /// Clearance kept between support geometry and the model.
    pub safety_distance_mm: f64,
    /// Evaluation budget of the orientation optimizer.
    pub optimizer_max_iterations: u32,
    /// Relative score change under which the optimizer considers itself converged.
    pub optimizer_rel_score_diff: f64,
    /// Seed of the orientation optimizer.
    pub optimizer_seed: u64,
}

impl Default for SupportTreeConfig {
    fn default() -> Self {
        Self {
            head_front_radius_mm: 0.2,
            head_back_radius_mm: 0.5,
            head_fallback_radius_mm: 0.25,
            head_penetration_mm: 0.2,
            head_width_mm: 1.0,
            normal_cutoff_angle: 150.0_f64.to_radians(),
            bridge_slope: FRAC_PI_4,
            base_radius_mm: 2.0,
            base_height_mm: 1.0,
            object_elevation_mm: 10.0,
            bottom_points_tolerance_mm: 0.1,
            max_bridge_length_mm: 10.0,
            max_pillar_link_distance_mm: 10.0,
            pillar_cascade_neighbors: 3,
            max_bridges_on_pillar: 3,
            max_solo_pillar_height_mm: 15.0,
            max_dual_pillar_height_mm: 35.0,
            pillar_connection_mode: PillarConnectionMode::Dynamic,
            dynamic_cross_distance_factor: 2.0,
            ground_facing_only: false,
            pillar_base_safety_distance_mm: 0.5,
            safety_distance_mm: 0.5,
            optimizer_max_iterations: 1000,
            optimizer_rel_score_diff: 1e-6,
            optimizer_seed: 0,
        }
    }
}

impl SupportTreeConfig {
    /// Length of a full size head from pin tip to the back of the back sphere,
    /// minus the part sunk into the model.
    pub fn head_fullwidth(&self) -> f64 {
        2.0 * self.head_front_radius_mm + self.head_width_mm + 2.0 * self.head_back_radius_mm
            - self.head_penetration_mm
    }

    /// True when the object sits directly on the bed.
    pub fn is_zero_elevation(&self) -> bool {
        self.object_elevation_mm < f64::EPSILON
    }

    /// Validate settings.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("head_front_radius_mm", self.head_front_radius_mm),
            ("head_back_radius_mm", self.head_back_radius_mm),
            ("head_fallback_radius_mm", self.head_fallback_radius_mm),
            ("head_width_mm", self.head_width_mm),
            ("base_radius_mm", self.base_radius_mm),
            ("max_bridge_length_mm", self.max_bridge_length_mm),
            ("max_pillar_link_distance_mm", self.max_pillar_link_distance_mm),
            ("max_solo_pillar_height_mm", self.max_solo_pillar_height_mm),
            ("dynamic_cross_distance_factor", self.dynamic_cross_distance_factor),
        ];
        for (name, value) in positive {
            if !(value > 0.0) || !value.is_finite() {
                return Err(SupportError::InvalidSettings(format!(
                    "{name} must be positive"
                )));
            }
        }

        let non_negative = [
            ("head_penetration_mm", self.head_penetration_mm),
            ("base_height_mm", self.base_height_mm),
            ("object_elevation_mm", self.object_elevation_mm),
            ("bottom_points_tolerance_mm", self.bottom_points_tolerance_mm),
            ("pillar_base_safety_distance_mm", self.pillar_base_safety_distance_mm),
            ("safety_distance_mm", self.safety_distance_mm),
            ("optimizer_rel_score_diff", self.optimizer_rel_score_diff),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(SupportError::InvalidSettings(format!(
                    "{name} must not be negative"
                )));
            }
        }

        if self.head_fallback_radius_mm > self.head_back_radius_mm {
            return Err(SupportError::InvalidSettings(
                "head_fallback_radius_mm must not exceed head_back_radius_mm".into(),
            ));
        }
        if self.max_dual_pillar_height_mm < self.max_solo_pillar_height_mm {
            return Err(SupportError::InvalidSettings(
                "max_dual_pillar_height_mm must not be below max_solo_pillar_height_mm".into(),
            ));
        }
        if !(self.bridge_slope > 0.0 && self.bridge_slope <= FRAC_PI_4 + 1e-9) {
            return Err(SupportError::InvalidSettings(
                "bridge_slope must be between 0 and 45 degrees".into(),
            ));
        }
        if !(self.normal_cutoff_angle > 0.0 && self.normal_cutoff_angle <= PI) {
            return Err(SupportError::InvalidSettings(
                "normal_cutoff_angle must be between 0 and 180 degrees".into(),
            ));
        }
        if self.pillar_cascade_neighbors == 0 {
            return Err(SupportError::InvalidSettings(
                "pillar_cascade_neighbors must be at least 1".into(),
            ));
        }
        if self.max_bridges_on_pillar == 0 {
            return Err(SupportError::InvalidSettings(
                "max_bridges_on_pillar must be at least 1".into(),
            ));
        }
        if self.optimizer_max_iterations == 0 {
            return Err(SupportError::InvalidSettings(
                "optimizer_max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = SupportTreeConfig::default();
        assert!(cfg.validate().is_ok());
        assert_relative_eq!(cfg.head_fullwidth(), 2.2, epsilon = 1e-12);
        assert!(!cfg.is_zero_elevation());
    }

    #[test]
    fn test_invalid_settings() {
        let cfg = SupportTreeConfig {
            head_back_radius_mm: -0.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = SupportTreeConfig {
            head_fallback_radius_mm: 0.8,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = SupportTreeConfig {
            bridge_slope: 1.2,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = SupportTreeConfig {
            pillar_cascade_neighbors: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = SupportTreeConfig {
            max_bridge_length_mm: f64::NAN,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let cfg: SupportTreeConfig = serde_json::from_str(
            r#"{ "ground_facing_only": true, "pillar_connection_mode": "cross" }"#,
        )
        .unwrap();
        assert!(cfg.ground_facing_only);
        assert_eq!(cfg.pillar_connection_mode, PillarConnectionMode::Cross);
        assert_relative_eq!(cfg.head_back_radius_mm, 0.5);
        assert_eq!(cfg.max_bridges_on_pillar, 3);
    }
}
