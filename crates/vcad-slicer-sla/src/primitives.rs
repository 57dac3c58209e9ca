//! Support tree elements.
//!
//! Elements reference each other by their index in the owning
//! [`SupportTreeBuilder`](crate::builder::SupportTreeBuilder).

use serde::{Deserialize, Serialize};

use crate::geometry::{Point3, Vec3, DOWN};

/// A point on the object surface that needs support.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupportPoint {
    /// Position on the surface.
    pub pos: Point3,
    /// Radius of the pin touching the surface here.
    pub head_front_radius: f64,
}

impl SupportPoint {
    /// Create a support point.
    pub fn new(pos: Point3, head_front_radius: f64) -> Self {
        Self {
            pos,
            head_front_radius,
        }
    }
}

/// The pin-head gripping the object at a support point.
///
/// Seen along `dir` the head is a small sphere of radius `r_pin_mm` at `pos`,
/// a cone of length `width_mm` and a sphere of radius `r_back_mm`. The pin
/// sinks `penetration_mm` into the surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Head {
    /// Index of the support point, `None` while the head is invalid.
    pub id: Option<usize>,
    /// Unit direction from the pin towards the back.
    pub dir: Vec3,
    /// Position of the pin.
    pub pos: Point3,
    /// Radius of the back sphere.
    pub r_back_mm: f64,
    /// Radius of the pin sphere.
    pub r_pin_mm: f64,
    /// Length of the cone between the two spheres.
    pub width_mm: f64,
    /// Depth the pin sinks into the surface.
    pub penetration_mm: f64,
    /// Pillar starting under this head.
    pub pillar_id: Option<usize>,
    /// Bridge starting at this head.
    pub bridge_id: Option<usize>,
}

impl Head {
    /// Create an invalid head; it becomes valid once an id is assigned.
    pub fn new(r_back_mm: f64, r_pin_mm: f64, width_mm: f64, penetration_mm: f64, dir: Vec3, pos: Point3) -> Self {
        Self {
            id: None,
            dir,
            pos,
            r_back_mm,
            r_pin_mm,
            width_mm,
            penetration_mm,
            pillar_id: None,
            bridge_id: None,
        }
    }

    /// A head is valid while it has an id.
    pub fn is_valid(&self) -> bool {
        self.id.is_some()
    }

    /// Exclude the head from the output.
    pub fn invalidate(&mut self) {
        self.id = None;
    }

    /// Length from the tip of the pin to the back of the back sphere.
    pub fn real_width(&self) -> f64 {
        2.0 * self.r_pin_mm + self.width_mm + 2.0 * self.r_back_mm
    }

    /// Length of the head outside the model.
    pub fn fullwidth(&self) -> f64 {
        self.real_width() - self.penetration_mm
    }

    /// Center of the back sphere, where pillars and bridges attach.
    pub fn junction_point(&self) -> Point3 {
        self.pos + (self.fullwidth() - self.r_back_mm) * self.dir
    }
}

impl Default for Head {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0, DOWN, Point3::origin())
    }
}

/// Tail of a head that could only be routed back into the object.
///
/// Shaped like a head whose pin pierces the model surface below.
pub type Anchor = Head;

/// A vertical column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pillar {
    /// Index in the builder.
    pub id: usize,
    /// Bottom of the pillar.
    pub endpt: Point3,
    /// Length of the pillar.
    pub height: f64,
    /// Radius of the pillar.
    pub r: f64,
    /// The pillar hangs directly under a head.
    pub starts_from_head: bool,
    /// The head the pillar hangs under.
    pub start_junction_id: Option<usize>,
    /// Pillars braced with this one.
    pub links: u32,
    /// Bridges resting on this pillar.
    pub bridges: u32,
    /// Pedestal under the pillar.
    pub pedestal_id: Option<usize>,
}

impl Pillar {
    /// A pillar of `height` standing on `endpt`.
    pub fn new(endpt: Point3, height: f64, r: f64) -> Self {
        Self {
            id: 0,
            endpt,
            height,
            r,
            starts_from_head: false,
            start_junction_id: None,
            links: 0,
            bridges: 0,
            pedestal_id: None,
        }
    }

    /// A pillar of `height` hanging from the junction of `head`.
    pub fn from_head(head: &Head, height: f64) -> Self {
        let jp = head.junction_point();
        Self {
            starts_from_head: true,
            start_junction_id: head.id,
            ..Self::new(Point3::new(jp.x, jp.y, jp.z - height), height, head.r_back_mm)
        }
    }

    /// Top of the pillar.
    pub fn startpoint(&self) -> Point3 {
        Point3::new(self.endpt.x, self.endpt.y, self.endpt.z + self.height)
    }

    /// Bottom of the pillar.
    pub fn endpoint(&self) -> Point3 {
        self.endpt
    }
}

/// A straight member between two points.
///
/// Cross-braces between pillars use the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bridge {
    /// Index in the builder's list of bridges or crossbridges.
    pub id: usize,
    /// Upper end.
    pub startp: Point3,
    /// Lower end.
    pub endp: Point3,
    /// Radius.
    pub r: f64,
}

impl Bridge {
    /// Length of the bridge.
    pub fn length(&self) -> f64 {
        (self.endp - self.startp).norm()
    }

    /// Unit direction from start to end.
    pub fn dir(&self) -> Vec3 {
        (self.endp - self.startp).normalize()
    }
}

/// A sphere joining members where they meet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Junction {
    /// Index in the builder.
    pub id: usize,
    /// Center.
    pub pos: Point3,
    /// Radius.
    pub r: f64,
}

/// A widened foot at the bottom of a ground pillar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pedestal {
    /// Index in the builder.
    pub id: usize,
    /// Pillar standing on the pedestal.
    pub pillar_id: usize,
    /// Center of the bottom face.
    pub pos: Point3,
    /// Height of the pedestal.
    pub height: f64,
    /// Radius at the bottom.
    pub r_bottom: f64,
    /// Radius at the top, equal to the pillar radius.
    pub r_top: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_head_dimensions() {
        let mut head = Head::new(0.5, 0.2, 1.0, 0.2, DOWN, Point3::new(0.0, 0.0, 10.0));
        assert!(!head.is_valid());
        head.id = Some(3);
        assert!(head.is_valid());

        assert_relative_eq!(head.real_width(), 2.4);
        assert_relative_eq!(head.fullwidth(), 2.2);
        assert_relative_eq!(head.junction_point().z, 8.3, epsilon = 1e-12);

        head.invalidate();
        assert!(!head.is_valid());
    }

    #[test]
    fn test_pillar_from_head() {
        let mut head = Head::new(0.5, 0.2, 1.0, 0.2, DOWN, Point3::new(1.0, 2.0, 10.0));
        head.id = Some(7);
        let pillar = Pillar::from_head(&head, 8.3);
        assert!(pillar.starts_from_head);
        assert_eq!(pillar.start_junction_id, Some(7));
        assert_relative_eq!(pillar.endpoint().z, 0.0, epsilon = 1e-12);
        assert_relative_eq!(pillar.startpoint().z, 8.3, epsilon = 1e-12);
        assert_relative_eq!(pillar.r, 0.5);
    }

    #[test]
    fn test_bridge_geometry() {
        let b = Bridge {
            id: 0,
            startp: Point3::new(0.0, 0.0, 4.0),
            endp: Point3::new(3.0, 0.0, 0.0),
            r: 0.5,
        };
        assert_relative_eq!(b.length(), 5.0);
        assert_relative_eq!(b.dir().z, -0.8);
    }
}
