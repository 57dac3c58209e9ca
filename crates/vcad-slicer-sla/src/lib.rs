#![warn(missing_docs)]

//! SLA support tree generation for the vcad slicer.
//!
//! Given a triangle mesh and the points on its surface that need support,
//! this crate places pinheads under the points and routes them down to the
//! bed through pillars, bridges and braces, or anchors them on the object
//! where the bed cannot be reached.
//!
//! # Example
//!
//! ```ignore
//! use vcad_slicer_sla::{create_support_tree, IndexedMesh, JobController, SupportableMesh};
//! use vcad_slicer_sla::{SupportPoint, SupportTreeConfig};
//!
//! let mesh = IndexedMesh::from_flat(&positions, &indices)?;
//! let points = vec![SupportPoint::new(p, 0.2)];
//! let sm = SupportableMesh::new(mesh, points, SupportTreeConfig::default());
//!
//! let result = create_support_tree(&sm, &JobController::new())?;
//! println!("Pillars: {}", result.builder.stats().pillars);
//! ```

pub mod builder;
pub mod clustering;
pub mod collision;
pub mod config;
pub mod control;
pub mod error;
pub mod geometry;
pub mod mesh;
pub mod optimizer;
pub mod point_index;
pub mod primitives;
pub mod tree;

pub use builder::{SupportTreeBuilder, SupportTreeStats};
pub use collision::{CollisionOracle, HitResult};
pub use config::{PillarConnectionMode, SupportTreeConfig};
pub use control::JobController;
pub use error::{Result, SupportError};
pub use mesh::IndexedMesh;
pub use point_index::PointIndex;
pub use primitives::{Anchor, Bridge, Head, Junction, Pedestal, Pillar, SupportPoint};
pub use tree::{
    build_support_tree, create_support_tree, remove_bottom_points, BuildOutcome, BuildStep,
    DefaultSupportTree, SupportTreeResult, SupportableMesh,
};
