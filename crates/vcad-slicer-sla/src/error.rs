//! Error types for support tree generation.

use thiserror::Error;

/// Errors that can occur while generating a support tree.
///
/// Placement failures of individual support points are not errors: the
/// affected head is invalidated and the run continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SupportError {
    /// The job controller requested cancellation.
    #[error("support generation cancelled")]
    Cancelled,

    /// Mesh has no triangles.
    #[error("mesh is empty")]
    EmptyMesh,

    /// Mesh has out of range indices or non-finite coordinates.
    #[error("mesh has degenerate geometry: {0}")]
    DegenerateMesh(String),

    /// Invalid support tree settings.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// Result type for support tree operations.
pub type Result<T> = std::result::Result<T, SupportError>;
