//! Error types for layer geometry.

use thiserror::Error;

/// Errors that can occur while preparing layer geometry.
#[derive(Error, Debug)]
pub enum SlicerError {
    /// Polygon has too few vertices to describe a path.
    #[error("degenerate polygon with {vertices} vertices")]
    DegeneratePolygon {
        /// Number of vertices the polygon actually has.
        vertices: usize,
    },

    /// Invalid settings.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for slicer operations.
pub type Result<T> = std::result::Result<T, SlicerError>;
