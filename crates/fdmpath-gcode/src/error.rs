//! Error types for planning and G-code output.

use fdmpath_slicer::SlicerError;
use thiserror::Error;

/// Errors that can occur while planning or writing G-code.
#[derive(Error, Debug)]
pub enum GcodeError {
    /// Emission was attempted before an output sink was set.
    #[error("G-code output is not opened")]
    NotOpened,

    /// Writing to the output failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Layer geometry was rejected.
    #[error(transparent)]
    Slicer(#[from] SlicerError),

    /// Invalid machine or print settings.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// Result type for G-code operations.
pub type Result<T> = std::result::Result<T, GcodeError>;
