//! Planned paths and the per-feature settings they share.

use std::sync::Arc;

use fdmpath_slicer::{Coord, Point};

/// Speed and width profile of one kind of move (outer wall, infill, travel).
///
/// Configs are shared between paths through an [`Arc`]; two paths use the
/// same config when they point at the same allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PathConfig {
    /// Nominal speed (mm/s).
    pub speed: f64,
    /// Extrusion width (microns); zero for travel.
    pub line_width: Coord,
    /// Feature name written as a `;TYPE:` comment.
    pub name: String,
    /// Raise Z gradually along the last path of the layer.
    pub spiralize: bool,
}

impl PathConfig {
    /// Create a shared config.
    pub fn new(speed: f64, line_width: Coord, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            speed,
            line_width,
            name: name.into(),
            spiralize: false,
        })
    }

    /// Create a shared config for a spiralized wall.
    pub fn spiralized(speed: f64, line_width: Coord, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            speed,
            line_width,
            name: name.into(),
            spiralize: true,
        })
    }

    /// Does this config deposit no material?
    pub fn is_travel(&self) -> bool {
        self.line_width == 0
    }
}

/// A run of points printed with one config by one extruder.
#[derive(Debug, Clone)]
pub struct GCodePath {
    /// Shared speed/width profile.
    pub config: Arc<PathConfig>,
    /// Retract before the first point.
    pub retract: bool,
    /// Extruder that prints this path.
    pub extruder: usize,
    /// Target points in order.
    pub points: Vec<Point>,
    /// Sealed: later moves open a new path.
    pub done: bool,
}

impl GCodePath {
    /// Start an empty path.
    pub fn new(config: Arc<PathConfig>, extruder: usize) -> Self {
        Self {
            config,
            retract: false,
            extruder,
            points: Vec::new(),
            done: false,
        }
    }

    /// Can moves with `config` on `extruder` be appended to this path?
    pub fn accepts(&self, config: &Arc<PathConfig>, extruder: usize) -> bool {
        !self.done && self.extruder == extruder && Arc::ptr_eq(&self.config, config)
    }

    /// Length in millimeters when starting from `from`.
    pub fn length_mm(&self, from: Point) -> f64 {
        let mut p0 = from;
        let mut length = 0.0;
        for &p1 in &self.points {
            length += (p1 - p0).v_size_mm();
            p0 = p1;
        }
        length
    }

    /// Last point, or `from` for an empty path.
    pub fn end_point(&self, from: Point) -> Point {
        self.points.last().copied().unwrap_or(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_accepts_same_config_only() {
        let wall = PathConfig::new(30.0, 400, "WALL-OUTER");
        let twin = PathConfig::new(30.0, 400, "WALL-OUTER");
        let mut path = GCodePath::new(wall.clone(), 0);
        assert!(path.accepts(&wall, 0));
        assert!(!path.accepts(&twin, 0));
        assert!(!path.accepts(&wall, 1));
        path.done = true;
        assert!(!path.accepts(&wall, 0));
    }

    #[test]
    fn test_length() {
        let mut path = GCodePath::new(PathConfig::new(50.0, 0, "travel"), 0);
        path.points = vec![Point::new(3000, 4000), Point::new(3000, 0)];
        assert_relative_eq!(path.length_mm(Point::zero()), 9.0);
        assert_eq!(path.end_point(Point::zero()), Point::new(3000, 0));
        assert!(path.config.is_travel());
    }
}
