//! Integer-micron points.
//!
//! All layer geometry is carried in integer microns so that a layer made of
//! thousands of segments accumulates no floating-point drift. Conversion to
//! millimeters happens only when a value is written out.

use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Coordinate type: one unit is one micron.
pub type Coord = i64;

/// Microns per millimeter.
pub const MICRONS_PER_MM: f64 = 1000.0;

/// Convert millimeters to integer microns.
#[inline]
pub fn mm2int(mm: f64) -> Coord {
    (mm * MICRONS_PER_MM).round() as Coord
}

/// Convert integer microns to millimeters.
#[inline]
pub fn int2mm(v: Coord) -> f64 {
    v as f64 / MICRONS_PER_MM
}

/// A 2D point (or vector) in microns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[Coord; 2]", into = "[Coord; 2]")]
pub struct Point {
    /// X coordinate.
    pub x: Coord,
    /// Y coordinate.
    pub y: Coord,
}

impl Point {
    /// Create a new point.
    #[inline]
    pub const fn new(x: Coord, y: Coord) -> Self {
        Self { x, y }
    }

    /// The origin.
    #[inline]
    pub const fn zero() -> Self {
        Self { x: 0, y: 0 }
    }

    /// Squared length, widened so that coordinates near the i64 range cannot overflow.
    #[inline]
    pub fn v_size2(self) -> i128 {
        self.x as i128 * self.x as i128 + self.y as i128 * self.y as i128
    }

    /// Length in microns.
    #[inline]
    pub fn v_size(self) -> f64 {
        (self.v_size2() as f64).sqrt()
    }

    /// Length in millimeters.
    #[inline]
    pub fn v_size_mm(self) -> f64 {
        self.v_size() / MICRONS_PER_MM
    }

    /// True when this vector is strictly shorter than `len` microns.
    #[inline]
    pub fn shorter_than(self, len: Coord) -> bool {
        if self.x.abs() > len || self.y.abs() > len {
            return false;
        }
        self.v_size2() < len as i128 * len as i128
    }

    /// Dot product.
    #[inline]
    pub fn dot(self, other: Point) -> i128 {
        self.x as i128 * other.x as i128 + self.y as i128 * other.y as i128
    }

    /// Perpendicular vector, rotated 90 degrees counter-clockwise.
    #[inline]
    pub fn perp(self) -> Point {
        Point::new(-self.y, self.x)
    }

    /// Rescale the vector to the given length in microns.
    ///
    /// A zero vector stays zero.
    pub fn normal(self, len: Coord) -> Point {
        let size = self.v_size();
        if size < 1.0 {
            return Point::zero();
        }
        let scale = len as f64 / size;
        Point::new(
            (self.x as f64 * scale).round() as Coord,
            (self.y as f64 * scale).round() as Coord,
        )
    }

    /// X in millimeters.
    #[inline]
    pub fn x_mm(self) -> f64 {
        int2mm(self.x)
    }

    /// Y in millimeters.
    #[inline]
    pub fn y_mm(self) -> f64 {
        int2mm(self.y)
    }
}

impl From<[Coord; 2]> for Point {
    fn from(v: [Coord; 2]) -> Self {
        Point::new(v[0], v[1])
    }
}

impl From<Point> for [Coord; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl Add for Point {
    type Output = Point;
    #[inline]
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Point {
    #[inline]
    fn add_assign(&mut self, rhs: Point) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Point {
    type Output = Point;
    #[inline]
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Point {
    #[inline]
    fn sub_assign(&mut self, rhs: Point) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Neg for Point {
    type Output = Point;
    #[inline]
    fn neg(self) -> Point {
        Point::new(-self.x, -self.y)
    }
}

impl Mul<Coord> for Point {
    type Output = Point;
    #[inline]
    fn mul(self, rhs: Coord) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<Coord> for Point {
    type Output = Point;
    #[inline]
    fn div(self, rhs: Coord) -> Point {
        Point::new(self.x / rhs, self.y / rhs)
    }
}

/// A 3D point in microns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[Coord; 3]", into = "[Coord; 3]")]
pub struct Point3 {
    /// X coordinate.
    pub x: Coord,
    /// Y coordinate.
    pub y: Coord,
    /// Z coordinate.
    pub z: Coord,
}

impl Point3 {
    /// Create a new point.
    #[inline]
    pub const fn new(x: Coord, y: Coord, z: Coord) -> Self {
        Self { x, y, z }
    }

    /// Drop the Z component.
    #[inline]
    pub fn xy(self) -> Point {
        Point::new(self.x, self.y)
    }
}

impl From<[Coord; 3]> for Point3 {
    fn from(v: [Coord; 3]) -> Self {
        Point3::new(v[0], v[1], v[2])
    }
}

impl From<Point3> for [Coord; 3] {
    fn from(p: Point3) -> Self {
        [p.x, p.y, p.z]
    }
}

/// A 2x2 rotation that maps a direction onto the +X axis.
///
/// Used to turn an arbitrary segment into a horizontal one so crossings
/// with polygon edges reduce to comparisons along a single scanline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMatrix {
    matrix: [f64; 4],
}

impl PointMatrix {
    /// Build the rotation that aligns `dir` with +X.
    pub fn aligned_with(dir: Point) -> Self {
        let len = dir.v_size();
        if len < 1.0 {
            return Self { matrix: [1.0, 0.0, 0.0, 1.0] };
        }
        let c = dir.x as f64 / len;
        let s = dir.y as f64 / len;
        Self {
            matrix: [c, s, -s, c],
        }
    }

    /// Rotate a point into the aligned frame.
    pub fn apply(&self, p: Point) -> Point {
        let m = &self.matrix;
        Point::new(
            (p.x as f64 * m[0] + p.y as f64 * m[1]).round() as Coord,
            (p.x as f64 * m[2] + p.y as f64 * m[3]).round() as Coord,
        )
    }

    /// Rotate a point from the aligned frame back to the original one.
    pub fn unapply(&self, p: Point) -> Point {
        let m = &self.matrix;
        Point::new(
            (p.x as f64 * m[0] + p.y as f64 * m[2]).round() as Coord,
            (p.x as f64 * m[1] + p.y as f64 * m[3]).round() as Coord,
        )
    }
}
