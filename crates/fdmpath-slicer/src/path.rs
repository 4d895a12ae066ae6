//! Closed outline polygons in integer microns.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlicerError};
use crate::point::{Coord, Point};

/// A 2D polygon (closed path).
///
/// Outer outlines run counter-clockwise, holes clockwise. A two-vertex
/// polygon is a single line (infill lines are fed this way).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon {
    /// Vertices of the polygon in order.
    pub points: Vec<Point>,
}

impl Polygon {
    /// Create a new polygon from points.
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Check if the polygon is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Vertex at `idx`, wrapping around the ring.
    pub fn vertex(&self, idx: usize) -> Point {
        self.points[idx % self.points.len()]
    }

    /// Reject polygons that cannot describe a path.
    pub fn validate(&self) -> Result<()> {
        if self.points.len() < 2 {
            return Err(SlicerError::DegeneratePolygon {
                vertices: self.points.len(),
            });
        }
        Ok(())
    }

    /// Reverse the winding order.
    pub fn reverse(&mut self) {
        self.points.reverse();
    }

    /// Number of edges crossed by a ray cast from `p` towards +X.
    pub fn crossings(&self, p: Point) -> usize {
        let n = self.points.len();
        if n < 3 {
            return 0;
        }
        let mut count = 0;
        let mut p0 = self.points[n - 1];
        for &p1 in &self.points {
            if (p0.y >= p.y && p1.y < p.y) || (p1.y > p.y && p0.y <= p.y) {
                let x = p0.x as i128
                    + (p1.x - p0.x) as i128 * (p.y - p0.y) as i128 / (p1.y - p0.y) as i128;
                if x >= p.x as i128 {
                    count += 1;
                }
            }
            p0 = p1;
        }
        count
    }

    /// Check if a point is inside this single ring.
    pub fn inside(&self, p: Point) -> bool {
        self.crossings(p) % 2 == 1
    }

    /// Vertex `idx` pushed `distance` microns towards the material side.
    ///
    /// The material lies to the left of each edge, which holds for
    /// counter-clockwise outlines and clockwise holes alike.
    pub fn vertex_with_offset(&self, idx: usize, distance: Coord) -> Point {
        let n = self.points.len();
        let p0 = self.points[(idx + n - 1) % n];
        let p1 = self.points[idx % n];
        let p2 = self.points[(idx + 1) % n];
        let off0 = (p1 - p0).normal(1000).perp();
        let off1 = (p2 - p1).normal(1000).perp();
        p1 + (off0 + off1).normal(distance)
    }
}

/// A set of polygons forming one region, outlines and holes together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygons {
    /// Member polygons.
    pub polygons: Vec<Polygon>,
}

impl Polygons {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a polygon.
    pub fn push(&mut self, polygon: Polygon) {
        self.polygons.push(polygon);
    }

    /// Number of polygons.
    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    /// Check if there are no polygons.
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Iterate over member polygons.
    pub fn iter(&self) -> std::slice::Iter<'_, Polygon> {
        self.polygons.iter()
    }

    /// Even-odd containment test across all member rings.
    pub fn inside(&self, p: Point) -> bool {
        self.polygons.iter().map(|poly| poly.crossings(p)).sum::<usize>() % 2 == 1
    }

    /// Every edge as `(polygon index, index of the edge's end vertex, start, end)`.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, Point, Point)> + '_ {
        self.polygons
            .iter()
            .enumerate()
            .filter(|(_, poly)| poly.len() >= 2)
            .flat_map(|(poly_idx, poly)| {
                let n = poly.len();
                (0..n).map(move |i| (poly_idx, i, poly.points[(i + n - 1) % n], poly.points[i]))
            })
    }

    /// Smallest distance in microns from `p` to any edge.
    pub fn distance_to_boundary(&self, p: Point) -> Option<f64> {
        self.edges()
            .map(|(_, _, a, b)| (closest_point_on_segment(p, a, b) - p).v_size())
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }
}

impl From<Vec<Polygon>> for Polygons {
    fn from(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }
}

impl<'a> IntoIterator for &'a Polygons {
    type Item = &'a Polygon;
    type IntoIter = std::slice::Iter<'a, Polygon>;

    fn into_iter(self) -> Self::IntoIter {
        self.polygons.iter()
    }
}

/// Closest point to `p` on the segment `a`-`b`.
pub fn closest_point_on_segment(p: Point, a: Point, b: Point) -> Point {
    let ab = b - a;
    let len2 = ab.v_size2();
    if len2 == 0 {
        return a;
    }
    let t = (p - a).dot(ab);
    if t <= 0 {
        return a;
    }
    if t >= len2 {
        return b;
    }
    Point::new(
        a.x + (ab.x as i128 * t / len2) as Coord,
        a.y + (ab.y as i128 * t / len2) as Coord,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square(min: Coord, max: Coord) -> Polygon {
        Polygon::new(vec![
            Point::new(min, min),
            Point::new(max, min),
            Point::new(max, max),
            Point::new(min, max),
        ])
    }

    #[test]
    fn test_validate() {
        assert!(square(0, 10).validate().is_ok());
        let line = Polygon::new(vec![Point::new(0, 0), Point::new(5, 5)]);
        assert!(line.validate().is_ok());
        let dot = Polygon::new(vec![Point::new(0, 0)]);
        assert!(matches!(
            dot.validate(),
            Err(SlicerError::DegeneratePolygon { vertices: 1 })
        ));
    }

    #[test]
    fn test_inside_with_hole() {
        let mut hole = square(4000, 6000);
        hole.reverse();
        let region = Polygons::from(vec![square(0, 10_000), hole]);
        assert!(region.inside(Point::new(1000, 1000)));
        assert!(!region.inside(Point::new(5000, 5000)));
        assert!(!region.inside(Point::new(20_000, 5000)));
    }

    #[test]
    fn test_vertex_offset_points_into_material() {
        let sq = square(0, 10_000);
        let p = sq.vertex_with_offset(0, 200);
        assert!(p.x > 0 && p.y > 0);
        assert!(sq.inside(p));

        let mut hole = square(4000, 6000);
        hole.reverse();
        let q = hole.vertex_with_offset(0, 200);
        assert!(!hole.inside(q));
    }

    #[test]
    fn test_distance_to_boundary() {
        let region = Polygons::from(vec![square(0, 10_000)]);
        let d = region.distance_to_boundary(Point::new(300, 5000)).unwrap();
        assert_relative_eq!(d, 300.0);
        assert!(Polygons::new().distance_to_boundary(Point::zero()).is_none());
    }

    #[test]
    fn test_closest_point_on_segment() {
        let a = Point::new(0, 0);
        let b = Point::new(1000, 0);
        assert_eq!(closest_point_on_segment(Point::new(500, 300), a, b), Point::new(500, 0));
        assert_eq!(closest_point_on_segment(Point::new(-50, 3), a, b), a);
        assert_eq!(closest_point_on_segment(Point::new(5000, 3), a, b), b);
    }
}
