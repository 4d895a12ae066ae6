//! Travel combing: routing travel moves around holes instead of across them.
//!
//! A travel that crosses the layer outline leaves a string or a scar on the
//! visible surface. [`Comb`] looks at the straight segment between two
//! points; when it crosses a boundary polygon it walks along that polygon
//! (slightly inset) from the entry crossing to the exit crossing, taking the
//! shorter way round, then drops every waypoint that can be skipped without
//! crossing anything.

use tracing::trace;

use crate::path::{closest_point_on_segment, Polygons};
use crate::point::{Coord, Point, PointMatrix};

/// Travels shorter than this are never combed (microns).
pub const MIN_COMB_DISTANCE: Coord = 1500;

/// How far combing waypoints sit inside the boundary (microns).
pub const COMB_INSET: Coord = 200;

/// Search radius for pulling a point back inside the boundary (microns).
pub const MOVE_INSIDE_SEARCH: Coord = 2000;

/// Finds travel routes that stay inside a layer boundary.
pub trait BoundaryRouter {
    /// Waypoints strictly between `from` and `to` such that every leg stays
    /// inside the boundary. An empty list means the direct segment is fine;
    /// `None` means no such route exists.
    fn route(&self, from: Point, to: Point) -> Option<Vec<Point>>;

    /// Check whether `p` lies inside the boundary.
    fn inside(&self, p: Point) -> bool;

    /// A point `distance` microns inside the boundary near `p`, if the
    /// boundary is close enough to find one.
    fn move_inside(&self, p: Point, distance: Coord) -> Option<Point>;

    /// Distance in microns from `p` to the nearest boundary edge.
    fn distance_to_boundary(&self, p: Point) -> Option<f64>;
}

/// Crossing range of the travel scanline with one boundary polygon.
#[derive(Debug, Clone, Copy)]
struct Crossing {
    min_x: Coord,
    min_idx: usize,
    max_x: Coord,
    max_idx: usize,
}

/// Boundary router over a fixed set of layer outlines.
#[derive(Debug, Clone)]
pub struct Comb {
    boundary: Polygons,
}

impl Comb {
    /// Build a router for one layer's outlines.
    pub fn new(boundary: Polygons) -> Self {
        Self { boundary }
    }

    /// The outlines travels must stay inside.
    pub fn boundary(&self) -> &Polygons {
        &self.boundary
    }

    /// Check whether the open segment `a`-`b` crosses any boundary edge.
    pub fn crosses_boundary(&self, a: Point, b: Point) -> bool {
        let matrix = PointMatrix::aligned_with(b - a);
        let sp = matrix.apply(a);
        let ep = matrix.apply(b);
        self.boundary.edges().any(|(_, _, p0, p1)| {
            scanline_crossing(matrix.apply(p0), matrix.apply(p1), sp.y)
                .is_some_and(|x| x > sp.x && x < ep.x)
        })
    }

    fn crossings(&self, matrix: &PointMatrix, sp: Point, ep: Point) -> Vec<Option<Crossing>> {
        let mut result: Vec<Option<Crossing>> = vec![None; self.boundary.len()];
        for (poly_idx, edge_idx, p0, p1) in self.boundary.edges() {
            let Some(x) = scanline_crossing(matrix.apply(p0), matrix.apply(p1), sp.y) else {
                continue;
            };
            if x < sp.x || x > ep.x {
                continue;
            }
            let entry = result[poly_idx].get_or_insert(Crossing {
                min_x: x,
                min_idx: edge_idx,
                max_x: x,
                max_idx: edge_idx,
            });
            if x < entry.min_x {
                entry.min_x = x;
                entry.min_idx = edge_idx;
            }
            if x > entry.max_x {
                entry.max_x = x;
                entry.max_idx = edge_idx;
            }
        }
        result
    }

    /// Inset boundary points from the entry crossing to the exit crossing,
    /// along the shorter side of the polygon.
    fn walk_around(&self, poly_idx: usize, crossing: Crossing, out: &mut Vec<Point>) {
        let poly = &self.boundary.polygons[poly_idx];
        let n = poly.len();
        let forward = (crossing.max_idx + n - crossing.min_idx) % n;
        let backward = (crossing.min_idx + n - crossing.max_idx) % n;
        if backward > forward {
            let mut i = crossing.min_idx;
            while i != crossing.max_idx {
                out.push(poly.vertex_with_offset(i, COMB_INSET));
                i = (i + 1) % n;
            }
        } else {
            let mut i = (crossing.min_idx + n - 1) % n;
            let stop = (crossing.max_idx + n - 1) % n;
            while i != stop {
                out.push(poly.vertex_with_offset(i, COMB_INSET));
                i = (i + n - 1) % n;
            }
        }
    }
}

impl BoundaryRouter for Comb {
    fn route(&self, from: Point, to: Point) -> Option<Vec<Point>> {
        if (to - from).shorter_than(MIN_COMB_DISTANCE) {
            return Some(Vec::new());
        }

        let mut waypoints = Vec::new();
        let mut start = from;
        let mut end = to;
        let mut add_end = false;

        if !self.boundary.inside(start) {
            start = self.move_inside(start, COMB_INSET)?;
            waypoints.push(start);
        }
        if !self.boundary.inside(end) {
            end = self.move_inside(end, COMB_INSET)?;
            add_end = true;
        }

        if !self.crosses_boundary(start, end) && !add_end && waypoints.is_empty() {
            return Some(waypoints);
        }

        let matrix = PointMatrix::aligned_with(end - start);
        let sp = matrix.apply(start);
        let ep = matrix.apply(end);
        let crossings = self.crossings(&matrix, sp, ep);

        let mut candidates = Vec::new();
        let mut x = sp.x;
        loop {
            let next = crossings
                .iter()
                .enumerate()
                .filter_map(|(idx, c)| c.map(|c| (idx, c)))
                .filter(|(_, c)| c.min_x > x)
                .min_by_key(|(_, c)| c.min_x);
            let Some((poly_idx, crossing)) = next else {
                break;
            };
            candidates.push(matrix.unapply(Point::new(crossing.min_x - COMB_INSET, sp.y)));
            self.walk_around(poly_idx, crossing, &mut candidates);
            candidates.push(matrix.unapply(Point::new(crossing.max_x + COMB_INSET, sp.y)));
            x = crossing.max_x;
        }
        candidates.push(end);

        let mut p0 = start;
        for n in 1..candidates.len() {
            if self.crosses_boundary(p0, candidates[n]) {
                if self.crosses_boundary(p0, candidates[n - 1]) {
                    trace!(?from, ?to, waypoint = n, "no combing route");
                    return None;
                }
                p0 = candidates[n - 1];
                waypoints.push(p0);
            }
        }
        if add_end {
            waypoints.push(end);
        }
        Some(waypoints)
    }

    fn inside(&self, p: Point) -> bool {
        self.boundary.inside(p)
    }

    fn move_inside(&self, p: Point, distance: Coord) -> Option<Point> {
        let mut best: Option<(i128, Point)> = None;
        let limit = MOVE_INSIDE_SEARCH as i128 * MOVE_INSIDE_SEARCH as i128;
        for (_, _, p0, p1) in self.boundary.edges() {
            if p0 == p1 {
                continue;
            }
            let q = closest_point_on_segment(p, p0, p1);
            let dist = (q - p).v_size2();
            if dist < limit && best.is_none_or(|(best_dist, _)| dist < best_dist) {
                best = Some((dist, q + (p1 - p0).normal(distance).perp()));
            }
        }
        best.map(|(_, moved)| moved)
    }

    fn distance_to_boundary(&self, p: Point) -> Option<f64> {
        self.boundary.distance_to_boundary(p)
    }
}

/// X where the edge `p0`-`p1` crosses the horizontal line at `y`, if it
/// strictly straddles it.
fn scanline_crossing(p0: Point, p1: Point, y: Coord) -> Option<Coord> {
    if (p0.y > y && p1.y < y) || (p1.y > y && p0.y < y) {
        let x = p0.x as i128
            + (p1.x - p0.x) as i128 * (y - p0.y) as i128 / (p1.y - p0.y) as i128;
        Some(x as Coord)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Polygon;

    fn square(min: Coord, max: Coord) -> Polygon {
        Polygon::new(vec![
            Point::new(min, min),
            Point::new(max, min),
            Point::new(max, max),
            Point::new(min, max),
        ])
    }

    fn plate_with_hole() -> Comb {
        let mut hole = square(40_000, 60_000);
        hole.reverse();
        Comb::new(Polygons::from(vec![square(0, 100_000), hole]))
    }

    #[test]
    fn test_short_travel_is_direct() {
        let comb = plate_with_hole();
        let route = comb.route(Point::new(1000, 1000), Point::new(1500, 1000));
        assert_eq!(route, Some(Vec::new()));
    }

    #[test]
    fn test_clear_travel_is_direct() {
        let comb = plate_with_hole();
        let route = comb.route(Point::new(10_000, 10_000), Point::new(90_000, 10_000));
        assert_eq!(route, Some(Vec::new()));
    }

    #[test]
    fn test_travel_goes_around_hole() {
        let comb = plate_with_hole();
        let from = Point::new(20_000, 50_000);
        let to = Point::new(80_000, 50_000);
        assert!(comb.crosses_boundary(from, to));

        let waypoints = comb.route(from, to).expect("route around the hole");
        assert!(!waypoints.is_empty());

        let mut legs = vec![from];
        legs.extend(waypoints.iter().copied());
        legs.push(to);
        for leg in legs.windows(2) {
            assert!(!comb.crosses_boundary(leg[0], leg[1]), "leg {leg:?} crosses");
        }
        for p in &waypoints {
            assert!(comb.inside(*p));
        }
    }

    #[test]
    fn test_move_inside_from_outside() {
        let comb = plate_with_hole();
        let outside = Point::new(-500, 50_000);
        assert!(!comb.inside(outside));
        let moved = comb.move_inside(outside, 300).unwrap();
        assert!(comb.inside(moved));
        assert_eq!(moved, Point::new(300, 50_000));
    }

    #[test]
    fn test_move_inside_too_far() {
        let comb = plate_with_hole();
        assert!(comb.move_inside(Point::new(-10_000, 50_000), 300).is_none());
    }

    #[test]
    fn test_route_fails_when_start_unreachable() {
        let comb = plate_with_hole();
        assert!(comb
            .route(Point::new(-50_000, 50_000), Point::new(50_000, 10_000))
            .is_none());
    }
}
