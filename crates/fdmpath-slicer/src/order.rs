//! Polygon print order and start-vertex selection.

use crate::path::Polygon;
use crate::point::Point;

/// Chooses where polygons start and in which order they are printed.
pub trait PartOrderOptimizer {
    /// Index of the vertex of `polygon` at which printing should start
    /// when the head is currently at `from`.
    fn start_vertex(&self, polygon: &Polygon, from: Point) -> usize;

    /// Print order for `polygons`, as `(polygon index, start vertex)` pairs.
    ///
    /// The default walks greedily from `from` to the nearest unprinted
    /// polygon. Two-vertex polygons are lines and may be entered from
    /// either end; empty polygons are skipped. A start vertex outside the
    /// polygon is passed through for the caller to reject.
    fn order(&self, polygons: &[Polygon], from: Point) -> Vec<(usize, usize)> {
        let mut picked = vec![false; polygons.len()];
        let mut order = Vec::with_capacity(polygons.len());
        let mut current = from;

        loop {
            let mut best: Option<(usize, usize, i128)> = None;
            for (idx, poly) in polygons.iter().enumerate() {
                if picked[idx] || poly.is_empty() {
                    continue;
                }
                let start = self.start_vertex(poly, current);
                let dist = poly
                    .points
                    .get(start)
                    .map_or(i128::MAX, |p| (*p - current).v_size2());
                if best.is_none_or(|(_, _, best_dist)| dist < best_dist) {
                    best = Some((idx, start, dist));
                }
            }
            let Some((idx, start, _)) = best else {
                break;
            };
            picked[idx] = true;
            order.push((idx, start));
            if start < polygons[idx].len() {
                current = end_vertex(&polygons[idx], start);
            }
        }

        order
    }
}

/// Where the head ends up after printing `polygon` from `start`.
///
/// Rings close back on their start vertex; a line ends at its other end.
pub fn end_vertex(polygon: &Polygon, start: usize) -> Point {
    if polygon.len() == 2 {
        polygon.points[(start + 1) % 2]
    } else {
        polygon.points[start]
    }
}

/// Starts each polygon at the vertex closest to the head.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestVertexOptimizer;

impl PartOrderOptimizer for NearestVertexOptimizer {
    fn start_vertex(&self, polygon: &Polygon, from: Point) -> usize {
        polygon
            .points
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| (**p - from).v_size2())
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: i64, y: i64, size: i64) -> Polygon {
        Polygon::new(vec![
            Point::new(x, y),
            Point::new(x + size, y),
            Point::new(x + size, y + size),
            Point::new(x, y + size),
        ])
    }

    #[test]
    fn test_start_vertex_is_nearest() {
        let sq = square(0, 0, 1000);
        let opt = NearestVertexOptimizer;
        assert_eq!(opt.start_vertex(&sq, Point::new(-10, -10)), 0);
        assert_eq!(opt.start_vertex(&sq, Point::new(1200, 1100)), 2);
    }

    #[test]
    fn test_greedy_order() {
        let polys = vec![square(10_000, 0, 1000), square(0, 0, 1000), square(5000, 0, 1000)];
        let order = NearestVertexOptimizer.order(&polys, Point::zero());
        let indices: Vec<usize> = order.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 2, 0]);
    }

    #[test]
    fn test_lines_enter_from_either_end() {
        let lines = vec![
            Polygon::new(vec![Point::new(0, 0), Point::new(0, 5000)]),
            Polygon::new(vec![Point::new(100, 0), Point::new(100, 5000)]),
        ];
        let order = NearestVertexOptimizer.order(&lines, Point::new(0, -100));
        assert_eq!(order, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_empty_polygons_skipped() {
        let polys = vec![Polygon::default(), square(0, 0, 10)];
        let order = NearestVertexOptimizer.order(&polys, Point::zero());
        assert_eq!(order, vec![(1, 0)]);
    }

    struct PastTheEnd;

    impl PartOrderOptimizer for PastTheEnd {
        fn start_vertex(&self, polygon: &Polygon, _from: Point) -> usize {
            polygon.len()
        }
    }

    #[test]
    fn test_bad_start_vertex_does_not_panic() {
        let polys = vec![square(0, 0, 10), square(100, 0, 10)];
        let order = PastTheEnd.order(&polys, Point::zero());
        assert_eq!(order, vec![(0, 4), (1, 4)]);
    }
}
