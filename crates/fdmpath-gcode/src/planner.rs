//! Per-layer move planning.
//!
//! [`GCodePlanner`] collects the moves of one layer as a list of
//! [`GCodePath`]s: it chooses polygon order and start points, routes travels
//! around holes, decides where to retract and slows the layer down when it
//! would print faster than the minimal layer time. Nothing is written until
//! [`GCodePlanner::write_gcode`], which consumes the planner:
//!
//! ```compile_fail
//! use fdmpath_gcode::{GCodeExport, GCodePlanner};
//!
//! let mut gcode = GCodeExport::with_output(Vec::<u8>::new());
//! let planner = GCodePlanner::new(&gcode, 150.0, 1500);
//! planner.write_gcode(&mut gcode, false, 200).unwrap();
//! // A layer can only be written once.
//! planner.write_gcode(&mut gcode, false, 200).unwrap();
//! ```

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use fdmpath_slicer::{
    end_vertex, BoundaryRouter, Comb, Coord, NearestVertexOptimizer, PartOrderOptimizer, Point,
    Polygon, Polygons, SpaceFillingTree,
};
use tracing::{debug, warn};

use crate::error::Result;
use crate::export::GCodeExport;
use crate::path::{GCodePath, PathConfig};

/// Part index to the (entry, exit) points of its printed polygons.
pub type PartPointsMap = BTreeMap<usize, (Point, Point)>;

/// How far the head is raised while waiting out the minimal layer time (microns).
pub const HEAD_LIFT: Coord = 3000;

/// How far the head moves aside while waiting out the minimal layer time (microns).
pub const HEAD_PARK_DISTANCE: Coord = 20_000;

/// Plans the moves of a single layer.
pub struct GCodePlanner {
    start_position: Point,
    last_position: Point,
    last_extrusion_position: Point,
    paths: Vec<GCodePath>,
    router: Option<Box<dyn BoundaryRouter>>,
    optimizer: Box<dyn PartOrderOptimizer>,
    part_points: PartPointsMap,
    travel_config: Arc<PathConfig>,
    extrude_speed_factor: u32,
    travel_speed_factor: u32,
    minimal_speed: f64,
    current_extruder: usize,
    retraction_minimal_distance: Coord,
    force_retraction: bool,
    always_retract: bool,
    extra_time: f64,
    total_print_time: f64,
}

impl GCodePlanner {
    /// Start planning a layer from the exporter's current position and
    /// extruder. Travels move at `travel_speed` mm/s; travels shorter than
    /// `retraction_minimal_distance` microns never retract on their own.
    pub fn new<W: Write>(
        gcode: &GCodeExport<W>,
        travel_speed: f64,
        retraction_minimal_distance: Coord,
    ) -> Self {
        let position = gcode.position_xy();
        Self {
            start_position: position,
            last_position: position,
            last_extrusion_position: position,
            paths: Vec::new(),
            router: None,
            optimizer: Box::new(NearestVertexOptimizer),
            part_points: PartPointsMap::new(),
            travel_config: PathConfig::new(travel_speed, 0, "travel"),
            extrude_speed_factor: 100,
            travel_speed_factor: 100,
            minimal_speed: 0.0,
            current_extruder: gcode.extruder_nr(),
            retraction_minimal_distance,
            force_retraction: false,
            always_retract: false,
            extra_time: 0.0,
            total_print_time: 0.0,
        }
    }

    /// Select the extruder for the following moves. Returns whether it changed.
    pub fn set_extruder(&mut self, extruder: usize) -> bool {
        if extruder == self.current_extruder {
            return false;
        }
        self.current_extruder = extruder;
        true
    }

    /// Extruder used for the following moves.
    pub fn extruder(&self) -> usize {
        self.current_extruder
    }

    /// Keep travels inside `boundary`, or travel in straight lines when `None`.
    pub fn set_comb_boundary(&mut self, boundary: Option<Polygons>) {
        self.router = boundary.map(|b| Box::new(Comb::new(b)) as Box<dyn BoundaryRouter>);
    }

    /// Use a custom travel router.
    pub fn set_boundary_router(&mut self, router: Option<Box<dyn BoundaryRouter>>) {
        self.router = router;
    }

    /// Use a custom polygon order optimizer.
    pub fn set_part_order_optimizer(&mut self, optimizer: Box<dyn PartOrderOptimizer>) {
        self.optimizer = optimizer;
    }

    /// Retract before every travel.
    pub fn set_always_retract(&mut self, always_retract: bool) {
        self.always_retract = always_retract;
    }

    /// Retract before the next travel.
    pub fn force_retract(&mut self) {
        self.force_retraction = true;
    }

    /// Extrusion speed in percent of nominal, at least 1.
    pub fn set_extrude_speed_factor(&mut self, percent: u32) {
        self.extrude_speed_factor = percent.max(1);
    }

    /// Extrusion speed in percent of nominal.
    pub fn extrude_speed_factor(&self) -> u32 {
        self.extrude_speed_factor
    }

    /// Travel speed in percent of nominal, at least 1.
    pub fn set_travel_speed_factor(&mut self, percent: u32) {
        self.travel_speed_factor = percent.max(1);
    }

    /// Travel speed in percent of nominal.
    pub fn travel_speed_factor(&self) -> u32 {
        self.travel_speed_factor
    }

    /// Config shared by all travel paths.
    pub fn travel_config(&self) -> &Arc<PathConfig> {
        &self.travel_config
    }

    /// Planned paths in print order.
    pub fn paths(&self) -> &[GCodePath] {
        &self.paths
    }

    /// Where the head will be after the planned moves.
    pub fn last_position(&self) -> Point {
        self.last_position
    }

    /// Dwell added after the layer to reach the minimal layer time (seconds).
    pub fn extra_time(&self) -> f64 {
        self.extra_time
    }

    /// Planned layer time after minimal layer time adjustment (seconds).
    pub fn total_print_time(&self) -> f64 {
        self.total_print_time
    }

    /// Entry and exit point of every part added with an index.
    pub fn part_index_to_points_pair_map(&self) -> &PartPointsMap {
        &self.part_points
    }

    /// Hand out the part entry/exit points recorded so far and start over.
    pub fn take_part_points(&mut self) -> PartPointsMap {
        std::mem::take(&mut self.part_points)
    }

    fn latest_path_with_config(&mut self, config: &Arc<PathConfig>) -> &mut GCodePath {
        let reuse = self
            .paths
            .last()
            .is_some_and(|path| path.accepts(config, self.current_extruder));
        if !reuse {
            self.paths
                .push(GCodePath::new(config.clone(), self.current_extruder));
        }
        let last = self.paths.len() - 1;
        &mut self.paths[last]
    }

    /// Seal the current path so the next move opens a new one.
    pub fn force_new_path_start(&mut self) {
        if let Some(path) = self.paths.last_mut() {
            path.done = true;
        }
    }

    /// Travel to `p`, through the comb boundary when one is set.
    ///
    /// The travel retracts when a retraction was forced, when every travel
    /// retracts, or when it leaves the last extrusion by more than the
    /// minimal retraction distance without a combing route. A travel the
    /// router found a route for stays unretracted however long it is.
    pub fn add_travel(&mut self, p: Point) {
        if p == self.last_position {
            return;
        }
        let far = !(self.last_extrusion_position - p).shorter_than(self.retraction_minimal_distance);

        let mut waypoints = Vec::new();
        let mut combed = false;
        if let Some(router) = &self.router {
            match router.route(self.last_position, p) {
                Some(route) => {
                    waypoints = route;
                    combed = true;
                }
                None => warn!(
                    from = ?self.last_position,
                    to = ?p,
                    "no travel route inside the boundary, moving straight"
                ),
            }
        }
        let retract = self.force_retraction || self.always_retract || (far && !combed);
        self.force_retraction = false;

        let travel = self.travel_config.clone();
        let path = self.latest_path_with_config(&travel);
        path.retract |= retract;
        path.points.extend(waypoints);
        path.points.push(p);
        self.last_position = p;
    }

    /// Extrude a line from the last position to `p`.
    pub fn add_extrusion_move(&mut self, p: Point, config: &Arc<PathConfig>) {
        self.latest_path_with_config(config).points.push(p);
        self.last_position = p;
        self.last_extrusion_position = p;
    }

    fn add_polygon(&mut self, polygon: &Polygon, start: usize, config: &Arc<PathConfig>) -> (Point, Point) {
        let n = polygon.len();
        let first = polygon.points[start];
        self.add_travel(first);
        self.force_new_path_start();
        self.add_extrusion_move(first, config);
        for i in 1..n {
            self.add_extrusion_move(polygon.points[(start + i) % n], config);
        }
        if n > 2 {
            self.add_extrusion_move(first, config);
        } else {
            self.force_new_path_start();
        }
        (first, end_vertex(polygon, start))
    }

    /// Print `polygons` in the optimizer's order, each from its best start
    /// vertex. Closed polygons return to their start vertex; two-vertex
    /// polygons are printed as open lines. With a `part_index`, the first
    /// and last point printed are recorded for that part.
    pub fn add_polygons_by_optimizer(
        &mut self,
        polygons: &Polygons,
        config: &Arc<PathConfig>,
        part_index: Option<usize>,
    ) {
        for (idx, polygon) in polygons.iter().enumerate() {
            if let Err(err) = polygon.validate() {
                warn!(polygon = idx, part = ?part_index, "skipping polygon: {err}");
            }
        }

        let order = self.optimizer.order(&polygons.polygons, self.last_position);
        let mut entry_exit: Option<(Point, Point)> = None;
        for (idx, start) in order {
            let Some(polygon) = polygons.polygons.get(idx) else {
                warn!(polygon = idx, part = ?part_index, "optimizer returned an unknown polygon");
                continue;
            };
            if polygon.len() < 2 {
                continue;
            }
            if start >= polygon.len() {
                warn!(
                    polygon = idx,
                    start,
                    vertices = polygon.len(),
                    "skipping polygon: start vertex out of range"
                );
                continue;
            }
            let (entry, exit) = self.add_polygon(polygon, start, config);
            entry_exit = Some(match entry_exit {
                Some((first_entry, _)) => (first_entry, exit),
                None => (entry, exit),
            });
        }

        if let (Some(part), Some(pair)) = (part_index, entry_exit) {
            self.part_points.insert(part, pair);
        }
    }

    /// Print a space-filling tree as one continuous line.
    pub fn add_fill_tree(&mut self, tree: &SpaceFillingTree, config: &Arc<PathConfig>) {
        let mut first = true;
        tree.walk(&mut |p| {
            if first {
                self.add_travel(p);
                first = false;
            } else {
                self.add_extrusion_move(p, config);
            }
        });
    }

    /// Move `distance` microns inside the boundary when the head ended up
    /// outside it or closer than that to an edge.
    pub fn move_inside_comb_boundary(&mut self, distance: Coord) {
        let target = {
            let Some(router) = &self.router else {
                return;
            };
            let p = self.last_position;
            let clear = router.inside(p)
                && router
                    .distance_to_boundary(p)
                    .is_none_or(|d| d >= distance as f64);
            if clear {
                return;
            }
            let Some(moved) = router.move_inside(p, distance) else {
                return;
            };
            // Once more, to get out of tight corners.
            let moved = router.move_inside(moved, distance).unwrap_or(moved);
            if !router.inside(moved) || moved == p {
                return;
            }
            moved
        };
        self.add_travel(target);
        // Any retraction happens after this move, not before it.
        self.force_new_path_start();
    }

    fn effective_speed(&self, config: &PathConfig) -> f64 {
        if config.is_travel() {
            config.speed * f64::from(self.travel_speed_factor) / 100.0
        } else {
            let scaled = config.speed * f64::from(self.extrude_speed_factor) / 100.0;
            scaled.max(self.minimal_speed.min(config.speed))
        }
    }

    /// Planned (extrude, travel) seconds at the current speed factors.
    fn layer_times(&self) -> (f64, f64) {
        let mut extrude_time = 0.0;
        let mut travel_time = 0.0;
        let mut p0 = self.start_position;
        for path in &self.paths {
            let speed = self.effective_speed(&path.config);
            if speed > 0.0 {
                let time = path.length_mm(p0) / speed;
                if path.config.is_travel() {
                    travel_time += time;
                } else {
                    extrude_time += time;
                }
            }
            p0 = path.end_point(p0);
        }
        (extrude_time, travel_time)
    }

    /// Slow extrusion down so the layer takes at least `min_time` seconds,
    /// never below `minimal_speed` mm/s. Whatever is still missing becomes a
    /// dwell after the layer.
    pub fn force_minimal_layer_time(&mut self, min_time: f64, minimal_speed: f64) {
        let (extrude_time, travel_time) = self.layer_times();
        let total_time = extrude_time + travel_time;
        if total_time >= min_time {
            self.total_print_time = total_time;
            return;
        }

        if extrude_time > 0.0 {
            let factor = extrude_time / (min_time - travel_time);
            let percent = (f64::from(self.extrude_speed_factor) * factor).floor() as u32;
            if percent < self.extrude_speed_factor {
                self.set_extrude_speed_factor(percent);
            }
            self.minimal_speed = minimal_speed;
        }

        let (extrude_time, travel_time) = self.layer_times();
        self.total_print_time = extrude_time + travel_time;
        self.extra_time = (min_time - self.total_print_time).max(0.0);
        debug!(
            percent = self.extrude_speed_factor,
            time = self.total_print_time,
            dwell = self.extra_time,
            "slowed layer for minimal layer time"
        );
    }

    /// Write the planned layer. Paths are written in the order they were
    /// planned; the part entry/exit map is handed back.
    ///
    /// Time left over by [`GCodePlanner::force_minimal_layer_time`] is always
    /// written as a dwell. With `lift_head_if_needed` the head first
    /// retracts, lifts and parks beside the print for it.
    pub fn write_gcode<W: Write>(
        self,
        gcode: &mut GCodeExport<W>,
        lift_head_if_needed: bool,
        layer_thickness: Coord,
    ) -> Result<PartPointsMap> {
        let mut last_config: Option<&Arc<PathConfig>> = None;
        let mut n = 0;
        while n < self.paths.len() {
            let path = &self.paths[n];
            if path.extruder != gcode.extruder_nr() {
                gcode.switch_extruder(path.extruder)?;
            } else if path.retract {
                gcode.write_retraction(false)?;
            }
            if !path.config.is_travel() && last_config.is_none_or(|c| !Arc::ptr_eq(c, &path.config)) {
                gcode.write_comment(&format!("TYPE:{}", path.config.name))?;
                last_config = Some(&path.config);
            }
            let speed = self.effective_speed(&path.config);
            let line_width = path.config.line_width;

            if let Some(next) = self.write_small_moves(gcode, n, speed)? {
                n = next;
                continue;
            }

            let spiralize = path.config.spiralize
                && !self.paths[n + 1..].iter().any(|p| p.config.spiralize);
            if spiralize {
                // Raise the head by one layer over the length of the path.
                let z = gcode.position_z();
                let start = gcode.position_xy();
                let total_length = path.length_mm(start);
                let mut length = 0.0;
                let mut p0 = start;
                for &p1 in &path.points {
                    length += (p1 - p0).v_size_mm();
                    p0 = p1;
                    let rise = if total_length > 0.0 {
                        (layer_thickness as f64 * length / total_length) as Coord
                    } else {
                        0
                    };
                    gcode.set_z(z + rise);
                    gcode.write_move(p1, speed, line_width)?;
                }
            } else {
                for &p in &path.points {
                    gcode.write_move(p, speed, line_width)?;
                }
            }
            n += 1;
        }

        gcode.update_total_print_time();
        if self.extra_time > 0.0 {
            gcode.write_comment(&format!("Small layer, adding delay of {:.6}", self.extra_time))?;
            if lift_head_if_needed {
                gcode.write_retraction(true)?;
                gcode.set_z(gcode.position_z() + HEAD_LIFT);
                let p = gcode.position_xy();
                gcode.write_move(p, self.travel_config.speed, 0)?;
                gcode.write_move(p + Point::new(HEAD_PARK_DISTANCE, 0), self.travel_config.speed, 0)?;
            }
            gcode.write_delay(self.extra_time)?;
        }
        debug!(
            paths = self.paths.len(),
            time = self.total_print_time,
            dwell = self.extra_time,
            "layer written"
        );
        Ok(self.part_points)
    }

    /// Replace a run of tiny single-point paths starting at `n` with fewer,
    /// wider lines. Returns the index of the first path after the run, or
    /// `None` when there is nothing to merge.
    fn write_small_moves<W: Write>(
        &self,
        gcode: &mut GCodeExport<W>,
        n: usize,
        speed: f64,
    ) -> Result<Option<usize>> {
        let path = &self.paths[n];
        let line_width = path.config.line_width;
        let reach = line_width * 2;
        if path.points.len() != 1
            || path.config.is_travel()
            || !(gcode.position_xy() - path.points[0]).shorter_than(reach)
        {
            return Ok(None);
        }

        // A run never spans a tool change or a planned retraction.
        let mut p0 = path.points[0];
        let mut end = n + 1;
        while end < self.paths.len()
            && self.paths[end].points.len() == 1
            && self.paths[end].extruder == path.extruder
            && !self.paths[end].retract
            && (p0 - self.paths[end].points[0]).shorter_than(reach)
        {
            p0 = self.paths[end].points[0];
            end += 1;
        }
        if self.paths[end - 1].config.is_travel() {
            end -= 1;
        }
        if end <= n + 2 {
            return Ok(None);
        }

        let mut p0 = gcode.position_xy();
        let mut x = n;
        while x + 1 < end {
            let a = self.paths[x].points[0];
            let b = self.paths[x + 1].points[0];
            let old_len = (p0 - a).v_size();
            let merged = (a + b) / 2;
            let new_len = (gcode.position_xy() - merged).v_size();
            if new_len > 0.0 {
                let width = (line_width as f64 * old_len / new_len) as Coord;
                gcode.write_move(merged, speed, width)?;
            }
            p0 = b;
            x += 2;
        }
        gcode.write_move(self.paths[end - 1].points[0], speed, line_width)?;
        Ok(Some(end))
    }
}
