//! Drives the planner and exporter over every layer of a job.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Result;
use fdmpath_gcode::{
    CoordinateFrame, GCodeExport, GCodePlanner, PartsOrderWriter, PartsWriter,
    PathConfig, PointPairsWriter, PrinterProfile,
};
use fdmpath_slicer::{NearestVertexOptimizer, PartOrderOptimizer, Polygon};
use tracing::{debug, info, warn};

use crate::job::Job;

/// Open diagnostic dumps for one print.
pub struct Dumps<W: Write> {
    pairs: PointPairsWriter<W>,
    order: PartsOrderWriter<W>,
}

impl Dumps<BufWriter<File>> {
    /// Create the dump files in `dir` and write the part outlines right away.
    pub fn create(dir: &Path, job: &Job, frame: CoordinateFrame) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut parts = PartsWriter::create(dir, frame)?;
        parts.write_storage(&job.model)?;
        parts.close()?;
        Ok(Self {
            pairs: PointPairsWriter::create(dir, frame)?,
            order: PartsOrderWriter::create(dir)?,
        })
    }
}

impl<W: Write> Dumps<W> {
    /// Flush both files.
    pub fn close(self) -> Result<(W, W)> {
        Ok((self.pairs.close()?, self.order.close()?))
    }
}

/// Totals reported after a print is written.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Layers written.
    pub layers: usize,
    /// Estimated print time (seconds).
    pub print_time: f64,
    /// Filament used per extruder.
    pub filament: Vec<f64>,
}

/// Write the start code and every layer of `job` to `gcode`, then finish
/// the print. Returns the closed sink with the totals.
pub fn write_print<W: Write, D: Write>(
    job: &Job,
    printer: &PrinterProfile,
    mut gcode: GCodeExport<W>,
    mut dumps: Option<&mut Dumps<D>>,
) -> Result<(W, Summary)> {
    let settings = &job.print;
    let model = &job.model;
    let extruders = printer.extruder_count.max(1) as usize;

    printer.configure(&mut gcode);
    let print_temp = settings.print_temp.unwrap_or(printer.default_print_temp);
    let bed_temp = printer.bed_temp(settings.bed_temp.unwrap_or(printer.default_bed_temp));
    if !printer.fits(model.model_min, model.model_size) {
        warn!(printer = %printer.name, "model does not fit the build volume");
    }
    gcode.write_code(&printer.start_code(print_temp, bed_temp))?;

    let layer_count = model.layer_count();
    gcode.write_comment(&format!("Layer count: {layer_count}"))?;
    info!(layers = layer_count, printer = %printer.name, "writing print");

    let fill = PathConfig::new(settings.infill_speed, settings.line_width, "FILL");
    let wall = PathConfig::new(settings.print_speed, settings.line_width, "WALL-OUTER");
    let spiral = PathConfig::spiralized(settings.print_speed, settings.line_width, "WALL-OUTER");
    let optimizer = NearestVertexOptimizer;

    for layer_nr in 0..layer_count {
        let thickness = settings.layer_thickness_at(layer_nr);
        let print_z = model
            .volumes
            .iter()
            .filter_map(|v| v.layers.get(layer_nr))
            .map(|l| l.print_z)
            .max()
            .unwrap_or_default();

        gcode.write_comment(&format!("LAYER:{layer_nr}"))?;
        gcode.set_extrusion(thickness, printer.filament_diameter, printer.flow);
        gcode.set_z(print_z);

        let mut planner = GCodePlanner::new(&gcode, settings.travel_speed, printer.retraction_minimal_distance);
        planner.set_always_retract(settings.always_retract);
        planner.set_extrude_speed_factor(settings.extrude_speed_factor_at(layer_nr));
        let wall = if settings.spiralize && layer_nr > 0 { &spiral } else { &wall };

        for (volume_idx, volume) in model.volumes.iter().enumerate() {
            let Some(layer) = volume.layers.get(layer_nr) else {
                continue;
            };
            planner.set_extruder(volume_idx % extruders);
            planner.set_comb_boundary(settings.combing.then(|| layer.comb_boundary()));

            let outers: Vec<Polygon> = layer
                .parts
                .iter()
                .map(|part| part.outline.polygons.first().cloned().unwrap_or_default())
                .collect();
            let order: Vec<usize> = optimizer
                .order(&outers, planner.last_position())
                .into_iter()
                .map(|(part_idx, _)| part_idx)
                .collect();

            for &part_idx in &order {
                let part = &layer.parts[part_idx];
                planner.add_polygons_by_optimizer(&part.outline, wall, Some(part_idx));
                planner.add_polygons_by_optimizer(&part.infill, &fill, None);
                if settings.combing {
                    planner.move_inside_comb_boundary(settings.move_inside_distance);
                }
            }

            let pairs = planner.take_part_points();
            if let Some(dumps) = dumps.as_deref_mut() {
                dumps.order.write_volume_index(volume_idx)?;
                dumps.order.write_parts_order(layer_nr, &order)?;
                dumps.pairs.write_volume_index(volume_idx)?;
                dumps.pairs.write_layer_index(layer_nr)?;
                dumps.pairs.write_point_pairs(&pairs)?;
            }
        }

        planner.force_minimal_layer_time(settings.min_layer_time, settings.minimal_feedrate);
        gcode.write_fan_command(settings.fan_speed(layer_nr, planner.extrude_speed_factor()))?;
        debug!(layer = layer_nr, z = print_z, time = planner.total_print_time(), "layer planned");
        planner.write_gcode(&mut gcode, settings.cool_head_lift, thickness)?;
    }

    let output = gcode.finalize(model.max_print_z(), settings.travel_speed, printer.end_code())?;
    let summary = Summary {
        layers: layer_count,
        print_time: gcode.total_print_time(),
        filament: (0..extruders).map(|e| gcode.total_filament_used(e)).collect(),
    };
    Ok((output, summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = r#"
[print]
min_layer_time = 2.0
fan_full_on_layer = 1

[[model.volumes]]
[[model.volumes.layers]]
print_z = 300
[[model.volumes.layers.parts]]
outline = [[[20000, 0], [30000, 0], [30000, 10000], [20000, 10000]]]
[[model.volumes.layers.parts]]
outline = [[[0, 0], [10000, 0], [10000, 10000], [0, 10000]]]
infill = [[[1000, 5000], [9000, 5000]]]

[[model.volumes.layers]]
print_z = 500
[[model.volumes.layers.parts]]
outline = [[[0, 0], [10000, 0], [10000, 10000], [0, 10000]]]
"#;

    fn run(job: &Job, printer: &PrinterProfile, dumps: Option<&mut Dumps<Vec<u8>>>) -> (String, Summary) {
        let (out, summary) = write_print(job, printer, GCodeExport::with_output(Vec::new()), dumps).unwrap();
        (String::from_utf8(out).unwrap(), summary)
    }

    #[test]
    fn test_write_print() {
        let job = Job::from_toml(JOB).unwrap();
        let printer = job.printer(None).unwrap();
        let (out, summary) = run(&job, &printer, None);

        assert!(out.starts_with("M140 S60"));
        assert!(out.contains(";Layer count: 2\n;LAYER:0\n"));
        assert!(out.contains(";LAYER:1\n"));
        assert!(out.contains(";TYPE:WALL-OUTER"));
        assert!(out.contains(";TYPE:FILL"));
        assert!(out.contains("Z0.300"));
        assert!(out.ends_with(printer.end_code()));
        assert_eq!(summary.layers, 2);
        assert!(summary.print_time >= 4.0);
        assert!(summary.filament[0] > 0.0);
    }

    #[test]
    fn test_dumps_follow_part_order() {
        let job = Job::from_toml(JOB).unwrap();
        let printer = job.printer(None).unwrap();
        let mut dumps = Dumps {
            pairs: PointPairsWriter::new(Vec::new(), CoordinateFrame::Raw),
            order: PartsOrderWriter::new(Vec::new()),
        };
        run(&job, &printer, Some(&mut dumps));

        let (pairs, order) = dumps.close().unwrap();
        let order = String::from_utf8(order).unwrap();
        assert_eq!(
            order,
            "volume index:0\nlayer index:0\n1 0\nvolume index:0\nlayer index:1\n0\n"
        );
        let pairs = String::from_utf8(pairs).unwrap();
        assert!(pairs.starts_with(
            "volume index:0\nlayer index:0\npart index:0\n20000 0 20000 0\npart index:1\n0 0 0 0\n"
        ));
    }

    #[test]
    fn test_dump_files() {
        let job = Job::from_toml(JOB).unwrap();
        let printer = job.printer(None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut dumps = Dumps::create(dir.path(), &job, CoordinateFrame::ModelRelative(job.model.model_min)).unwrap();
        write_print(&job, &printer, GCodeExport::with_output(Vec::<u8>::new()), Some(&mut dumps)).unwrap();
        dumps.close().unwrap();

        let parts = std::fs::read_to_string(dir.path().join("parts_by_layers.txt")).unwrap();
        assert!(parts.starts_with("model size:30000 10000\nvolume index:0\nlayer index:0\npart index:0\n"));
        assert!(dir.path().join("parts_points_pairs.txt").exists());
        assert!(dir.path().join("parts_order.txt").exists());
    }

    #[test]
    fn test_ultigcode_header_tags_survive_until_filled() {
        let job = Job::from_toml(JOB).unwrap();
        let printer = job.printer(Some("ultimaker2")).unwrap();
        let (out, _) = run(&job, &printer, None);
        assert!(out.starts_with(";FLAVOR:UltiGCode\n;TIME:<__TIME__>"));
        assert!(out.contains("G10"));
    }
}
