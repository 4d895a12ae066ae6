//! End-to-end planning and export over an in-memory sink.

use std::sync::Arc;

use approx::assert_relative_eq;
use fdmpath_gcode::{GCodeExport, GCodePlanner, GcodeError, GcodeFlavor, PathConfig, PrinterProfile};
use fdmpath_slicer::{Coord, Point, Polygon, Polygons};

fn square(min: Coord, max: Coord) -> Polygon {
    Polygon::new(vec![
        Point::new(min, min),
        Point::new(max, min),
        Point::new(max, max),
        Point::new(min, max),
    ])
}

fn exporter(profile: &PrinterProfile) -> GCodeExport<Vec<u8>> {
    let mut gcode = GCodeExport::with_output(Vec::new());
    profile.configure(&mut gcode);
    gcode.set_extrusion(200, profile.filament_diameter, profile.flow);
    gcode.set_z(200);
    gcode
}

fn output(gcode: &GCodeExport<Vec<u8>>) -> String {
    String::from_utf8(gcode.get_ref().cloned().unwrap_or_default()).unwrap()
}

/// Feedrates (mm/min) of all extruding moves.
fn extrusion_feedrates(gcode: &str) -> Vec<f64> {
    let mut feedrate = None;
    let mut rates = Vec::new();
    for line in gcode.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if let Some(f) = words.iter().find_map(|w| w.strip_prefix('F')) {
            feedrate = f.parse::<f64>().ok();
        }
        if words.first() == Some(&"G1") && words.iter().any(|w| w.starts_with('X')) {
            if let Some(f) = feedrate {
                rates.push(f);
            }
        }
    }
    rates
}

#[test]
fn test_extrusion_moves_share_one_path() {
    let gcode = exporter(&PrinterProfile::generic());
    let mut planner = GCodePlanner::new(&gcode, 150.0, 1500);
    let wall = PathConfig::new(30.0, 400, "WALL-OUTER");

    for i in 1..=20 {
        planner.add_extrusion_move(Point::new(i * 1000, (i % 2) * 1000), &wall);
    }
    assert_eq!(planner.paths().len(), 1);

    planner.add_travel(Point::new(50_000, 50_000));
    planner.add_extrusion_move(Point::new(51_000, 50_000), &wall);
    assert_eq!(planner.paths().len(), 3);
    assert!(Arc::ptr_eq(&planner.paths()[2].config, &wall));
}

#[test]
fn test_minimal_layer_time_is_met() {
    let min_time = 10.0;
    let min_speed = 5.0;
    let mut gcode = exporter(&PrinterProfile::generic());
    let mut planner = GCodePlanner::new(&gcode, 150.0, 1500);
    let wall = PathConfig::new(40.0, 400, "WALL-OUTER");
    let fill = PathConfig::new(60.0, 400, "FILL");
    planner.add_polygons_by_optimizer(&Polygons::from(vec![square(10_000, 30_000)]), &wall, Some(0));
    planner.add_polygons_by_optimizer(&Polygons::from(vec![square(40_000, 45_000)]), &fill, Some(1));

    planner.force_minimal_layer_time(min_time, min_speed);
    assert!(planner.total_print_time() + planner.extra_time() >= min_time - 1e-9);
    assert!(planner.extrude_speed_factor() < 100);

    planner.write_gcode(&mut gcode, false, 200).unwrap();
    let rates = extrusion_feedrates(&output(&gcode));
    assert!(!rates.is_empty());
    for rate in rates {
        assert!(rate >= min_speed * 60.0, "extruding at {rate} mm/min");
    }
}

#[test]
fn test_slow_floor_leaves_dwell() {
    let mut gcode = exporter(&PrinterProfile::generic());
    let mut planner = GCodePlanner::new(&gcode, 150.0, 1500);
    let wall = PathConfig::new(40.0, 400, "WALL-OUTER");
    planner.add_polygons_by_optimizer(&Polygons::from(vec![square(0, 2000)]), &wall, None);

    planner.force_minimal_layer_time(10.0, 8.0);
    // 8mm at the 8mm/s floor.
    assert_relative_eq!(planner.total_print_time(), 1.0, epsilon = 1e-9);
    assert_relative_eq!(planner.extra_time(), 9.0, epsilon = 1e-9);

    planner.write_gcode(&mut gcode, true, 200).unwrap();
    assert!(output(&gcode).ends_with("G4 P9000\n"));
    assert!(gcode.total_print_time() >= 10.0);
}

#[test]
fn test_extruder_switch_retracts_and_primes_once() {
    let profile = PrinterProfile {
        extruder_count: 2,
        ..PrinterProfile::generic()
    };
    let mut gcode = exporter(&profile);
    let mut planner = GCodePlanner::new(&gcode, 150.0, 1500);
    let wall = PathConfig::new(30.0, 400, "WALL-OUTER");
    planner.add_polygons_by_optimizer(&Polygons::from(vec![square(10_000, 20_000)]), &wall, Some(0));
    assert!(planner.set_extruder(1));
    planner.add_polygons_by_optimizer(&Polygons::from(vec![square(30_000, 40_000)]), &wall, Some(1));
    planner.write_gcode(&mut gcode, false, 200).unwrap();

    let out = output(&gcode);
    let after_switch = out.split("\nT1\n").nth(1).unwrap();
    let before_switch = out.split("\nT1\n").next().unwrap();
    let retract_lines = |text: &str| {
        text.lines()
            .filter(|l| l.starts_with("G1 F2700 E"))
            .count()
    };
    // The pull-back for the tool change, then the prime on the new tool.
    assert_eq!(retract_lines(before_switch.rsplit("G92 E0").next().unwrap()), 1);
    assert_eq!(retract_lines(after_switch), 1);
    assert_eq!(gcode.extruder_nr(), 1);
    assert!(!gcode.is_retracted());
}

#[test]
fn test_firmware_retraction_switch() {
    let profile = PrinterProfile::ultimaker2();
    let mut gcode = exporter(&profile);
    let mut planner = GCodePlanner::new(&gcode, 150.0, 1500);
    let wall = PathConfig::new(30.0, 400, "WALL-OUTER");
    planner.add_polygons_by_optimizer(&Polygons::from(vec![square(10_000, 20_000)]), &wall, None);
    planner.set_extruder(1);
    planner.add_polygons_by_optimizer(&Polygons::from(vec![square(30_000, 40_000)]), &wall, None);
    planner.write_gcode(&mut gcode, false, 200).unwrap();

    let out = output(&gcode);
    assert_eq!(out.lines().filter(|l| *l == "G10 S1").count(), 1);
    assert_eq!(out.lines().filter(|l| *l == "G11").count(), 1);
    assert!(!out.lines().any(|l| l == "G10"));
}

#[test]
fn test_square_round_trip() {
    let mut gcode = exporter(&PrinterProfile::generic());
    let mut planner = GCodePlanner::new(&gcode, 150.0, 1500);
    let wall = PathConfig::new(30.0, 400, "WALL-OUTER");
    planner.add_polygons_by_optimizer(&Polygons::from(vec![square(0, 10)]), &wall, Some(7));

    let path = planner
        .paths()
        .iter()
        .find(|p| !p.config.is_travel())
        .unwrap();
    assert_eq!(path.points.first(), path.points.last());
    assert_eq!(path.points.len(), 5);
    assert_eq!(
        planner.part_index_to_points_pair_map()[&7],
        (Point::zero(), Point::zero())
    );

    let parts = planner.write_gcode(&mut gcode, false, 200).unwrap();
    assert_eq!(parts[&7], (Point::zero(), Point::zero()));
}

#[test]
fn test_short_travels_do_not_retract() {
    let mut gcode = exporter(&PrinterProfile::generic());
    let wall = PathConfig::new(30.0, 400, "WALL-OUTER");
    gcode.write_move(Point::new(10_000, 0), 30.0, 400).unwrap();

    let mut planner = GCodePlanner::new(&gcode, 150.0, 1500);
    planner.add_extrusion_move(Point::new(20_000, 0), &wall);
    planner.add_travel(Point::new(20_500, 0));
    planner.add_travel(Point::new(21_000, 0));
    assert!(planner.paths().iter().all(|p| !p.retract));

    planner.write_gcode(&mut gcode, false, 200).unwrap();
    assert!(!gcode.is_retracted());
}

#[test]
fn test_extruder_offset_in_output() {
    let mut gcode = exporter(&PrinterProfile::generic());
    gcode.set_extruder_offset(1, Point::new(5000, 5000));
    gcode.switch_extruder(1).unwrap();
    gcode.write_move(Point::zero(), 50.0, 0).unwrap();
    assert!(output(&gcode).ends_with("X5.000 Y5.000 Z0.200\n"));
    assert_eq!(gcode.position_xy(), Point::zero());
}

#[test]
fn test_layers_carry_state_and_finalize_closes() {
    let profile = PrinterProfile::generic();
    let mut gcode = exporter(&profile);
    let wall = PathConfig::new(30.0, 400, "WALL-OUTER");
    let mut last_time = 0.0;
    let mut last_filament = 0.0;
    for layer_nr in 0..3 {
        gcode.set_z(200 * (layer_nr + 1));
        let mut planner = GCodePlanner::new(&gcode, 150.0, profile.retraction_minimal_distance);
        planner.set_comb_boundary(Some(Polygons::from(vec![square(0, 50_000)])));
        planner.add_polygons_by_optimizer(&Polygons::from(vec![square(10_000, 20_000)]), &wall, Some(0));
        planner.add_polygons_by_optimizer(&Polygons::from(vec![square(30_000, 40_000)]), &wall, Some(1));
        planner.move_inside_comb_boundary(200);
        planner.write_gcode(&mut gcode, false, 200).unwrap();

        assert!(gcode.total_print_time() > last_time);
        assert!(gcode.total_filament_used(0) > last_filament);
        last_time = gcode.total_print_time();
        last_filament = gcode.total_filament_used(0);
    }

    let out = gcode.finalize(600, 150.0, profile.end_code()).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("Z5.600"));
    assert!(out.ends_with(profile.end_code()));

    let planner = GCodePlanner::new(&gcode, 150.0, 1500);
    assert!(matches!(
        planner.write_gcode(&mut gcode, false, 200),
        Ok(_)
    ), "an empty layer writes nothing");
    let mut planner = GCodePlanner::new(&gcode, 150.0, 1500);
    planner.add_extrusion_move(Point::new(1000, 0), &wall);
    assert!(matches!(
        planner.write_gcode(&mut gcode, false, 200),
        Err(GcodeError::NotOpened)
    ));
}

#[test]
fn test_flavor_change_between_layers() {
    let mut gcode = exporter(&PrinterProfile::generic());
    gcode.set_flavor(GcodeFlavor::Mach3);
    let wall = PathConfig::new(30.0, 400, "WALL-OUTER");
    let mut planner = GCodePlanner::new(&gcode, 150.0, 1500);
    planner.add_extrusion_move(Point::new(1000, 0), &wall);
    planner.write_gcode(&mut gcode, false, 200).unwrap();
    assert!(output(&gcode).contains(" A0."));
}
