#![warn(missing_docs)]

//! Layer toolpath planning and G-code export.
//!
//! A layer is planned with [`GCodePlanner`] and then written through a
//! [`GCodeExport`], which carries the machine state (position, retraction,
//! active extruder, filament and time totals) from one layer to the next.
//!
//! # Example
//!
//! ```
//! use fdmpath_gcode::{GCodeExport, GCodePlanner, PathConfig, PrinterProfile};
//! use fdmpath_slicer::{Point, Polygon, Polygons};
//!
//! let profile = PrinterProfile::generic();
//! let mut gcode = GCodeExport::with_output(Vec::<u8>::new());
//! profile.configure(&mut gcode);
//! gcode.set_extrusion(200, profile.filament_diameter, profile.flow);
//! gcode.set_z(200);
//!
//! let wall = PathConfig::new(30.0, 400, "WALL-OUTER");
//! let square = Polygon::new(vec![
//!     Point::new(10_000, 10_000),
//!     Point::new(20_000, 10_000),
//!     Point::new(20_000, 20_000),
//!     Point::new(10_000, 20_000),
//! ]);
//!
//! let mut planner = GCodePlanner::new(&gcode, 150.0, profile.retraction_minimal_distance);
//! planner.add_polygons_by_optimizer(&Polygons::from(vec![square]), &wall, Some(0));
//! let parts = planner.write_gcode(&mut gcode, false, 200)?;
//! assert_eq!(parts[&0], (Point::new(10_000, 10_000), Point::new(10_000, 10_000)));
//!
//! let output = gcode.finalize(200, 150.0, profile.end_code())?;
//! assert!(String::from_utf8_lossy(&output).contains(";TYPE:WALL-OUTER"));
//! # Ok::<(), fdmpath_gcode::GcodeError>(())
//! ```

pub mod dump;
pub mod error;
pub mod export;
pub mod flavor;
pub mod path;
pub mod planner;
pub mod printer;
pub mod settings;

pub use dump::{CoordinateFrame, PartsOrderWriter, PartsWriter, PointPairsWriter};
pub use error::{GcodeError, Result};
pub use export::{fill_ultigcode_header, replace_tag_in_start, GCodeExport};
pub use flavor::GcodeFlavor;
pub use path::{GCodePath, PathConfig};
pub use planner::{GCodePlanner, PartPointsMap};
pub use printer::PrinterProfile;
pub use settings::PrintSettings;
