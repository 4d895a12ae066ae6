//! Printer profile definitions.

use std::io::Write;

use fdmpath_slicer::{mm2int, Coord, MotionLimits, Point, Point3};
use serde::{Deserialize, Serialize};

use crate::error::{GcodeError, Result};
use crate::export::GCodeExport;
use crate::flavor::GcodeFlavor;

/// Printer profile with machine-specific settings.
///
/// Lengths that feed the integer toolpath pipeline are in microns; speeds
/// are in mm/s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterProfile {
    /// Profile name.
    pub name: String,
    /// G-code flavor.
    pub flavor: GcodeFlavor,
    /// Build volume X (mm).
    pub bed_x: f64,
    /// Build volume Y (mm).
    pub bed_y: f64,
    /// Build volume Z (mm).
    pub bed_z: f64,
    /// Is the bed heated? Without one the start code gets a bed temperature of 0.
    pub heated_bed: bool,
    /// Number of extruders.
    pub extruder_count: u32,
    /// Nozzle offset of each extruder relative to extruder 0 (microns).
    pub extruder_offsets: Vec<Point>,
    /// Filament diameter (microns).
    pub filament_diameter: Coord,
    /// Flow multiplier (percent).
    pub flow: u32,
    /// Maximum feedrate X (mm/s).
    pub max_feedrate_x: f64,
    /// Maximum feedrate Y (mm/s).
    pub max_feedrate_y: f64,
    /// Maximum acceleration (mm/s²).
    pub max_acceleration: f64,
    /// Maximum XY jerk (mm/s).
    pub max_xy_jerk: f64,
    /// Default print temperature (°C).
    pub default_print_temp: u32,
    /// Default bed temperature (°C).
    pub default_bed_temp: u32,
    /// Retraction length (microns).
    pub retraction_amount: Coord,
    /// Retraction speed (mm/s).
    pub retraction_speed: f64,
    /// Retraction length when switching extruders (microns).
    pub extruder_switch_retraction: Coord,
    /// Filament that must be extruded before another retraction (microns).
    pub minimal_extrusion_before_retraction: Coord,
    /// Travels shorter than this never retract (microns).
    pub retraction_minimal_distance: Coord,
    /// Z-hop height during retraction (microns).
    pub retraction_z_hop: Coord,
    /// Extra filament pushed when priming after a retraction (microns).
    pub retraction_amount_prime: Coord,
    /// Code run before a tool change.
    pub pre_switch_extruder_code: String,
    /// Code run after a tool change.
    pub post_switch_extruder_code: String,
    /// Start code; the flavor default when unset.
    pub start_code: Option<String>,
    /// End code; the flavor default when unset.
    pub end_code: Option<String>,
}

impl Default for PrinterProfile {
    fn default() -> Self {
        Self::generic()
    }
}

impl PrinterProfile {
    /// Generic printer profile.
    pub fn generic() -> Self {
        Self {
            name: "Generic".into(),
            flavor: GcodeFlavor::RepRap,
            bed_x: 220.0,
            bed_y: 220.0,
            bed_z: 250.0,
            heated_bed: true,
            extruder_count: 1,
            extruder_offsets: Vec::new(),
            filament_diameter: 1750,
            flow: 100,
            max_feedrate_x: 500.0,
            max_feedrate_y: 500.0,
            max_acceleration: 3000.0,
            max_xy_jerk: 20.0,
            default_print_temp: 210,
            default_bed_temp: 60,
            retraction_amount: 4500,
            retraction_speed: 45.0,
            extruder_switch_retraction: 14_500,
            minimal_extrusion_before_retraction: 100,
            retraction_minimal_distance: 1500,
            retraction_z_hop: 0,
            retraction_amount_prime: 0,
            pre_switch_extruder_code: String::new(),
            post_switch_extruder_code: String::new(),
            start_code: None,
            end_code: None,
        }
    }

    /// Ultimaker Original profile.
    pub fn ultimaker_original() -> Self {
        Self {
            name: "Ultimaker Original".into(),
            bed_x: 205.0,
            bed_y: 205.0,
            bed_z: 200.0,
            heated_bed: false,
            filament_diameter: 2850,
            max_feedrate_x: 300.0,
            max_feedrate_y: 300.0,
            default_print_temp: 220,
            default_bed_temp: 0,
            ..Self::generic()
        }
    }

    /// Ultimaker 2 profile (UltiGCode).
    pub fn ultimaker2() -> Self {
        Self {
            name: "Ultimaker 2".into(),
            flavor: GcodeFlavor::UltiGCode,
            bed_x: 230.0,
            bed_y: 225.0,
            bed_z: 205.0,
            filament_diameter: 2850,
            max_feedrate_x: 300.0,
            max_feedrate_y: 300.0,
            default_print_temp: 220,
            default_bed_temp: 60,
            ..Self::generic()
        }
    }

    /// MakerBot Replicator with two extruders.
    pub fn replicator_dual() -> Self {
        Self {
            name: "MakerBot Replicator Dual".into(),
            flavor: GcodeFlavor::MakerBot,
            bed_x: 225.0,
            bed_y: 145.0,
            bed_z: 150.0,
            extruder_count: 2,
            extruder_offsets: vec![Point::zero(), Point::new(33_000, 0)],
            max_acceleration: 2000.0,
            default_print_temp: 230,
            default_bed_temp: 110,
            retraction_amount: 1000,
            retraction_speed: 25.0,
            ..Self::generic()
        }
    }

    /// Bits From Bytes 3000 profile.
    pub fn bfb_3000() -> Self {
        Self {
            name: "BfB 3000".into(),
            flavor: GcodeFlavor::BitsFromBytes,
            bed_x: 275.0,
            bed_y: 230.0,
            bed_z: 210.0,
            heated_bed: false,
            filament_diameter: 3000,
            max_acceleration: 1000.0,
            default_print_temp: 215,
            default_bed_temp: 0,
            ..Self::generic()
        }
    }

    /// Mach3 controlled machine with two extruders on the A and B axes.
    pub fn mach3_router() -> Self {
        Self {
            name: "Mach3 Router".into(),
            flavor: GcodeFlavor::Mach3,
            bed_x: 300.0,
            bed_y: 300.0,
            bed_z: 150.0,
            heated_bed: false,
            extruder_count: 2,
            extruder_offsets: vec![Point::zero(), Point::new(20_000, 0)],
            max_feedrate_x: 150.0,
            max_feedrate_y: 150.0,
            max_acceleration: 500.0,
            default_bed_temp: 0,
            ..Self::generic()
        }
    }

    /// Get all built-in profiles.
    pub fn all_profiles() -> Vec<Self> {
        vec![
            Self::generic(),
            Self::ultimaker_original(),
            Self::ultimaker2(),
            Self::replicator_dual(),
            Self::bfb_3000(),
            Self::mach3_router(),
        ]
    }

    /// Look up a built-in profile by key (`ultimaker2`) or display name.
    pub fn by_name(name: &str) -> Option<Self> {
        let wanted = name.to_ascii_lowercase();
        Self::profile_keys()
            .into_iter()
            .zip(Self::all_profiles())
            .find(|(key, profile)| *key == wanted || profile.name.to_ascii_lowercase() == wanted)
            .map(|(_, profile)| profile)
    }

    /// Keys accepted by [`PrinterProfile::by_name`], in the same order as
    /// [`PrinterProfile::all_profiles`].
    pub fn profile_keys() -> Vec<&'static str> {
        vec![
            "generic",
            "ultimaker_original",
            "ultimaker2",
            "replicator_dual",
            "bfb_3000",
            "mach3_router",
        ]
    }

    /// Check whether a box starting at `min` with extent `size` (microns)
    /// fits the build volume.
    pub fn fits(&self, min: Point3, size: Point3) -> bool {
        min.x >= 0
            && min.y >= 0
            && min.z >= 0
            && min.x + size.x <= mm2int(self.bed_x)
            && min.y + size.y <= mm2int(self.bed_y)
            && min.z + size.z <= mm2int(self.bed_z)
    }

    /// Bed temperature to put in the start code.
    pub fn bed_temp(&self, requested: u32) -> u32 {
        if self.heated_bed {
            requested
        } else {
            0
        }
    }

    /// Nozzle offset of `extruder`; extruders without an entry sit at the origin.
    pub fn extruder_offset(&self, extruder: usize) -> Point {
        self.extruder_offsets.get(extruder).copied().unwrap_or_default()
    }

    /// Motion limits for the print time estimate.
    pub fn motion_limits(&self) -> MotionLimits {
        MotionLimits {
            acceleration: self.max_acceleration,
            max_feedrate: self.max_feedrate_x.min(self.max_feedrate_y),
            max_jerk: self.max_xy_jerk,
        }
    }

    /// Set up `gcode` for this machine: flavor, nozzle offsets, tool change
    /// code, retraction and motion limits.
    pub fn configure<W: Write>(&self, gcode: &mut GCodeExport<W>) {
        gcode.set_flavor(self.flavor);
        for (id, &offset) in self.extruder_offsets.iter().enumerate() {
            gcode.set_extruder_offset(id, offset);
        }
        gcode.set_switch_extruder_code(
            self.pre_switch_extruder_code.clone(),
            self.post_switch_extruder_code.clone(),
        );
        gcode.set_retraction_settings(
            self.retraction_amount,
            self.retraction_speed,
            self.extruder_switch_retraction,
            self.minimal_extrusion_before_retraction,
            self.retraction_z_hop,
            self.retraction_amount_prime,
        );
        gcode.apply_acceleration_settings(&self.motion_limits());
    }

    /// Start code with temperatures and retraction steps filled in.
    pub fn start_code(&self, print_temp: u32, bed_temp: u32) -> String {
        let template = self
            .start_code
            .as_deref()
            .unwrap_or_else(|| self.flavor.start_gcode());
        // BfB firmware counts retraction in motor steps, 2560 per mm.
        let retract_steps = self.retraction_amount * 2560 / 1000;
        template
            .replace("{print_temp}", &print_temp.to_string())
            .replace("{bed_temp}", &bed_temp.to_string())
            .replace("{retract_steps}", &retract_steps.to_string())
    }

    /// End code for this machine.
    pub fn end_code(&self) -> &str {
        self.end_code.as_deref().unwrap_or_else(|| self.flavor.end_gcode())
    }

    /// Reject settings the exporter cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.extruder_count == 0 {
            return Err(GcodeError::InvalidSettings(
                "extruder_count must be at least 1".into(),
            ));
        }
        if self.filament_diameter <= 0 {
            return Err(GcodeError::InvalidSettings(
                "filament_diameter must be positive".into(),
            ));
        }
        if self.retraction_speed <= 0.0 {
            return Err(GcodeError::InvalidSettings(
                "retraction_speed must be positive".into(),
            ));
        }
        if self.extruder_offsets.len() > self.extruder_count as usize {
            return Err(GcodeError::InvalidSettings(format!(
                "{} extruder offsets for {} extruders",
                self.extruder_offsets.len(),
                self.extruder_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles() {
        for profile in PrinterProfile::all_profiles() {
            assert!(profile.bed_x > 0.0);
            assert!(profile.bed_y > 0.0);
            assert!(profile.bed_z > 0.0);
            assert!(profile.validate().is_ok(), "{}", profile.name);
        }
    }

    #[test]
    fn test_build_volume() {
        let profile = PrinterProfile::ultimaker2();
        let size = Point3::new(100_000, 100_000, 100_000);
        assert!(profile.fits(Point3::new(10_000, 10_000, 0), size));
        assert!(!profile.fits(Point3::new(-1000, 10_000, 0), size));
        assert!(!profile.fits(Point3::new(200_000, 10_000, 0), size));
        assert!(profile.fits(Point3::default(), Point3::new(230_000, 225_000, 205_000)));

        assert_eq!(profile.bed_temp(70), 70);
        assert_eq!(PrinterProfile::ultimaker_original().bed_temp(70), 0);
    }

    #[test]
    fn test_by_name() {
        assert_eq!(
            PrinterProfile::by_name("ultimaker2").map(|p| p.flavor),
            Some(GcodeFlavor::UltiGCode)
        );
        assert_eq!(
            PrinterProfile::by_name("BfB 3000").map(|p| p.flavor),
            Some(GcodeFlavor::BitsFromBytes)
        );
        assert!(PrinterProfile::by_name("nope").is_none());
        assert_eq!(
            PrinterProfile::profile_keys().len(),
            PrinterProfile::all_profiles().len()
        );
    }

    #[test]
    fn test_start_code_substitution() {
        let code = PrinterProfile::generic().start_code(205, 55);
        assert!(code.contains("M109 S205"));
        assert!(code.contains("M140 S55"));
        assert!(!code.contains('{'));

        let bfb = PrinterProfile::bfb_3000().start_code(0, 0);
        assert!(bfb.contains("M227 S11520 P11520"));
    }

    #[test]
    fn test_extruder_offsets() {
        let profile = PrinterProfile::replicator_dual();
        assert_eq!(profile.extruder_offset(1), Point::new(33_000, 0));
        assert_eq!(profile.extruder_offset(5), Point::zero());

        let mut gcode: GCodeExport<Vec<u8>> = GCodeExport::new();
        profile.configure(&mut gcode);
        assert_eq!(gcode.flavor(), GcodeFlavor::MakerBot);
        assert_eq!(gcode.extruder_offset(1), Point::new(33_000, 0));

        let mut broken = PrinterProfile::generic();
        broken.extruder_count = 0;
        assert!(broken.validate().is_err());
    }
}
