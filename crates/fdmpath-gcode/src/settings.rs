//! Per-job print settings.

use fdmpath_slicer::Coord;
use serde::{Deserialize, Serialize};

use crate::error::{GcodeError, Result};

/// Settings that vary from print to print on the same machine.
///
/// Lengths are in microns, speeds in mm/s, fan speeds in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintSettings {
    /// Layer thickness above the first layer.
    pub layer_thickness: Coord,
    /// Thickness of the first layer.
    pub initial_layer_thickness: Coord,
    /// Extrusion width.
    pub line_width: Coord,
    /// Outer wall speed.
    pub print_speed: f64,
    /// Infill speed.
    pub infill_speed: f64,
    /// Travel speed.
    pub travel_speed: f64,
    /// Extrusion speed on the first layer.
    pub initial_layer_speed: f64,
    /// Minimal time spent on one layer (seconds).
    pub min_layer_time: f64,
    /// Speed never undercut when slowing a layer down.
    pub minimal_feedrate: f64,
    /// Fan speed on layers printed at full speed.
    pub fan_speed_min: u32,
    /// Fan speed on layers slowed down to half speed or less.
    pub fan_speed_max: u32,
    /// The fan ramps up linearly until this layer.
    pub fan_full_on_layer: usize,
    /// Lift the head away while waiting out the minimal layer time.
    pub cool_head_lift: bool,
    /// Print the outer wall as one continuous spiral.
    pub spiralize: bool,
    /// Keep travels inside the part outlines.
    pub combing: bool,
    /// Retract before every travel.
    pub always_retract: bool,
    /// Distance kept from the outline after a part is finished.
    pub move_inside_distance: Coord,
    /// Nozzle temperature; the profile default when unset.
    pub print_temp: Option<u32>,
    /// Bed temperature; the profile default when unset.
    pub bed_temp: Option<u32>,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            layer_thickness: 200,
            initial_layer_thickness: 300,
            line_width: 400,
            print_speed: 50.0,
            infill_speed: 60.0,
            travel_speed: 150.0,
            initial_layer_speed: 20.0,
            min_layer_time: 5.0,
            minimal_feedrate: 10.0,
            fan_speed_min: 100,
            fan_speed_max: 100,
            fan_full_on_layer: 2,
            cool_head_lift: false,
            spiralize: false,
            combing: true,
            always_retract: false,
            move_inside_distance: 100,
            print_temp: None,
            bed_temp: None,
        }
    }
}

impl PrintSettings {
    /// Thickness of layer `layer_nr`.
    pub fn layer_thickness_at(&self, layer_nr: usize) -> Coord {
        if layer_nr == 0 {
            self.initial_layer_thickness
        } else {
            self.layer_thickness
        }
    }

    /// Extrusion speed factor (percent) for layer `layer_nr`.
    pub fn extrude_speed_factor_at(&self, layer_nr: usize) -> u32 {
        if layer_nr == 0 && self.initial_layer_speed < self.print_speed {
            (self.initial_layer_speed * 100.0 / self.print_speed) as u32
        } else {
            100
        }
    }

    /// Fan speed for a layer printed at `extrude_speed_factor` percent.
    ///
    /// Full speed layers get the minimum fan speed, layers at half speed or
    /// slower the maximum, with a linear blend in between. Below
    /// `fan_full_on_layer` the result ramps up from zero.
    pub fn fan_speed(&self, layer_nr: usize, extrude_speed_factor: u32) -> u32 {
        let mut fan = if extrude_speed_factor <= 50 {
            self.fan_speed_max
        } else {
            let n = extrude_speed_factor.min(100) - 50;
            (self.fan_speed_min * n + self.fan_speed_max * (50 - n)) / 50
        };
        if layer_nr < self.fan_full_on_layer {
            fan = fan * layer_nr as u32 / self.fan_full_on_layer as u32;
        }
        fan
    }

    /// Reject settings the planner cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.layer_thickness <= 0 || self.initial_layer_thickness <= 0 {
            return Err(GcodeError::InvalidSettings(
                "layer thickness must be positive".into(),
            ));
        }
        if self.line_width <= 0 {
            return Err(GcodeError::InvalidSettings(
                "line width must be positive".into(),
            ));
        }
        for (name, speed) in [
            ("print_speed", self.print_speed),
            ("infill_speed", self.infill_speed),
            ("travel_speed", self.travel_speed),
            ("initial_layer_speed", self.initial_layer_speed),
        ] {
            if speed <= 0.0 {
                return Err(GcodeError::InvalidSettings(format!(
                    "{name} must be positive"
                )));
            }
        }
        if self.min_layer_time < 0.0 || self.minimal_feedrate < 0.0 {
            return Err(GcodeError::InvalidSettings(
                "minimal layer time and feedrate cannot be negative".into(),
            ));
        }
        if self.fan_speed_min > 100 || self.fan_speed_max > 100 {
            return Err(GcodeError::InvalidSettings(
                "fan speeds are percentages".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_valid() {
        assert!(PrintSettings::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_settings() {
        let settings = PrintSettings {
            line_width: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(GcodeError::InvalidSettings(_))));

        let settings = PrintSettings {
            travel_speed: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_first_layer() {
        let settings = PrintSettings::default();
        assert_eq!(settings.layer_thickness_at(0), 300);
        assert_eq!(settings.layer_thickness_at(5), 200);
        assert_eq!(settings.extrude_speed_factor_at(0), 40);
        assert_eq!(settings.extrude_speed_factor_at(1), 100);
    }

    #[test]
    fn test_fan_speed_blend_and_ramp() {
        let settings = PrintSettings {
            fan_speed_min: 40,
            fan_speed_max: 100,
            fan_full_on_layer: 4,
            ..Default::default()
        };
        assert_eq!(settings.fan_speed(10, 100), 40);
        assert_eq!(settings.fan_speed(10, 50), 100);
        assert_eq!(settings.fan_speed(10, 75), 70);
        assert_eq!(settings.fan_speed(0, 100), 0);
        assert_eq!(settings.fan_speed(2, 100), 20);
    }
}
