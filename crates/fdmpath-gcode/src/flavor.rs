//! G-code flavor definitions.

use serde::{Deserialize, Serialize};

/// G-code flavor (dialect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GcodeFlavor {
    /// RepRap style firmware (Marlin, Sprinter, Repetier).
    #[default]
    RepRap,
    /// Ultimaker 2 firmware: volumetric E values and firmware retraction.
    UltiGCode,
    /// MakerBot / Sailfish firmware.
    MakerBot,
    /// Bits From Bytes machines: RPM driven extrusion, no E axis.
    BitsFromBytes,
    /// Mach3 controllers: one lettered axis per extruder.
    Mach3,
    /// RepRap firmware with volumetric E values and firmware retraction.
    RepRapVolumetric,
}

impl GcodeFlavor {
    /// Get the start G-code template for this flavor.
    ///
    /// Templates may contain `{print_temp}`, `{bed_temp}` and
    /// `{retract_steps}` placeholders.
    pub fn start_gcode(&self) -> &'static str {
        match self {
            GcodeFlavor::RepRap | GcodeFlavor::RepRapVolumetric => {
                "M140 S{bed_temp} ; Set bed temp\n\
                 M109 S{print_temp} ; Heat up and wait\n\
                 G21 ; Metric values\n\
                 G90 ; Absolute positioning\n\
                 M107 ; Fan off\n\
                 G28 ; Home all axes\n\
                 G1 Z15.0 F300 ; Move the platform down 15mm\n\
                 G92 E0\n\
                 G1 F200 E3 ; Extrude 3mm of feed stock\n\
                 G92 E0\n"
            }
            GcodeFlavor::UltiGCode => {
                ";FLAVOR:UltiGCode\n\
                 ;TIME:<__TIME__>\n\
                 ;MATERIAL:<FILAMENT>\n\
                 ;MATERIAL2:<FILAMEN2>\n"
            }
            GcodeFlavor::MakerBot => {
                "M136 (enable build)\n\
                 M73 P0\n\
                 G162 X Y F2000 (home XY axes maximum)\n\
                 G161 Z F900 (home Z axis minimum)\n\
                 G92 X0 Y0 Z0 A0 B0\n\
                 G1 Z5.0 F900\n\
                 M104 S{print_temp} T0\n\
                 M109 S{bed_temp} T0\n\
                 M133 T0 (wait for extruder)\n"
            }
            GcodeFlavor::BitsFromBytes => {
                ";enable auto-retraction\n\
                 M227 S{retract_steps} P{retract_steps}\n"
            }
            GcodeFlavor::Mach3 => {
                "G21 (metric values)\n\
                 G90 (absolute positioning)\n\
                 G28 (home)\n"
            }
        }
    }

    /// Get the end G-code template for this flavor.
    pub fn end_gcode(&self) -> &'static str {
        match self {
            GcodeFlavor::RepRap | GcodeFlavor::RepRapVolumetric => {
                "M104 S0 ; Extruder heater off\n\
                 M140 S0 ; Heated bed heater off\n\
                 G91 ; Relative positioning\n\
                 G1 E-1 F300 ; Release some of the pressure\n\
                 G1 Z+0.5 E-5 X-20 Y-20 F9000 ; Move Z up a bit and retract more\n\
                 G28 X0 Y0 ; Move X/Y out of the way\n\
                 M84 ; Steppers off\n\
                 G90 ; Absolute positioning\n"
            }
            GcodeFlavor::UltiGCode => "M25 ;Stop reading from this point on.\n",
            GcodeFlavor::MakerBot => {
                "M18 (disable steppers)\n\
                 M104 S0 T0\n\
                 M109 S0 T0\n\
                 G162 Z F900 (lower the platform)\n\
                 M73 P100\n\
                 M137 (end build)\n"
            }
            GcodeFlavor::BitsFromBytes => "M104 S0\nM103\n",
            GcodeFlavor::Mach3 => "M5\nG28\nM30\n",
        }
    }

    /// Axis letter that drives `extruder`.
    pub fn extruder_char(&self, extruder: usize) -> char {
        match self {
            GcodeFlavor::Mach3 => (b'A' + (extruder % 26) as u8) as char,
            _ => 'E',
        }
    }

    /// Are E values cubic millimeters instead of filament length?
    pub fn is_volumetric(&self) -> bool {
        matches!(self, GcodeFlavor::UltiGCode | GcodeFlavor::RepRapVolumetric)
    }

    /// Does the firmware retract and prime by itself (`G10` / `G11`)?
    pub fn firmware_retraction(&self) -> bool {
        self.is_volumetric()
    }

    /// Does the machine handle retraction automatically when extrusion stops?
    pub fn auto_retraction(&self) -> bool {
        matches!(self, GcodeFlavor::BitsFromBytes)
    }

    /// Can the E axis be zeroed with `G92`?
    pub fn supports_extrusion_reset(&self) -> bool {
        !matches!(self, GcodeFlavor::MakerBot | GcodeFlavor::BitsFromBytes)
    }

    /// Does every tool change start a fresh E axis?
    pub fn resets_after_tool_change(&self) -> bool {
        matches!(self, GcodeFlavor::Mach3)
    }

    /// Does this flavor expect `\r\n` line endings?
    pub fn crlf(&self) -> bool {
        matches!(self, GcodeFlavor::BitsFromBytes)
    }

    /// Tool change command for `extruder`.
    pub fn tool_change(&self, extruder: usize) -> String {
        match self {
            GcodeFlavor::MakerBot => format!("M135 T{extruder}"),
            _ => format!("T{extruder}"),
        }
    }

    /// Fan command for a speed in 0..=255; `0` turns the fan off.
    pub fn fan_command(&self, value: u32) -> String {
        match (self, value) {
            (GcodeFlavor::MakerBot, 0) => "M127 T0".into(),
            (GcodeFlavor::MakerBot, v) => format!("M126 T0 ; value = {v}"),
            (GcodeFlavor::Mach3, v) => format!("M106 P{v}"),
            (_, 0) => "M107".into(),
            (_, v) => format!("M106 S{v}"),
        }
    }
}
