//! Low-level G-code writer.
//!
//! [`GCodeExport`] is the only place that knows what G-code looks like. It
//! tracks the head position, the E axis, retraction state, fan and feedrate
//! so that every line it writes is the minimal change from the previous
//! machine state, and it keeps the running filament and print time totals.
//!
//! Internally everything is in integer microns; millimeters appear only in
//! the text that is written.

use std::f64::consts::PI;
use std::io::{self, Read, Seek, SeekFrom, Write};

use fdmpath_slicer::{
    int2mm, Coord, MotionLimits, Point, Point3, TimeEstimator, TrapezoidTimeEstimator,
};
use tracing::{debug, info};

use crate::error::{GcodeError, Result};
use crate::flavor::GcodeFlavor;

/// E value (mm) above which the axis is zeroed on the next prime.
pub const EXTRUSION_RESET_LIMIT: f64 = 10_000.0;

/// Clearance above the tallest layer when the print finishes (microns).
pub const FINAL_LIFT: Coord = 5000;

/// Bytes at the start of the output searched by [`replace_tag_in_start`].
pub const HEADER_SCAN_BYTES: u64 = 1024;

/// Filament moved per extruder RPM on Bits From Bytes machines (mm).
const BFB_MM_PER_RPM: f64 = 4.0;

/// Stateful G-code serializer over any byte sink.
pub struct GCodeExport<W: Write> {
    output: Option<W>,
    bytes_written: u64,
    flavor: GcodeFlavor,

    extrusion_amount: f64,
    extrusion_per_mm: f64,
    retraction_amount: f64,
    retraction_amount_prime: f64,
    retraction_z_hop: Coord,
    extruder_switch_retraction: f64,
    minimal_extrusion_before_retraction: f64,
    extrusion_amount_at_previous_retraction: f64,
    retraction_speed: f64,
    is_retracted: bool,
    /// How far the E axis currently sits below `extrusion_amount`.
    retracted_by: f64,
    bfb_motor_on: bool,
    bfb_rpm_tenths: Option<i64>,

    current_position: Point3,
    start_position: Option<Point3>,
    z_pos: Coord,
    current_speed: Option<f64>,
    current_fan_speed: Option<u32>,

    extruder_nr: usize,
    extruder_offsets: Vec<Point>,
    pre_switch_extruder_code: String,
    post_switch_extruder_code: String,

    total_filament: Vec<f64>,
    /// `extrusion_amount` when the active extruder's filament was last committed.
    filament_baseline: f64,
    total_print_time: f64,
    estimator: Box<dyn TimeEstimator>,
}

impl<W: Write> Default for GCodeExport<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> GCodeExport<W> {
    /// Create an exporter without an output sink.
    pub fn new() -> Self {
        Self {
            output: None,
            bytes_written: 0,
            flavor: GcodeFlavor::default(),
            extrusion_amount: 0.0,
            extrusion_per_mm: 0.0,
            retraction_amount: 4.5,
            retraction_amount_prime: 0.0,
            retraction_z_hop: 0,
            extruder_switch_retraction: 14.5,
            minimal_extrusion_before_retraction: 0.0,
            extrusion_amount_at_previous_retraction: 0.0,
            retraction_speed: 45.0,
            is_retracted: false,
            retracted_by: 0.0,
            bfb_motor_on: false,
            bfb_rpm_tenths: None,
            current_position: Point3::default(),
            start_position: None,
            z_pos: 0,
            current_speed: None,
            current_fan_speed: None,
            extruder_nr: 0,
            extruder_offsets: vec![Point::zero()],
            pre_switch_extruder_code: String::new(),
            post_switch_extruder_code: String::new(),
            total_filament: vec![0.0],
            filament_baseline: 0.0,
            total_print_time: 0.0,
            estimator: Box::new(TrapezoidTimeEstimator::default()),
        }
    }

    /// Create an exporter writing to `output`.
    pub fn with_output(output: W) -> Self {
        let mut gcode = Self::new();
        gcode.set_output(output);
        gcode
    }

    /// Attach the output sink.
    pub fn set_output(&mut self, output: W) {
        self.output = Some(output);
        self.bytes_written = 0;
    }

    /// Is there a sink to write to?
    pub fn is_opened(&self) -> bool {
        self.output.is_some()
    }

    /// Borrow the output sink.
    pub fn get_ref(&self) -> Option<&W> {
        self.output.as_ref()
    }

    /// Select the dialect for all following output.
    pub fn set_flavor(&mut self, flavor: GcodeFlavor) {
        self.flavor = flavor;
    }

    /// Current dialect.
    pub fn flavor(&self) -> GcodeFlavor {
        self.flavor
    }

    /// Replace the print time estimator.
    pub fn set_time_estimator(&mut self, estimator: Box<dyn TimeEstimator>) {
        self.estimator = estimator;
    }

    /// Pass the machine's motion limits to the time estimator.
    pub fn apply_acceleration_settings(&mut self, limits: &MotionLimits) {
        self.estimator.set_limits(limits);
    }

    fn ensure_extruder(&mut self, extruder: usize) {
        if self.extruder_offsets.len() <= extruder {
            self.extruder_offsets.resize(extruder + 1, Point::zero());
        }
        if self.total_filament.len() <= extruder {
            self.total_filament.resize(extruder + 1, 0.0);
        }
    }

    /// Nozzle offset added to every coordinate written while `id` is active.
    pub fn set_extruder_offset(&mut self, id: usize, offset: Point) {
        self.ensure_extruder(id);
        self.extruder_offsets[id] = offset;
    }

    /// Offset of extruder `id`.
    pub fn extruder_offset(&self, id: usize) -> Point {
        self.extruder_offsets.get(id).copied().unwrap_or_default()
    }

    /// Code written around every tool change.
    pub fn set_switch_extruder_code(&mut self, pre: impl Into<String>, post: impl Into<String>) {
        self.pre_switch_extruder_code = pre.into();
        self.post_switch_extruder_code = post.into();
    }

    /// Set the E feed per millimeter of line per millimeter of width.
    ///
    /// Depends on the flavor, so set that first.
    pub fn set_extrusion(&mut self, layer_thickness: Coord, filament_diameter: Coord, flow: u32) {
        let radius = int2mm(filament_diameter) / 2.0;
        let filament_area = PI * radius * radius;
        self.extrusion_per_mm = if self.flavor.is_volumetric() {
            int2mm(layer_thickness)
        } else {
            int2mm(layer_thickness) / filament_area * f64::from(flow) / 100.0
        };
    }

    /// Current E feed per mm² of deposited line.
    pub fn extrusion_per_mm(&self) -> f64 {
        self.extrusion_per_mm
    }

    /// Retraction parameters. Lengths are in microns, speed in mm/s.
    pub fn set_retraction_settings(
        &mut self,
        amount: Coord,
        speed: f64,
        extruder_switch_amount: Coord,
        minimal_extrusion_before_retraction: Coord,
        z_hop: Coord,
        prime_amount: Coord,
    ) {
        self.retraction_amount = int2mm(amount);
        self.retraction_speed = speed;
        self.extruder_switch_retraction = int2mm(extruder_switch_amount);
        self.minimal_extrusion_before_retraction = int2mm(minimal_extrusion_before_retraction);
        self.retraction_z_hop = z_hop;
        self.retraction_amount_prime = int2mm(prime_amount);
    }

    /// Z used by the next move (microns).
    pub fn set_z(&mut self, z: Coord) {
        self.z_pos = z;
    }

    /// Current head XY, without extruder offset.
    pub fn position_xy(&self) -> Point {
        self.current_position.xy()
    }

    /// Current head Z.
    pub fn position_z(&self) -> Coord {
        self.current_position.z
    }

    /// Position after the last written move, if any since the last reset.
    pub fn start_position_xy(&self) -> Option<Point> {
        self.start_position.map(Point3::xy)
    }

    /// Forget the start position.
    pub fn reset_start_position(&mut self) {
        self.start_position = None;
    }

    /// Active extruder.
    pub fn extruder_nr(&self) -> usize {
        self.extruder_nr
    }

    /// Is the filament currently retracted?
    pub fn is_retracted(&self) -> bool {
        self.is_retracted
    }

    /// Filament used by extruder `e` so far (mm, or mm³ for volumetric flavors).
    pub fn total_filament_used(&self, e: usize) -> f64 {
        let committed = self.total_filament.get(e).copied().unwrap_or(0.0);
        if e == self.extruder_nr {
            committed + self.extrusion_amount - self.filament_baseline
        } else {
            committed
        }
    }

    /// Estimated print time so far (seconds).
    pub fn total_print_time(&self) -> f64 {
        self.total_print_time
    }

    /// Fold the moves written since the last update into the total.
    pub fn update_total_print_time(&mut self) {
        self.total_print_time += self.estimator.calculate();
    }

    /// Bytes written to the current sink.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Log the output size.
    pub fn tell_file_size(&self) {
        let size = self.bytes_written as f64;
        if size > 1024.0 * 1024.0 {
            info!("Wrote {:5.1} MB.", size / (1024.0 * 1024.0));
        } else if size > 1024.0 {
            info!("Wrote {:5.1} kilobytes.", size / 1024.0);
        } else {
            info!("Wrote {} bytes.", self.bytes_written);
        }
    }

    fn emit(&mut self, line: &str) -> Result<()> {
        let eol = if self.flavor.crlf() { "\r\n" } else { "\n" };
        let out = self.output.as_mut().ok_or(GcodeError::NotOpened)?;
        out.write_all(line.as_bytes())?;
        out.write_all(eol.as_bytes())?;
        self.bytes_written += (line.len() + eol.len()) as u64;
        Ok(())
    }

    /// Write `;comment`.
    pub fn write_comment(&mut self, comment: &str) -> Result<()> {
        self.emit(&format!(";{comment}"))
    }

    /// Write one line as is.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.emit(line)
    }

    /// Write a block of user code verbatim. Empty blocks write nothing.
    pub fn write_code(&mut self, code: &str) -> Result<()> {
        if code.is_empty() {
            return Ok(());
        }
        let out = self.output.as_mut().ok_or(GcodeError::NotOpened)?;
        out.write_all(code.as_bytes())?;
        self.bytes_written += code.len() as u64;
        if !code.ends_with('\n') {
            out.write_all(b"\n")?;
            self.bytes_written += 1;
        }
        Ok(())
    }

    /// Zero the E axis and commit the filament used so far.
    pub fn reset_extrusion_value(&mut self) -> Result<()> {
        if self.extrusion_amount == 0.0 || !self.flavor.supports_extrusion_reset() {
            return Ok(());
        }
        let axis = self.flavor.extruder_char(self.extruder_nr);
        self.emit(&format!("G92 {axis}0"))?;
        self.commit_filament();
        self.extrusion_amount_at_previous_retraction -= self.extrusion_amount - self.retracted_by;
        self.extrusion_amount = self.retracted_by;
        self.filament_baseline = self.retracted_by;
        Ok(())
    }

    /// Add the filament fed since the last commit to the active extruder.
    fn commit_filament(&mut self) {
        self.ensure_extruder(self.extruder_nr);
        self.total_filament[self.extruder_nr] += self.extrusion_amount - self.filament_baseline;
        self.filament_baseline = self.extrusion_amount;
    }

    /// Dwell for `seconds`.
    pub fn write_delay(&mut self, seconds: f64) -> Result<()> {
        self.emit(&format!("G4 P{}", (seconds * 1000.0) as i64))?;
        self.total_print_time += seconds;
        Ok(())
    }

    /// Move to `p` at `speed` mm/s, extruding a line `line_width` microns
    /// wide unless the width is zero. Moves to the current position are
    /// skipped.
    pub fn write_move(&mut self, p: Point, speed: f64, line_width: Coord) -> Result<()> {
        if self.current_position.xy() == p && self.current_position.z == self.z_pos {
            return Ok(());
        }
        let diff = p - self.position_xy();
        let target = p + self.extruder_offset(self.extruder_nr);

        if self.flavor == GcodeFlavor::BitsFromBytes {
            self.write_bfb_move(target, diff, speed, line_width)?;
        } else {
            let mut line = String::new();
            if line_width != 0 {
                if self.is_retracted {
                    self.write_prime()?;
                }
                self.extrusion_amount +=
                    self.extrusion_per_mm * int2mm(line_width) * diff.v_size_mm();
                line.push_str("G1");
            } else {
                line.push_str("G0");
            }
            if self.current_speed != Some(speed) {
                line.push_str(&format!(" F{}", feedrate(speed)));
                self.current_speed = Some(speed);
            }
            line.push_str(&format!(" X{:.3} Y{:.3}", target.x_mm(), target.y_mm()));
            if self.z_pos != self.current_position.z {
                line.push_str(&format!(" Z{:.3}", int2mm(self.z_pos)));
            }
            if line_width != 0 {
                let axis = self.flavor.extruder_char(self.extruder_nr);
                line.push_str(&format!(" {axis}{:.5}", self.extrusion_amount));
            }
            self.emit(&line)?;
        }

        let dz = (self.z_pos - self.current_position.z) as f64;
        let distance = (diff.v_size2() as f64 + dz * dz).sqrt() / 1000.0;
        self.current_position = Point3::new(p.x, p.y, self.z_pos);
        self.start_position = Some(self.current_position);
        self.estimator.add_action(speed, distance);
        Ok(())
    }

    fn write_bfb_move(&mut self, target: Point, diff: Point, speed: f64, line_width: Coord) -> Result<()> {
        let mut feed = speed * 60.0;
        let rpm = self.extrusion_per_mm * int2mm(line_width) * speed * 60.0 / BFB_MM_PER_RPM;
        if rpm > 0.0 {
            if !self.bfb_motor_on {
                let tenths = (rpm * 10.0) as i64;
                if self.bfb_rpm_tenths != Some(tenths) {
                    self.emit(&format!("M108 S{rpm:.1}"))?;
                    self.bfb_rpm_tenths = Some(tenths);
                }
                self.emit(&format!("M{}01", self.extruder_nr))?;
                self.bfb_motor_on = true;
            }
            // The firmware only takes RPM to two decimals; make up for the
            // rounding through the feedrate.
            let rounded = (rpm * 100.0).round() / 100.0;
            if rounded > 0.0 {
                feed *= rpm / rounded;
            }
            self.extrusion_amount += self.extrusion_per_mm * int2mm(line_width) * diff.v_size_mm();
        } else if self.bfb_motor_on {
            self.emit("M103")?;
            self.bfb_motor_on = false;
        }
        self.emit(&format!(
            "G1 X{:.3} Y{:.3} Z{:.3} F{:.1}",
            target.x_mm(),
            target.y_mm(),
            int2mm(self.z_pos),
            feed
        ))
    }

    fn write_prime(&mut self) -> Result<()> {
        if self.retraction_z_hop > 0 {
            self.emit(&format!("G1 Z{:.3}", int2mm(self.current_position.z)))?;
        }
        if self.flavor.firmware_retraction() {
            self.emit("G11")?;
        } else {
            self.extrusion_amount += self.retraction_amount_prime;
            let axis = self.flavor.extruder_char(self.extruder_nr);
            self.emit(&format!(
                "G1 F{} {axis}{:.5}",
                feedrate(self.retraction_speed),
                self.extrusion_amount
            ))?;
            self.current_speed = Some(self.retraction_speed);
            self.estimator
                .add_action(self.retraction_speed, self.retracted_by + self.retraction_amount_prime);
        }
        self.is_retracted = false;
        self.retracted_by = 0.0;
        if self.extrusion_amount > EXTRUSION_RESET_LIMIT {
            self.reset_extrusion_value()?;
        }
        Ok(())
    }

    fn write_z_hop(&mut self) -> Result<()> {
        if self.retraction_z_hop > 0 {
            let z = self.current_position.z + self.retraction_z_hop;
            self.emit(&format!("G1 Z{:.3}", int2mm(z)))?;
        }
        Ok(())
    }

    fn retract_by(&mut self, amount: f64, firmware_code: &str) -> Result<()> {
        if self.flavor.firmware_retraction() {
            self.emit(firmware_code)?;
            self.retracted_by = 0.0;
        } else {
            let axis = self.flavor.extruder_char(self.extruder_nr);
            self.emit(&format!(
                "G1 F{} {axis}{:.5}",
                feedrate(self.retraction_speed),
                self.extrusion_amount - amount
            ))?;
            self.current_speed = Some(self.retraction_speed);
            self.estimator
                .add_action(self.retraction_speed, (amount - self.retracted_by).abs());
            self.retracted_by = amount;
        }
        self.write_z_hop()
    }

    /// Pull the filament back.
    ///
    /// Does nothing when already retracted. Otherwise retracts when `force`
    /// is set or enough filament went out since the previous retraction.
    /// Returns whether a retraction was written.
    pub fn write_retraction(&mut self, force: bool) -> Result<bool> {
        if self.flavor.auto_retraction() || self.is_retracted || self.retraction_amount <= 0.0 {
            return Ok(false);
        }
        let extruded_enough = self.extrusion_amount_at_previous_retraction
            + self.minimal_extrusion_before_retraction
            < self.extrusion_amount;
        if !force && !extruded_enough {
            return Ok(false);
        }
        self.retract_by(self.retraction_amount, "G10")?;
        self.extrusion_amount_at_previous_retraction = self.extrusion_amount;
        self.is_retracted = true;
        Ok(true)
    }

    /// Change tools: retract the current extruder by the switch amount,
    /// activate `new_extruder` and its offset, and leave the filament
    /// retracted so the next extrusion primes it.
    pub fn switch_extruder(&mut self, new_extruder: usize) -> Result<()> {
        if self.extruder_nr == new_extruder {
            return Ok(());
        }
        self.ensure_extruder(new_extruder);
        self.commit_filament();

        if self.flavor == GcodeFlavor::BitsFromBytes {
            if self.bfb_motor_on {
                self.emit("M103")?;
                self.bfb_motor_on = false;
            }
            self.extruder_nr = new_extruder;
            return Ok(());
        }

        self.reset_extrusion_value()?;
        self.retract_by(self.extruder_switch_retraction, "G10 S1")?;
        debug!(from = self.extruder_nr, to = new_extruder, "switching extruder");
        self.extruder_nr = new_extruder;
        if self.flavor.resets_after_tool_change() {
            self.reset_extrusion_value()?;
        }
        self.is_retracted = true;

        let pre = std::mem::take(&mut self.pre_switch_extruder_code);
        let written = self.write_code(&pre);
        self.pre_switch_extruder_code = pre;
        written?;
        self.emit(&self.flavor.tool_change(new_extruder))?;
        let post = std::mem::take(&mut self.post_switch_extruder_code);
        let written = self.write_code(&post);
        self.post_switch_extruder_code = post;
        written
    }

    /// Set the part cooling fan to `percent`; repeated speeds write nothing.
    pub fn write_fan_command(&mut self, percent: u32) -> Result<()> {
        let percent = percent.min(100);
        if self.current_fan_speed == Some(percent) {
            return Ok(());
        }
        self.emit(&self.flavor.fan_command(percent * 255 / 100))?;
        self.current_fan_speed = Some(percent);
        Ok(())
    }

    /// Finish the print: fan off, retract, lift clear of the object, run the
    /// end code and hand back the flushed sink. Any later write fails with
    /// [`GcodeError::NotOpened`].
    pub fn finalize(&mut self, max_object_height: Coord, move_speed: f64, end_code: &str) -> Result<W> {
        self.write_fan_command(0)?;
        self.write_retraction(true)?;
        self.set_z(max_object_height + FINAL_LIFT);
        let p = self.position_xy();
        self.write_move(p, move_speed, 0)?;
        self.write_code(end_code)?;
        self.update_total_print_time();

        info!("Print time: {}", self.total_print_time as i64);
        for e in 0..self.total_filament.len() {
            info!(extruder = e, "Filament: {}", self.total_filament_used(e) as i64);
        }
        self.tell_file_size();

        let mut output = self.output.take().ok_or(GcodeError::NotOpened)?;
        output.flush()?;
        Ok(output)
    }
}

/// Feedrate in mm/min as written after `F`.
fn feedrate(speed: f64) -> i64 {
    (speed * 60.0).round() as i64
}

/// Overwrite `tag` near the start of an already written file with `value`,
/// padded with spaces (or cut) to the tag's length so nothing after it
/// moves. Returns whether the tag was found.
pub fn replace_tag_in_start<S: Read + Write + Seek>(sink: &mut S, tag: &str, value: &str) -> io::Result<bool> {
    if tag.is_empty() {
        return Ok(false);
    }
    let resume = sink.stream_position()?;
    sink.seek(SeekFrom::Start(0))?;
    let mut header = Vec::new();
    Read::take(&mut *sink, HEADER_SCAN_BYTES).read_to_end(&mut header)?;

    let found = header
        .windows(tag.len())
        .position(|window| window == tag.as_bytes());
    if let Some(pos) = found {
        let mut replacement = value.as_bytes().to_vec();
        replacement.resize(tag.len(), b' ');
        sink.seek(SeekFrom::Start(pos as u64))?;
        sink.write_all(&replacement)?;
    }
    sink.seek(SeekFrom::Start(resume))?;
    Ok(found.is_some())
}

/// Fill the UltiGCode header tags with the final print time and the
/// filament used by the first two extruders.
pub fn fill_ultigcode_header<S: Read + Write + Seek>(
    sink: &mut S,
    print_time: f64,
    filament: [f64; 2],
) -> io::Result<()> {
    replace_tag_in_start(sink, "<__TIME__>", &(print_time as i64).to_string())?;
    replace_tag_in_start(sink, "<FILAMENT>", &(filament[0] as i64).to_string())?;
    replace_tag_in_start(sink, "<FILAMEN2>", &(filament[1] as i64).to_string())?;
    Ok(())
}
