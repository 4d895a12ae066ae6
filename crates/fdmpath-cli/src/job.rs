//! TOML print jobs: machine, print settings and sliced layers.

use std::path::Path;

use anyhow::{Context, Result};
use fdmpath_gcode::{PrintSettings, PrinterProfile};
use fdmpath_slicer::{Point3, SliceDataStorage};
use serde::Deserialize;

fn default_profile() -> String {
    "generic".into()
}

/// A print job as read from disk.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    /// Built-in printer profile the machine settings start from.
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Printer profile fields overriding the built-in values.
    #[serde(default)]
    pub machine: toml::Table,
    /// Print settings.
    #[serde(default)]
    pub print: PrintSettings,
    /// Sliced layers.
    pub model: SliceDataStorage,
}

impl Job {
    /// Read and check a job file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid job {}", path.display()))
    }

    /// Parse and check a job.
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut job: Job = toml::from_str(text)?;
        if job.model.model_size == Point3::default() {
            job.model.update_bounds();
        }
        job.model.validate()?;
        job.print.validate()?;
        Ok(job)
    }

    /// The machine: the named built-in profile (`profile` wins over the
    /// job's own choice) with the job's `[machine]` overrides applied.
    pub fn printer(&self, profile: Option<&str>) -> Result<PrinterProfile> {
        let name = profile.unwrap_or(&self.profile);
        let base = PrinterProfile::by_name(name).with_context(|| {
            format!(
                "unknown printer profile '{name}', expected one of: {}",
                PrinterProfile::profile_keys().join(", ")
            )
        })?;

        let mut value = toml::Value::try_from(&base)?;
        if let toml::Value::Table(table) = &mut value {
            for (key, override_value) in &self.machine {
                table.insert(key.clone(), override_value.clone());
            }
        }
        let printer: PrinterProfile = value
            .try_into()
            .context("invalid [machine] overrides")?;
        printer.validate()?;
        Ok(printer)
    }
}
