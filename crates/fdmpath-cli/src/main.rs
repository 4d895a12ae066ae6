//! fdmpath - turns sliced layer jobs into printer G-code
//!
//! Reads a TOML job (machine, print settings and layer outlines), plans
//! every layer and writes the G-code file.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use fdmpath_gcode::{fill_ultigcode_header, CoordinateFrame, GCodeExport, GcodeFlavor, PrinterProfile};
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod job;
mod plan;

use job::Job;
use plan::Dumps;

#[derive(Parser)]
#[command(name = "fdmpath")]
#[command(about = "Plan sliced layers and write printer G-code", long_about = None)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a job and write its G-code
    Plan {
        /// Job file (.toml)
        job: PathBuf,
        /// Output G-code file
        #[arg(short, long)]
        output: PathBuf,
        /// Printer profile, overriding the one named in the job
        #[arg(short, long)]
        profile: Option<String>,
        /// Directory for part, entry/exit point and part order dumps
        #[arg(long)]
        dump_dir: Option<PathBuf>,
        /// Dump coordinates relative to the model's minimum corner
        #[arg(long, requires = "dump_dir")]
        model_relative: bool,
    },
    /// List the built-in printer profiles
    Profiles,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Plan {
            job,
            output,
            profile,
            dump_dir,
            model_relative,
        } => {
            plan_job(&job, &output, profile.as_deref(), dump_dir.as_deref(), model_relative)?;
        }
        Commands::Profiles => {
            for (key, profile) in PrinterProfile::profile_keys()
                .into_iter()
                .zip(PrinterProfile::all_profiles())
            {
                println!("{key:20} {} ({:?})", profile.name, profile.flavor);
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn plan_job(
    job_path: &Path,
    output: &Path,
    profile: Option<&str>,
    dump_dir: Option<&Path>,
    model_relative: bool,
) -> Result<()> {
    let job = Job::load(job_path)?;
    let printer = job.printer(profile)?;

    let frame = if model_relative {
        CoordinateFrame::ModelRelative(job.model.model_min)
    } else {
        CoordinateFrame::Raw
    };
    let mut dumps = match dump_dir {
        Some(dir) => Some(
            Dumps::create(dir, &job, frame)
                .with_context(|| format!("failed to create dumps in {}", dir.display()))?,
        ),
        None => None,
    };

    // Read access is needed to patch the header once the totals are known.
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let gcode = GCodeExport::with_output(BufWriter::new(file));
    let (sink, summary) = plan::write_print(&job, &printer, gcode, dumps.as_mut())?;
    if let Some(dumps) = dumps {
        dumps.close()?;
    }

    let mut file = sink.into_inner().map_err(|e| e.into_error())?;
    if printer.flavor == GcodeFlavor::UltiGCode {
        let filament = [
            summary.filament.first().copied().unwrap_or_default(),
            summary.filament.get(1).copied().unwrap_or_default(),
        ];
        fill_ultigcode_header(&mut file, summary.print_time, filament)
            .with_context(|| format!("failed to fill header of {}", output.display()))?;
    }

    println!(
        "Wrote {} layers to {} ({:.0} s, {:.1} mm filament)",
        summary.layers,
        output.display(),
        summary.print_time,
        summary.filament.iter().sum::<f64>()
    );
    Ok(())
}
