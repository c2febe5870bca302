use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "xds-iter",
    version,
    about = "Iterative high-resolution cutoff refinement for XDS data reduction"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Run(RunArgs),
    Stats(StatsArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ThresholdArgs {
    #[arg(long = "min-complete", default_value_t = 90.0)]
    pub min_completeness: f64,

    #[arg(long, default_value_t = 1.0)]
    pub min_i_sigma: f64,

    /// Minimum CC1/2 on the 0-100 scale.
    #[arg(long, default_value_t = 50.0)]
    pub min_cc_half: f64,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Image filename template handed to generate_XDS.INP.
    #[arg(long = "images")]
    pub image_template: String,

    #[command(flatten)]
    pub thresholds: ThresholdArgs,

    #[arg(long = "start-resol", default_value_t = 1.4)]
    pub start_resolution: f64,

    #[arg(long = "resol-step-size", default_value_t = 0.05)]
    pub step_size: f64,

    #[arg(long = "max-resol", default_value_t = 3.5)]
    pub max_resolution: f64,

    #[arg(long = "space-group-num")]
    pub space_group: Option<String>,

    /// Six comma-separated values, e.g. 88,88,104,90,90,120.
    #[arg(long)]
    pub unit_cell_constants: Option<String>,

    #[arg(long, default_value_t = false)]
    pub only_correct_loops: bool,

    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    #[arg(long, default_value_t = false)]
    pub skip_conversion: bool,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    #[arg(long, default_value = "CORRECT.LP")]
    pub report: PathBuf,

    #[command(flatten)]
    pub thresholds: ThresholdArgs,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}
