use clap::{
    Parser,
    Subcommand,
};
use std::path::PathBuf;
use timsko::LabelStrategy;
use timsko::reader::PressureCompensation;

use crate::config::BackendKind;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON configuration with reader settings and default extraction parameters.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract and merge every acquisition in one folder.
    Extract(ExtractArgs),
    /// Run every job of a CSV batch table.
    Batch(BatchArgs),
    /// Write template configuration files.
    WriteTemplate(WriteTemplateArgs),
}

#[derive(Parser, Debug, Clone, Default)]
pub struct ReaderArgs {
    /// Backend used to read the .d folders.
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Path to the vendor timsdata library (implies --backend bruker-sdk).
    #[arg(long)]
    pub sdk_library: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone, Default)]
pub struct ExtractArgs {
    /// Folder containing one .d folder per acquisition.
    pub folder: PathBuf,

    /// Lower m/z bound (inclusive).
    #[arg(long)]
    pub mz_min: Option<f64>,

    /// Upper m/z bound (inclusive).
    #[arg(long)]
    pub mz_max: Option<f64>,

    /// How column labels are derived.
    #[arg(short = 'm', long, value_enum)]
    pub label_strategy: Option<LabelStrategy>,

    /// Keep columns in discovery order instead of sorting them by voltage.
    #[arg(long)]
    pub no_sort: bool,

    /// Convert mobility to CCS (needs --charge and --reference-mz).
    #[arg(long)]
    pub ccs: bool,

    /// Charge used for the CCS conversion.
    #[arg(long, allow_negative_numbers = true)]
    pub charge: Option<i32>,

    /// Reference m/z used for the CCS conversion.
    #[arg(long)]
    pub reference_mz: Option<f64>,

    /// Use the raw calibration instead of the recalibrated state (vendor library only).
    #[arg(long)]
    pub no_recalibration: bool,

    /// Pressure compensation strategy (vendor library only).
    #[arg(long, value_enum)]
    pub pressure_compensation: Option<PressureCompensation>,

    /// Round mobility values to this many decimals before grouping.
    #[arg(long)]
    pub mobility_decimals: Option<u32>,

    /// Extract acquisitions in parallel.
    #[arg(long)]
    pub parallel: bool,

    #[command(flatten)]
    pub reader: ReaderArgs,
}

#[derive(Parser, Debug, Clone, Default)]
pub struct BatchArgs {
    /// CSV table with one job per row.
    pub table: PathBuf,

    /// Round mobility values to this many decimals before grouping.
    #[arg(long)]
    pub mobility_decimals: Option<u32>,

    /// Extract acquisitions of each job in parallel.
    #[arg(long)]
    pub parallel: bool,

    #[command(flatten)]
    pub reader: ReaderArgs,
}

#[derive(Parser, Debug)]
pub struct WriteTemplateArgs {
    /// Directory to write the templates to.
    #[arg(short, long)]
    pub output_path: PathBuf,
}
