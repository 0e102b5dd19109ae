//! bodyfit: command-line body measurement from reconstructed meshes.
//!
//! Fits the procedural body template to a scan and reports height, bust,
//! waist, hips, weight and BMI, plus a body-type classification.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=body_fit=info` - Phase summaries
//! - `RUST_LOG=body_fit=debug` - Intermediate state per phase
//! - `RUST_LOG=body_fit::timing=debug` - Performance timing
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Fit one scan with a known height
//! bodyfit fit scan.ply --height-cm 168 --gender female
//!
//! # Fit a directory of scans, JSON lines out
//! bodyfit --format json batch scans/*.ply --height-cm 170
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod output;

use commands::{batch, classify, config, fit, info, joints, size_chart};

/// bodyfit - Fit a body template to a scan and measure it.
///
/// Takes a reconstructed human mesh (PLY, OBJ or STL), optionally with MHR70
/// keypoints, and reports calibrated body measurements.
#[derive(Parser)]
#[command(name = "bodyfit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum GenderArg {
    Female,
    Male,
}

impl From<GenderArg> for body_fit::Gender {
    fn from(arg: GenderArg) -> Self {
        match arg {
            GenderArg::Female => body_fit::Gender::Female,
            GenderArg::Male => body_fit::Gender::Male,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Unit {
    /// Inches
    In,
    /// Centimeters
    Cm,
}

/// What the user knows about the subject.
#[derive(Args, Clone, Copy)]
pub struct HintArgs {
    /// Subject height in centimeters; measurements are scaled to it
    #[arg(long)]
    height_cm: Option<f64>,

    /// Subject gender; fixes the gender phenotype
    #[arg(long)]
    gender: Option<GenderArg>,

    /// Subject weight in kilograms; seeds the weight phenotype
    #[arg(long)]
    weight_kg: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Display mesh statistics, detected up axis and height
    Info {
        /// Input mesh file
        input: PathBuf,
    },

    /// Normalize a mesh and extract its joints
    Joints {
        /// Input mesh file
        input: PathBuf,

        /// MHR70 keypoints JSON; geometric extraction when absent
        #[arg(long)]
        keypoints: Option<PathBuf>,

        /// Write joint marker PLYs with this path prefix
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Fit the body template and report measurements
    Fit {
        /// Input mesh file
        input: PathBuf,

        /// MHR70 keypoints JSON
        #[arg(long)]
        keypoints: Option<PathBuf>,

        #[command(flatten)]
        hints: HintArgs,

        /// Fit parameters TOML
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write diagnostic PLYs with this path prefix
        #[arg(long)]
        debug_prefix: Option<PathBuf>,

        /// Number of dress silhouettes to recommend
        #[arg(long, default_value = "3")]
        silhouettes: usize,
    },

    /// Classify body type and dress size from measurements
    Classify {
        /// Bust circumference
        #[arg(long)]
        bust: f64,

        /// Waist circumference
        #[arg(long)]
        waist: f64,

        /// Hip circumference
        #[arg(long)]
        hips: f64,

        /// Unit of the measurements
        #[arg(long, default_value = "in")]
        unit: Unit,

        /// Number of dress silhouettes to recommend
        #[arg(long, default_value = "3")]
        silhouettes: usize,
    },

    /// Print the dress size chart
    SizeChart,

    /// Fit many meshes in parallel
    Batch {
        /// Input mesh files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        hints: HintArgs,

        /// Fit parameters TOML
        #[arg(long)]
        config: Option<PathBuf>,

        /// Worker threads (defaults to the number of cores)
        #[arg(long, short)]
        jobs: Option<usize>,
    },

    /// Print the default fit parameters as TOML
    Config {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "body_fit=info",
            2 => "body_fit=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Info { input } => info::run(input, &cli),
        Commands::Joints {
            input,
            keypoints,
            export,
        } => joints::run(input, keypoints.as_deref(), export.as_deref(), &cli),
        Commands::Fit {
            input,
            keypoints,
            hints,
            config,
            debug_prefix,
            silhouettes,
        } => fit::run(
            input,
            keypoints.as_deref(),
            hints.to_hints(),
            config.as_deref(),
            debug_prefix.as_deref(),
            *silhouettes,
            &cli,
        ),
        Commands::Classify {
            bust,
            waist,
            hips,
            unit,
            silhouettes,
        } => classify::run(*bust, *waist, *hips, *unit, *silhouettes, &cli),
        Commands::SizeChart => size_chart::run(&cli),
        Commands::Batch {
            inputs,
            hints,
            config,
            jobs,
        } => batch::run(inputs, hints.to_hints(), config.as_deref(), *jobs, &cli),
        Commands::Config { output } => config::run(output.as_deref(), &cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(fit_err) = e.downcast_ref::<body_fit::FitError>() {
                eprintln!("{}: {}", "Error".red().bold(), fit_err);
                eprintln!("  {}: {}", "Code".cyan(), fit_err.code());
                eprintln!(
                    "  {}: {}",
                    "Suggestion".green(),
                    fit_err.recovery_suggestion()
                );
                if let Some(location) = fit_err.location() {
                    eprintln!("  {}: {}", "Location".yellow(), location);
                }
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
